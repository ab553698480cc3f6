//! Statement classification and compiled statement metadata.

use crate::handle::StatementHandle;

/// The kind of a SQL statement, judged from its first three characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
   Select,
   /// INSERT, UPDATE, REPLACE or DELETE.
   Update,
   Attach,
   Begin,
   /// COMMIT or END.
   Commit,
   /// ROLLBACK.
   Abort,
   Pragma,
   /// CREATE, DROP or ALTER.
   Ddl,
   /// ANALYZE or DETACH.
   Unprepared,
   Other,
}

impl StatementKind {
   /// Classify `sql` by its 3-character prefix, ignoring case and any
   /// surrounding whitespace or control characters.
   pub fn classify(sql: &str) -> Self {
      let trimmed = trim_sql(sql);
      let Some(prefix) = trimmed.get(..3) else {
         return StatementKind::Other;
      };

      match prefix.to_ascii_uppercase().as_str() {
         "SEL" => StatementKind::Select,
         "INS" | "UPD" | "REP" | "DEL" => StatementKind::Update,
         "ATT" => StatementKind::Attach,
         "COM" | "END" => StatementKind::Commit,
         "ROL" => StatementKind::Abort,
         "BEG" => StatementKind::Begin,
         "PRA" => StatementKind::Pragma,
         "CRE" | "DRO" | "ALT" => StatementKind::Ddl,
         "ANA" | "DET" => StatementKind::Unprepared,
         _ => StatementKind::Other,
      }
   }

   /// Only queries and data modification statements are worth caching.
   pub fn is_cacheable(self) -> bool {
      matches!(self, StatementKind::Select | StatementKind::Update)
   }

   /// BEGIN, COMMIT and ROLLBACK, which sessions intercept.
   pub fn is_transaction_control(self) -> bool {
      matches!(
         self,
         StatementKind::Begin | StatementKind::Commit | StatementKind::Abort
      )
   }
}

/// Strip leading and trailing characters at or below the space character.
pub fn trim_sql(sql: &str) -> &str {
   sql.trim_matches(|c: char| c <= ' ')
}

/// Metadata describing a compiled statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementInfo {
   pub num_parameters: usize,
   pub read_only: bool,
   pub column_names: Vec<String>,
}

/// A statement compiled on a connection, together with its metadata.
#[derive(Debug)]
pub struct PreparedStatement {
   sql: String,
   pub(crate) handle: StatementHandle,
   num_parameters: usize,
   kind: StatementKind,
   read_only: bool,
}

impl PreparedStatement {
   pub(crate) fn new(sql: String, handle: StatementHandle) -> Self {
      let kind = StatementKind::classify(&sql);
      Self {
         num_parameters: handle.bind_parameter_count(),
         read_only: handle.read_only(),
         sql,
         handle,
         kind,
      }
   }

   pub fn sql(&self) -> &str {
      &self.sql
   }

   pub fn num_parameters(&self) -> usize {
      self.num_parameters
   }

   pub fn kind(&self) -> StatementKind {
      self.kind
   }

   pub fn read_only(&self) -> bool {
      self.read_only
   }

   pub fn is_cacheable(&self) -> bool {
      self.kind.is_cacheable()
   }

   pub fn info(&self) -> StatementInfo {
      StatementInfo {
         num_parameters: self.num_parameters,
         read_only: self.read_only,
         column_names: (0..self.handle.column_count())
            .map(|i| self.handle.column_name(i))
            .collect(),
      }
   }
}
