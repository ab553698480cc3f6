//! Compiled statements with their own bind arguments.

use sqlite_session_conn::{BindArg, StatementInfo, StatementKind, trim_sql};

use crate::database::Database;
use crate::error::Result;

/// Prepare `sql` to learn its parameters and columns. Transaction control
/// statements are not compiled since the session routes them itself.
pub(crate) fn describe(database: &Database, sql: &str) -> Result<StatementInfo> {
   if StatementKind::classify(sql).is_transaction_control() {
      return Ok(StatementInfo::default());
   }
   database.with_session(|session| session.prepare(sql))
}

/// Size `args` to the statement's parameter count, padding with NULL.
pub(crate) fn initial_bind_args(info: &StatementInfo, args: &[BindArg]) -> Result<Vec<BindArg>> {
   if args.len() > info.num_parameters {
      return Err(sqlite_session_conn::Error::BindArgumentCount {
         expected: info.num_parameters,
         actual: args.len(),
      }
      .into());
   }
   let mut bind_args = args.to_vec();
   bind_args.resize(info.num_parameters, BindArg::Null);
   Ok(bind_args)
}

/// A statement compiled against a [`Database`] that can be bound and run
/// repeatedly.
///
/// The SQL is validated when the statement is created. Parameters that are
/// never bound are NULL.
///
/// # Examples
///
/// ```
/// use sqlite_session::Database;
///
/// let db = Database::create_in_memory().unwrap();
/// db.exec_sql("CREATE TABLE t (a)").unwrap();
///
/// let mut insert = db.compile_statement("INSERT INTO t VALUES (?)").unwrap();
/// for i in 0..3 {
///    insert.bind_long(1, i).unwrap();
///    insert.execute_insert().unwrap();
/// }
///
/// let count = db.compile_statement("SELECT count(*) FROM t").unwrap();
/// assert_eq!(count.simple_query_for_long().unwrap(), 3);
/// ```
#[derive(Debug)]
pub struct Statement {
   database: Database,
   sql: String,
   info: StatementInfo,
   bind_args: Vec<BindArg>,
}

impl Statement {
   pub(crate) fn new(database: Database, sql: &str, args: &[BindArg]) -> Result<Self> {
      let sql = trim_sql(sql).to_owned();
      let info = describe(&database, &sql)?;
      let bind_args = initial_bind_args(&info, args)?;
      Ok(Self {
         database,
         sql,
         info,
         bind_args,
      })
   }

   pub fn sql(&self) -> &str {
      &self.sql
   }

   pub fn num_parameters(&self) -> usize {
      self.info.num_parameters
   }

   pub fn column_names(&self) -> &[String] {
      &self.info.column_names
   }

   pub fn is_read_only(&self) -> bool {
      self.info.read_only
   }

   pub fn bind_args(&self) -> &[BindArg] {
      &self.bind_args
   }

   /// Bind `value` to the 1-based parameter `index`.
   pub fn bind(&mut self, index: usize, value: impl Into<BindArg>) -> Result<()> {
      let count = self.bind_args.len();
      if index == 0 || index > count {
         return Err(sqlite_session_conn::Error::BindIndexOutOfRange { index, count }.into());
      }
      self.bind_args[index - 1] = value.into();
      Ok(())
   }

   pub fn bind_null(&mut self, index: usize) -> Result<()> {
      self.bind(index, BindArg::Null)
   }

   pub fn bind_long(&mut self, index: usize, value: i64) -> Result<()> {
      self.bind(index, value)
   }

   pub fn bind_double(&mut self, index: usize, value: f64) -> Result<()> {
      self.bind(index, value)
   }

   pub fn bind_string(&mut self, index: usize, value: &str) -> Result<()> {
      self.bind(index, value)
   }

   pub fn bind_blob(&mut self, index: usize, value: &[u8]) -> Result<()> {
      self.bind(index, value)
   }

   /// Bind every argument as text, starting at index 1.
   pub fn bind_all_args_as_strings(&mut self, args: &[&str]) -> Result<()> {
      for (i, arg) in args.iter().enumerate() {
         self.bind_string(i + 1, arg)?;
      }
      Ok(())
   }

   /// Reset every parameter to NULL.
   pub fn clear_bindings(&mut self) {
      self.bind_args.fill(BindArg::Null);
   }

   /// Run a statement that returns no rows.
   pub fn execute(&self) -> Result<()> {
      self
         .database
         .with_session(|session| session.execute(&self.sql, &self.bind_args))
   }

   /// Run an UPDATE or DELETE and return the number of rows it changed.
   pub fn execute_update_delete(&self) -> Result<i64> {
      self.database.with_session(|session| {
         session.execute_for_changed_row_count(&self.sql, &self.bind_args)
      })
   }

   /// Run an INSERT and return the new row id, or -1 when no row was inserted.
   pub fn execute_insert(&self) -> Result<i64> {
      self.database.with_session(|session| {
         session.execute_for_last_inserted_row_id(&self.sql, &self.bind_args)
      })
   }

   /// Run a query returning one row with one integer column.
   pub fn simple_query_for_long(&self) -> Result<i64> {
      self
         .database
         .with_session(|session| session.execute_for_long(&self.sql, &self.bind_args))
   }

   /// Run a query returning one row with one text column. NULL reads as `None`.
   pub fn simple_query_for_string(&self) -> Result<Option<String>> {
      self
         .database
         .with_session(|session| session.execute_for_string(&self.sql, &self.bind_args))
   }
}
