//! Column values for the convenience insert, replace and update methods.

use indexmap::IndexMap;
use sqlite_session_conn::BindArg;

use crate::error::{Error, Result};

/// What the engine does when an insert or update violates a constraint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConflictAlgorithm {
   /// Plain statement; the engine's default is ABORT.
   #[default]
   None,
   Rollback,
   Abort,
   Fail,
   Ignore,
   Replace,
}

impl ConflictAlgorithm {
   /// The ` OR X ` fragment placed after INSERT or UPDATE.
   pub fn clause(self) -> &'static str {
      match self {
         ConflictAlgorithm::None => "",
         ConflictAlgorithm::Rollback => " OR ROLLBACK ",
         ConflictAlgorithm::Abort => " OR ABORT ",
         ConflictAlgorithm::Fail => " OR FAIL ",
         ConflictAlgorithm::Ignore => " OR IGNORE ",
         ConflictAlgorithm::Replace => " OR REPLACE ",
      }
   }
}

/// Column name to value map that keeps insertion order.
///
/// # Examples
///
/// ```
/// use sqlite_session::ContentValues;
///
/// let mut values = ContentValues::new();
/// values.put("name", "Ada");
/// values.put("age", 36);
/// assert_eq!(values.keys().collect::<Vec<_>>(), vec!["name", "age"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentValues {
   values: IndexMap<String, BindArg>,
}

impl ContentValues {
   pub fn new() -> Self {
      Self::default()
   }

   /// Set a column, replacing any earlier value but keeping its position.
   pub fn put(&mut self, column: impl Into<String>, value: impl Into<BindArg>) -> &mut Self {
      self.values.insert(column.into(), value.into());
      self
   }

   pub fn put_null(&mut self, column: impl Into<String>) -> &mut Self {
      self.values.insert(column.into(), BindArg::Null);
      self
   }

   pub fn get(&self, column: &str) -> Option<&BindArg> {
      self.values.get(column)
   }

   pub fn remove(&mut self, column: &str) -> Option<BindArg> {
      self.values.shift_remove(column)
   }

   pub fn contains_key(&self, column: &str) -> bool {
      self.values.contains_key(column)
   }

   pub fn len(&self) -> usize {
      self.values.len()
   }

   pub fn is_empty(&self) -> bool {
      self.values.is_empty()
   }

   pub fn clear(&mut self) {
      self.values.clear();
   }

   pub fn keys(&self) -> impl Iterator<Item = &str> {
      self.values.keys().map(String::as_str)
   }

   pub fn iter(&self) -> impl Iterator<Item = (&str, &BindArg)> {
      self.values.iter().map(|(k, v)| (k.as_str(), v))
   }
}

impl<K: Into<String>, V: Into<BindArg>> FromIterator<(K, V)> for ContentValues {
   fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
      Self {
         values: iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
      }
   }
}

/// Build `INSERT [OR X] INTO table (cols) VALUES (?, ...)` and its arguments.
///
/// Empty `values` insert a NULL into `null_column_hack`, since SQL has no
/// way to insert a row without naming a column.
pub(crate) fn insert_sql(
   table: &str,
   null_column_hack: Option<&str>,
   values: &ContentValues,
   algorithm: ConflictAlgorithm,
) -> Result<(String, Vec<BindArg>)> {
   let mut sql = String::with_capacity(64);
   sql.push_str("INSERT");
   sql.push_str(algorithm.clause());
   sql.push_str(" INTO ");
   sql.push_str(table);
   sql.push('(');

   if values.is_empty() {
      let Some(column) = null_column_hack else {
         return Err(Error::InvalidArgument(format!(
            "cannot insert an empty row into {table} without a null column hack"
         )));
      };
      sql.push_str(column);
      sql.push_str(") VALUES (NULL)");
      return Ok((sql, Vec::new()));
   }

   sql.push_str(&values.keys().collect::<Vec<_>>().join(","));
   sql.push_str(") VALUES (");
   sql.push_str(&vec!["?"; values.len()].join(","));
   sql.push(')');

   Ok((sql, values.values.values().cloned().collect()))
}

/// Build `UPDATE [OR X] table SET col=?,... [WHERE ...]` and its arguments,
/// value arguments first.
pub(crate) fn update_sql(
   table: &str,
   values: &ContentValues,
   where_clause: Option<&str>,
   where_args: &[BindArg],
   algorithm: ConflictAlgorithm,
) -> Result<(String, Vec<BindArg>)> {
   if values.is_empty() {
      return Err(Error::InvalidArgument("Empty values".to_string()));
   }

   let mut sql = String::with_capacity(120);
   sql.push_str("UPDATE ");
   sql.push_str(algorithm.clause());
   sql.push_str(table);
   sql.push_str(" SET ");
   let assignments: Vec<String> = values.keys().map(|k| format!("{k}=?")).collect();
   sql.push_str(&assignments.join(","));
   append_where(&mut sql, where_clause);

   let mut args: Vec<BindArg> = values.values.values().cloned().collect();
   args.extend_from_slice(where_args);
   Ok((sql, args))
}

/// Build `DELETE FROM table [WHERE ...]`.
pub(crate) fn delete_sql(table: &str, where_clause: Option<&str>) -> String {
   let mut sql = format!("DELETE FROM {table}");
   append_where(&mut sql, where_clause);
   sql
}

fn append_where(sql: &mut String, where_clause: Option<&str>) {
   if let Some(clause) = where_clause.filter(|c| !c.is_empty()) {
      sql.push_str(" WHERE ");
      sql.push_str(clause);
   }
}
