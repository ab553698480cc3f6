//! Windowed cursor over the rows of a query.
//!
//! Rows are paged into a [`CursorWindow`] on demand. The first fill counts
//! every row of the result and records how many rows the window holds; later
//! fills start a third of that capacity before the requested row so short
//! scrolls in either direction stay inside the window.

use indexmap::IndexMap;
use sqlite_session_conn::BindArg;
use sqlite_session_window::{CursorWindow, StorageClass, pick_fill_window_start_position};
use tracing::{debug, trace};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::statement::{describe, initial_bind_args};

/// A cursor over the result of a query, positioned before the first row
/// when created.
pub struct Cursor {
   database: Database,
   sql: String,
   bind_args: Vec<BindArg>,
   columns: Vec<String>,
   column_map: IndexMap<String, usize>,
   window: Option<CursorWindow>,
   count: Option<usize>,
   window_capacity: usize,
   position: isize,
   closed: bool,
}

impl Cursor {
   pub(crate) fn new(database: Database, sql: &str, args: &[BindArg]) -> Result<Self> {
      let info = describe(&database, sql)?;
      let bind_args = initial_bind_args(&info, args)?;

      let mut column_map = IndexMap::with_capacity(info.column_names.len());
      for (i, name) in info.column_names.iter().enumerate() {
         column_map.entry(name.clone()).or_insert(i);
      }

      Ok(Self {
         database,
         sql: sql.to_owned(),
         bind_args,
         columns: info.column_names,
         column_map,
         window: None,
         count: None,
         window_capacity: 0,
         position: -1,
         closed: false,
      })
   }

   pub fn sql(&self) -> &str {
      &self.sql
   }

   // ─── Window filling ──────────────────────────────────────────────────────

   fn fill_window(&mut self, required_position: usize) -> Result<()> {
      let window = match &self.window {
         Some(window) => window.clone(),
         None => {
            let window = CursorWindow::new(self.database.path());
            self.window = Some(window.clone());
            window
         }
      };

      if let Err(e) = self.fill(&window, required_position) {
         // A partially filled window must never be read.
         self.close_window();
         return Err(e);
      }
      Ok(())
   }

   fn fill(&mut self, window: &CursorWindow, required_position: usize) -> Result<()> {
      match self.count {
         None => {
            let start = pick_fill_window_start_position(required_position, 0);
            let count = self.database.fill_window(
               &self.sql,
               &self.bind_args,
               window,
               start,
               required_position,
               true,
            )?;
            self.count = Some(count);
            self.window_capacity = window.num_rows()?;
            debug!(
               sql = %self.sql,
               count,
               window_capacity = self.window_capacity,
               "Received count from first window fill"
            );
         }
         Some(_) => {
            let start = pick_fill_window_start_position(required_position, self.window_capacity);
            self.database.fill_window(
               &self.sql,
               &self.bind_args,
               window,
               start,
               required_position,
               false,
            )?;
            trace!(
               sql = %self.sql,
               required_position,
               start = window.start_position()?,
               rows = window.num_rows()?,
               "Refilled cursor window"
            );
         }
      }
      Ok(())
   }

   /// Make sure `position` is buffered, refilling the window when it is not.
   fn on_move(&mut self, position: usize) -> Result<()> {
      let buffered = match &self.window {
         Some(window) => window.contains_position(position)?,
         None => false,
      };
      if buffered {
         return Ok(());
      }

      self.fill_window(position)?;
      match &self.window {
         Some(window) if window.contains_position(position)? => Ok(()),
         Some(window) => Err(Error::RowNotInWindow {
            position,
            start: window.start_position()?,
            rows: window.num_rows()?,
         }),
         None => Err(Error::InvalidCursorState("missing its window")),
      }
   }

   fn close_window(&mut self) {
      if let Some(window) = self.window.take() {
         window.close();
      }
   }

   /// The window rows are buffered in, if one has been filled or set.
   pub fn window(&self) -> Option<&CursorWindow> {
      self.window.as_ref()
   }

   /// Replace the window, closing the previous one. The row count is
   /// recomputed on the next fill.
   pub fn set_window(&mut self, window: Option<CursorWindow>) {
      let same = match (&self.window, &window) {
         (Some(current), Some(new)) => current.ptr_eq(new),
         _ => false,
      };
      if !same {
         self.close_window();
         self.window = window;
      }
      self.count = None;
   }

   // ─── Positioning ─────────────────────────────────────────────────────────

   fn check_open(&self) -> Result<()> {
      if self.closed {
         return Err(Error::InvalidCursorState("closed"));
      }
      Ok(())
   }

   /// Number of rows in the result. The first call runs the query.
   pub fn count(&mut self) -> Result<usize> {
      self.check_open()?;
      if self.count.is_none() {
         self.fill_window(0)?;
      }
      Ok(self.count.unwrap_or(0))
   }

   /// Current position: -1 before the first row, `count` after the last.
   pub fn position(&self) -> isize {
      self.position
   }

   /// Move to absolute `position`. Returns `false` when it is outside the
   /// result, leaving the cursor before the first or after the last row.
   pub fn move_to_position(&mut self, position: isize) -> Result<bool> {
      let count = self.count()? as isize;
      if position >= count {
         self.position = count;
         return Ok(false);
      }
      if position < 0 {
         self.position = -1;
         return Ok(false);
      }
      if position == self.position
         && self
            .window
            .as_ref()
            .is_some_and(|w| w.contains_position(position as usize).unwrap_or(false))
      {
         return Ok(true);
      }

      if let Err(e) = self.on_move(position as usize) {
         self.position = -1;
         return Err(e);
      }
      self.position = position;
      Ok(true)
   }

   pub fn move_by(&mut self, offset: isize) -> Result<bool> {
      self.move_to_position(self.position + offset)
   }

   pub fn move_to_first(&mut self) -> Result<bool> {
      self.move_to_position(0)
   }

   pub fn move_to_last(&mut self) -> Result<bool> {
      let count = self.count()? as isize;
      self.move_to_position(count - 1)
   }

   pub fn move_to_next(&mut self) -> Result<bool> {
      self.move_to_position(self.position + 1)
   }

   pub fn move_to_previous(&mut self) -> Result<bool> {
      self.move_to_position(self.position - 1)
   }

   pub fn is_first(&mut self) -> Result<bool> {
      Ok(self.position == 0 && self.count()? != 0)
   }

   pub fn is_last(&mut self) -> Result<bool> {
      let count = self.count()? as isize;
      Ok(count != 0 && self.position == count - 1)
   }

   pub fn is_before_first(&mut self) -> Result<bool> {
      Ok(self.count()? == 0 || self.position == -1)
   }

   pub fn is_after_last(&mut self) -> Result<bool> {
      let count = self.count()? as isize;
      Ok(count == 0 || self.position == count)
   }

   // ─── Columns ─────────────────────────────────────────────────────────────

   pub fn column_names(&self) -> &[String] {
      &self.columns
   }

   pub fn column_count(&self) -> usize {
      self.columns.len()
   }

   pub fn column_name(&self, column: usize) -> Option<&str> {
      self.columns.get(column).map(String::as_str)
   }

   /// Index of the column called `name`. A `table.` qualifier is ignored.
   pub fn column_index(&self, name: &str) -> Option<usize> {
      let name = name.rsplit_once('.').map_or(name, |(_, column)| column);
      self.column_map.get(name).copied()
   }

   pub fn column_index_or_throw(&self, name: &str) -> Result<usize> {
      self
         .column_index(name)
         .ok_or_else(|| Error::ColumnNotFound(name.to_owned()))
   }

   // ─── Values ──────────────────────────────────────────────────────────────

   /// The window and absolute row the cursor currently points at.
   fn current(&self) -> Result<(&CursorWindow, usize)> {
      self.check_open()?;
      let count = self.count.unwrap_or(0) as isize;
      if self.position < 0 || self.position >= count {
         return Err(Error::InvalidCursorState("not positioned on a row"));
      }
      let window = self
         .window
         .as_ref()
         .ok_or(Error::InvalidCursorState("missing its window"))?;
      Ok((window, self.position as usize))
   }

   pub fn get_type(&self, column: usize) -> Result<StorageClass> {
      let (window, row) = self.current()?;
      Ok(window.get_type(row, column)?)
   }

   pub fn is_null(&self, column: usize) -> Result<bool> {
      let (window, row) = self.current()?;
      Ok(window.is_null(row, column)?)
   }

   pub fn get_long(&self, column: usize) -> Result<i64> {
      let (window, row) = self.current()?;
      Ok(window.get_long(row, column)?)
   }

   pub fn get_int(&self, column: usize) -> Result<i32> {
      let (window, row) = self.current()?;
      Ok(window.get_int(row, column)?)
   }

   pub fn get_short(&self, column: usize) -> Result<i16> {
      let (window, row) = self.current()?;
      Ok(window.get_short(row, column)?)
   }

   pub fn get_double(&self, column: usize) -> Result<f64> {
      let (window, row) = self.current()?;
      Ok(window.get_double(row, column)?)
   }

   pub fn get_float(&self, column: usize) -> Result<f32> {
      let (window, row) = self.current()?;
      Ok(window.get_float(row, column)?)
   }

   pub fn get_string(&self, column: usize) -> Result<String> {
      let (window, row) = self.current()?;
      Ok(window.get_string(row, column)?)
   }

   pub fn get_blob(&self, column: usize) -> Result<Vec<u8>> {
      let (window, row) = self.current()?;
      Ok(window.get_blob(row, column)?)
   }

   // ─── Lifecycle ───────────────────────────────────────────────────────────

   /// Close the cursor and its window. Calling it again is a no-op.
   pub fn close(&mut self) {
      if !self.closed {
         self.closed = true;
         self.close_window();
      }
   }

   pub fn is_closed(&self) -> bool {
      self.closed
   }
}

impl Drop for Cursor {
   fn drop(&mut self) {
      self.close();
   }
}

impl std::fmt::Debug for Cursor {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Cursor")
         .field("sql", &self.sql)
         .field("columns", &self.columns)
         .field("count", &self.count)
         .field("position", &self.position)
         .field("window", &self.window)
         .field("closed", &self.closed)
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use sqlite_session_conn::bind_args;

   use super::*;

   fn database(rows: i64) -> Database {
      let db = Database::create_in_memory().unwrap();
      db.exec_sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB)")
         .unwrap();
      let mut insert = db
         .compile_statement("INSERT INTO t (name, score, data) VALUES (?, ?, ?)")
         .unwrap();
      for i in 0..rows {
         insert.bind_string(1, &format!("name-{i}")).unwrap();
         insert.bind_double(2, i as f64 / 2.0).unwrap();
         insert.bind_blob(3, &[i as u8]).unwrap();
         insert.execute_insert().unwrap();
      }
      db
   }

   #[test]
   fn test_starts_before_first() {
      let db = database(3);
      let mut cursor = db.raw_query("SELECT * FROM t", &[]).unwrap();
      assert_eq!(cursor.position(), -1);
      assert!(cursor.is_before_first().unwrap());
      assert_eq!(cursor.count().unwrap(), 3);

      let err = cursor.get_long(0).unwrap_err();
      assert_eq!(err.error_code(), "INVALID_CURSOR_STATE");
   }

   #[test]
   fn test_navigation() {
      let db = database(5);
      let mut cursor = db.raw_query("SELECT id FROM t ORDER BY id", &[]).unwrap();

      assert!(cursor.move_to_last().unwrap());
      assert!(cursor.is_last().unwrap());
      assert_eq!(cursor.get_long(0).unwrap(), 5);

      assert!(cursor.move_by(-2).unwrap());
      assert_eq!(cursor.get_long(0).unwrap(), 3);

      assert!(cursor.move_to_first().unwrap());
      assert!(cursor.is_first().unwrap());
      assert!(!cursor.move_to_previous().unwrap());
      assert!(cursor.is_before_first().unwrap());

      assert!(!cursor.move_to_position(10).unwrap());
      assert!(cursor.is_after_last().unwrap());
      assert_eq!(cursor.position(), 5);
   }

   #[test]
   fn test_column_lookup() {
      let db = database(1);
      let cursor = db.raw_query("SELECT id, name AS label FROM t", &[]).unwrap();
      assert_eq!(cursor.column_count(), 2);
      assert_eq!(cursor.column_names(), ["id", "label"]);
      assert_eq!(cursor.column_index("label"), Some(1));
      assert_eq!(cursor.column_index("t.id"), Some(0));
      assert_eq!(cursor.column_index("missing"), None);
      assert_eq!(
         cursor.column_index_or_throw("missing").unwrap_err().error_code(),
         "COLUMN_NOT_FOUND"
      );
   }

   #[test]
   fn test_typed_getters() {
      let db = database(2);
      let mut cursor = db
         .raw_query("SELECT id, name, score, data, NULL FROM t WHERE id = ?", &bind_args![2])
         .unwrap();
      assert!(cursor.move_to_next().unwrap());

      assert_eq!(cursor.get_type(0).unwrap(), StorageClass::Integer);
      assert_eq!(cursor.get_int(0).unwrap(), 2);
      assert_eq!(cursor.get_string(1).unwrap(), "name-1");
      assert_eq!(cursor.get_double(2).unwrap(), 0.5);
      assert_eq!(cursor.get_float(2).unwrap(), 0.5);
      assert_eq!(cursor.get_blob(3).unwrap(), vec![1_u8]);
      assert!(cursor.is_null(4).unwrap());
      assert_eq!(cursor.get_long(4).unwrap(), 0);
      assert_eq!(cursor.get_string(4).unwrap(), "");

      let err = cursor.get_long(3).unwrap_err();
      assert_eq!(err.error_code(), "TYPE_MISMATCH");
   }

   #[test]
   fn test_small_window_refills() {
      let db = database(200);
      let mut cursor = db.raw_query("SELECT id, name FROM t ORDER BY id", &[]).unwrap();
      cursor.set_window(Some(CursorWindow::with_capacity("small", 1024)));

      let mut seen = Vec::new();
      while cursor.move_to_next().unwrap() {
         let window = cursor.window().unwrap();
         let position = cursor.position() as usize;
         assert!(window.contains_position(position).unwrap());
         seen.push(cursor.get_long(0).unwrap());
      }

      assert_eq!(seen, (1..=200_i64).collect::<Vec<_>>());
      assert!(cursor.window().unwrap().num_rows().unwrap() < 200);
   }

   #[test]
   fn test_close_closes_window() {
      let db = database(2);
      let mut cursor = db.raw_query("SELECT * FROM t", &[]).unwrap();
      assert!(cursor.move_to_first().unwrap());
      let window = cursor.window().unwrap().clone();

      cursor.close();
      cursor.close();
      assert!(cursor.is_closed());
      assert!(window.is_closed());
      assert_eq!(cursor.count().unwrap_err().error_code(), "INVALID_CURSOR_STATE");
   }

   #[test]
   fn test_failed_fill_closes_window() {
      let db = database(2);
      let mut cursor = db.raw_query("SELECT * FROM t", &[]).unwrap();
      let window = CursorWindow::new("doomed");
      cursor.set_window(Some(window.clone()));

      db.exec_sql("DROP TABLE t").unwrap();
      assert!(cursor.count().is_err());
      assert!(window.is_closed());
      assert!(cursor.window().is_none());
   }
}
