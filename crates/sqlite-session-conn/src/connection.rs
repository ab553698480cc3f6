//! A single native database connection.
//!
//! [`Connection`] owns one `sqlite3` handle and the LRU cache of statements
//! compiled on it. Opening a connection applies the engine settings from its
//! [`Configuration`] through PRAGMA statements, writing each one only when the
//! current value differs.
//!
//! Statements are checked out of the cache while they run and returned after
//! they are reset, so a cached statement is never used by two callers at once.

use std::ffi::{CString, c_int};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use libsqlite3_sys::{
   SQLITE_BLOB, SQLITE_BUSY, SQLITE_DONE, SQLITE_ERROR, SQLITE_FLOAT, SQLITE_INTEGER,
   SQLITE_LOCKED, SQLITE_MISUSE, SQLITE_OK, SQLITE_ROW, SQLITE_TEXT, sqlite3, sqlite3_interrupt,
};
use parking_lot::Mutex;
use sqlite_session_window::CursorWindow;
use tracing::{debug, trace, warn};

use crate::cache::StatementCache;
use crate::config::{Configuration, defaults};
use crate::error::{Error, Result, SqliteError};
use crate::handle::ConnectionHandle;
use crate::statement::{PreparedStatement, StatementInfo, trim_sql};
use crate::value::BindArg;

/// Steps retried while the database is busy or locked during a window fill.
const MAX_FILL_RETRIES: u32 = 50;

struct RawDb(*mut sqlite3);

// The pointer is only dereferenced by sqlite3_interrupt, which is safe to call
// from any thread while the connection is open; closing clears it under the lock.
unsafe impl Send for RawDb {}

/// Interrupts statements running on a connection from another thread.
#[derive(Clone)]
pub struct InterruptHandle {
   db: Arc<Mutex<RawDb>>,
}

impl InterruptHandle {
   fn new(db: *mut sqlite3) -> Self {
      Self {
         db: Arc::new(Mutex::new(RawDb(db))),
      }
   }

   /// Interrupt the statement currently running on the connection, which then
   /// fails with [`Error::OperationCanceled`]. Does nothing once the
   /// connection is closed.
   pub fn interrupt(&self) {
      let db = self.db.lock();
      if !db.0.is_null() {
         // SAFETY: the pointer is non-NULL only while the connection is open.
         unsafe { sqlite3_interrupt(db.0) };
      }
   }

   fn detach(&self) {
      self.db.lock().0 = std::ptr::null_mut();
   }
}

impl std::fmt::Debug for InterruptHandle {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("InterruptHandle")
         .field("attached", &!self.db.lock().0.is_null())
         .finish()
   }
}

enum CopyRow {
   Copied,
   Full,
}

/// One open connection to a database.
pub struct Connection {
   config: Configuration,
   handle: Option<ConnectionHandle>,
   cache: StatementCache<PreparedStatement>,
   interrupt: InterruptHandle,
}

impl Connection {
   /// Open the database described by `config` and apply its settings.
   pub fn open(config: Configuration) -> Result<Self> {
      config.validate()?;

      let path = CString::new(config.path.as_str()).map_err(|_| Error::NulByte(config.path.clone()))?;
      let mut handle = ConnectionHandle::open(&path, config.open_flags.to_sqlite())
         .map_err(|source| open_error(&config, source))?;

      handle
         .busy_timeout(defaults::BUSY_TIMEOUT_MS)
         .map_err(|source| open_error(&config, source))?;

      if let Some(lookaside) = config.lookaside {
         handle
            .configure_lookaside(lookaside.slot_size, lookaside.slot_count)
            .map_err(|source| open_error(&config, source))?;
      }

      let interrupt = InterruptHandle::new(handle.as_ptr());
      let cache = StatementCache::with_finalizer(config.max_sql_cache_size, |sql, statement| {
         trace!(sql = %sql, "Finalizing cached statement");
         drop(statement);
      });

      let mut connection = Self {
         config,
         handle: Some(handle),
         cache,
         interrupt,
      };

      // Dropping the connection on failure closes the handle.
      connection.apply_settings()?;

      debug!(path = %connection.config.label(), "Opened connection");
      Ok(connection)
   }

   /// Finalize every cached statement and close the native handle.
   ///
   /// Closing an already closed connection does nothing.
   pub fn close(&mut self) {
      if let Some(handle) = self.handle.take() {
         self.interrupt.detach();
         self.cache.clear();
         drop(handle);
         debug!(path = %self.config.label(), "Closed connection");
      }
   }

   pub fn is_open(&self) -> bool {
      self.handle.is_some()
   }

   pub fn config(&self) -> &Configuration {
      &self.config
   }

   pub fn label(&self) -> &str {
      self.config.label()
   }

   /// A handle that can interrupt this connection from another thread.
   pub fn interrupt_handle(&self) -> InterruptHandle {
      self.interrupt.clone()
   }

   pub fn cached_statement_count(&self) -> usize {
      self.cache.len()
   }

   pub fn is_statement_cached(&self, sql: &str) -> bool {
      self.cache.has(trim_sql(sql))
   }

   // ─── Settings ────────────────────────────────────────────────────────────

   fn apply_settings(&mut self) -> Result<()> {
      self.set_page_size()?;
      self.set_foreign_key_mode()?;
      self.set_wal_mode()?;
      self.set_journal_size_limit()?;
      self.set_auto_checkpoint_interval()?;
      Ok(())
   }

   fn is_writable_file(&self) -> bool {
      !self.config.is_in_memory_db() && !self.config.is_read_only()
   }

   fn set_page_size(&mut self) -> Result<()> {
      if self.is_writable_file() {
         let value = self.execute_for_long("PRAGMA page_size", &[])?;
         if value != defaults::PAGE_SIZE {
            self.execute(&format!("PRAGMA page_size={}", defaults::PAGE_SIZE), &[])?;
         }
      }
      Ok(())
   }

   fn set_foreign_key_mode(&mut self) -> Result<()> {
      if !self.config.is_read_only() {
         let wanted = i64::from(self.config.foreign_key_constraints_enabled);
         let value = self.execute_for_long("PRAGMA foreign_keys", &[])?;
         if value != wanted {
            self.execute(&format!("PRAGMA foreign_keys={wanted}"), &[])?;
         }
      }
      Ok(())
   }

   fn set_wal_mode(&mut self) -> Result<()> {
      if self.is_writable_file() {
         if self.config.is_write_ahead_logging_enabled() {
            self.set_journal_mode("WAL")?;
            self.set_sync_mode(defaults::WAL_SYNC_MODE)?;
         } else {
            self.set_journal_mode(defaults::JOURNAL_MODE)?;
            self.set_sync_mode(defaults::SYNC_MODE)?;
         }
      }
      Ok(())
   }

   fn set_journal_mode(&mut self, wanted: &str) -> Result<()> {
      let value = self.execute_for_string("PRAGMA journal_mode", &[])?.unwrap_or_default();
      if value.eq_ignore_ascii_case(wanted) {
         return Ok(());
      }

      match self.execute_for_string(&format!("PRAGMA journal_mode={wanted}"), &[]) {
         Ok(Some(result)) if result.eq_ignore_ascii_case(wanted) => return Ok(()),
         Ok(_) => {}
         // BUSY when another connection holds the database in WAL mode.
         Err(Error::SqlExecution { source, .. }) => {
            trace!(error = %source, "Changing journal mode failed");
         }
         Err(e) => return Err(e),
      }

      warn!(
         path = %self.config.label(),
         from = %value,
         to = %wanted,
         "Could not change the database journal mode; another connection may have it open"
      );
      Ok(())
   }

   fn set_sync_mode(&mut self, wanted: &str) -> Result<()> {
      let value = self.execute_for_string("PRAGMA synchronous", &[])?.unwrap_or_default();
      if !canonicalize_sync_mode(&value).eq_ignore_ascii_case(canonicalize_sync_mode(wanted)) {
         self.execute(&format!("PRAGMA synchronous={wanted}"), &[])?;
      }
      Ok(())
   }

   fn set_journal_size_limit(&mut self) -> Result<()> {
      if self.is_writable_file() {
         let value = self.execute_for_long("PRAGMA journal_size_limit", &[])?;
         if value != defaults::JOURNAL_SIZE_LIMIT {
            self.execute_for_long(
               &format!("PRAGMA journal_size_limit={}", defaults::JOURNAL_SIZE_LIMIT),
               &[],
            )?;
         }
      }
      Ok(())
   }

   fn set_auto_checkpoint_interval(&mut self) -> Result<()> {
      if self.is_writable_file() {
         let value = self.execute_for_long("PRAGMA wal_autocheckpoint", &[])?;
         if value != defaults::WAL_AUTO_CHECKPOINT {
            self.execute_for_long(
               &format!("PRAGMA wal_autocheckpoint={}", defaults::WAL_AUTO_CHECKPOINT),
               &[],
            )?;
         }
      }
      Ok(())
   }

   // ─── Statements ──────────────────────────────────────────────────────────

   fn handle(&self) -> Result<&ConnectionHandle> {
      self
         .handle
         .as_ref()
         .ok_or_else(|| Error::ConnectionClosed(self.config.label().to_owned()))
   }

   /// Check a statement out of the cache, or compile it.
   fn acquire_prepared_statement(&mut self, sql: &str) -> Result<PreparedStatement> {
      let sql = trim_sql(sql);
      if let Some(statement) = self.cache.remove(sql) {
         return Ok(statement);
      }

      let label = self.config.label().to_owned();
      let handle = self
         .handle
         .as_mut()
         .ok_or_else(|| Error::ConnectionClosed(label.clone()))?;

      match handle.prepare(sql) {
         Ok(Some(raw)) => Ok(PreparedStatement::new(sql.to_owned(), raw)),
         Ok(None) => Err(Error::SqlSyntax {
            sql: sql.to_owned(),
            source: SqliteError::with_message(SQLITE_ERROR, "not an SQL statement"),
         }),
         Err(source) if source.is_corruption() => Err(Error::CorruptionDetected { label, source }),
         Err(source) => Err(Error::SqlSyntax {
            sql: sql.to_owned(),
            source,
         }),
      }
   }

   /// Return a statement to the cache, or finalize it when it cannot be cached.
   fn release_prepared_statement(&mut self, mut statement: PreparedStatement) {
      if !statement.is_cacheable() || !self.is_open() {
         return;
      }

      let reset = statement
         .handle
         .reset()
         .and_then(|()| statement.handle.clear_bindings());

      match reset {
         Ok(()) => {
            let sql = statement.sql().to_owned();
            if let Err(e) = self.cache.put(sql, statement) {
               warn!(error = %e, "Could not return statement to the cache");
            }
         }
         Err(e) => {
            // Dropping the statement finalizes it instead of caching a statement
            // in an unknown state.
            warn!(
               sql = %statement.sql(),
               error = %e,
               "Could not reset prepared statement; removing it from the cache"
            );
         }
      }
   }

   fn bind_arguments(statement: &mut PreparedStatement, args: &[BindArg]) -> Result<()> {
      let expected = statement.num_parameters();
      if args.len() != expected {
         return Err(Error::BindArgumentCount {
            expected,
            actual: args.len(),
         });
      }

      for (i, arg) in args.iter().enumerate() {
         let index = i + 1;
         let handle = &mut statement.handle;
         let status = match arg {
            BindArg::Null => handle.bind_null(index),
            BindArg::Integer(v) => handle.bind_int64(index, *v),
            BindArg::Bool(v) => handle.bind_int64(index, i64::from(*v)),
            BindArg::Float(v) => handle.bind_double(index, *v),
            BindArg::Text(v) => handle.bind_text(index, v),
            BindArg::Blob(v) => handle.bind_blob(index, v),
         };
         if status != SQLITE_OK {
            return Err(Error::SqlExecution {
               sql: statement.sql().to_owned(),
               source: statement.handle.last_error(),
            });
         }
      }
      Ok(())
   }

   /// Acquire, bind, run `f`, and release the statement whatever the outcome.
   fn with_statement<R>(
      &mut self,
      sql: &str,
      args: &[BindArg],
      f: impl FnOnce(&Self, &mut PreparedStatement) -> Result<R>,
   ) -> Result<R> {
      let mut statement = self.acquire_prepared_statement(sql)?;
      let result = Self::bind_arguments(&mut statement, args).and_then(|()| f(self, &mut statement));
      self.release_prepared_statement(statement);
      result
   }

   fn execution_error(&self, sql: &str, source: SqliteError) -> Error {
      if source.is_corruption() {
         Error::CorruptionDetected {
            label: self.config.label().to_owned(),
            source,
         }
      } else if source.is_interrupt() {
         Error::OperationCanceled {
            sql: sql.to_owned(),
         }
      } else {
         Error::SqlExecution {
            sql: sql.to_owned(),
            source,
         }
      }
   }

   fn step(&self, statement: &mut PreparedStatement) -> Result<bool> {
      statement
         .handle
         .step()
         .map_err(|source| self.execution_error(statement.sql(), source))
   }

   /// Step a statement that must not produce rows.
   fn step_non_query(&self, statement: &mut PreparedStatement) -> Result<()> {
      if self.step(statement)? {
         return Err(Error::SqlExecution {
            sql: statement.sql().to_owned(),
            source: SqliteError::with_message(
               SQLITE_MISUSE,
               "Queries can be performed using query or raw_query methods only.",
            ),
         });
      }
      Ok(())
   }

   /// Step to the first row of a single-value query.
   fn step_one_row(&self, statement: &mut PreparedStatement) -> Result<()> {
      if !self.step(statement)? {
         return Err(Error::SqlExecution {
            sql: statement.sql().to_owned(),
            source: SqliteError::with_message(SQLITE_DONE, "query returned no rows"),
         });
      }
      Ok(())
   }

   /// Compile `sql` without running it and describe it.
   pub fn prepare(&mut self, sql: &str) -> Result<StatementInfo> {
      let statement = self.acquire_prepared_statement(sql)?;
      let info = statement.info();
      self.release_prepared_statement(statement);
      Ok(info)
   }

   /// Run a statement that returns no rows.
   pub fn execute(&mut self, sql: &str, args: &[BindArg]) -> Result<()> {
      self.with_statement(sql, args, |conn, statement| conn.step_non_query(statement))
   }

   /// Run a statement and return the number of rows it changed.
   pub fn execute_for_changed_row_count(&mut self, sql: &str, args: &[BindArg]) -> Result<i64> {
      self.with_statement(sql, args, |conn, statement| {
         conn.step_non_query(statement)?;
         Ok(conn.handle()?.changes())
      })
   }

   /// Run an insert and return the new row id, or -1 when nothing was inserted.
   pub fn execute_for_last_inserted_row_id(&mut self, sql: &str, args: &[BindArg]) -> Result<i64> {
      self.with_statement(sql, args, |conn, statement| {
         conn.step_non_query(statement)?;
         let handle = conn.handle()?;
         Ok(if handle.changes() > 0 {
            handle.last_insert_rowid()
         } else {
            -1
         })
      })
   }

   /// Run a query and return the first column of its first row as an integer.
   pub fn execute_for_long(&mut self, sql: &str, args: &[BindArg]) -> Result<i64> {
      self.with_statement(sql, args, |conn, statement| {
         conn.step_one_row(statement)?;
         Ok(statement.handle.column_int64(0))
      })
   }

   /// Run a query and return the first column of its first row as text,
   /// or `None` when that value is NULL.
   pub fn execute_for_string(&mut self, sql: &str, args: &[BindArg]) -> Result<Option<String>> {
      self.with_statement(sql, args, |conn, statement| {
         conn.step_one_row(statement)?;
         if statement.handle.column_type(0) == libsqlite3_sys::SQLITE_NULL {
            return Ok(None);
         }
         Ok(Some(statement.handle.column_text(0).into_owned()))
      })
   }

   /// Run a query and copy rows into `window`, starting at `start_position`.
   ///
   /// When the window fills before `required_position` is reached, it is
   /// restarted at the current row so the required row ends up buffered.
   /// With `count_all_rows` the remaining rows are stepped through after the
   /// window is full so the total can be returned. Returns the number of rows
   /// stepped through; the window's start position is set to where it
   /// actually starts.
   pub fn execute_for_cursor_window(
      &mut self,
      sql: &str,
      args: &[BindArg],
      window: &CursorWindow,
      start_position: usize,
      required_position: usize,
      count_all_rows: bool,
   ) -> Result<usize> {
      let _reference = window.acquire_reference()?;
      self.with_statement(sql, args, |conn, statement| {
         conn.fill_window(
            statement,
            window,
            start_position,
            required_position,
            count_all_rows,
         )
      })
   }

   fn fill_window(
      &self,
      statement: &mut PreparedStatement,
      window: &CursorWindow,
      mut start_position: usize,
      required_position: usize,
      count_all_rows: bool,
   ) -> Result<usize> {
      let num_columns = statement.handle.column_count();
      window.clear()?;
      window.set_num_columns(num_columns)?;
      window.set_start_position(start_position)?;

      let mut total_rows = 0;
      let mut added_rows = 0;
      let mut retries = 0;
      let mut window_full = false;

      while !window_full || count_all_rows {
         let status: c_int = statement.handle.step_raw();
         match status {
            SQLITE_ROW => {
               retries = 0;
               total_rows += 1;
               if start_position >= total_rows || window_full {
                  continue;
               }

               let mut copied = copy_row(window, statement, start_position + added_rows, num_columns)?;
               if matches!(copied, CopyRow::Full)
                  && added_rows > 0
                  && start_position + added_rows <= required_position
               {
                  // The window filled up before reaching the required row.
                  // Start over with this row at the front of the window.
                  window.clear()?;
                  window.set_num_columns(num_columns)?;
                  start_position += added_rows;
                  added_rows = 0;
                  window.set_start_position(start_position)?;
                  copied = copy_row(window, statement, start_position, num_columns)?;
               }

               match copied {
                  CopyRow::Copied => added_rows += 1,
                  CopyRow::Full => window_full = true,
               }
            }
            SQLITE_DONE => break,
            _ if matches!(status & 0xff, SQLITE_BUSY | SQLITE_LOCKED) && retries < MAX_FILL_RETRIES => {
               trace!(retries, "Database locked while filling window, retrying");
               retries += 1;
               thread::sleep(Duration::from_millis(1));
            }
            _ => return Err(self.execution_error(statement.sql(), statement.handle.last_error())),
         }
      }

      trace!(
         sql = %statement.sql(),
         start_position,
         added_rows,
         total_rows,
         "Filled cursor window"
      );
      Ok(total_rows)
   }
}

fn copy_row(
   window: &CursorWindow,
   statement: &PreparedStatement,
   position: usize,
   num_columns: usize,
) -> Result<CopyRow> {
   if !window.alloc_row()? {
      return Ok(CopyRow::Full);
   }

   let handle = &statement.handle;
   for column in 0..num_columns {
      let stored = match handle.column_type(column) {
         SQLITE_INTEGER => window.put_long(handle.column_int64(column), position, column)?,
         SQLITE_FLOAT => window.put_double(handle.column_double(column), position, column)?,
         SQLITE_TEXT => window.put_string(&handle.column_text(column), position, column)?,
         SQLITE_BLOB => window.put_blob(handle.column_blob(column), position, column)?,
         _ => window.put_null(position, column)?,
      };
      if !stored {
         window.free_last_row()?;
         return Ok(CopyRow::Full);
      }
   }
   Ok(CopyRow::Copied)
}

fn open_error(config: &Configuration, source: SqliteError) -> Error {
   if source.is_corruption() {
      Error::CorruptionDetected {
         label: config.label().to_owned(),
         source,
      }
   } else {
      Error::Connection {
         path: config.label().to_owned(),
         source,
      }
   }
}

/// Map the numeric forms `PRAGMA synchronous` reports to their names.
fn canonicalize_sync_mode(value: &str) -> &str {
   match value {
      "0" => "OFF",
      "1" => "NORMAL",
      "2" => "FULL",
      "3" => "EXTRA",
      other => other,
   }
}

impl Drop for Connection {
   fn drop(&mut self) {
      self.close();
   }
}

impl std::fmt::Debug for Connection {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Connection")
         .field("path", &self.config.path)
         .field("open", &self.is_open())
         .field("cache", &self.cache)
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::bind_args;

   fn memory() -> Connection {
      Connection::open(Configuration::in_memory()).unwrap()
   }

   #[test]
   fn test_sync_mode_canonicalization() {
      assert_eq!(canonicalize_sync_mode("1"), "NORMAL");
      assert_eq!(canonicalize_sync_mode("full"), "full");
   }

   #[test]
   fn test_bind_argument_count_checked_before_execution() {
      let mut conn = memory();
      conn.execute("CREATE TABLE t (a, b)", &[]).unwrap();
      let err = conn
         .execute("INSERT INTO t VALUES (?, ?)", &bind_args![1])
         .unwrap_err();
      assert!(matches!(
         err,
         Error::BindArgumentCount {
            expected: 2,
            actual: 1
         }
      ));
      assert_eq!(conn.execute_for_long("SELECT count(*) FROM t", &[]).unwrap(), 0);
   }

   #[test]
   fn test_execute_rejects_queries() {
      let mut conn = memory();
      let err = conn.execute("SELECT 1", &[]).unwrap_err();
      assert!(err.to_string().contains("raw_query"));
   }

   #[test]
   fn test_last_insert_row_id_without_changes() {
      let mut conn = memory();
      conn.execute("CREATE TABLE t (a)", &[]).unwrap();
      assert_eq!(
         conn
            .execute_for_last_inserted_row_id("INSERT INTO t SELECT 1 WHERE 0", &[])
            .unwrap(),
         -1
      );
      assert_eq!(
         conn
            .execute_for_last_inserted_row_id("INSERT INTO t VALUES (5)", &[])
            .unwrap(),
         1
      );
   }

   #[test]
   fn test_single_value_queries() {
      let mut conn = memory();
      assert_eq!(conn.execute_for_long("SELECT 40 + 2", &[]).unwrap(), 42);
      assert_eq!(
         conn.execute_for_string("SELECT 'x' || ?", &bind_args!["y"]).unwrap(),
         Some("xy".to_string())
      );
      assert_eq!(conn.execute_for_string("SELECT NULL", &[]).unwrap(), None);

      let err = conn.execute_for_long("SELECT 1 WHERE 0", &[]).unwrap_err();
      assert!(matches!(err, Error::SqlExecution { .. }));
   }

   #[test]
   fn test_syntax_error() {
      let mut conn = memory();
      let err = conn.prepare("SELEKT nothing").unwrap_err();
      assert!(matches!(err, Error::SqlSyntax { .. }));
      assert_eq!(err.error_code(), "SQL_SYNTAX_ERROR");

      let err = conn.prepare("   ").unwrap_err();
      assert!(matches!(err, Error::SqlSyntax { .. }));
   }

   #[test]
   fn test_prepare_describes_statement() {
      let mut conn = memory();
      conn.execute("CREATE TABLE t (id INTEGER, name TEXT)", &[]).unwrap();

      let info = conn.prepare("SELECT id, name AS label FROM t WHERE id > ?").unwrap();
      assert_eq!(info.num_parameters, 1);
      assert!(info.read_only);
      assert_eq!(info.column_names, vec!["id", "label"]);

      let info = conn.prepare("DELETE FROM t").unwrap();
      assert!(!info.read_only);
      assert!(info.column_names.is_empty());
   }

   #[test]
   fn test_statements_cached_by_kind() {
      let mut conn = memory();
      conn.execute("CREATE TABLE t (a)", &[]).unwrap();
      conn.execute("INSERT INTO t VALUES (?)", &bind_args![1]).unwrap();
      conn.execute_for_long("SELECT count(*) FROM t", &[]).unwrap();

      assert!(!conn.is_statement_cached("CREATE TABLE t (a)"));
      assert!(conn.is_statement_cached("INSERT INTO t VALUES (?)"));
      assert!(conn.is_statement_cached("SELECT count(*) FROM t"));

      // A cached statement is reset with cleared bindings before reuse.
      conn.execute("INSERT INTO t VALUES (?)", &bind_args![2]).unwrap();
      assert_eq!(conn.execute_for_long("SELECT count(*) FROM t", &[]).unwrap(), 2);
   }

   #[test]
   fn test_failed_statement_dropped_from_cache() {
      let mut conn = memory();
      conn.execute("CREATE TABLE t (a UNIQUE)", &[]).unwrap();
      conn.execute("INSERT INTO t VALUES (?)", &bind_args![1]).unwrap();
      assert!(conn.is_statement_cached("INSERT INTO t VALUES (?)"));

      // Resetting repeats the step error, so the statement is finalized.
      let err = conn.execute("INSERT INTO t VALUES (?)", &bind_args![1]).unwrap_err();
      assert!(matches!(err, Error::SqlExecution { .. }));
      assert!(!conn.is_statement_cached("INSERT INTO t VALUES (?)"));

      conn.execute("INSERT INTO t VALUES (?)", &bind_args![2]).unwrap();
      assert!(conn.is_statement_cached("INSERT INTO t VALUES (?)"));
   }

   #[test]
   fn test_close_is_idempotent() {
      let mut conn = memory();
      conn.execute_for_long("SELECT 1", &[]).unwrap();
      assert_eq!(conn.cached_statement_count(), 1);

      conn.close();
      assert!(!conn.is_open());
      assert_eq!(conn.cached_statement_count(), 0);
      conn.close();

      let err = conn.execute_for_long("SELECT 1", &[]).unwrap_err();
      assert!(matches!(err, Error::ConnectionClosed(_)));
   }

   #[test]
   fn test_fill_window_from_start() {
      let mut conn = memory();
      let window = CursorWindow::new("test");
      let total = conn
         .execute_for_cursor_window(
            "WITH RECURSIVE n(x) AS (SELECT 0 UNION ALL SELECT x + 1 FROM n WHERE x < 9) SELECT x, 'v' || x FROM n",
            &[],
            &window,
            0,
            0,
            true,
         )
         .unwrap();

      assert_eq!(total, 10);
      assert_eq!(window.num_rows().unwrap(), 10);
      assert_eq!(window.num_columns().unwrap(), 2);
      assert_eq!(window.get_long(9, 0).unwrap(), 9);
      assert_eq!(window.get_string(3, 1).unwrap(), "v3");
   }
}
