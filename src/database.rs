//! Cross-thread database handle.
//!
//! [`Database`] is a cheap `Clone` around shared state. Every operation
//! takes the reentrant transaction lock first and then the session mutex.
//! While a transaction is in progress the lock stays with the thread that
//! began it, so statements and transactions from other threads wait until
//! the outermost `end_transaction`.
//!
//! Configuration changes never modify a live connection. The connection is
//! closed and reopened with an updated copy of the configuration so every
//! PRAGMA is applied again from scratch.

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use sqlite_session_conn::{
   BindArg, Configuration, Connection, InterruptHandle, OpenFlags,
};
use sqlite_session_window::CursorWindow;
use tracing::{debug, warn};

use crate::content_values::{ConflictAlgorithm, ContentValues, delete_sql, insert_sql, update_sql};
use crate::cursor::Cursor;
use crate::error::{Result, SessionStateError};
use crate::error_handler::{DatabaseErrorHandler, DefaultDatabaseErrorHandler};
use crate::lock::TransactionLock;
use crate::query_builder::build_query_string;
use crate::session::Session;
use crate::statement::Statement;
use crate::transaction::{TransactionListener, TransactionMode};

/// Lifecycle of the connection behind a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
   Open,
   /// Closed and being opened again with a new configuration.
   Reopening,
   Closed,
}

#[derive(Debug)]
struct State {
   config: Configuration,
   interrupt: Option<InterruptHandle>,
   open_state: OpenState,
}

struct Inner {
   state: RwLock<State>,
   session: Mutex<Session>,
   lock: TransactionLock,
   error_handler: Arc<dyn DatabaseErrorHandler>,
}

/// A database shared between threads.
///
/// # Examples
///
/// ```
/// use sqlite_session::{ContentValues, Database};
///
/// let db = Database::create_in_memory().unwrap();
/// db.exec_sql("CREATE TABLE people (name TEXT, age INTEGER)").unwrap();
///
/// db.with_transaction(|db| {
///    let mut values = ContentValues::new();
///    values.put("name", "Ada").put("age", 36);
///    db.insert_or_throw("people", None, &values)?;
///    Ok(())
/// })
/// .unwrap();
///
/// let mut cursor = db.raw_query("SELECT name FROM people", &[]).unwrap();
/// assert!(cursor.move_to_first().unwrap());
/// assert_eq!(cursor.get_string(0).unwrap(), "Ada");
/// ```
#[derive(Clone)]
pub struct Database {
   inner: Arc<Inner>,
}

/// Open a connection, giving the error handler one chance to repair a
/// corrupt database before retrying.
fn open_connection(config: &Configuration, handler: &dyn DatabaseErrorHandler) -> Result<Connection> {
   match Connection::open(config.clone()) {
      Err(e) if e.is_corruption() => {
         warn!(path = %config.label(), error = %e, "Database corruption detected on open, retrying");
         handler.on_corruption(config);
         Ok(Connection::open(config.clone())?)
      }
      result => Ok(result?),
   }
}

impl Database {
   /// Open the database described by `config`, deleting it and starting over
   /// when it turns out to be corrupt.
   pub fn open(config: Configuration) -> Result<Self> {
      Self::open_with_handler(config, Arc::new(DefaultDatabaseErrorHandler))
   }

   /// Open the database described by `config` with a custom corruption handler.
   pub fn open_with_handler(
      config: Configuration,
      error_handler: Arc<dyn DatabaseErrorHandler>,
   ) -> Result<Self> {
      config.validate()?;
      let connection = open_connection(&config, error_handler.as_ref())?;
      let interrupt = connection.interrupt_handle();

      debug!(path = %config.label(), "Opened database");
      Ok(Self {
         inner: Arc::new(Inner {
            state: RwLock::new(State {
               config,
               interrupt: Some(interrupt),
               open_state: OpenState::Open,
            }),
            session: Mutex::new(Session::new(connection)),
            lock: TransactionLock::new(),
            error_handler,
         }),
      })
   }

   /// Open a read-write database file, creating it when missing.
   pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
      let path = path.as_ref().to_string_lossy();
      Self::open(Configuration::new(path, OpenFlags::create()))
   }

   /// Open a private in-memory database.
   pub fn create_in_memory() -> Result<Self> {
      Self::open(Configuration::in_memory())
   }

   /// Run `f` with the session, holding the transaction lock.
   ///
   /// Pins the lock to this thread when `f` leaves a transaction open and
   /// unpins it when `f` ends the outermost one.
   pub(crate) fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> Result<R>) -> Result<R> {
      let _guard = self.inner.lock.lock();
      let mut session = self.inner.session.lock();
      let had_transaction = session.has_transaction();

      let result = f(&mut *session);
      if let Err(e) = &result
         && e.is_corruption()
      {
         self.on_corruption(&mut *session);
      }

      match (had_transaction, session.has_transaction()) {
         (false, true) => self.inner.lock.pin(),
         (true, false) => self.inner.lock.unpin(),
         _ => {}
      }
      result
   }

   /// Close the database and let the error handler deal with the file.
   fn on_corruption(&self, session: &mut Session) {
      session.close();
      let config = {
         let mut state = self.inner.state.write();
         state.interrupt = None;
         state.open_state = OpenState::Closed;
         state.config.clone()
      };
      self.inner.error_handler.on_corruption(&config);
   }

   // ─── Transactions ────────────────────────────────────────────────────────

   fn begin(&self, mode: TransactionMode, listener: Option<Box<dyn TransactionListener>>) -> Result<()> {
      self.with_session(|session| session.begin_transaction(mode, listener))
   }

   /// Begin a transaction in EXCLUSIVE mode. Transactions may be nested;
   /// the work of every level is committed only when each level was marked
   /// successful.
   ///
   /// ```
   /// # let db = sqlite_session::Database::create_in_memory().unwrap();
   /// db.begin_transaction().unwrap();
   /// // ... work ...
   /// db.set_transaction_successful().unwrap();
   /// db.end_transaction().unwrap();
   /// ```
   pub fn begin_transaction(&self) -> Result<()> {
      self.begin(TransactionMode::Exclusive, None)
   }

   /// Begin a transaction in IMMEDIATE mode.
   pub fn begin_transaction_non_exclusive(&self) -> Result<()> {
      self.begin(TransactionMode::Immediate, None)
   }

   /// Begin a transaction in DEFERRED mode.
   pub fn begin_transaction_deferred(&self) -> Result<()> {
      self.begin(TransactionMode::Deferred, None)
   }

   pub fn begin_transaction_with_listener(&self, listener: impl TransactionListener + 'static) -> Result<()> {
      self.begin(TransactionMode::Exclusive, Some(Box::new(listener)))
   }

   pub fn begin_transaction_with_listener_non_exclusive(
      &self,
      listener: impl TransactionListener + 'static,
   ) -> Result<()> {
      self.begin(TransactionMode::Immediate, Some(Box::new(listener)))
   }

   pub fn begin_transaction_with_listener_deferred(
      &self,
      listener: impl TransactionListener + 'static,
   ) -> Result<()> {
      self.begin(TransactionMode::Deferred, Some(Box::new(listener)))
   }

   pub fn set_transaction_successful(&self) -> Result<()> {
      self.with_session(|session| session.set_transaction_successful())
   }

   pub fn end_transaction(&self) -> Result<()> {
      self.with_session(|session| session.end_transaction())
   }

   /// Whether the current thread has a transaction in progress.
   pub fn in_transaction(&self) -> bool {
      self.inner.lock.is_pinned_by_current_thread()
   }

   /// Whether the current thread holds the database lock.
   pub fn is_db_locked_by_current_thread(&self) -> bool {
      self.inner.lock.is_held_by_current_thread()
   }

   /// Run `f` in an EXCLUSIVE transaction that commits when `f` succeeds
   /// and rolls back when it fails.
   pub fn with_transaction<R>(&self, f: impl FnOnce(&Database) -> Result<R>) -> Result<R> {
      self.begin_transaction()?;
      let result = f(self).and_then(|value| self.set_transaction_successful().map(|()| value));
      let ended = self.end_transaction();

      match (result, ended) {
         (Ok(value), Ok(())) => Ok(value),
         (Ok(_), Err(e)) => Err(e),
         (Err(e), ended) => {
            if let Err(end_error) = ended {
               warn!(error = %end_error, "Ending a failed transaction also failed");
            }
            Err(e)
         }
      }
   }

   // ─── Statements ──────────────────────────────────────────────────────────

   /// Run a single SQL statement that returns no rows.
   pub fn exec_sql(&self, sql: &str) -> Result<()> {
      self.exec_sql_with_args(sql, &[])
   }

   pub fn exec_sql_with_args(&self, sql: &str, args: &[BindArg]) -> Result<()> {
      self
         .with_session(|session| session.execute_for_changed_row_count(sql, args))
         .map(|_| ())
   }

   /// Compile `sql` into a reusable [`Statement`].
   pub fn compile_statement(&self, sql: &str) -> Result<Statement> {
      Statement::new(self.clone(), sql, &[])
   }

   /// Run a query and return a cursor over its rows.
   pub fn raw_query(&self, sql: &str, args: &[BindArg]) -> Result<Cursor> {
      Cursor::new(self.clone(), sql, args)
   }

   /// Build a SELECT from its clauses and run it.
   #[allow(clippy::too_many_arguments)]
   pub fn query(
      &self,
      distinct: bool,
      table: &str,
      columns: Option<&[&str]>,
      selection: Option<&str>,
      selection_args: &[BindArg],
      group_by: Option<&str>,
      having: Option<&str>,
      order_by: Option<&str>,
      limit: Option<&str>,
   ) -> Result<Cursor> {
      let sql = build_query_string(
         distinct, table, columns, selection, group_by, having, order_by, limit,
      )?;
      self.raw_query(&sql, selection_args)
   }

   pub(crate) fn fill_window(
      &self,
      sql: &str,
      args: &[BindArg],
      window: &CursorWindow,
      start_position: usize,
      required_position: usize,
      count_all_rows: bool,
   ) -> Result<usize> {
      self.with_session(|session| {
         session.execute_for_cursor_window(
            sql,
            args,
            window,
            start_position,
            required_position,
            count_all_rows,
         )
      })
   }

   /// Insert a row and return its row id, or -1 when the insert failed.
   /// Failures are logged; use [`Database::insert_or_throw`] to see them.
   pub fn insert(&self, table: &str, null_column_hack: Option<&str>, values: &ContentValues) -> i64 {
      self
         .insert_with_on_conflict(table, null_column_hack, values, ConflictAlgorithm::None)
         .unwrap_or_else(|e| {
            warn!(table, error = %e, "Error inserting row");
            -1
         })
   }

   pub fn insert_or_throw(
      &self,
      table: &str,
      null_column_hack: Option<&str>,
      values: &ContentValues,
   ) -> Result<i64> {
      self.insert_with_on_conflict(table, null_column_hack, values, ConflictAlgorithm::None)
   }

   /// Insert or replace a row and return its row id, or -1 on failure.
   pub fn replace(&self, table: &str, null_column_hack: Option<&str>, values: &ContentValues) -> i64 {
      self
         .replace_or_throw(table, null_column_hack, values)
         .unwrap_or_else(|e| {
            warn!(table, error = %e, "Error replacing row");
            -1
         })
   }

   pub fn replace_or_throw(
      &self,
      table: &str,
      null_column_hack: Option<&str>,
      values: &ContentValues,
   ) -> Result<i64> {
      self.insert_with_on_conflict(table, null_column_hack, values, ConflictAlgorithm::Replace)
   }

   /// Insert a row with an explicit conflict algorithm and return its row id.
   /// Returns -1 when the conflict algorithm skipped the row.
   pub fn insert_with_on_conflict(
      &self,
      table: &str,
      null_column_hack: Option<&str>,
      values: &ContentValues,
      algorithm: ConflictAlgorithm,
   ) -> Result<i64> {
      let (sql, args) = insert_sql(table, null_column_hack, values, algorithm)?;
      self.with_session(|session| session.execute_for_last_inserted_row_id(&sql, &args))
   }

   /// Update matching rows and return how many changed.
   pub fn update(
      &self,
      table: &str,
      values: &ContentValues,
      where_clause: Option<&str>,
      where_args: &[BindArg],
   ) -> Result<i64> {
      self.update_with_on_conflict(table, values, where_clause, where_args, ConflictAlgorithm::None)
   }

   pub fn update_with_on_conflict(
      &self,
      table: &str,
      values: &ContentValues,
      where_clause: Option<&str>,
      where_args: &[BindArg],
      algorithm: ConflictAlgorithm,
   ) -> Result<i64> {
      let (sql, args) = update_sql(table, values, where_clause, where_args, algorithm)?;
      self.with_session(|session| session.execute_for_changed_row_count(&sql, &args))
   }

   /// Delete matching rows, or every row when `where_clause` is `None`, and
   /// return how many were deleted.
   pub fn delete(&self, table: &str, where_clause: Option<&str>, where_args: &[BindArg]) -> Result<i64> {
      let sql = delete_sql(table, where_clause);
      self.with_session(|session| session.execute_for_changed_row_count(&sql, where_args))
   }

   fn long_for_query(&self, sql: &str) -> Result<i64> {
      self.with_session(|session| session.execute_for_long(sql, &[]))
   }

   // ─── Metadata ────────────────────────────────────────────────────────────

   /// Schema version stored in `PRAGMA user_version`.
   pub fn version(&self) -> Result<i64> {
      self.long_for_query("PRAGMA user_version;")
   }

   pub fn set_version(&self, version: i64) -> Result<()> {
      self.exec_sql(&format!("PRAGMA user_version = {version}"))
   }

   pub fn need_upgrade(&self, new_version: i64) -> Result<bool> {
      Ok(self.version()? < new_version)
   }

   pub fn page_size(&self) -> Result<i64> {
      self.long_for_query("PRAGMA page_size;")
   }

   /// Set the page size. Only takes effect before the database has content.
   pub fn set_page_size(&self, num_bytes: i64) -> Result<()> {
      self.exec_sql(&format!("PRAGMA page_size = {num_bytes}"))
   }

   /// Largest size the database may grow to, in bytes.
   pub fn maximum_size(&self) -> Result<i64> {
      Ok(self.long_for_query("PRAGMA max_page_count;")? * self.page_size()?)
   }

   /// Limit the database size, rounded up to whole pages. Returns the new
   /// maximum, which the engine never sets below the current size.
   pub fn set_maximum_size(&self, num_bytes: i64) -> Result<i64> {
      let page_size = self.page_size()?;
      let num_pages = num_bytes / page_size + i64::from(num_bytes % page_size != 0);
      let new_page_count = self.long_for_query(&format!("PRAGMA max_page_count = {num_pages}"))?;
      Ok(new_page_count * page_size)
   }

   pub fn path(&self) -> String {
      self.inner.state.read().config.path.clone()
   }

   /// A copy of the current configuration.
   pub fn configuration(&self) -> Configuration {
      self.inner.state.read().config.clone()
   }

   pub fn open_state(&self) -> OpenState {
      self.inner.state.read().open_state
   }

   pub fn is_open(&self) -> bool {
      self.open_state() == OpenState::Open
   }

   pub fn is_read_only(&self) -> bool {
      self.inner.state.read().config.is_read_only()
   }

   pub fn is_in_memory_database(&self) -> bool {
      self.inner.state.read().config.is_in_memory_db()
   }

   pub fn is_write_ahead_logging_enabled(&self) -> bool {
      self.inner.state.read().config.is_write_ahead_logging_enabled()
   }

   // ─── Reconfiguration ─────────────────────────────────────────────────────

   /// Close the connection and reopen it with `update` applied to a copy of
   /// the configuration. On failure the previous configuration is restored.
   fn reconfigure(&self, operation: &'static str, update: impl FnOnce(&mut Configuration)) -> Result<()> {
      self.with_session(|session| {
         if session.has_transaction() {
            return Err(SessionStateError::TransactionInProgress { operation }.into());
         }

         let mut state = self.inner.state.write();
         if state.open_state != OpenState::Open {
            return Err(SessionStateError::NotOpen {
               label: state.config.label().to_owned(),
            }
            .into());
         }

         let mut config = state.config.clone();
         update(&mut config);
         config.validate()?;
         if config == state.config {
            return Ok(());
         }

         state.open_state = OpenState::Reopening;
         state.interrupt = None;
         session.close();

         match Connection::open(config.clone()) {
            Ok(connection) => {
               debug!(path = %config.label(), operation, "Reopened database with new configuration");
               state.interrupt = Some(connection.interrupt_handle());
               state.config = config;
               state.open_state = OpenState::Open;
               session.attach(connection);
               Ok(())
            }
            Err(e) => {
               warn!(path = %config.label(), operation, error = %e, "Reconfiguration failed, restoring previous configuration");
               match Connection::open(state.config.clone()) {
                  Ok(connection) => {
                     state.interrupt = Some(connection.interrupt_handle());
                     state.open_state = OpenState::Open;
                     session.attach(connection);
                  }
                  Err(restore) => {
                     warn!(path = %state.config.label(), error = %restore, "Could not reopen database");
                     state.open_state = OpenState::Closed;
                  }
               }
               Err(e.into())
            }
         }
      })
   }

   /// Change the number of prepared statements cached by the connection.
   pub fn set_max_sql_cache_size(&self, cache_size: usize) -> Result<()> {
      self.reconfigure("max_sql_cache_size", |config| {
         config.max_sql_cache_size = cache_size;
      })
   }

   pub fn set_foreign_key_constraints_enabled(&self, enabled: bool) -> Result<()> {
      self.reconfigure("foreign_key_constraints_enabled", |config| {
         config.foreign_key_constraints_enabled = enabled;
      })
   }

   /// Switch to write-ahead logging. Returns `false` for in-memory and
   /// read-only databases, which cannot use it.
   pub fn enable_write_ahead_logging(&self) -> Result<bool> {
      {
         let state = self.inner.state.read();
         if state.config.is_in_memory_db() || state.config.is_read_only() {
            debug!(path = %state.config.label(), "Write-ahead logging is not available");
            return Ok(false);
         }
      }
      self.reconfigure("write_ahead_logging", |config| {
         config.open_flags.enable_write_ahead_logging = true;
      })?;
      Ok(true)
   }

   pub fn disable_write_ahead_logging(&self) -> Result<()> {
      self.reconfigure("write_ahead_logging", |config| {
         config.open_flags.enable_write_ahead_logging = false;
      })
   }

   /// Reopen a read-only database for writing. Does nothing when the
   /// database is already writable.
   pub fn reopen_read_write(&self) -> Result<()> {
      self.reconfigure("open_flags", |config| {
         config.open_flags.read_only = false;
      })
   }

   /// Interrupt the statement currently running on the connection. It fails
   /// with an `OPERATION_CANCELED` error. Safe to call from any thread.
   pub fn cancel(&self) {
      if let Some(interrupt) = &self.inner.state.read().interrupt {
         interrupt.interrupt();
      }
   }

   /// Close the connection. Calling it again is a no-op; other operations
   /// fail once the database is closed. Any open transaction is rolled back.
   pub fn close(&self) {
      let _guard = self.inner.lock.lock();
      let mut session = self.inner.session.lock();
      if session.has_transaction() {
         self.inner.lock.unpin();
      }
      session.close();

      let mut state = self.inner.state.write();
      if state.open_state != OpenState::Closed {
         state.open_state = OpenState::Closed;
         state.interrupt = None;
         debug!(path = %state.config.label(), "Closed database");
      }
   }
}

impl std::fmt::Debug for Database {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      let state = self.inner.state.read();
      f.debug_struct("Database")
         .field("path", &state.config.path)
         .field("open_state", &state.open_state)
         .finish()
   }
}
