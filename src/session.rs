//! Transaction stack and statement routing for one connection.
//!
//! A [`Session`] exposes the same primitives as [`Connection`] with
//! transaction bookkeeping layered on top. BEGIN, COMMIT and ROLLBACK written
//! as raw SQL are routed to [`Session::begin_transaction`] and
//! [`Session::end_transaction`] so the frame stack always matches what the
//! engine sees.
//!
//! Only the outermost frame issues BEGIN and COMMIT or ROLLBACK. A nested
//! frame that ends without being marked successful marks its parent as
//! failed, which turns the outermost COMMIT into a ROLLBACK.

use sqlite_session_conn::{BindArg, Connection, StatementInfo, StatementKind};
use sqlite_session_window::CursorWindow;
use tracing::{debug, warn};

use crate::error::{Error, Result, SessionStateError};
use crate::transaction::{Transaction, TransactionListener, TransactionMode};

/// Per-database coordinator for statements and transactions.
#[derive(Debug)]
pub struct Session {
   label: String,
   connection: Option<Connection>,
   transaction_stack: Option<Box<Transaction>>,
   connection_use_count: usize,
}

impl Session {
   pub fn new(connection: Connection) -> Self {
      Self {
         label: connection.label().to_owned(),
         connection: Some(connection),
         transaction_stack: None,
         connection_use_count: 0,
      }
   }

   pub fn connection(&self) -> Option<&Connection> {
      self.connection.as_ref()
   }

   pub fn is_open(&self) -> bool {
      self.connection.is_some()
   }

   /// Replace the connection after a reopen.
   pub(crate) fn attach(&mut self, connection: Connection) {
      self.label = connection.label().to_owned();
      self.connection = Some(connection);
   }

   /// Close the connection. Any open transaction frames are discarded; the
   /// engine rolls their work back when the handle closes.
   pub fn close(&mut self) {
      if let Some(depth) = self.transaction_stack.as_ref().map(|t| t.depth()) {
         warn!(path = %self.label, depth, "Closing database with a transaction in progress");
         self.transaction_stack = None;
      }
      if let Some(mut connection) = self.connection.take() {
         connection.close();
      }
      self.connection_use_count = 0;
   }

   /// Whether a transaction is in progress.
   pub fn has_transaction(&self) -> bool {
      self.transaction_stack.is_some()
   }

   /// Whether more than one transaction frame is on the stack.
   pub fn has_nested_transaction(&self) -> bool {
      self
         .transaction_stack
         .as_ref()
         .is_some_and(|t| t.parent.is_some())
   }

   pub fn transaction_depth(&self) -> usize {
      self.transaction_stack.as_ref().map_or(0, |t| t.depth())
   }

   /// Whether the connection is currently acquired by a statement or a
   /// transaction.
   pub fn has_connection(&self) -> bool {
      self.connection_use_count > 0
   }

   // ─── Connection acquisition ──────────────────────────────────────────────

   fn acquire_connection(&mut self) -> Result<()> {
      if self.connection.is_none() {
         return Err(SessionStateError::NotOpen {
            label: self.label.clone(),
         }
         .into());
      }
      self.connection_use_count += 1;
      Ok(())
   }

   fn release_connection(&mut self) {
      self.connection_use_count = self.connection_use_count.saturating_sub(1);
   }

   fn connection_mut(&mut self) -> Result<&mut Connection> {
      let label = &self.label;
      self.connection.as_mut().ok_or_else(|| {
         SessionStateError::NotOpen {
            label: label.clone(),
         }
         .into()
      })
   }

   /// Run `f` against the connection, holding an acquisition for its duration.
   fn with_connection<R>(
      &mut self,
      f: impl FnOnce(&mut Connection) -> sqlite_session_conn::Result<R>,
   ) -> Result<R> {
      self.acquire_connection()?;
      let result = self
         .connection_mut()
         .and_then(|connection| f(connection).map_err(Error::from));
      self.release_connection();
      result
   }

   // ─── Transactions ────────────────────────────────────────────────────────

   fn throw_if_no_transaction(&self) -> Result<()> {
      if self.transaction_stack.is_none() {
         return Err(SessionStateError::NoTransaction.into());
      }
      Ok(())
   }

   fn throw_if_transaction_marked_successful(&self) -> Result<()> {
      if self
         .transaction_stack
         .as_ref()
         .is_some_and(|t| t.marked_successful)
      {
         return Err(SessionStateError::AlreadyMarkedSuccessful.into());
      }
      Ok(())
   }

   /// Push a transaction frame. The outermost frame acquires the connection
   /// and begins a transaction in the engine.
   pub fn begin_transaction(
      &mut self,
      mode: TransactionMode,
      mut listener: Option<Box<dyn TransactionListener>>,
   ) -> Result<()> {
      self.throw_if_transaction_marked_successful()?;

      let outermost = self.transaction_stack.is_none();
      if outermost {
         self.acquire_connection()?;
      }

      let result = self.begin_unchecked(mode, listener.as_deref_mut(), outermost);
      match result {
         Ok(()) => {
            let parent = self.transaction_stack.take();
            self.transaction_stack = Some(Box::new(Transaction::new(mode, listener, parent)));
            Ok(())
         }
         Err(e) => {
            if outermost {
               self.release_connection();
            }
            Err(e)
         }
      }
   }

   fn begin_unchecked(
      &mut self,
      mode: TransactionMode,
      listener: Option<&mut (dyn TransactionListener + 'static)>,
      outermost: bool,
   ) -> Result<()> {
      if outermost {
         self.connection_mut()?.execute(mode.begin_sql(), &[])?;
         debug!(path = %self.label, ?mode, "Began transaction");
      }

      if let Some(listener) = listener
         && let Err(e) = listener.on_begin()
      {
         if outermost && let Err(rollback) = self.connection_mut()?.execute("ROLLBACK;", &[]) {
            warn!(path = %self.label, error = %rollback, "Rollback after listener failure failed");
         }
         return Err(Error::Listener(e));
      }
      Ok(())
   }

   /// Mark the innermost transaction frame as successful.
   pub fn set_transaction_successful(&mut self) -> Result<()> {
      self.throw_if_no_transaction()?;
      self.throw_if_transaction_marked_successful()?;
      if let Some(top) = self.transaction_stack.as_mut() {
         top.marked_successful = true;
      }
      Ok(())
   }

   /// Pop the innermost transaction frame. The outermost frame commits or
   /// rolls back in the engine and releases the connection.
   ///
   /// A listener error forces a rollback and is returned after the stack has
   /// been updated.
   pub fn end_transaction(&mut self) -> Result<()> {
      let Some(mut top) = self.transaction_stack.take() else {
         return Err(SessionStateError::NoTransaction.into());
      };

      let mut successful = top.is_successful();
      let mut listener_error = None;
      if let Some(listener) = top.listener.as_mut() {
         let notified = if successful {
            listener.on_commit()
         } else {
            listener.on_rollback()
         };
         if let Err(e) = notified {
            listener_error = Some(e);
            successful = false;
         }
      }

      self.transaction_stack = top.parent.take();

      if let Some(parent) = self.transaction_stack.as_mut() {
         if !successful {
            parent.child_failed = true;
         }
      } else {
         let sql = if successful { "COMMIT;" } else { "ROLLBACK;" };
         let result = self
            .connection_mut()
            .and_then(|connection| connection.execute(sql, &[]).map_err(Error::from));
         // A failed COMMIT can leave the engine inside the transaction.
         if successful
            && result.is_err()
            && let Ok(connection) = self.connection_mut()
            && let Err(rollback) = connection.execute("ROLLBACK;", &[])
         {
            warn!(path = %self.label, error = %rollback, "Rollback after failed commit failed");
         }
         self.release_connection();
         result?;

         if successful {
            debug!(path = %self.label, "Committed transaction");
         } else {
            debug!(path = %self.label, "Rolled back transaction");
         }
      }

      match listener_error {
         Some(e) => Err(Error::Listener(e)),
         None => Ok(()),
      }
   }

   /// Route transaction control SQL to the frame stack. Returns whether `sql`
   /// was handled.
   fn execute_special(&mut self, sql: &str) -> Result<bool> {
      match StatementKind::classify(sql) {
         StatementKind::Begin => {
            self.begin_transaction(TransactionMode::Exclusive, None)?;
            Ok(true)
         }
         StatementKind::Commit => {
            self.set_transaction_successful()?;
            self.end_transaction()?;
            Ok(true)
         }
         StatementKind::Abort => {
            self.end_transaction()?;
            Ok(true)
         }
         _ => Ok(false),
      }
   }

   // ─── Statements ──────────────────────────────────────────────────────────

   /// Compile `sql` without running it.
   pub fn prepare(&mut self, sql: &str) -> Result<StatementInfo> {
      self.with_connection(|connection| connection.prepare(sql))
   }

   pub fn execute(&mut self, sql: &str, args: &[BindArg]) -> Result<()> {
      if self.execute_special(sql)? {
         return Ok(());
      }
      self.with_connection(|connection| connection.execute(sql, args))
   }

   pub fn execute_for_long(&mut self, sql: &str, args: &[BindArg]) -> Result<i64> {
      if self.execute_special(sql)? {
         return Ok(0);
      }
      self.with_connection(|connection| connection.execute_for_long(sql, args))
   }

   pub fn execute_for_string(&mut self, sql: &str, args: &[BindArg]) -> Result<Option<String>> {
      if self.execute_special(sql)? {
         return Ok(None);
      }
      self.with_connection(|connection| connection.execute_for_string(sql, args))
   }

   pub fn execute_for_changed_row_count(&mut self, sql: &str, args: &[BindArg]) -> Result<i64> {
      if self.execute_special(sql)? {
         return Ok(0);
      }
      self.with_connection(|connection| connection.execute_for_changed_row_count(sql, args))
   }

   pub fn execute_for_last_inserted_row_id(&mut self, sql: &str, args: &[BindArg]) -> Result<i64> {
      if self.execute_special(sql)? {
         return Ok(0);
      }
      self.with_connection(|connection| connection.execute_for_last_inserted_row_id(sql, args))
   }

   /// Fill `window` from a query. Transaction control SQL leaves the window
   /// empty and reports 0 rows.
   pub fn execute_for_cursor_window(
      &mut self,
      sql: &str,
      args: &[BindArg],
      window: &CursorWindow,
      start_position: usize,
      required_position: usize,
      count_all_rows: bool,
   ) -> Result<usize> {
      if self.execute_special(sql)? {
         window.clear()?;
         return Ok(0);
      }
      self.with_connection(|connection| {
         connection.execute_for_cursor_window(
            sql,
            args,
            window,
            start_position,
            required_position,
            count_all_rows,
         )
      })
   }
}

#[cfg(test)]
mod tests {
   use std::sync::{Arc, Mutex};

   use sqlite_session_conn::{Configuration, bind_args};

   use super::*;
   use crate::error::BoxDynError;

   fn session() -> Session {
      let mut session = Session::new(Connection::open(Configuration::in_memory()).unwrap());
      session
         .execute("CREATE TABLE t (num INTEGER)", &[])
         .unwrap();
      session
   }

   fn count(session: &mut Session) -> i64 {
      session.execute_for_long("SELECT count(*) FROM t", &[]).unwrap()
   }

   #[derive(Clone, Default)]
   struct Recorder {
      events: Arc<Mutex<Vec<&'static str>>>,
      fail_on: Option<&'static str>,
   }

   impl Recorder {
      fn record(&mut self, event: &'static str) -> std::result::Result<(), BoxDynError> {
         self.events.lock().unwrap().push(event);
         if self.fail_on == Some(event) {
            return Err(format!("{event} failed").into());
         }
         Ok(())
      }
   }

   impl TransactionListener for Recorder {
      fn on_begin(&mut self) -> std::result::Result<(), BoxDynError> {
         self.record("begin")
      }

      fn on_commit(&mut self) -> std::result::Result<(), BoxDynError> {
         self.record("commit")
      }

      fn on_rollback(&mut self) -> std::result::Result<(), BoxDynError> {
         self.record("rollback")
      }
   }

   #[test]
   fn test_outermost_frame_holds_connection() {
      let mut session = session();
      assert!(!session.has_connection());

      session.begin_transaction(TransactionMode::Exclusive, None).unwrap();
      session.begin_transaction(TransactionMode::Immediate, None).unwrap();
      assert!(session.has_connection());
      assert!(session.has_nested_transaction());
      assert_eq!(session.transaction_depth(), 2);

      session.set_transaction_successful().unwrap();
      session.end_transaction().unwrap();
      assert!(session.has_connection());

      session.set_transaction_successful().unwrap();
      session.end_transaction().unwrap();
      assert!(!session.has_connection());
      assert!(!session.has_transaction());
   }

   #[test]
   fn test_failed_child_rolls_back_everything() {
      let mut session = session();
      session.begin_transaction(TransactionMode::Exclusive, None).unwrap();
      session.execute("INSERT INTO t VALUES (?)", &bind_args![0]).unwrap();

      session.begin_transaction(TransactionMode::Exclusive, None).unwrap();
      session.execute("INSERT INTO t VALUES (?)", &bind_args![1]).unwrap();
      session.end_transaction().unwrap();

      session.set_transaction_successful().unwrap();
      session.end_transaction().unwrap();
      assert_eq!(count(&mut session), 0);
   }

   #[test]
   fn test_cannot_nest_after_marked_successful() {
      let mut session = session();
      session.begin_transaction(TransactionMode::Exclusive, None).unwrap();
      session.set_transaction_successful().unwrap();

      let err = session
         .begin_transaction(TransactionMode::Exclusive, None)
         .unwrap_err();
      assert!(matches!(
         err,
         Error::IllegalSessionState(SessionStateError::AlreadyMarkedSuccessful)
      ));
      session.end_transaction().unwrap();
   }

   #[test]
   fn test_raw_transaction_sql_is_intercepted() {
      let mut session = session();
      session.execute("begin", &[]).unwrap();
      assert!(session.has_transaction());
      session.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
      session.execute("  COMMIT;", &[]).unwrap();
      assert!(!session.has_transaction());
      assert_eq!(count(&mut session), 1);

      session.execute("BEGIN TRANSACTION", &[]).unwrap();
      session.execute("INSERT INTO t VALUES (2)", &[]).unwrap();
      session.execute("ROLLBACK", &[]).unwrap();
      assert_eq!(count(&mut session), 1);

      let err = session.execute("END", &[]).unwrap_err();
      assert!(err.is_illegal_state());
   }

   #[test]
   fn test_listener_sees_commit_and_rollback() {
      let mut session = session();
      let recorder = Recorder::default();

      session
         .begin_transaction(TransactionMode::Exclusive, Some(Box::new(recorder.clone())))
         .unwrap();
      session.set_transaction_successful().unwrap();
      session.end_transaction().unwrap();

      session
         .begin_transaction(TransactionMode::Exclusive, Some(Box::new(recorder.clone())))
         .unwrap();
      session.end_transaction().unwrap();

      assert_eq!(
         *recorder.events.lock().unwrap(),
         vec!["begin", "commit", "begin", "rollback"]
      );
   }

   #[test]
   fn test_listener_begin_failure_rolls_back() {
      let mut session = session();
      let recorder = Recorder {
         fail_on: Some("begin"),
         ..Recorder::default()
      };

      let err = session
         .begin_transaction(TransactionMode::Exclusive, Some(Box::new(recorder)))
         .unwrap_err();
      assert!(matches!(err, Error::Listener(_)));
      assert!(!session.has_transaction());
      assert!(!session.has_connection());

      // The engine is no longer inside a transaction.
      session.begin_transaction(TransactionMode::Exclusive, None).unwrap();
      session.end_transaction().unwrap();
   }

   #[test]
   fn test_listener_commit_failure_forces_rollback() {
      let mut session = session();
      let recorder = Recorder {
         fail_on: Some("commit"),
         ..Recorder::default()
      };

      session
         .begin_transaction(TransactionMode::Exclusive, Some(Box::new(recorder)))
         .unwrap();
      session.execute("INSERT INTO t VALUES (1)", &[]).unwrap();
      session.set_transaction_successful().unwrap();

      let err = session.end_transaction().unwrap_err();
      assert_eq!(err.error_code(), "LISTENER_ERROR");
      assert!(!session.has_transaction());
      assert_eq!(count(&mut session), 0);
   }

   #[test]
   fn test_cursor_window_special_sql_clears_window() {
      let mut session = session();
      let window = CursorWindow::new("t");
      window.set_num_columns(1).unwrap();
      window.alloc_row().unwrap();

      let rows = session
         .execute_for_cursor_window("BEGIN", &[], &window, 0, 0, true)
         .unwrap();
      assert_eq!(rows, 0);
      assert_eq!(window.num_rows().unwrap(), 0);
      session.end_transaction().unwrap();
   }

   #[test]
   fn test_closed_session_reports_not_open() {
      let mut session = session();
      session.close();
      session.close();
      let err = session.execute("SELECT 1", &[]).unwrap_err();
      assert_eq!(err.error_code(), "DATABASE_NOT_OPEN");
      assert!(err.to_string().contains(":memory:"));
   }
}
