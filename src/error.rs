//! Error types for sqlite-session

/// Boxed error returned by transaction listeners and open helper callbacks.
pub type BoxDynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A result type alias for sqlite-session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Misuse of the session or transaction protocol.
///
/// These are always programming errors and never transient.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionStateError {
   #[error("Cannot perform this operation because there is no current transaction.")]
   NoTransaction,

   #[error(
      "Cannot perform this operation because the transaction has already been marked successful. The only thing you can do now is call end_transaction()."
   )]
   AlreadyMarkedSuccessful,

   #[error("{operation} cannot be changed while a transaction is in progress")]
   TransactionInProgress { operation: &'static str },

   #[error("The database '{label}' is not open.")]
   NotOpen { label: String },
}

/// Errors that may occur when working with a database
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the underlying connection.
   #[error(transparent)]
   Connection(#[from] sqlite_session_conn::Error),

   /// Error from a cursor window, including reads against an incompatible
   /// storage class.
   #[error(transparent)]
   Window(#[from] sqlite_session_window::Error),

   /// The session or transaction protocol was violated.
   #[error(transparent)]
   IllegalSessionState(#[from] SessionStateError),

   /// A transaction listener failed.
   #[error("transaction listener failed: {0}")]
   Listener(#[source] BoxDynError),

   /// The database has a newer schema version than the open helper expects.
   #[error("Can't downgrade database from version {from} to {to}")]
   Downgrade { from: i64, to: i64 },

   /// A cursor row could not be loaded into the cursor window, usually
   /// because a single row is larger than the whole window.
   #[error("Couldn't read row {position} from the cursor window ({rows} rows buffered from {start})")]
   RowNotInWindow {
      position: usize,
      start: usize,
      rows: usize,
   },

   /// A column name did not match any column of the cursor.
   #[error("column '{0}' does not exist")]
   ColumnNotFound(String),

   /// The cursor is closed or not positioned on a row.
   #[error("cursor is {0}")]
   InvalidCursorState(&'static str),

   /// An argument was rejected before reaching the database.
   #[error("{0}")]
   InvalidArgument(String),

   /// I/O error when deleting database files.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// This provides machine-readable error codes for error handling.
   pub fn error_code(&self) -> String {
      match self {
         Error::Connection(e) => e.error_code(),
         Error::Window(e) => e.error_code(),
         Error::IllegalSessionState(e) => match e {
            SessionStateError::NoTransaction => "NO_TRANSACTION".to_string(),
            SessionStateError::AlreadyMarkedSuccessful => "ALREADY_MARKED_SUCCESSFUL".to_string(),
            SessionStateError::TransactionInProgress { .. } => {
               "TRANSACTION_IN_PROGRESS".to_string()
            }
            SessionStateError::NotOpen { .. } => "DATABASE_NOT_OPEN".to_string(),
         },
         Error::Listener(_) => "LISTENER_ERROR".to_string(),
         Error::Downgrade { .. } => "DOWNGRADE".to_string(),
         Error::RowNotInWindow { .. } => "ROW_NOT_IN_WINDOW".to_string(),
         Error::ColumnNotFound(_) => "COLUMN_NOT_FOUND".to_string(),
         Error::InvalidCursorState(_) => "INVALID_CURSOR_STATE".to_string(),
         Error::InvalidArgument(_) => "INVALID_ARGUMENT".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
      }
   }

   /// Whether this error reports a transaction protocol violation.
   pub fn is_illegal_state(&self) -> bool {
      matches!(self, Error::IllegalSessionState(_))
   }

   /// Whether the database reported that its file is corrupt.
   pub fn is_corruption(&self) -> bool {
      matches!(self, Error::Connection(e) if e.is_corruption())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_code_session_state() {
      let err = Error::from(SessionStateError::NoTransaction);
      assert_eq!(err.error_code(), "NO_TRANSACTION");
      assert!(err.is_illegal_state());
      assert!(err.to_string().contains("no current transaction"));
   }

   #[test]
   fn test_error_code_connection_passthrough() {
      let err = Error::from(sqlite_session_conn::Error::BindArgumentCount {
         expected: 1,
         actual: 0,
      });
      assert_eq!(err.error_code(), "BIND_ARGUMENT_COUNT");
      assert!(!err.is_illegal_state());
   }

   #[test]
   fn test_error_code_downgrade() {
      let err = Error::Downgrade { from: 3, to: 2 };
      assert_eq!(err.error_code(), "DOWNGRADE");
      assert_eq!(err.to_string(), "Can't downgrade database from version 3 to 2");
   }

   #[test]
   fn test_listener_error_keeps_source() {
      let err = Error::Listener("boom".into());
      assert_eq!(err.error_code(), "LISTENER_ERROR");
      assert!(std::error::Error::source(&err).is_some());
   }
}
