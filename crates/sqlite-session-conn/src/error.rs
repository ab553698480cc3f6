//! Error types for sqlite-session-conn

use std::ffi::{CStr, c_int};
use std::fmt::{self, Display, Formatter};

use libsqlite3_sys::{
   SQLITE_CORRUPT, SQLITE_INTERRUPT, SQLITE_NOTADB, sqlite3, sqlite3_errmsg, sqlite3_errstr,
   sqlite3_extended_errcode,
};

/// An error code and message reported by the native engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteError {
   code: c_int,
   message: String,
}

impl SqliteError {
   /// Read the last error recorded on a connection handle.
   pub(crate) fn new(handle: *mut sqlite3) -> Self {
      // SAFETY: callers pass a handle returned by sqlite3_open_v2 that has not
      // been closed; sqlite3_errmsg never returns NULL for such a handle.
      let (code, message) = unsafe {
         let code = sqlite3_extended_errcode(handle);
         let message = CStr::from_ptr(sqlite3_errmsg(handle))
            .to_string_lossy()
            .into_owned();
         (code, message)
      };
      Self { code, message }
   }

   /// Build an error from a result code alone, using SQLite's generic text for it.
   pub(crate) fn from_code(code: c_int) -> Self {
      // SAFETY: sqlite3_errstr returns a static string for every input.
      let message = unsafe { CStr::from_ptr(sqlite3_errstr(code)) }
         .to_string_lossy()
         .into_owned();
      Self { code, message }
   }

   pub(crate) fn with_message(code: c_int, message: impl Into<String>) -> Self {
      Self {
         code,
         message: message.into(),
      }
   }

   /// The extended result code.
   pub fn code(&self) -> i32 {
      self.code
   }

   /// The primary result code, with the extended bits masked off.
   pub fn primary_code(&self) -> i32 {
      self.code & 0xff
   }

   pub fn message(&self) -> &str {
      &self.message
   }

   pub fn is_corruption(&self) -> bool {
      matches!(self.primary_code(), SQLITE_CORRUPT | SQLITE_NOTADB)
   }

   pub fn is_interrupt(&self) -> bool {
      self.primary_code() == SQLITE_INTERRUPT
   }
}

impl Display for SqliteError {
   fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
      write!(f, "(code: {}) {}", self.code, self.message)
   }
}

impl std::error::Error for SqliteError {}

/// Errors that may occur when working with a single connection
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The native engine failed to open or close the database.
   #[error("unable to open database {path}: {source}")]
   Connection {
      path: String,
      #[source]
      source: SqliteError,
   },

   /// The native engine rejected the SQL while compiling it.
   #[error("error compiling \"{sql}\": {source}")]
   SqlSyntax {
      sql: String,
      #[source]
      source: SqliteError,
   },

   /// The native engine failed while executing a statement.
   #[error("error executing \"{sql}\": {source}")]
   SqlExecution {
      sql: String,
      #[source]
      source: SqliteError,
   },

   /// The number of bind arguments does not match the statement's parameters.
   #[error("Expected {expected} bind arguments but {actual} were provided.")]
   BindArgumentCount { expected: usize, actual: usize },

   /// A bind index outside `1..=count` was used.
   #[error(
      "Cannot bind argument at index {index} because the index is out of range. The statement has {count} parameters."
   )]
   BindIndexOutOfRange { index: usize, count: usize },

   /// A cursor window operation failed, including reads against an
   /// incompatible storage class.
   #[error(transparent)]
   Window(#[from] sqlite_session_window::Error),

   /// The native engine reported that the database file is corrupt.
   #[error("database corruption detected in {label}: {source}")]
   CorruptionDetected {
      label: String,
      #[source]
      source: SqliteError,
   },

   /// The running statement was interrupted by a cancel request.
   #[error("statement was canceled: \"{sql}\"")]
   OperationCanceled { sql: String },

   /// The connection was used after it was closed.
   #[error("connection to {0} has been closed")]
   ConnectionClosed(String),

   /// Only SELECT and data-modifying statements may be cached.
   #[error("statement is not cacheable: \"{0}\"")]
   NotCacheable(String),

   /// A configuration value was outside its allowed range.
   #[error("{name} must be between 0 and {max}, got {value}")]
   ConfigRange {
      name: &'static str,
      value: usize,
      max: usize,
   },

   /// SQL text or a path contained an interior NUL byte.
   #[error("string contains a nul byte: {0:?}")]
   NulByte(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::Connection { .. } => "CONNECTION_ERROR".to_string(),
         Error::SqlSyntax { .. } => "SQL_SYNTAX_ERROR".to_string(),
         Error::SqlExecution { source, .. } => format!("SQLITE_{}", source.code()),
         Error::BindArgumentCount { .. } => "BIND_ARGUMENT_COUNT".to_string(),
         Error::BindIndexOutOfRange { .. } => "BIND_INDEX_OUT_OF_RANGE".to_string(),
         Error::Window(e) => e.error_code(),
         Error::CorruptionDetected { .. } => "CORRUPTION_DETECTED".to_string(),
         Error::OperationCanceled { .. } => "OPERATION_CANCELED".to_string(),
         Error::ConnectionClosed(_) => "CONNECTION_CLOSED".to_string(),
         Error::NotCacheable(_) => "NOT_CACHEABLE".to_string(),
         Error::ConfigRange { .. } => "CONFIG_RANGE".to_string(),
         Error::NulByte(_) => "NUL_BYTE".to_string(),
      }
   }

   /// Whether the error means the database file should be treated as corrupt.
   pub fn is_corruption(&self) -> bool {
      matches!(self, Error::CorruptionDetected { .. })
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
   use libsqlite3_sys::{SQLITE_CONSTRAINT_UNIQUE, SQLITE_CORRUPT_VTAB, SQLITE_INTERRUPT};

   use super::*;

   #[test]
   fn test_primary_code_masks_extended_bits() {
      let err = SqliteError::with_message(SQLITE_CONSTRAINT_UNIQUE, "UNIQUE constraint failed");
      assert_eq!(err.primary_code(), libsqlite3_sys::SQLITE_CONSTRAINT);
      assert!(!err.is_corruption());
      assert_eq!(
         err.to_string(),
         format!("(code: {SQLITE_CONSTRAINT_UNIQUE}) UNIQUE constraint failed")
      );
   }

   #[test]
   fn test_corruption_and_interrupt_detection() {
      assert!(SqliteError::from_code(SQLITE_CORRUPT_VTAB).is_corruption());
      assert!(SqliteError::from_code(SQLITE_INTERRUPT).is_interrupt());
      assert!(!SqliteError::from_code(SQLITE_INTERRUPT).message().is_empty());
   }

   #[test]
   fn test_error_code_sql_execution() {
      let err = Error::SqlExecution {
         sql: "INSERT INTO t VALUES (1)".into(),
         source: SqliteError::with_message(SQLITE_CONSTRAINT_UNIQUE, "UNIQUE constraint failed"),
      };
      assert_eq!(err.error_code(), format!("SQLITE_{SQLITE_CONSTRAINT_UNIQUE}"));
      assert!(err.to_string().contains("INSERT INTO t"));
   }

   #[test]
   fn test_error_code_bind_argument_count() {
      let err = Error::BindArgumentCount {
         expected: 2,
         actual: 3,
      };
      assert_eq!(err.error_code(), "BIND_ARGUMENT_COUNT");
      assert_eq!(err.to_string(), "Expected 2 bind arguments but 3 were provided.");
   }

   #[test]
   fn test_error_code_config_range() {
      let err = Error::ConfigRange {
         name: "max_sql_cache_size",
         value: 101,
         max: 100,
      };
      assert_eq!(err.error_code(), "CONFIG_RANGE");
      assert!(err.to_string().contains("101"));
   }

   #[test]
   fn test_error_code_window_passthrough() {
      let err = Error::from(sqlite_session_window::Error::ColumnsNotSet);
      assert_eq!(err.error_code(), "COLUMNS_NOT_SET");
   }
}
