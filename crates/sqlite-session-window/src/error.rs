/// Result type alias for cursor window operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for cursor window operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// The window's last reference was released and its buffer freed.
   #[error("attempt to re-open an already-closed object: {0}")]
   AlreadyClosed(String),

   /// A cell was read or written outside the rows and columns held by the window.
   #[error("couldn't read row {row}, col {column} from cursor window holding {num_rows} rows and {num_columns} columns")]
   FieldOutOfBounds {
      row: usize,
      column: usize,
      num_rows: usize,
      num_columns: usize,
   },

   /// `set_num_columns` was not called before the first row was allocated.
   #[error("set_num_columns must be called before rows are allocated")]
   ColumnsNotSet,

   /// The column count cannot change while the window holds rows.
   #[error("cannot change column count from {current} to {requested} while the window holds rows")]
   ColumnCountLocked { current: usize, requested: usize },

   /// A typed getter was called against a cell of an incompatible storage class.
   #[error("cannot read {actual} value at row {row}, col {column} as {expected}")]
   TypeMismatch {
      row: usize,
      column: usize,
      expected: &'static str,
      actual: &'static str,
   },
}

impl Error {
   /// Extract a structured error code from the error type.
   pub fn error_code(&self) -> String {
      match self {
         Error::AlreadyClosed(_) => "WINDOW_CLOSED".to_string(),
         Error::FieldOutOfBounds { .. } => "FIELD_OUT_OF_BOUNDS".to_string(),
         Error::ColumnsNotSet => "COLUMNS_NOT_SET".to_string(),
         Error::ColumnCountLocked { .. } => "COLUMN_COUNT_LOCKED".to_string(),
         Error::TypeMismatch { .. } => "TYPE_MISMATCH".to_string(),
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_code_already_closed() {
      let err = Error::AlreadyClosed("CursorWindow { name: \"users\" }".into());
      assert_eq!(err.error_code(), "WINDOW_CLOSED");
      assert!(err.to_string().contains("already-closed"));
   }

   #[test]
   fn test_error_code_field_out_of_bounds() {
      let err = Error::FieldOutOfBounds {
         row: 12,
         column: 3,
         num_rows: 10,
         num_columns: 2,
      };
      assert_eq!(err.error_code(), "FIELD_OUT_OF_BOUNDS");
      assert!(err.to_string().contains("row 12"));
      assert!(err.to_string().contains("10 rows"));
   }

   #[test]
   fn test_error_code_type_mismatch() {
      let err = Error::TypeMismatch {
         row: 0,
         column: 1,
         expected: "long",
         actual: "BLOB",
      };
      assert_eq!(err.error_code(), "TYPE_MISMATCH");
      assert_eq!(err.to_string(), "cannot read BLOB value at row 0, col 1 as long");
   }

   #[test]
   fn test_error_code_columns() {
      assert_eq!(Error::ColumnsNotSet.error_code(), "COLUMNS_NOT_SET");
      let err = Error::ColumnCountLocked {
         current: 2,
         requested: 3,
      };
      assert_eq!(err.error_code(), "COLUMN_COUNT_LOCKED");
   }
}
