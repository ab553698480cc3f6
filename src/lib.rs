//! # sqlite-session
//!
//! A thread-safe SQLite database layer with nested transactions and paged
//! cursors.
//!
//! ## Core Types
//!
//! - **[`Database`]**: Shareable handle that serializes access from many threads
//! - **[`Session`]**: Owns the connection and the stack of nested transactions
//! - **[`Statement`]**: A compiled statement with its own bind arguments
//! - **[`Cursor`]**: Random access over query results, loaded one [`CursorWindow`] at a time
//! - **[`OpenHelper`]**: Opens a database on first use and migrates its schema
//! - **[`Error`]**: Error type covering connection, window and session failures
//!
//! ## Transactions
//!
//! Transactions nest. Each level is marked successful on its own, and the
//! outermost level commits only when every level succeeded. Raw `BEGIN`,
//! `COMMIT` and `ROLLBACK` statements are routed through the same stack.
//!
//! ```
//! use sqlite_session::{Database, bind_args};
//!
//! let db = Database::create_in_memory().unwrap();
//! db.exec_sql("CREATE TABLE t (n INTEGER)").unwrap();
//!
//! db.begin_transaction().unwrap();
//! db.exec_sql_with_args("INSERT INTO t VALUES (?)", &bind_args![1]).unwrap();
//!
//! // The inner level is never marked successful.
//! db.begin_transaction().unwrap();
//! db.end_transaction().unwrap();
//!
//! db.set_transaction_successful().unwrap();
//! db.end_transaction().unwrap();
//!
//! let count = db.compile_statement("SELECT count(*) FROM t").unwrap();
//! assert_eq!(count.simple_query_for_long().unwrap(), 0);
//! ```

mod content_values;
mod cursor;
mod database;
mod error;
mod error_handler;
mod lock;
mod open_helper;
mod query_builder;
mod session;
mod statement;
mod transaction;

pub use content_values::{ConflictAlgorithm, ContentValues};
pub use cursor::Cursor;
pub use database::{Database, OpenState};
pub use error::{BoxDynError, Error, Result, SessionStateError};
pub use error_handler::{DatabaseErrorHandler, DefaultDatabaseErrorHandler, delete_database_files};
pub use open_helper::{OpenHelper, OpenHelperCallbacks};
pub use query_builder::{build_query_string, sql_escape_string};
pub use session::Session;
pub use statement::Statement;
pub use transaction::{TransactionListener, TransactionMode};

pub use sqlite_session_conn::{
   BindArg, Configuration, InterruptHandle, Lookaside, MAX_SQL_CACHE_SIZE, MEMORY_DB_PATH, OpenFlags,
   StatementKind, bind_args, defaults,
};
pub use sqlite_session_window::{
   CursorWindow, DEFAULT_WINDOW_SIZE, StorageClass, pick_fill_window_start_position,
};
