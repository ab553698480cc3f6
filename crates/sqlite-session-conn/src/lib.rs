//! # sqlite-session-conn
//!
//! A single native SQLite connection with a bounded prepared statement cache.
//!
//! ## Core Types
//!
//! - **[`Connection`]**: Owns one database handle, applies engine settings on open
//!   and fills [`CursorWindow`](sqlite_session_window::CursorWindow)s from queries
//! - **[`Configuration`]**: Path, open flags and per-connection settings
//! - **[`StatementCache`]**: LRU cache that finalizes every evicted statement exactly once
//! - **[`StatementKind`]**: Classifies SQL by its leading keyword
//! - **[`InterruptHandle`]**: Cancels a running statement from another thread
//! - **[`Error`]**: Error type for connection operations
//!
//! ## Statement Lifecycle
//!
//! - **Checkout**: A cached statement is removed from the cache while it runs
//! - **Release**: SELECT and data-modifying statements are reset and returned
//!   to the cache; everything else is finalized immediately
//! - **Close**: Every cached statement is finalized before the handle closes

mod cache;
mod config;
mod connection;
mod error;
mod handle;
mod statement;
mod value;

pub use cache::{Cacheable, StatementCache};
pub use config::{Configuration, Lookaside, MAX_SQL_CACHE_SIZE, MEMORY_DB_PATH, OpenFlags, defaults};
pub use connection::{Connection, InterruptHandle};
pub use error::{Error, Result, SqliteError};
pub use statement::{PreparedStatement, StatementInfo, StatementKind, trim_sql};
pub use value::BindArg;
