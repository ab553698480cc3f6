//! Configuration for a SQLite connection

use std::ffi::c_int;

use libsqlite3_sys::{SQLITE_OPEN_CREATE, SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Path that selects a private in-memory database.
pub const MEMORY_DB_PATH: &str = ":memory:";

/// Upper bound for [`Configuration::max_sql_cache_size`].
pub const MAX_SQL_CACHE_SIZE: usize = 100;

/// Engine settings applied to every connection when it opens.
pub mod defaults {
   /// Page size for newly created databases, in bytes.
   pub const PAGE_SIZE: i64 = 1024;

   /// Journal mode used when write-ahead logging is off.
   pub const JOURNAL_MODE: &str = "delete";

   /// Synchronous mode used with the default journal mode.
   pub const SYNC_MODE: &str = "normal";

   /// Synchronous mode used with write-ahead logging.
   pub const WAL_SYNC_MODE: &str = "normal";

   /// Maximum size of a retained journal file, in bytes.
   pub const JOURNAL_SIZE_LIMIT: i64 = 10000;

   /// Pages written to the WAL before an automatic checkpoint.
   pub const WAL_AUTO_CHECKPOINT: i64 = 1000;

   /// How long a statement waits on a locked database before failing.
   pub const BUSY_TIMEOUT_MS: u32 = 2500;

   /// Prepared statements kept per connection.
   pub const MAX_SQL_CACHE_SIZE: usize = 25;
}

/// How the database file is opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OpenFlags {
   /// Open without write access.
   ///
   /// Default: false
   pub read_only: bool,

   /// Create the database file when it does not exist.
   ///
   /// Default: false
   pub create_if_necessary: bool,

   /// Use write-ahead logging instead of a rollback journal.
   ///
   /// Default: false
   pub enable_write_ahead_logging: bool,
}

impl OpenFlags {
   /// Read-write access to an existing database.
   pub fn read_write() -> Self {
      Self::default()
   }

   pub fn read_only() -> Self {
      Self {
         read_only: true,
         ..Self::default()
      }
   }

   /// Read-write access, creating the database when missing.
   pub fn create() -> Self {
      Self {
         create_if_necessary: true,
         ..Self::default()
      }
   }

   pub fn with_write_ahead_logging(mut self, enabled: bool) -> Self {
      self.enable_write_ahead_logging = enabled;
      self
   }

   pub(crate) fn to_sqlite(self) -> c_int {
      if self.create_if_necessary {
         SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE
      } else if self.read_only {
         SQLITE_OPEN_READONLY
      } else {
         SQLITE_OPEN_READWRITE
      }
   }
}

/// Lookaside allocator settings for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lookaside {
   pub slot_size: u32,
   pub slot_count: u32,
}

/// Everything needed to open a connection.
///
/// A configuration is never changed in place on a live connection; the
/// connection is closed and reopened with a modified copy instead.
///
/// # Examples
///
/// ```
/// use sqlite_session_conn::{Configuration, OpenFlags};
///
/// let config = Configuration {
///    foreign_key_constraints_enabled: true,
///    ..Configuration::new("app.db", OpenFlags::create())
/// };
/// assert_eq!(config.max_sql_cache_size, 25);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
   /// Database file path, or [`MEMORY_DB_PATH`].
   pub path: String,

   /// How the file is opened.
   ///
   /// Default: read-write, no create, no WAL
   #[serde(default)]
   pub open_flags: OpenFlags,

   /// Maximum number of prepared statements cached by the connection.
   ///
   /// Must not exceed [`MAX_SQL_CACHE_SIZE`]. 0 disables the cache.
   ///
   /// Default: 25
   #[serde(default = "default_max_sql_cache_size")]
   pub max_sql_cache_size: usize,

   /// Whether `PRAGMA foreign_keys` is switched on.
   ///
   /// Default: false
   #[serde(default)]
   pub foreign_key_constraints_enabled: bool,

   /// Lookaside allocator override. `None` keeps the engine's default.
   ///
   /// Default: None
   #[serde(default)]
   pub lookaside: Option<Lookaside>,
}

fn default_max_sql_cache_size() -> usize {
   defaults::MAX_SQL_CACHE_SIZE
}

impl Configuration {
   pub fn new(path: impl Into<String>, open_flags: OpenFlags) -> Self {
      Self {
         path: path.into(),
         open_flags,
         max_sql_cache_size: defaults::MAX_SQL_CACHE_SIZE,
         foreign_key_constraints_enabled: false,
         lookaside: None,
      }
   }

   /// A private in-memory database.
   pub fn in_memory() -> Self {
      Self::new(MEMORY_DB_PATH, OpenFlags::create())
   }

   /// Name used for the database in logs and error messages.
   pub fn label(&self) -> &str {
      &self.path
   }

   pub fn is_in_memory_db(&self) -> bool {
      self.path.eq_ignore_ascii_case(MEMORY_DB_PATH)
   }

   pub fn is_read_only(&self) -> bool {
      self.open_flags.read_only
   }

   pub fn is_write_ahead_logging_enabled(&self) -> bool {
      self.open_flags.enable_write_ahead_logging
   }

   /// Check value ranges before the configuration is used to open a connection.
   pub fn validate(&self) -> Result<()> {
      if self.max_sql_cache_size > MAX_SQL_CACHE_SIZE {
         return Err(Error::ConfigRange {
            name: "max_sql_cache_size",
            value: self.max_sql_cache_size,
            max: MAX_SQL_CACHE_SIZE,
         });
      }
      Ok(())
   }
}
