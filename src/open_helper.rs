//! Lazy database creation and schema version management.

use std::sync::Arc;

use sqlite_session_conn::{Configuration, OpenFlags};
use tracing::{debug, warn};

use crate::database::Database;
use crate::error::{Error, Result};
use crate::error_handler::{DatabaseErrorHandler, DefaultDatabaseErrorHandler};

/// Schema hooks run by [`OpenHelper`] when it opens a database.
///
/// `on_create`, `on_upgrade` and `on_downgrade` run inside a transaction
/// that also stores the new version, so a failure leaves the schema untouched.
pub trait OpenHelperCallbacks: Send {
   /// Called before the version check. Suited to connection settings such
   /// as write-ahead logging or foreign keys.
   fn on_configure(&mut self, _db: &Database) -> Result<()> {
      Ok(())
   }

   /// Called when the database has no schema yet (version 0).
   fn on_create(&mut self, db: &Database) -> Result<()>;

   fn on_upgrade(&mut self, db: &Database, old_version: i64, new_version: i64) -> Result<()>;

   /// Called when the database is newer than the helper. Fails by default.
   fn on_downgrade(&mut self, _db: &Database, old_version: i64, new_version: i64) -> Result<()> {
      Err(Error::Downgrade {
         from: old_version,
         to: new_version,
      })
   }

   /// Called once the schema is at the expected version.
   fn on_open(&mut self, _db: &Database) -> Result<()> {
      Ok(())
   }
}

/// Opens a database on first use and brings its schema to `version`.
///
/// # Examples
///
/// ```
/// use sqlite_session::{Database, OpenHelper, OpenHelperCallbacks, Result};
///
/// struct Schema;
///
/// impl OpenHelperCallbacks for Schema {
///    fn on_create(&mut self, db: &Database) -> Result<()> {
///       db.exec_sql("CREATE TABLE notes (body TEXT)")
///    }
///
///    fn on_upgrade(&mut self, _db: &Database, _old: i64, _new: i64) -> Result<()> {
///       Ok(())
///    }
/// }
///
/// let mut helper = OpenHelper::new(None, 1, Schema).unwrap();
/// let db = helper.writable_database().unwrap();
/// assert_eq!(db.version().unwrap(), 1);
/// ```
pub struct OpenHelper<C> {
   path: Option<String>,
   version: i64,
   callbacks: C,
   database: Option<Database>,
   write_ahead_logging: bool,
   error_handler: Arc<dyn DatabaseErrorHandler>,
}

impl<C: OpenHelperCallbacks> OpenHelper<C> {
   /// Create a helper for the database file at `path`, or a private in-memory
   /// database when `path` is `None`. Nothing is opened until a database is
   /// requested.
   pub fn new(path: Option<&str>, version: i64, callbacks: C) -> Result<Self> {
      if version < 1 {
         return Err(Error::InvalidArgument(format!("Version must be >= 1, was {version}")));
      }
      Ok(Self {
         path: path.map(str::to_owned),
         version,
         callbacks,
         database: None,
         write_ahead_logging: false,
         error_handler: Arc::new(DefaultDatabaseErrorHandler),
      })
   }

   pub fn with_error_handler(mut self, error_handler: Arc<dyn DatabaseErrorHandler>) -> Self {
      self.error_handler = error_handler;
      self
   }

   /// Name of the database file, or `None` for an in-memory database.
   pub fn database_name(&self) -> Option<&str> {
      self.path.as_deref()
   }

   pub fn version(&self) -> i64 {
      self.version
   }

   pub fn callbacks(&self) -> &C {
      &self.callbacks
   }

   /// Use write-ahead logging for databases opened from now on, and switch
   /// the current database if one is open for writing.
   pub fn set_write_ahead_logging_enabled(&mut self, enabled: bool) -> Result<()> {
      if self.write_ahead_logging == enabled {
         return Ok(());
      }
      if let Some(db) = &self.database
         && db.is_open()
         && !db.is_read_only()
      {
         if enabled {
            db.enable_write_ahead_logging()?;
         } else {
            db.disable_write_ahead_logging()?;
         }
      }
      self.write_ahead_logging = enabled;
      Ok(())
   }

   /// Open the database for reading and writing, creating or migrating the
   /// schema on first use.
   pub fn writable_database(&mut self) -> Result<Database> {
      self.get_database(true)
   }

   /// Like [`OpenHelper::writable_database`], but falls back to a read-only
   /// database when it cannot be opened for writing.
   pub fn readable_database(&mut self) -> Result<Database> {
      self.get_database(false)
   }

   /// Close the database if one is open.
   pub fn close(&mut self) {
      if let Some(db) = self.database.take() {
         db.close();
      }
   }

   fn get_database(&mut self, writable: bool) -> Result<Database> {
      if let Some(db) = &self.database {
         if !db.is_open() {
            self.database = None;
         } else if !writable || !db.is_read_only() {
            return Ok(db.clone());
         }
      }

      let (db, opened) = match self.database.take() {
         Some(db) => {
            if let Err(e) = db.reopen_read_write() {
               self.database = Some(db);
               return Err(e);
            }
            (db, false)
         }
         None => (self.open(writable)?, true),
      };

      match self.initialize(&db) {
         Ok(()) => {
            self.database = Some(db.clone());
            Ok(db)
         }
         Err(e) => {
            if opened {
               db.close();
            } else {
               self.database = Some(db);
            }
            Err(e)
         }
      }
   }

   fn open(&self, writable: bool) -> Result<Database> {
      let Some(path) = &self.path else {
         return Database::open_with_handler(Configuration::in_memory(), self.error_handler.clone());
      };

      let flags = OpenFlags::create().with_write_ahead_logging(self.write_ahead_logging);
      match Database::open_with_handler(Configuration::new(path.clone(), flags), self.error_handler.clone()) {
         Ok(db) => Ok(db),
         Err(e) if !writable => {
            warn!(path = %path, error = %e, "Couldn't open database for writing, trying read-only");
            let db = Database::open_with_handler(
               Configuration::new(path.clone(), OpenFlags::read_only()),
               self.error_handler.clone(),
            )?;
            debug!(path = %path, "Opened database in read-only mode");
            Ok(db)
         }
         Err(e) => Err(e),
      }
   }

   fn initialize(&mut self, db: &Database) -> Result<()> {
      self.callbacks.on_configure(db)?;

      let old_version = db.version()?;
      let new_version = self.version;
      if old_version != new_version {
         if db.is_read_only() {
            return Err(Error::InvalidArgument(format!(
               "Can't upgrade read-only database from version {old_version} to {new_version}: {}",
               db.path()
            )));
         }

         let callbacks = &mut self.callbacks;
         db.with_transaction(|db| {
            if old_version == 0 {
               callbacks.on_create(db)?;
            } else if old_version > new_version {
               callbacks.on_downgrade(db, old_version, new_version)?;
            } else {
               callbacks.on_upgrade(db, old_version, new_version)?;
            }
            db.set_version(new_version)
         })?;
         debug!(path = %db.path(), old_version, new_version, "Migrated database schema");
      }

      self.callbacks.on_open(db)
   }
}

impl<C> std::fmt::Debug for OpenHelper<C> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("OpenHelper")
         .field("path", &self.path)
         .field("version", &self.version)
         .field("database", &self.database)
         .field("write_ahead_logging", &self.write_ahead_logging)
         .finish()
   }
}
