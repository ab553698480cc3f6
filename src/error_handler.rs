//! Handling for databases reported as corrupt.

use std::fs;
use std::io;
use std::path::Path;

use sqlite_session_conn::Configuration;
use tracing::{error, warn};

/// Called when opening or using a database reports corruption, before the
/// open is retried.
pub trait DatabaseErrorHandler: Send + Sync {
   fn on_corruption(&self, config: &Configuration);
}

/// Deletes a corrupt database file together with its journal files so the
/// next open starts from an empty database.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDatabaseErrorHandler;

impl DatabaseErrorHandler for DefaultDatabaseErrorHandler {
   fn on_corruption(&self, config: &Configuration) {
      error!(path = %config.label(), "Corruption reported by sqlite on database");

      if config.is_in_memory_db() {
         return;
      }

      if let Err(e) = delete_database_files(Path::new(&config.path)) {
         warn!(path = %config.label(), error = %e, "Delete of corrupt database files failed");
      }
   }
}

/// Suffixes of the files SQLite keeps next to a database.
const SIDECAR_SUFFIXES: [&str; 3] = ["-journal", "-shm", "-wal"];

/// Delete a database file and its `-journal`, `-shm` and `-wal` siblings.
///
/// Missing files are ignored. Returns whether the main file existed.
pub fn delete_database_files(path: &Path) -> io::Result<bool> {
   let existed = remove_if_exists(path)?;
   for suffix in SIDECAR_SUFFIXES {
      let mut sibling = path.as_os_str().to_owned();
      sibling.push(suffix);
      remove_if_exists(Path::new(&sibling))?;
   }
   Ok(existed)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
   match fs::remove_file(path) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e),
   }
}

#[cfg(test)]
mod tests {
   use sqlite_session_conn::OpenFlags;
   use tempfile::TempDir;

   use super::*;

   #[test]
   fn test_deletes_database_and_sidecars() {
      let temp_dir = TempDir::new().unwrap();
      let db_path = temp_dir.path().join("corrupt.db");
      for name in ["corrupt.db", "corrupt.db-journal", "corrupt.db-wal", "other.db"] {
         fs::write(temp_dir.path().join(name), b"junk").unwrap();
      }

      let config = Configuration::new(db_path.to_string_lossy(), OpenFlags::create());
      DefaultDatabaseErrorHandler.on_corruption(&config);

      assert!(!db_path.exists());
      assert!(!temp_dir.path().join("corrupt.db-journal").exists());
      assert!(!temp_dir.path().join("corrupt.db-wal").exists());
      assert!(temp_dir.path().join("other.db").exists());
   }

   #[test]
   fn test_missing_files_are_ignored() {
      let temp_dir = TempDir::new().unwrap();
      let existed = delete_database_files(&temp_dir.path().join("absent.db")).unwrap();
      assert!(!existed);
   }

   #[test]
   fn test_in_memory_database_untouched() {
      DefaultDatabaseErrorHandler.on_corruption(&Configuration::in_memory());
   }
}
