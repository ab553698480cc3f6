//! Owned wrappers around raw `sqlite3` and `sqlite3_stmt` pointers.

use std::borrow::Cow;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::ptr::{self, NonNull};
use std::slice;

use libsqlite3_sys::{
   SQLITE_DBCONFIG_LOOKASIDE, SQLITE_DONE, SQLITE_NOMEM, SQLITE_OK, SQLITE_ROW, SQLITE_TRANSIENT,
   SQLITE_UTF8, sqlite3, sqlite3_bind_blob64, sqlite3_bind_double, sqlite3_bind_int64,
   sqlite3_bind_null, sqlite3_bind_parameter_count, sqlite3_bind_text64, sqlite3_busy_timeout,
   sqlite3_changes, sqlite3_clear_bindings, sqlite3_close, sqlite3_column_blob,
   sqlite3_column_bytes, sqlite3_column_count, sqlite3_column_double, sqlite3_column_int64,
   sqlite3_column_name, sqlite3_column_text, sqlite3_column_type, sqlite3_db_config,
   sqlite3_db_handle, sqlite3_extended_result_codes, sqlite3_finalize, sqlite3_last_insert_rowid,
   sqlite3_open_v2, sqlite3_prepare_v2, sqlite3_reset, sqlite3_step, sqlite3_stmt,
   sqlite3_stmt_readonly,
};
use tracing::warn;

use crate::error::SqliteError;

/// Managed SQLite database handle, closed when dropped.
#[derive(Debug)]
pub(crate) struct ConnectionHandle(NonNull<sqlite3>);

// A database handle may move between threads as long as only one thread uses
// it at a time, which the owning `Connection` guarantees through `&mut self`.
unsafe impl Send for ConnectionHandle {}

impl ConnectionHandle {
   pub(crate) fn open(filename: &CStr, flags: c_int) -> Result<Self, SqliteError> {
      let mut handle = ptr::null_mut();

      // SAFETY: filename is NUL terminated and handle is a valid out-pointer.
      let status = unsafe { sqlite3_open_v2(filename.as_ptr(), &mut handle, flags, ptr::null()) };

      // A non-NULL handle must be closed even when opening failed, which the
      // Drop impl takes care of.
      let handle = Self(NonNull::new(handle).ok_or_else(|| SqliteError::from_code(SQLITE_NOMEM))?);

      if status != SQLITE_OK {
         return Err(handle.last_error());
      }

      // SAFETY: the handle is open and exclusively owned here.
      unsafe {
         sqlite3_extended_result_codes(handle.as_ptr(), 1);
      }

      Ok(handle)
   }

   #[inline]
   pub(crate) fn as_ptr(&self) -> *mut sqlite3 {
      self.0.as_ptr()
   }

   pub(crate) fn last_error(&self) -> SqliteError {
      SqliteError::new(self.as_ptr())
   }

   fn check(&self, status: c_int) -> Result<(), SqliteError> {
      if status == SQLITE_OK {
         Ok(())
      } else {
         Err(self.last_error())
      }
   }

   pub(crate) fn busy_timeout(&mut self, millis: u32) -> Result<(), SqliteError> {
      let millis = c_int::try_from(millis).unwrap_or(c_int::MAX);
      // SAFETY: the handle is open.
      let status = unsafe { sqlite3_busy_timeout(self.as_ptr(), millis) };
      self.check(status)
   }

   /// Let SQLite allocate a lookaside buffer of `count` slots of `slot_size` bytes.
   pub(crate) fn configure_lookaside(
      &mut self,
      slot_size: u32,
      count: u32,
   ) -> Result<(), SqliteError> {
      let slot_size = c_int::try_from(slot_size).unwrap_or(c_int::MAX);
      let count = c_int::try_from(count).unwrap_or(c_int::MAX);
      // SAFETY: a NULL buffer asks SQLite to allocate the lookaside memory itself.
      let status = unsafe {
         sqlite3_db_config(
            self.as_ptr(),
            SQLITE_DBCONFIG_LOOKASIDE,
            ptr::null_mut::<c_void>(),
            slot_size,
            count,
         )
      };
      self.check(status)
   }

   /// Rows modified by the most recent INSERT, UPDATE or DELETE.
   pub(crate) fn changes(&self) -> i64 {
      // SAFETY: the handle is open.
      i64::from(unsafe { sqlite3_changes(self.as_ptr()) })
   }

   pub(crate) fn last_insert_rowid(&self) -> i64 {
      // SAFETY: the handle is open.
      unsafe { sqlite3_last_insert_rowid(self.as_ptr()) }
   }

   /// Compile the first statement in `sql`. Returns `None` when the text holds
   /// no statement at all, such as an empty string or a lone comment.
   pub(crate) fn prepare(&mut self, sql: &str) -> Result<Option<StatementHandle>, SqliteError> {
      let len = c_int::try_from(sql.len())
         .map_err(|_| SqliteError::with_message(libsqlite3_sys::SQLITE_TOOBIG, "SQL is too long"))?;
      let mut statement = ptr::null_mut();

      // SAFETY: the SQL pointer is valid for `len` bytes, which SQLite reads
      // without requiring a NUL terminator.
      let status = unsafe {
         sqlite3_prepare_v2(
            self.as_ptr(),
            sql.as_ptr() as *const c_char,
            len,
            &mut statement,
            ptr::null_mut(),
         )
      };

      if status != SQLITE_OK {
         // SAFETY: finalizing NULL is a no-op, and any partial statement must go.
         unsafe { sqlite3_finalize(statement) };
         return Err(self.last_error());
      }

      Ok(NonNull::new(statement).map(StatementHandle))
   }
}

impl Drop for ConnectionHandle {
   fn drop(&mut self) {
      // SAFETY: the handle is open and every statement created on it is
      // finalized before the owning connection drops it.
      let status = unsafe { sqlite3_close(self.0.as_ptr()) };
      if status != SQLITE_OK {
         warn!(code = status, "sqlite3_close failed");
      }
   }
}

/// Managed prepared statement, finalized when dropped.
#[derive(Debug)]
pub(crate) struct StatementHandle(NonNull<sqlite3_stmt>);

// Statements travel with the connection that created them.
unsafe impl Send for StatementHandle {}

impl StatementHandle {
   #[inline]
   fn as_ptr(&self) -> *mut sqlite3_stmt {
      self.0.as_ptr()
   }

   fn column_index(index: usize) -> c_int {
      c_int::try_from(index).unwrap_or(c_int::MAX)
   }

   /// The error most recently recorded on the owning connection.
   pub(crate) fn last_error(&self) -> SqliteError {
      // SAFETY: a live statement always belongs to a live connection.
      SqliteError::new(unsafe { sqlite3_db_handle(self.as_ptr()) })
   }

   pub(crate) fn read_only(&self) -> bool {
      // SAFETY: the statement is live.
      unsafe { sqlite3_stmt_readonly(self.as_ptr()) != 0 }
   }

   pub(crate) fn bind_parameter_count(&self) -> usize {
      // SAFETY: the statement is live.
      let count = unsafe { sqlite3_bind_parameter_count(self.as_ptr()) };
      usize::try_from(count).unwrap_or(0)
   }

   pub(crate) fn column_count(&self) -> usize {
      // SAFETY: the statement is live.
      let count = unsafe { sqlite3_column_count(self.as_ptr()) };
      usize::try_from(count).unwrap_or(0)
   }

   pub(crate) fn column_name(&self, index: usize) -> String {
      // SAFETY: the statement is live; a NULL name only happens on OOM.
      unsafe {
         let name = sqlite3_column_name(self.as_ptr(), Self::column_index(index));
         if name.is_null() {
            return String::new();
         }
         CStr::from_ptr(name).to_string_lossy().into_owned()
      }
   }

   pub(crate) fn bind_null(&mut self, index: usize) -> c_int {
      // SAFETY: the statement is live; SQLite range-checks the index.
      unsafe { sqlite3_bind_null(self.as_ptr(), Self::column_index(index)) }
   }

   pub(crate) fn bind_int64(&mut self, index: usize, value: i64) -> c_int {
      // SAFETY: see bind_null.
      unsafe { sqlite3_bind_int64(self.as_ptr(), Self::column_index(index), value) }
   }

   pub(crate) fn bind_double(&mut self, index: usize, value: f64) -> c_int {
      // SAFETY: see bind_null.
      unsafe { sqlite3_bind_double(self.as_ptr(), Self::column_index(index), value) }
   }

   pub(crate) fn bind_text(&mut self, index: usize, value: &str) -> c_int {
      // SAFETY: SQLITE_TRANSIENT makes SQLite copy the bytes before returning.
      unsafe {
         sqlite3_bind_text64(
            self.as_ptr(),
            Self::column_index(index),
            value.as_ptr() as *const c_char,
            value.len() as u64,
            SQLITE_TRANSIENT(),
            SQLITE_UTF8 as u8,
         )
      }
   }

   pub(crate) fn bind_blob(&mut self, index: usize, value: &[u8]) -> c_int {
      // SAFETY: SQLITE_TRANSIENT makes SQLite copy the bytes before returning.
      unsafe {
         sqlite3_bind_blob64(
            self.as_ptr(),
            Self::column_index(index),
            value.as_ptr() as *const c_void,
            value.len() as u64,
            SQLITE_TRANSIENT(),
         )
      }
   }

   /// Step once, returning the raw result code.
   pub(crate) fn step_raw(&mut self) -> c_int {
      // SAFETY: the statement is live.
      unsafe { sqlite3_step(self.as_ptr()) }
   }

   /// Step once. `Ok(true)` means a row is available.
   pub(crate) fn step(&mut self) -> Result<bool, SqliteError> {
      match self.step_raw() {
         SQLITE_ROW => Ok(true),
         SQLITE_DONE => Ok(false),
         _ => Err(self.last_error()),
      }
   }

   pub(crate) fn reset(&mut self) -> Result<(), SqliteError> {
      // SAFETY: the statement is live.
      if unsafe { sqlite3_reset(self.as_ptr()) } != SQLITE_OK {
         return Err(self.last_error());
      }
      Ok(())
   }

   pub(crate) fn clear_bindings(&mut self) -> Result<(), SqliteError> {
      // SAFETY: the statement is live.
      if unsafe { sqlite3_clear_bindings(self.as_ptr()) } != SQLITE_OK {
         return Err(self.last_error());
      }
      Ok(())
   }

   pub(crate) fn column_type(&self, index: usize) -> c_int {
      // SAFETY: the statement is live and positioned on a row.
      unsafe { sqlite3_column_type(self.as_ptr(), Self::column_index(index)) }
   }

   pub(crate) fn column_int64(&self, index: usize) -> i64 {
      // SAFETY: the statement is live and positioned on a row.
      unsafe { sqlite3_column_int64(self.as_ptr(), Self::column_index(index)) }
   }

   pub(crate) fn column_double(&self, index: usize) -> f64 {
      // SAFETY: the statement is live and positioned on a row.
      unsafe { sqlite3_column_double(self.as_ptr(), Self::column_index(index)) }
   }

   pub(crate) fn column_text(&self, index: usize) -> Cow<'_, str> {
      let index = Self::column_index(index);
      // SAFETY: sqlite3_column_text must run before sqlite3_column_bytes so the
      // length matches the UTF-8 conversion; the pointer stays valid until
      // the next step, reset or finalize, all of which need `&mut self`.
      unsafe {
         let text = sqlite3_column_text(self.as_ptr(), index);
         let len = usize::try_from(sqlite3_column_bytes(self.as_ptr(), index)).unwrap_or(0);
         if text.is_null() || len == 0 {
            return Cow::Borrowed("");
         }
         String::from_utf8_lossy(slice::from_raw_parts(text, len))
      }
   }

   pub(crate) fn column_blob(&self, index: usize) -> &[u8] {
      let index = Self::column_index(index);
      // SAFETY: see column_text.
      unsafe {
         let blob = sqlite3_column_blob(self.as_ptr(), index) as *const u8;
         let len = usize::try_from(sqlite3_column_bytes(self.as_ptr(), index)).unwrap_or(0);
         if blob.is_null() || len == 0 {
            return &[];
         }
         slice::from_raw_parts(blob, len)
      }
   }
}

impl Drop for StatementHandle {
   fn drop(&mut self) {
      // SAFETY: the statement is live and dropped exactly once. The return
      // code only repeats the most recent step error, which was already reported.
      unsafe {
         sqlite3_finalize(self.as_ptr());
      }
   }
}
