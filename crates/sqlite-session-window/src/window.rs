//! Reference-counted row buffers for paging query results.
//!
//! A [`CursorWindow`] holds a contiguous slice of a query's rows, addressed
//! by absolute row position through its start position. The buffer has a
//! fixed byte budget, so the number of rows it can hold depends on the data
//! written into it and is only known after it has been filled once.
//!
//! Handles are cheap to clone and share one buffer. The buffer is freed when
//! the last reference is released; [`CursorWindow::close`] releases the
//! owner's reference and is safe to call more than once.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::value::{Field, StorageClass, parse_leading_f64, parse_leading_i64};

/// Default window size in bytes.
pub const DEFAULT_WINDOW_SIZE: usize = 2048 * 1024;

/// Bytes reserved for every field slot of an allocated row.
const FIELD_SLOT_SIZE: usize = 16;

/// Bytes reserved for the row directory entry of an allocated row.
const ROW_SLOT_SIZE: usize = 8;

struct Buffer {
   capacity: usize,
   used: usize,
   start_position: usize,
   num_columns: usize,
   rows: Vec<Vec<Field>>,
}

impl Buffer {
   fn new(capacity: usize) -> Self {
      Self {
         capacity,
         used: 0,
         start_position: 0,
         num_columns: 0,
         rows: Vec::new(),
      }
   }

   fn free_space(&self) -> usize {
      self.capacity.saturating_sub(self.used)
   }

   fn row_cost(&self) -> usize {
      ROW_SLOT_SIZE + self.num_columns * FIELD_SLOT_SIZE
   }

   fn out_of_bounds(&self, row: usize, column: usize) -> Error {
      Error::FieldOutOfBounds {
         row,
         column,
         num_rows: self.rows.len(),
         num_columns: self.num_columns,
      }
   }

   /// Resolve an absolute row position into the buffered row index.
   fn index_of(&self, row: usize, column: usize) -> Result<usize> {
      let index = row
         .checked_sub(self.start_position)
         .filter(|&i| i < self.rows.len() && column < self.num_columns)
         .ok_or_else(|| self.out_of_bounds(row, column))?;
      Ok(index)
   }

   fn field(&self, row: usize, column: usize) -> Result<&Field> {
      let index = self.index_of(row, column)?;
      Ok(&self.rows[index][column])
   }

   fn put(&mut self, row: usize, column: usize, value: Field) -> Result<bool> {
      let index = self.index_of(row, column)?;
      let old_size = self.rows[index][column].payload_size();
      let new_size = value.payload_size();
      if new_size > old_size && new_size - old_size > self.free_space() {
         return Ok(false);
      }

      self.used = self.used - old_size + new_size;
      self.rows[index][column] = value;
      Ok(true)
   }
}

struct Shared {
   name: String,
   references: AtomicUsize,
   closed: AtomicBool,
   buffer: Mutex<Option<Buffer>>,
}

impl Shared {
   fn acquire(&self) -> Result<()> {
      let mut current = self.references.load(Ordering::Acquire);
      loop {
         if current == 0 {
            return Err(Error::AlreadyClosed(format!("CursorWindow {{ name: {:?} }}", self.name)));
         }
         match self.references.compare_exchange_weak(
            current,
            current + 1,
            Ordering::AcqRel,
            Ordering::Acquire,
         ) {
            Ok(_) => return Ok(()),
            Err(actual) => current = actual,
         }
      }
   }

   fn release(&self) {
      if self.references.fetch_sub(1, Ordering::AcqRel) == 1 {
         self.buffer.lock().take();
         debug!(window = %self.name, "Cursor window disposed");
      }
   }
}

/// A fixed-capacity buffer holding a contiguous range of result rows.
#[derive(Clone)]
pub struct CursorWindow {
   shared: Arc<Shared>,
}

/// A reference held on a window for the duration of a longer operation.
///
/// The window's buffer stays alive until every outstanding reference is
/// dropped, even if the window is closed in the meantime.
pub struct WindowReference {
   shared: Arc<Shared>,
}

impl Drop for WindowReference {
   fn drop(&mut self) {
      self.shared.release();
   }
}

impl CursorWindow {
   /// Create a window with the default byte budget.
   pub fn new(name: impl Into<String>) -> Self {
      Self::with_capacity(name, DEFAULT_WINDOW_SIZE)
   }

   /// Create a window holding at most `capacity` bytes of row data.
   pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
      let name = name.into();
      trace!(window = %name, capacity, "Cursor window created");
      Self {
         shared: Arc::new(Shared {
            name,
            references: AtomicUsize::new(1),
            closed: AtomicBool::new(false),
            buffer: Mutex::new(Some(Buffer::new(capacity))),
         }),
      }
   }

   /// Name given to the window, usually the SQL that fills it.
   pub fn name(&self) -> &str {
      &self.shared.name
   }

   /// Take a reference that keeps the buffer alive until dropped.
   pub fn acquire_reference(&self) -> Result<WindowReference> {
      self.shared.acquire()?;
      Ok(WindowReference {
         shared: Arc::clone(&self.shared),
      })
   }

   /// Release the owner's reference. Calling it again is a no-op.
   pub fn close(&self) {
      if !self.shared.closed.swap(true, Ordering::AcqRel) {
         self.shared.release();
      }
   }

   /// Whether [`close`](Self::close) has been called on any handle to this window.
   pub fn is_closed(&self) -> bool {
      self.shared.closed.load(Ordering::Acquire)
   }

   /// Whether both handles refer to the same window.
   pub fn ptr_eq(&self, other: &CursorWindow) -> bool {
      Arc::ptr_eq(&self.shared, &other.shared)
   }

   fn with_buffer<R>(&self, f: impl FnOnce(&mut Buffer) -> Result<R>) -> Result<R> {
      let _reference = self.acquire_reference()?;
      let mut guard = self.shared.buffer.lock();
      match guard.as_mut() {
         Some(buffer) => f(buffer),
         None => Err(Error::AlreadyClosed(format!(
            "CursorWindow {{ name: {:?} }}",
            self.shared.name
         ))),
      }
   }

   /// Byte budget of the window.
   pub fn capacity(&self) -> Result<usize> {
      self.with_buffer(|b| Ok(b.capacity))
   }

   /// Absolute position of the first buffered row.
   pub fn start_position(&self) -> Result<usize> {
      self.with_buffer(|b| Ok(b.start_position))
   }

   pub fn set_start_position(&self, position: usize) -> Result<()> {
      self.with_buffer(|b| {
         b.start_position = position;
         Ok(())
      })
   }

   /// Number of rows currently buffered.
   pub fn num_rows(&self) -> Result<usize> {
      self.with_buffer(|b| Ok(b.rows.len()))
   }

   pub fn num_columns(&self) -> Result<usize> {
      self.with_buffer(|b| Ok(b.num_columns))
   }

   /// Whether absolute row `position` is inside `[start, start + num_rows)`.
   pub fn contains_position(&self, position: usize) -> Result<bool> {
      self.with_buffer(|b| {
         Ok(position >= b.start_position && position < b.start_position + b.rows.len())
      })
   }

   /// Drop every row and the column count, and reset the start position.
   pub fn clear(&self) -> Result<()> {
      self.with_buffer(|b| {
         b.rows.clear();
         b.used = 0;
         b.num_columns = 0;
         b.start_position = 0;
         Ok(())
      })
   }

   /// Set the number of columns. Returns `false` when the window already
   /// holds rows with a different column count.
   pub fn set_num_columns(&self, num_columns: usize) -> Result<bool> {
      self.with_buffer(|b| {
         if b.num_columns != num_columns && !b.rows.is_empty() {
            return Ok(false);
         }
         b.num_columns = num_columns;
         Ok(true)
      })
   }

   /// Append an empty row of NULL fields. Returns `false` when the window is full.
   pub fn alloc_row(&self) -> Result<bool> {
      self.with_buffer(|b| {
         if b.num_columns == 0 {
            return Err(Error::ColumnsNotSet);
         }
         let cost = b.row_cost();
         if cost > b.free_space() {
            return Ok(false);
         }
         b.used += cost;
         b.rows.push(vec![Field::Null; b.num_columns]);
         Ok(true)
      })
   }

   /// Remove the most recently allocated row along with its field data.
   pub fn free_last_row(&self) -> Result<()> {
      self.with_buffer(|b| {
         if let Some(row) = b.rows.pop() {
            let payload: usize = row.iter().map(Field::payload_size).sum();
            b.used -= b.row_cost() + payload;
         }
         Ok(())
      })
   }

   pub fn put_null(&self, row: usize, column: usize) -> Result<bool> {
      self.with_buffer(|b| b.put(row, column, Field::Null))
   }

   pub fn put_long(&self, value: i64, row: usize, column: usize) -> Result<bool> {
      self.with_buffer(|b| b.put(row, column, Field::Integer(value)))
   }

   pub fn put_double(&self, value: f64, row: usize, column: usize) -> Result<bool> {
      self.with_buffer(|b| b.put(row, column, Field::Float(value)))
   }

   pub fn put_string(&self, value: &str, row: usize, column: usize) -> Result<bool> {
      self.with_buffer(|b| b.put(row, column, Field::Text(value.to_owned())))
   }

   pub fn put_blob(&self, value: &[u8], row: usize, column: usize) -> Result<bool> {
      self.with_buffer(|b| b.put(row, column, Field::Blob(value.to_vec())))
   }

   /// Storage class of a cell. A cell outside the buffered range reads as NULL.
   pub fn get_type(&self, row: usize, column: usize) -> Result<StorageClass> {
      self.with_buffer(|b| {
         Ok(b
            .field(row, column)
            .map(Field::storage_class)
            .unwrap_or(StorageClass::Null))
      })
   }

   pub fn is_null(&self, row: usize, column: usize) -> Result<bool> {
      Ok(self.get_type(row, column)? == StorageClass::Null)
   }

   /// Read a cell as a 64-bit integer.
   ///
   /// Floats are truncated, text is parsed leniently and NULL reads as 0.
   pub fn get_long(&self, row: usize, column: usize) -> Result<i64> {
      self.with_buffer(|b| match b.field(row, column)? {
         Field::Null => Ok(0),
         Field::Integer(v) => Ok(*v),
         Field::Float(v) => Ok(*v as i64),
         Field::Text(s) => Ok(parse_leading_i64(s)),
         Field::Blob(_) => Err(mismatch(row, column, "long", StorageClass::Blob)),
      })
   }

   /// Read a cell as a 64-bit float. NULL reads as 0.0.
   pub fn get_double(&self, row: usize, column: usize) -> Result<f64> {
      self.with_buffer(|b| match b.field(row, column)? {
         Field::Null => Ok(0.0),
         Field::Integer(v) => Ok(*v as f64),
         Field::Float(v) => Ok(*v),
         Field::Text(s) => Ok(parse_leading_f64(s)),
         Field::Blob(_) => Err(mismatch(row, column, "double", StorageClass::Blob)),
      })
   }

   /// Read a cell as text. Numbers are formatted and NULL reads as "".
   pub fn get_string(&self, row: usize, column: usize) -> Result<String> {
      self.with_buffer(|b| match b.field(row, column)? {
         Field::Null => Ok(String::new()),
         Field::Integer(v) => Ok(v.to_string()),
         Field::Float(v) => Ok(v.to_string()),
         Field::Text(s) => Ok(s.clone()),
         Field::Blob(_) => Err(mismatch(row, column, "string", StorageClass::Blob)),
      })
   }

   /// Read a cell as bytes. NULL reads as an empty vector.
   pub fn get_blob(&self, row: usize, column: usize) -> Result<Vec<u8>> {
      self.with_buffer(|b| match b.field(row, column)? {
         Field::Null => Ok(Vec::new()),
         Field::Integer(v) => Ok(v.to_string().into_bytes()),
         Field::Float(v) => Ok(v.to_string().into_bytes()),
         Field::Text(s) => Ok(s.as_bytes().to_vec()),
         Field::Blob(v) => Ok(v.clone()),
      })
   }

   pub fn get_int(&self, row: usize, column: usize) -> Result<i32> {
      Ok(self.get_long(row, column)? as i32)
   }

   pub fn get_short(&self, row: usize, column: usize) -> Result<i16> {
      Ok(self.get_long(row, column)? as i16)
   }

   pub fn get_float(&self, row: usize, column: usize) -> Result<f32> {
      Ok(self.get_double(row, column)? as f32)
   }
}

fn mismatch(row: usize, column: usize, expected: &'static str, actual: StorageClass) -> Error {
   Error::TypeMismatch {
      row,
      column,
      expected,
      actual: actual.as_str(),
   }
}

impl fmt::Debug for CursorWindow {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("CursorWindow")
         .field("name", &self.shared.name)
         .field("references", &self.shared.references.load(Ordering::Relaxed))
         .field("closed", &self.is_closed())
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn window_with_row(columns: usize) -> CursorWindow {
      let window = CursorWindow::new("test");
      assert!(window.set_num_columns(columns).unwrap());
      assert!(window.alloc_row().unwrap());
      window
   }

   #[test]
   fn test_alloc_requires_columns() {
      let window = CursorWindow::new("test");
      assert!(matches!(window.alloc_row(), Err(Error::ColumnsNotSet)));
   }

   #[test]
   fn test_put_and_get_each_storage_class() {
      let window = window_with_row(5);
      assert!(window.put_null(0, 0).unwrap());
      assert!(window.put_long(42, 0, 1).unwrap());
      assert!(window.put_double(1.5, 0, 2).unwrap());
      assert!(window.put_string("hello", 0, 3).unwrap());
      assert!(window.put_blob(&[1, 2, 3], 0, 4).unwrap());

      assert_eq!(window.get_type(0, 0).unwrap(), StorageClass::Null);
      assert_eq!(window.get_long(0, 1).unwrap(), 42);
      assert_eq!(window.get_double(0, 2).unwrap(), 1.5);
      assert_eq!(window.get_string(0, 3).unwrap(), "hello");
      assert_eq!(window.get_blob(0, 4).unwrap(), vec![1, 2, 3]);
   }

   #[test]
   fn test_null_reads_as_defaults() {
      let window = window_with_row(1);
      assert_eq!(window.get_long(0, 0).unwrap(), 0);
      assert_eq!(window.get_double(0, 0).unwrap(), 0.0);
      assert_eq!(window.get_string(0, 0).unwrap(), "");
      assert!(window.get_blob(0, 0).unwrap().is_empty());
      assert!(window.is_null(0, 0).unwrap());
   }

   #[test]
   fn test_coercions() {
      let window = window_with_row(3);
      window.put_string("12abc", 0, 0).unwrap();
      window.put_double(9.75, 0, 1).unwrap();
      window.put_long(-3, 0, 2).unwrap();

      assert_eq!(window.get_long(0, 0).unwrap(), 12);
      assert_eq!(window.get_long(0, 1).unwrap(), 9);
      assert_eq!(window.get_string(0, 2).unwrap(), "-3");
      assert_eq!(window.get_double(0, 2).unwrap(), -3.0);
      assert_eq!(window.get_int(0, 1).unwrap(), 9);
   }

   #[test]
   fn test_blob_rejects_numeric_and_string_getters() {
      let window = window_with_row(1);
      window.put_blob(b"raw", 0, 0).unwrap();
      assert!(matches!(window.get_long(0, 0), Err(Error::TypeMismatch { .. })));
      assert!(matches!(window.get_double(0, 0), Err(Error::TypeMismatch { .. })));
      assert!(matches!(window.get_string(0, 0), Err(Error::TypeMismatch { .. })));
      assert_eq!(window.get_blob(0, 0).unwrap(), b"raw".to_vec());
   }

   #[test]
   fn test_positions_are_absolute() {
      let window = window_with_row(1);
      window.set_start_position(100).unwrap();
      assert!(window.put_long(7, 100, 0).unwrap());
      assert_eq!(window.get_long(100, 0).unwrap(), 7);
      assert!(window.contains_position(100).unwrap());
      assert!(!window.contains_position(101).unwrap());
      assert!(!window.contains_position(99).unwrap());
      assert!(matches!(window.get_long(0, 0), Err(Error::FieldOutOfBounds { .. })));
      assert_eq!(window.get_type(99, 0).unwrap(), StorageClass::Null);
   }

   #[test]
   fn test_capacity_limits_rows() {
      // Two columns cost 8 + 2 * 16 = 40 bytes per row.
      let window = CursorWindow::with_capacity("small", 100);
      window.set_num_columns(2).unwrap();
      assert!(window.alloc_row().unwrap());
      assert!(window.alloc_row().unwrap());
      assert!(!window.alloc_row().unwrap());
      assert_eq!(window.num_rows().unwrap(), 2);

      // 20 bytes remain, so a 30 byte string does not fit.
      assert!(!window.put_string(&"x".repeat(30), 1, 0).unwrap());
      assert!(window.put_string("short", 1, 0).unwrap());

      window.free_last_row().unwrap();
      assert_eq!(window.num_rows().unwrap(), 1);
      assert!(window.alloc_row().unwrap());
   }

   #[test]
   fn test_set_num_columns_locked_while_rows_exist() {
      let window = window_with_row(2);
      assert!(!window.set_num_columns(3).unwrap());
      assert!(window.set_num_columns(2).unwrap());
      window.clear().unwrap();
      assert!(window.set_num_columns(3).unwrap());
      assert_eq!(window.num_rows().unwrap(), 0);
   }

   #[test]
   fn test_close_is_idempotent() {
      let window = window_with_row(1);
      window.close();
      window.close();
      assert!(window.is_closed());
      assert!(matches!(window.num_rows(), Err(Error::AlreadyClosed(_))));
      assert!(matches!(window.acquire_reference(), Err(Error::AlreadyClosed(_))));
   }

   #[test]
   fn test_reference_outlives_close() {
      let window = window_with_row(1);
      window.put_long(5, 0, 0).unwrap();

      let reference = window.acquire_reference().unwrap();
      window.close();
      assert_eq!(window.get_long(0, 0).unwrap(), 5);

      drop(reference);
      assert!(window.get_long(0, 0).is_err());
   }

   #[test]
   fn test_clones_share_buffer() {
      let window = window_with_row(1);
      let other = window.clone();
      other.put_string("shared", 0, 0).unwrap();
      assert_eq!(window.get_string(0, 0).unwrap(), "shared");
      assert!(window.ptr_eq(&other));
      assert!(!window.ptr_eq(&CursorWindow::new("other")));

      other.close();
      assert!(window.is_closed());
   }
}
