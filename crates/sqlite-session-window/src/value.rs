//! Storage classes and cell values held by a cursor window.

use std::fmt;

/// The storage class of a single window cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
   Null,
   Integer,
   Float,
   Text,
   Blob,
}

impl StorageClass {
   /// Upper-case SQL name of the storage class.
   pub fn as_str(self) -> &'static str {
      match self {
         StorageClass::Null => "NULL",
         StorageClass::Integer => "INTEGER",
         StorageClass::Float => "FLOAT",
         StorageClass::Text => "TEXT",
         StorageClass::Blob => "BLOB",
      }
   }
}

impl fmt::Display for StorageClass {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// A value stored in one cell of a window row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Field {
   Null,
   Integer(i64),
   Float(f64),
   Text(String),
   Blob(Vec<u8>),
}

impl Field {
   pub(crate) fn storage_class(&self) -> StorageClass {
      match self {
         Field::Null => StorageClass::Null,
         Field::Integer(_) => StorageClass::Integer,
         Field::Float(_) => StorageClass::Float,
         Field::Text(_) => StorageClass::Text,
         Field::Blob(_) => StorageClass::Blob,
      }
   }

   /// Bytes the value occupies beyond its fixed field slot.
   pub(crate) fn payload_size(&self) -> usize {
      match self {
         Field::Text(s) => s.len() + 1,
         Field::Blob(b) => b.len(),
         _ => 0,
      }
   }
}

/// Parse the leading integer of `text` the way `strtoll` does, yielding 0
/// when there is none. Values that overflow saturate.
pub(crate) fn parse_leading_i64(text: &str) -> i64 {
   let trimmed = text.trim_start();
   let bytes = trimmed.as_bytes();
   let mut end = 0;
   if matches!(bytes.first(), Some(b'+' | b'-')) {
      end = 1;
   }
   let digits_start = end;
   while end < bytes.len() && bytes[end].is_ascii_digit() {
      end += 1;
   }
   if end == digits_start {
      return 0;
   }

   let digits = &trimmed[..end];
   match digits.parse::<i64>() {
      Ok(v) => v,
      Err(_) if digits.starts_with('-') => i64::MIN,
      Err(_) => i64::MAX,
   }
}

/// Parse the longest numeric prefix of `text` the way `strtod` does,
/// yielding 0.0 when there is none.
pub(crate) fn parse_leading_f64(text: &str) -> f64 {
   let trimmed = text.trim_start();
   if let Ok(v) = trimmed.trim_end().parse::<f64>() {
      return v;
   }

   let bytes = trimmed.as_bytes();
   let mut end = 0;
   if matches!(bytes.first(), Some(b'+' | b'-')) {
      end = 1;
   }
   let mut seen_digit = false;
   let mut seen_dot = false;
   while end < bytes.len() {
      match bytes[end] {
         b'0'..=b'9' => seen_digit = true,
         b'.' if !seen_dot => seen_dot = true,
         _ => break,
      }
      end += 1;
   }
   if !seen_digit {
      return 0.0;
   }

   // Optional exponent, only kept when it is complete.
   if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
      let mut exp_end = end + 1;
      if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
         exp_end += 1;
      }
      let exp_digits = exp_end;
      while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
         exp_end += 1;
      }
      if exp_end > exp_digits {
         end = exp_end;
      }
   }

   trimmed[..end].parse::<f64>().unwrap_or(0.0)
}
