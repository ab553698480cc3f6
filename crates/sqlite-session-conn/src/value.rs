//! Positional bind arguments.

use std::fmt;

/// A value bound to a statement parameter.
///
/// Booleans bind as the integers 0 and 1. Any other type can be bound as
/// text through [`BindArg::text`] or the `From<String>` conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum BindArg {
   Null,
   Integer(i64),
   Float(f64),
   Text(String),
   Blob(Vec<u8>),
   Bool(bool),
}

impl BindArg {
   /// Bind the `Display` form of any value as text.
   pub fn text(value: impl fmt::Display) -> Self {
      BindArg::Text(value.to_string())
   }

   pub fn is_null(&self) -> bool {
      matches!(self, BindArg::Null)
   }
}

macro_rules! impl_from_integer {
   ($($ty:ty),*) => {
      $(
         impl From<$ty> for BindArg {
            fn from(value: $ty) -> Self {
               BindArg::Integer(i64::from(value))
            }
         }
      )*
   };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for BindArg {
   fn from(value: f32) -> Self {
      BindArg::Float(f64::from(value))
   }
}

impl From<f64> for BindArg {
   fn from(value: f64) -> Self {
      BindArg::Float(value)
   }
}

impl From<bool> for BindArg {
   fn from(value: bool) -> Self {
      BindArg::Bool(value)
   }
}

impl From<&str> for BindArg {
   fn from(value: &str) -> Self {
      BindArg::Text(value.to_owned())
   }
}

impl From<String> for BindArg {
   fn from(value: String) -> Self {
      BindArg::Text(value)
   }
}

impl From<&[u8]> for BindArg {
   fn from(value: &[u8]) -> Self {
      BindArg::Blob(value.to_vec())
   }
}

impl From<Vec<u8>> for BindArg {
   fn from(value: Vec<u8>) -> Self {
      BindArg::Blob(value)
   }
}

impl<T: Into<BindArg>> From<Option<T>> for BindArg {
   fn from(value: Option<T>) -> Self {
      value.map_or(BindArg::Null, Into::into)
   }
}

/// Build a `Vec<BindArg>` from heterogeneous values.
///
/// ```
/// use sqlite_session_conn::{BindArg, bind_args};
///
/// let args = bind_args![1, "two", 3.0, None::<i64>, true];
/// assert_eq!(args[1], BindArg::Text("two".into()));
/// assert_eq!(args[3], BindArg::Null);
/// ```
#[macro_export]
macro_rules! bind_args {
   () => { ::std::vec::Vec::<$crate::BindArg>::new() };
   ($($value:expr),+ $(,)?) => {
      vec![$($crate::BindArg::from($value)),+]
   };
}
