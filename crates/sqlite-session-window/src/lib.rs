//! # sqlite-session-window
//!
//! Fixed-capacity row buffers used to page SQLite query results.
//!
//! ## Core Types
//!
//! - **[`CursorWindow`]**: Reference-counted buffer holding a contiguous range of rows
//! - **[`StorageClass`]**: The five storage classes a window cell can hold
//! - **[`pick_fill_window_start_position`]**: Where a refill should start so the required row stays visible
//! - **[`Error`]**: Error type for window operations

mod error;
mod paging;
mod value;
mod window;

pub use error::{Error, Result};
pub use paging::pick_fill_window_start_position;
pub use value::StorageClass;
pub use window::{CursorWindow, DEFAULT_WINDOW_SIZE, WindowReference};
