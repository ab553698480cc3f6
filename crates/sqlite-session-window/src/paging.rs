//! Start-position policy for refilling a cursor window.
//!
//! When a cursor moves outside the rows held by its window, the window is
//! refilled starting a little before the required row. Roughly a third of
//! the window is spent on rows before the required one and the rest on rows
//! after it, since cursors mostly scroll forward.

/// Pick the absolute row position a refill should start from.
///
/// `capacity` is the number of rows the window held after its first fill,
/// or 0 when that is not known yet.
///
/// ```
/// use sqlite_session_window::pick_fill_window_start_position;
///
/// assert_eq!(pick_fill_window_start_position(100, 30), 90);
/// assert_eq!(pick_fill_window_start_position(5, 30), 0);
/// assert_eq!(pick_fill_window_start_position(42, 0), 42);
/// ```
pub fn pick_fill_window_start_position(required_position: usize, capacity: usize) -> usize {
   required_position.saturating_sub(capacity / 3)
}
