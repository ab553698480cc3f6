use std::thread;

use sqlite_session_window::{CursorWindow, Error, StorageClass, pick_fill_window_start_position};

/// Fill `window` with rows of `source` starting at `start`, stopping when full.
fn fill(window: &CursorWindow, source: &[String], start: usize) -> usize {
   window.clear().unwrap();
   window.set_num_columns(2).unwrap();
   window.set_start_position(start).unwrap();

   let mut added = 0;
   for (position, text) in source.iter().enumerate().skip(start) {
      if !window.alloc_row().unwrap() {
         break;
      }
      let ok = window.put_long(position as i64, position, 0).unwrap()
         && window.put_string(text, position, 1).unwrap();
      if !ok {
         window.free_last_row().unwrap();
         break;
      }
      added += 1;
   }
   added
}

fn source_rows(count: usize) -> Vec<String> {
   (0..count).map(|i| format!("row-{i}-{}", "x".repeat(i % 7))).collect()
}

// ============================================================================
// Paging
// ============================================================================

#[test]
fn test_forward_scan_visits_every_row_once() {
   let source = source_rows(500);
   let window = CursorWindow::with_capacity("scan", 2048);

   let mut capacity = 0;
   let mut seen = Vec::new();
   for position in 0..source.len() {
      if !window.contains_position(position).unwrap() {
         let start = pick_fill_window_start_position(position, capacity);
         let added = fill(&window, &source, start);
         assert!(added > 0);
         if capacity == 0 {
            capacity = added;
         }
      }

      let start = window.start_position().unwrap();
      let rows = window.num_rows().unwrap();
      assert!(position >= start && position < start + rows);

      assert_eq!(window.get_long(position, 0).unwrap(), position as i64);
      assert_eq!(window.get_string(position, 1).unwrap(), source[position]);
      seen.push(position);
   }

   assert_eq!(seen, (0..source.len()).collect::<Vec<_>>());
}

#[test]
fn test_backward_scan_refills_before_required_row() {
   let source = source_rows(300);
   let window = CursorWindow::with_capacity("reverse", 1024);

   let capacity = fill(&window, &source, 0);
   assert!(capacity > 3);

   for position in (0..source.len()).rev() {
      if !window.contains_position(position).unwrap() {
         let start = pick_fill_window_start_position(position, capacity);
         fill(&window, &source, start);
      }
      assert_eq!(window.get_long(position, 0).unwrap(), position as i64);
   }
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_close_from_other_thread_waits_for_reference() {
   let window = CursorWindow::new("shared");
   window.set_num_columns(1).unwrap();
   window.alloc_row().unwrap();
   window.put_string("kept", 0, 0).unwrap();

   let reference = window.acquire_reference().unwrap();
   let closer = window.clone();
   thread::spawn(move || closer.close()).join().unwrap();

   assert!(window.is_closed());
   assert_eq!(window.get_type(0, 0).unwrap(), StorageClass::Text);
   assert_eq!(window.get_string(0, 0).unwrap(), "kept");

   drop(reference);
   assert!(matches!(window.get_string(0, 0), Err(Error::AlreadyClosed(_))));
}
