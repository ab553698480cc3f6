//! Reentrant lock that keeps a database pinned to one thread for the whole
//! lifetime of a transaction.

use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct LockState {
   owner: Option<ThreadId>,
   holds: usize,
   pinned: bool,
}

/// A lock owned by at most one thread at a time.
///
/// The owning thread may lock it again without blocking. While pinned, the
/// lock stays with its owner even after every guard is dropped, so other
/// threads wait until the outermost transaction ends.
#[derive(Debug, Default)]
pub(crate) struct TransactionLock {
   state: Mutex<LockState>,
   released: Condvar,
}

impl TransactionLock {
   pub(crate) fn new() -> Self {
      Self::default()
   }

   /// Block until the current thread owns the lock.
   pub(crate) fn lock(&self) -> TransactionLockGuard<'_> {
      let me = thread::current().id();
      let mut state = self.state.lock();
      while state.owner.is_some_and(|owner| owner != me) {
         self.released.wait(&mut state);
      }
      state.owner = Some(me);
      state.holds += 1;
      TransactionLockGuard { lock: self }
   }

   fn unlock(&self) {
      let mut state = self.state.lock();
      state.holds = state.holds.saturating_sub(1);
      if state.holds == 0 {
         state.owner = None;
         state.pinned = false;
         drop(state);
         self.released.notify_one();
      }
   }

   /// Keep the lock with the current owner until [`TransactionLock::unpin`].
   /// Must be called while holding a guard.
   pub(crate) fn pin(&self) {
      let mut state = self.state.lock();
      if !state.pinned {
         state.pinned = true;
         state.holds += 1;
      }
   }

   /// Drop the hold taken by [`TransactionLock::pin`]. Must be called while
   /// holding a guard.
   pub(crate) fn unpin(&self) {
      let mut state = self.state.lock();
      if state.pinned {
         state.pinned = false;
         state.holds = state.holds.saturating_sub(1);
      }
   }

   pub(crate) fn is_held_by_current_thread(&self) -> bool {
      self.state.lock().owner == Some(thread::current().id())
   }

   pub(crate) fn is_pinned_by_current_thread(&self) -> bool {
      let state = self.state.lock();
      state.pinned && state.owner == Some(thread::current().id())
   }
}

/// Releases one hold on a [`TransactionLock`] when dropped.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub(crate) struct TransactionLockGuard<'a> {
   lock: &'a TransactionLock,
}

impl Drop for TransactionLockGuard<'_> {
   fn drop(&mut self) {
      self.lock.unlock();
   }
}

#[cfg(test)]
mod tests {
   use std::sync::Arc;
   use std::sync::atomic::{AtomicBool, Ordering};
   use std::time::Duration;

   use super::*;

   #[test]
   fn test_reentrant_on_same_thread() {
      let lock = TransactionLock::new();
      let outer = lock.lock();
      let inner = lock.lock();
      assert!(lock.is_held_by_current_thread());
      drop(inner);
      assert!(lock.is_held_by_current_thread());
      drop(outer);
      assert!(!lock.is_held_by_current_thread());
   }

   #[test]
   fn test_pinned_lock_outlives_guards() {
      let lock = TransactionLock::new();
      {
         let _guard = lock.lock();
         lock.pin();
      }
      assert!(lock.is_held_by_current_thread());
      assert!(lock.is_pinned_by_current_thread());
      {
         let _guard = lock.lock();
         lock.unpin();
      }
      assert!(!lock.is_held_by_current_thread());
   }

   #[test]
   fn test_other_thread_waits_for_unpin() {
      let lock = Arc::new(TransactionLock::new());
      {
         let _guard = lock.lock();
         lock.pin();
      }

      let acquired = Arc::new(AtomicBool::new(false));
      let waiter = {
         let lock = Arc::clone(&lock);
         let acquired = Arc::clone(&acquired);
         thread::spawn(move || {
            let _guard = lock.lock();
            acquired.store(true, Ordering::SeqCst);
         })
      };

      thread::sleep(Duration::from_millis(50));
      assert!(!acquired.load(Ordering::SeqCst));

      {
         let _guard = lock.lock();
         lock.unpin();
      }
      waiter.join().unwrap();
      assert!(acquired.load(Ordering::SeqCst));
   }
}
