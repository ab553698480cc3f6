//! Transaction frames and listeners

use crate::error::BoxDynError;

/// How the outermost transaction acquires its database locks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TransactionMode {
   /// Locks are acquired when first needed (`BEGIN`).
   Deferred,
   /// A RESERVED lock is acquired immediately (`BEGIN IMMEDIATE`).
   Immediate,
   /// An EXCLUSIVE lock is acquired immediately (`BEGIN EXCLUSIVE`).
   #[default]
   Exclusive,
}

impl TransactionMode {
   pub(crate) fn begin_sql(self) -> &'static str {
      match self {
         TransactionMode::Deferred => "BEGIN;",
         TransactionMode::Immediate => "BEGIN IMMEDIATE;",
         TransactionMode::Exclusive => "BEGIN EXCLUSIVE;",
      }
   }
}

/// Callbacks run on the thread that owns a transaction.
///
/// Listeners must not call back into the database they are attached to.
pub trait TransactionListener: Send {
   /// Called right after the transaction begins. An error rolls back the
   /// outermost transaction and is returned from `begin_transaction`.
   fn on_begin(&mut self) -> Result<(), BoxDynError>;

   /// Called before the transaction frame commits. An error turns the commit
   /// into a rollback and is returned from `end_transaction`.
   fn on_commit(&mut self) -> Result<(), BoxDynError>;

   /// Called before the transaction frame rolls back.
   fn on_rollback(&mut self) -> Result<(), BoxDynError>;
}

/// One level of a nested transaction.
pub(crate) struct Transaction {
   pub(crate) parent: Option<Box<Transaction>>,
   pub(crate) mode: TransactionMode,
   pub(crate) listener: Option<Box<dyn TransactionListener>>,
   pub(crate) marked_successful: bool,
   pub(crate) child_failed: bool,
}

impl Transaction {
   pub(crate) fn new(
      mode: TransactionMode,
      listener: Option<Box<dyn TransactionListener>>,
      parent: Option<Box<Transaction>>,
   ) -> Self {
      Self {
         parent,
         mode,
         listener,
         marked_successful: false,
         child_failed: false,
      }
   }

   /// Whether ending this frame commits rather than rolls back.
   pub(crate) fn is_successful(&self) -> bool {
      self.marked_successful && !self.child_failed
   }

   pub(crate) fn depth(&self) -> usize {
      1 + self.parent.as_ref().map_or(0, |p| p.depth())
   }
}

impl std::fmt::Debug for Transaction {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Transaction")
         .field("mode", &self.mode)
         .field("has_listener", &self.listener.is_some())
         .field("marked_successful", &self.marked_successful)
         .field("child_failed", &self.child_failed)
         .field("parent", &self.parent)
         .finish()
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_begin_sql_per_mode() {
      assert_eq!(TransactionMode::Deferred.begin_sql(), "BEGIN;");
      assert_eq!(TransactionMode::Immediate.begin_sql(), "BEGIN IMMEDIATE;");
      assert_eq!(TransactionMode::default().begin_sql(), "BEGIN EXCLUSIVE;");
   }

   #[test]
   fn test_child_failure_overrides_success() {
      let mut frame = Transaction::new(TransactionMode::Exclusive, None, None);
      assert!(!frame.is_successful());
      frame.marked_successful = true;
      assert!(frame.is_successful());
      frame.child_failed = true;
      assert!(!frame.is_successful());
   }

   #[test]
   fn test_depth_counts_parents() {
      let outer = Transaction::new(TransactionMode::Exclusive, None, None);
      let inner = Transaction::new(TransactionMode::Exclusive, None, Some(Box::new(outer)));
      assert_eq!(inner.depth(), 2);
   }
}
