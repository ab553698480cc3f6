//! Bounded least-recently-used cache of prepared statements.
//!
//! Every value that leaves the cache other than through [`StatementCache::remove`]
//! is handed to the cache's finalizer exactly once: on eviction, on
//! replacement, on [`StatementCache::clear`] and when the cache is dropped.

use std::fmt;

use hashlink::LruCache;
use tracing::trace;

use crate::error::{Error, Result};
use crate::statement::PreparedStatement;

/// Values that know whether they may be stored in a [`StatementCache`].
pub trait Cacheable {
   fn is_cacheable(&self) -> bool;
}

impl Cacheable for PreparedStatement {
   fn is_cacheable(&self) -> bool {
      self.kind().is_cacheable()
   }
}

type Finalizer<V> = Box<dyn FnMut(String, V) + Send>;

/// LRU cache keyed by SQL text. A capacity of 0 disables caching.
pub struct StatementCache<V: Cacheable> {
   entries: LruCache<String, V>,
   capacity: usize,
   finalizer: Finalizer<V>,
}

impl<V: Cacheable> StatementCache<V> {
   /// Create a cache whose evicted values are simply dropped.
   pub fn new(capacity: usize) -> Self {
      Self::with_finalizer(capacity, |_, value| drop(value))
   }

   /// Create a cache that passes every evicted value to `finalizer`.
   pub fn with_finalizer(capacity: usize, finalizer: impl FnMut(String, V) + Send + 'static) -> Self {
      Self {
         entries: LruCache::new_unbounded(),
         capacity,
         finalizer: Box::new(finalizer),
      }
   }

   pub fn capacity(&self) -> usize {
      self.capacity
   }

   pub fn len(&self) -> usize {
      self.entries.len()
   }

   pub fn is_empty(&self) -> bool {
      self.entries.is_empty()
   }

   /// Whether `sql` is cached, without touching its recency.
   pub fn has(&self, sql: &str) -> bool {
      self.entries.peek(sql).is_some()
   }

   /// Look up `sql` and mark it as most recently used.
   pub fn get(&mut self, sql: &str) -> Option<&mut V> {
      self.entries.get_mut(sql)
   }

   /// Insert `value`, evicting least recently used entries to stay within capacity.
   pub fn put(&mut self, sql: impl Into<String>, value: V) -> Result<()> {
      let sql = sql.into();
      if !value.is_cacheable() {
         return Err(Error::NotCacheable(sql));
      }

      if self.capacity == 0 {
         (self.finalizer)(sql, value);
         return Ok(());
      }

      if let Some(previous) = self.entries.remove(&sql) {
         (self.finalizer)(sql.clone(), previous);
      }

      while self.entries.len() >= self.capacity {
         let Some((evicted_sql, evicted)) = self.entries.remove_lru() else {
            break;
         };
         trace!(sql = %evicted_sql, "Evicting cached statement");
         (self.finalizer)(evicted_sql, evicted);
      }

      self.entries.insert(sql, value);
      Ok(())
   }

   /// Take `sql` out of the cache without finalizing it.
   pub fn remove(&mut self, sql: &str) -> Option<V> {
      self.entries.remove(sql)
   }

   /// Remove `sql` and finalize it. Returns whether it was cached.
   pub fn evict(&mut self, sql: &str) -> bool {
      match self.entries.remove(sql) {
         Some(value) => {
            (self.finalizer)(sql.to_owned(), value);
            true
         }
         None => false,
      }
   }

   /// Change the capacity, evicting entries that no longer fit.
   pub fn set_capacity(&mut self, capacity: usize) {
      self.capacity = capacity;
      while self.entries.len() > capacity {
         let Some((sql, value)) = self.entries.remove_lru() else {
            break;
         };
         (self.finalizer)(sql, value);
      }
   }

   /// Finalize and remove every entry.
   pub fn clear(&mut self) {
      while let Some((sql, value)) = self.entries.remove_lru() {
         (self.finalizer)(sql, value);
      }
   }

   /// Cached SQL keys, least recently used first.
   pub fn keys(&self) -> impl Iterator<Item = &str> {
      self.entries.iter().map(|(k, _)| k.as_str())
   }
}

impl<V: Cacheable> Drop for StatementCache<V> {
   fn drop(&mut self) {
      self.clear();
   }
}

impl<V: Cacheable> fmt::Debug for StatementCache<V> {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("StatementCache")
         .field("capacity", &self.capacity)
         .field("keys", &self.keys().collect::<Vec<_>>())
         .finish()
   }
}
