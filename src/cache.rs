//! Per-connection prepared statement cache.
//!
//! Statements leave the cache in two stages. An evicted statement that a
//! caller still holds is parked in `evicted`; it moves to `to_close` once a
//! liveness pass finds no outside handle left. Statements in `to_close` are
//! released on the server with a Close message at the next flush.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::statement::StatementState;

pub(crate) struct StatementCache {
    /// `None` when caching is disabled (capacity 0)
    entries: Option<LruCache<String, Arc<StatementState>>>,
    /// Out of the cache but still referenced by a handle
    evicted: Vec<Arc<StatementState>>,
    /// Unreferenced, waiting for Close on the server
    to_close: Vec<Arc<StatementState>>,
}

/// True when the cache's own reference is the only one left.
fn is_released(stmt: &Arc<StatementState>) -> bool {
    Arc::strong_count(stmt) == 1
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            evicted: Vec::new(),
            to_close: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Look up a statement by normalized query text and mark it most recently used.
    pub fn get(&mut self, query: &str) -> Option<Arc<StatementState>> {
        let entries = self.entries.as_mut()?;
        entries.get(query).map(Arc::clone)
    }

    /// Insert a freshly prepared statement, retiring whatever it displaces.
    pub fn insert(&mut self, stmt: Arc<StatementState>) {
        let Some(entries) = self.entries.as_mut() else {
            self.retire(stmt);
            return;
        };
        if let Some((_, displaced)) = entries.push(stmt.query().to_owned(), Arc::clone(&stmt))
            && !Arc::ptr_eq(&displaced, &stmt)
        {
            tracing::debug!(
                statement = displaced.name(),
                "evicting prepared statement from cache"
            );
            self.retire(displaced);
        }
    }

    /// Take a statement out of service. It is closed as soon as nothing else
    /// references it.
    pub fn retire(&mut self, stmt: Arc<StatementState>) {
        if is_released(&stmt) {
            self.to_close.push(stmt);
        } else {
            self.evicted.push(stmt);
        }
    }

    /// Drop `stmt` from the cache if it is the entry for its query.
    pub fn remove(&mut self, stmt: &Arc<StatementState>) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        if entries
            .peek(stmt.query())
            .is_some_and(|cached| Arc::ptr_eq(cached, stmt))
            && let Some(removed) = entries.pop(stmt.query())
        {
            self.retire(removed);
        }
    }

    /// Retire every cached statement.
    pub fn clear(&mut self) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        let mut retired = Vec::with_capacity(entries.len());
        while let Some((_, stmt)) = entries.pop_lru() {
            retired.push(stmt);
        }
        for stmt in retired {
            self.retire(stmt);
        }
    }

    /// Liveness pass: move evicted statements that nobody references anymore
    /// to the close queue. Returns how many moved.
    pub fn collect_released(&mut self) -> usize {
        let before = self.to_close.len();
        let (released, in_use): (Vec<_>, Vec<_>) =
            self.evicted.drain(..).partition(is_released);
        self.evicted = in_use;
        self.to_close.extend(released);
        let moved = self.to_close.len() - before;
        if moved > 0 {
            tracing::debug!(count = moved, "released statements queued for close");
        }
        moved
    }

    /// Take the close queue. The statements are marked closed.
    pub fn take_to_close(&mut self) -> Vec<Arc<StatementState>> {
        let taken = std::mem::take(&mut self.to_close);
        for stmt in &taken {
            stmt.mark_closed();
        }
        taken
    }

    /// Empty every list and mark each statement closed.
    pub fn drain_all(&mut self) -> usize {
        let mut count = 0;
        if let Some(entries) = self.entries.as_mut() {
            while let Some((_, stmt)) = entries.pop_lru() {
                stmt.mark_closed();
                count += 1;
            }
        }
        for stmt in self.evicted.drain(..).chain(self.to_close.drain(..)) {
            stmt.mark_closed();
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn pending_close_len(&self) -> usize {
        self.to_close.len()
    }

    pub fn evicted_in_use_len(&self) -> usize {
        self.evicted.len()
    }
}
