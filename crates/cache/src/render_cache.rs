//! Bounded cache of rasterized pages with single-flight rendering
//!
//! Entries are keyed by (page index, zoom, rotation). A lookup either hits a
//! finished buffer, joins a render already in flight for the same key, or
//! claims the key and becomes responsible for producing the buffer. Index
//! shifts re-key entries in place; content changes evict them.

use crate::index::IndexChange;
use folio_engine::{RgbaImage, Rotation};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// Shared, immutable rendered page.
pub type PageBuffer = Arc<RgbaImage>;

/// Identifies one rasterized view of a page.
///
/// Zoom is stored in thousandths so keys hash and compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderKey {
    pub page_index: usize,
    pub zoom_permille: u32,
    pub rotation: Rotation,
}

impl RenderKey {
    pub fn new(page_index: usize, zoom: f32, rotation: Rotation) -> Self {
        let zoom_permille = if zoom.is_finite() && zoom > 0.0 {
            (zoom * 1000.0).round().max(1.0) as u32
        } else {
            1000
        };
        Self { page_index, zoom_permille, rotation }
    }

    pub fn zoom(&self) -> f32 {
        self.zoom_permille as f32 / 1000.0
    }

    fn with_page(self, page_index: usize) -> Self {
        Self { page_index, ..self }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The rasterizer reported an error. Nothing was cached.
    #[error("render failed: {0}")]
    Failed(String),
    /// The claim was dropped without a result.
    #[error("render was abandoned before completion")]
    Abandoned,
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Finished buffers currently cached
    pub entries: usize,

    /// Renders currently in flight
    pub in_flight: usize,

    /// Maximum number of entries (finished plus in flight)
    pub capacity: usize,

    /// Lookups answered from a finished buffer
    pub hits: u64,

    /// Lookups that claimed a render
    pub misses: u64,

    /// Lookups that joined a render already in flight
    pub joined: u64,

    /// Entries dropped to stay within capacity
    pub evictions: u64,

    /// Entries dropped because their page was removed or changed
    pub invalidations: u64,

    /// Renders completed and stored
    pub renders: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.joined;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.joined) as f64 / total as f64
        }
    }
}

#[derive(Debug)]
enum PendingState {
    Running,
    Done(Result<PageBuffer, RenderError>),
}

/// A render in flight. Any number of callers may wait on it.
#[derive(Debug)]
pub struct PendingRender {
    state: Mutex<PendingState>,
    ready: Condvar,
}

impl PendingRender {
    fn new() -> Self {
        Self { state: Mutex::new(PendingState::Running), ready: Condvar::new() }
    }

    fn finish(&self, result: Result<PageBuffer, RenderError>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, PendingState::Running) {
            *state = PendingState::Done(result);
            self.ready.notify_all();
        }
    }

    /// Blocks until the render finishes.
    pub fn wait(&self) -> Result<PageBuffer, RenderError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                PendingState::Done(result) => return result.clone(),
                PendingState::Running => {
                    state = self.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    /// Returns the result if the render has finished.
    pub fn poll(&self) -> Option<Result<PageBuffer, RenderError>> {
        match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            PendingState::Done(result) => Some(result.clone()),
            PendingState::Running => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.poll().is_some()
    }
}

#[derive(Debug)]
enum Slot {
    Ready(PageBuffer),
    Rendering(Arc<PendingRender>),
}

#[derive(Debug)]
struct Entry {
    slot_id: u64,
    last_access: u64,
    slot: Slot,
}

/// Internal cache state
#[derive(Debug)]
struct CacheState {
    entries: HashMap<RenderKey, Entry>,
    capacity: usize,
    /// Monotonic access clock used for LRU ordering
    clock: u64,
    next_slot: u64,
    stats: CacheStats,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
            clock: 0,
            next_slot: 0,
            stats: CacheStats { capacity, ..Default::default() },
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn find_slot(&self, slot_id: u64) -> Option<RenderKey> {
        self.entries.iter().find(|(_, entry)| entry.slot_id == slot_id).map(|(key, _)| *key)
    }

    fn remove(&mut self, key: &RenderKey) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        if let Slot::Rendering(pending) = &entry.slot {
            log::warn!("render for page {} abandoned", key.page_index);
            pending.finish(Err(RenderError::Abandoned));
        }
        Some(entry)
    }

    /// Evict least recently used entries until at most `limit` remain.
    /// Finished buffers go before in-flight renders.
    fn evict_to(&mut self, limit: usize) {
        while self.entries.len() > limit {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| (matches!(entry.slot, Slot::Rendering(_)), entry.last_access))
                .map(|(key, _)| *key);
            let Some(key) = victim else {
                break;
            };
            self.remove(&key);
            self.stats.evictions += 1;
        }
    }

    fn refresh_stats(&mut self) {
        let in_flight =
            self.entries.values().filter(|entry| matches!(entry.slot, Slot::Rendering(_))).count();
        self.stats.in_flight = in_flight;
        self.stats.entries = self.entries.len() - in_flight;
    }
}

/// Result of [`RenderCache::lookup`].
pub enum Lookup {
    /// A finished buffer.
    Hit(PageBuffer),
    /// Another caller is rendering this key.
    Pending(Arc<PendingRender>),
    /// The caller now owns the render for this key and must complete the claim.
    Miss(RenderClaim),
}

/// Obligation to produce the buffer for a key.
///
/// Dropping a claim without calling [`RenderClaim::complete`] releases the key
/// and wakes waiters with [`RenderError::Abandoned`].
#[must_use = "a claimed render must be completed"]
pub struct RenderClaim {
    key: RenderKey,
    slot_id: u64,
    pending: Arc<PendingRender>,
    cache: Arc<Mutex<CacheState>>,
    done: bool,
}

impl RenderClaim {
    /// The key as it was when the render was claimed.
    pub fn key(&self) -> RenderKey {
        self.key
    }

    pub fn pending(&self) -> Arc<PendingRender> {
        Arc::clone(&self.pending)
    }

    /// Store the render result and wake every waiter.
    ///
    /// A successful buffer is cached under whatever key the slot has moved
    /// to; if the slot was dropped in the meantime (page removed, capacity
    /// reclaimed) the buffer is returned but not cached. Failures are never
    /// cached.
    pub fn complete(mut self, result: Result<RgbaImage, String>) -> Result<PageBuffer, RenderError> {
        self.done = true;
        let result = result.map(Arc::new).map_err(RenderError::Failed);

        {
            let mut state = lock(&self.cache);
            match state.find_slot(self.slot_id) {
                Some(key) => match &result {
                    Ok(buffer) => {
                        let tick = state.tick();
                        if let Some(entry) = state.entries.get_mut(&key) {
                            entry.slot = Slot::Ready(Arc::clone(buffer));
                            entry.last_access = tick;
                        }
                        state.stats.renders += 1;
                        let capacity = state.capacity;
                        state.evict_to(capacity);
                    }
                    Err(err) => {
                        log::warn!("render of page {} failed: {err}", key.page_index);
                        state.entries.remove(&key);
                    }
                },
                None => {
                    log::debug!("discarding render for abandoned slot (page {})", self.key.page_index);
                }
            }
            state.refresh_stats();
        }

        self.pending.finish(result.clone());
        result
    }
}

impl Drop for RenderClaim {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut state = lock(&self.cache);
        if let Some(key) = state.find_slot(self.slot_id) {
            state.entries.remove(&key);
        }
        state.refresh_stats();
        drop(state);
        self.pending.finish(Err(RenderError::Abandoned));
    }
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Render cache with LRU eviction and single-flight renders
///
/// Thread-safe; clones share the same cache.
///
/// # Example
///
/// ```
/// use folio_cache::{Lookup, RenderCache, RenderKey};
/// use folio_engine::{RgbaImage, Rotation};
///
/// let cache = RenderCache::new(16);
/// let key = RenderKey::new(0, 1.0, Rotation::Deg0);
///
/// let buffer = cache
///     .get_or_render(key, || Ok(RgbaImage::new(10, 10)))
///     .expect("render succeeds");
/// assert_eq!(buffer.width(), 10);
/// assert!(matches!(cache.lookup(key), Lookup::Hit(_)));
/// ```
#[derive(Clone)]
pub struct RenderCache {
    state: Arc<Mutex<CacheState>>,
}

impl RenderCache {
    /// Create a cache holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { state: Arc::new(Mutex::new(CacheState::new(capacity))) }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.state).capacity
    }

    /// Look up `key` without blocking on any render.
    pub fn lookup(&self, key: RenderKey) -> Lookup {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let tick = state.tick();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.last_access = tick;
            return match &entry.slot {
                Slot::Ready(buffer) => {
                    let buffer = Arc::clone(buffer);
                    state.stats.hits += 1;
                    Lookup::Hit(buffer)
                }
                Slot::Rendering(pending) => {
                    let pending = Arc::clone(pending);
                    state.stats.joined += 1;
                    Lookup::Pending(pending)
                }
            };
        }

        state.stats.misses += 1;
        state.next_slot += 1;
        let slot_id = state.next_slot;
        let pending = Arc::new(PendingRender::new());

        // Make room for the new slot first so it can't evict itself.
        let capacity = state.capacity;
        state.evict_to(capacity.saturating_sub(1));
        state.entries.insert(
            key,
            Entry { slot_id, last_access: tick, slot: Slot::Rendering(Arc::clone(&pending)) },
        );
        state.refresh_stats();

        Lookup::Miss(RenderClaim {
            key,
            slot_id,
            pending,
            cache: Arc::clone(&self.state),
            done: false,
        })
    }

    /// Finished buffer for `key`, if cached. Counts as a hit or a miss but
    /// never claims a render.
    pub fn get(&self, key: RenderKey) -> Option<PageBuffer> {
        let mut state = lock(&self.state);
        let tick = state.tick();
        let buffer = match state.entries.get_mut(&key) {
            Some(Entry { slot: Slot::Ready(buffer), last_access, .. }) => {
                *last_access = tick;
                Some(Arc::clone(buffer))
            }
            _ => None,
        };
        if buffer.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        buffer
    }

    /// Return the cached buffer, wait for an in-flight render, or run
    /// `render` on this thread.
    pub fn get_or_render<F>(&self, key: RenderKey, render: F) -> Result<PageBuffer, RenderError>
    where
        F: FnOnce() -> Result<RgbaImage, String>,
    {
        match self.lookup(key) {
            Lookup::Hit(buffer) => Ok(buffer),
            Lookup::Pending(pending) => pending.wait(),
            Lookup::Miss(claim) => claim.complete(render()),
        }
    }

    /// Check if a finished buffer is cached without updating LRU tracking.
    pub fn contains(&self, key: RenderKey) -> bool {
        matches!(lock(&self.state).entries.get(&key), Some(Entry { slot: Slot::Ready(_), .. }))
    }

    /// Keys of all entries, finished or in flight.
    pub fn keys(&self) -> Vec<RenderKey> {
        lock(&self.state).entries.keys().copied().collect()
    }

    /// Bring every entry up to date with a page index change.
    ///
    /// Shifted pages keep their buffers under the new index. Removed or
    /// content-changed pages lose theirs; renders in flight for them are
    /// abandoned.
    pub fn apply(&self, change: &IndexChange) {
        let mut state = lock(&self.state);
        if change.is_identity() && !matches!(change, IndexChange::ContentChanged { .. }) {
            return;
        }

        let old: Vec<(RenderKey, Entry)> = state.entries.drain().collect();
        let mut dropped = Vec::new();
        for (key, entry) in old {
            if change.invalidates_content(key.page_index) {
                dropped.push((key, entry));
                continue;
            }
            match change.map(key.page_index) {
                Some(new_index) => {
                    state.entries.insert(key.with_page(new_index), entry);
                }
                None => dropped.push((key, entry)),
            }
        }

        for (key, entry) in dropped {
            if let Slot::Rendering(pending) = entry.slot {
                log::warn!("render for page {} abandoned", key.page_index);
                pending.finish(Err(RenderError::Abandoned));
            }
            state.stats.invalidations += 1;
        }
        state.refresh_stats();
    }

    /// Drop every entry for `page_index`.
    pub fn invalidate_page(&self, page_index: usize) {
        self.apply(&IndexChange::ContentChanged { index: page_index });
    }

    /// Clear all entries from the cache
    pub fn clear(&self) {
        self.apply(&IndexChange::Reset);
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        lock(&self.state).stats
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for RenderCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCache").field("stats", &self.stats()).finish()
    }
}
