//! Buffer pool: a fixed set of frames caching pages between the page store
//! and the upper layers.
//!
//! The pool serves reads by `PageId`, honors pins, tracks dirty frames, and
//! writes dirty evictees back through the store. One of three eviction
//! policies is chosen at construction: LRU, FIFO, or CLOCK.
//!
//! Public operations take `&mut self`; shared access goes through
//! [`SharedPool`], locked once per outer operation.
//!
//! # Example
//!
//! ```no_run
//! use buffer::BufferPool;
//! use common::EvictionPolicy;
//! use storage::{PageKind, PageStore};
//!
//! let store = PageStore::open("/tmp/db").unwrap();
//! let mut pool = BufferPool::new(store, 100, EvictionPolicy::Lru);
//!
//! let pid = {
//!     let page = pool.create_page(PageKind::Data).unwrap();
//!     page.add_record(b"hello");
//!     page.id()
//! };
//! pool.unpin_page(pid, true);
//! pool.flush_all().unwrap();
//! ```


use common::{DbError, DbResult, EvictionPolicy, PageId};
use hashbrown::HashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use storage::{Page, PageKind, PageStore};
use tracing::{debug, error};

/// Shared handle to a buffer pool. Each table-manager or index operation
/// locks it once for its whole duration.
pub type SharedPool = Arc<Mutex<BufferPool>>;

/// One slot of the pool, holding a resident page plus its bookkeeping.
#[derive(Debug)]
pub struct BufferFrame {
    page_id: Option<PageId>,
    page: Option<Page>,
    is_dirty: bool,
    pin_count: u32,
    last_access: Instant,
    access_count: u64,
    reference_bit: bool,
}

impl BufferFrame {
    fn empty() -> Self {
        Self {
            page_id: None,
            page: None,
            is_dirty: false,
            pin_count: 0,
            last_access: Instant::now(),
            access_count: 0,
            reference_bit: false,
        }
    }

    pub fn page_id(&self) -> Option<PageId> {
        self.page_id
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }
}

/// Counters observed over the pool's lifetime.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoolStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub page_reads: u64,
    pub page_writes: u64,
    pub evictions: u64,
}

impl PoolStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Fixed set of frames caching pages, with pin/dirty bookkeeping and
/// pluggable eviction.
#[derive(Debug)]
pub struct BufferPool {
    store: PageStore,
    policy: EvictionPolicy,
    frames: Vec<BufferFrame>,
    residency: HashMap<PageId, usize>,
    free_frames: Vec<usize>,
    // recency order for LRU; insertion order for FIFO; hand + per-frame
    // reference bits for CLOCK. All three are maintained regardless of the
    // chosen policy.
    lru: LruCache<PageId, usize>,
    fifo: VecDeque<usize>,
    clock_hand: usize,
    stats: PoolStats,
}

impl BufferPool {
    /// # Panics
    ///
    /// Panics if `frames` is 0.
    pub fn new(store: PageStore, frames: usize, policy: EvictionPolicy) -> Self {
        assert!(frames > 0, "buffer pool needs at least one frame");
        Self {
            store,
            policy,
            frames: (0..frames).map(|_| BufferFrame::empty()).collect(),
            residency: HashMap::new(),
            free_frames: (0..frames).rev().collect(),
            lru: LruCache::new(NonZeroUsize::new(frames).expect("frames > 0")),
            fifo: VecDeque::new(),
            clock_hand: 0,
            stats: PoolStats::default(),
        }
    }

    /// Wraps a pool in its shared handle.
    pub fn into_shared(self) -> SharedPool {
        Arc::new(Mutex::new(self))
    }

    /// Returns the resident page, loading and installing it on a miss.
    ///
    /// The page is pinned once; callers pair every `get_page` with exactly
    /// one `unpin_page`. A page id the store has never persisted yields
    /// `DbError::NotFound`.
    pub fn get_page(&mut self, page_id: PageId) -> DbResult<&mut Page> {
        if let Some(&idx) = self.residency.get(&page_id) {
            self.stats.cache_hits += 1;
            self.touch(idx);
            let frame = &mut self.frames[idx];
            frame.pin_count += 1;
            return Ok(frame.page.as_mut().expect("resident frame holds a page"));
        }

        self.stats.cache_misses += 1;
        let page = self
            .store
            .load_page(page_id)?
            .ok_or_else(|| DbError::NotFound(format!("page {} does not exist", page_id.0)))?;
        self.stats.page_reads += 1;

        let idx = self.obtain_frame()?;
        self.install(idx, page, false)
    }

    /// `get_page` plus one extra pin, for callers that hold a page across
    /// other pool calls. Pair with a matching number of `unpin_page`s.
    pub fn pin_page(&mut self, page_id: PageId) -> DbResult<&mut Page> {
        self.get_page(page_id)?;
        let idx = self.residency[&page_id];
        let frame = &mut self.frames[idx];
        frame.pin_count += 1;
        Ok(frame.page.as_mut().expect("resident frame holds a page"))
    }

    /// Drops one pin and records dirtiness. Dirty is sticky: once set it
    /// stays until the next successful write-back. Returns false when the
    /// page is not resident.
    pub fn unpin_page(&mut self, page_id: PageId, is_dirty: bool) -> bool {
        let Some(&idx) = self.residency.get(&page_id) else {
            return false;
        };
        let frame = &mut self.frames[idx];
        frame.pin_count = frame.pin_count.saturating_sub(1);
        if is_dirty {
            frame.is_dirty = true;
        }
        true
    }

    /// Writes one page back if it is resident and dirty. Returns whether a
    /// write happened.
    pub fn flush_page(&mut self, page_id: PageId) -> DbResult<bool> {
        let Some(&idx) = self.residency.get(&page_id) else {
            return Ok(false);
        };
        if !self.frames[idx].is_dirty {
            return Ok(false);
        }
        if let Some(page) = self.frames[idx].page.as_mut() {
            self.store.save_page(page)?;
        }
        self.frames[idx].is_dirty = false;
        self.stats.page_writes += 1;
        Ok(true)
    }

    /// Writes every dirty frame back; returns the number written. Flushing
    /// twice in a row writes nothing the second time.
    pub fn flush_all(&mut self) -> DbResult<usize> {
        let mut written = 0;
        for frame in &mut self.frames {
            if !frame.is_dirty {
                continue;
            }
            if let Some(page) = frame.page.as_mut() {
                self.store.save_page(page)?;
            }
            frame.is_dirty = false;
            self.stats.page_writes += 1;
            written += 1;
        }
        Ok(written)
    }

    /// Creates a page through the store and installs it dirty and pinned
    /// once.
    pub fn create_page(&mut self, kind: PageKind) -> DbResult<&mut Page> {
        let page = self.store.create_page(kind)?;
        let idx = self.obtain_frame()?;
        self.install(idx, page, true)
    }

    pub fn is_resident(&self, page_id: PageId) -> bool {
        self.residency.contains_key(&page_id)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn used_frames(&self) -> usize {
        self.residency.len()
    }

    pub fn dirty_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.is_dirty).count()
    }

    pub fn pinned_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.pin_count > 0).count()
    }

    pub fn frames(&self) -> &[BufferFrame] {
        &self.frames
    }

    // ---- frame management ----

    fn obtain_frame(&mut self) -> DbResult<usize> {
        if let Some(idx) = self.free_frames.pop() {
            return Ok(idx);
        }
        self.evict()
    }

    fn install(&mut self, idx: usize, page: Page, dirty: bool) -> DbResult<&mut Page> {
        let page_id = page.id();
        {
            let frame = &mut self.frames[idx];
            frame.page_id = Some(page_id);
            frame.page = Some(page);
            frame.is_dirty = dirty;
            frame.pin_count = 1;
        }
        self.residency.insert(page_id, idx);
        self.touch(idx);
        Ok(self.frames[idx]
            .page
            .as_mut()
            .expect("frame was just installed"))
    }

    fn touch(&mut self, idx: usize) {
        let frame = &mut self.frames[idx];
        frame.last_access = Instant::now();
        frame.access_count += 1;
        frame.reference_bit = true;
        if let Some(page_id) = frame.page_id {
            // push refreshes recency for keys already present
            self.lru.push(page_id, idx);
        }
        if !self.fifo.contains(&idx) {
            self.fifo.push_back(idx);
        }
    }

    // ---- eviction ----

    fn evict(&mut self) -> DbResult<usize> {
        let victim = match self.policy {
            EvictionPolicy::Lru => self.pick_lru(),
            EvictionPolicy::Fifo => self.pick_fifo(),
            EvictionPolicy::Clock => self.pick_clock(),
        };
        self.release_frame(victim)
    }

    /// `iter()` runs from most- to least-recently used, so the last
    /// unpinned entry is the LRU candidate.
    fn pick_lru(&mut self) -> usize {
        let candidate = self
            .lru
            .iter()
            .filter(|(_, &idx)| self.frames[idx].pin_count == 0)
            .map(|(_, &idx)| idx)
            .last();
        match candidate {
            Some(idx) => idx,
            None => {
                // a well-behaved caller never pins every frame; evicting
                // anyway keeps the pool from deadlocking
                error!("all frames pinned; evicting the least recently used regardless");
                self.lru
                    .iter()
                    .map(|(_, &idx)| idx)
                    .last()
                    .expect("a full pool has resident frames")
            }
        }
    }

    /// Scans from the front of the insertion queue; pinned frames rotate to
    /// the back for reconsideration.
    fn pick_fifo(&mut self) -> usize {
        for _ in 0..self.fifo.len() {
            let idx = self.fifo.pop_front().expect("queue is non-empty");
            if self.frames[idx].pin_count == 0 {
                return idx;
            }
            self.fifo.push_back(idx);
        }
        error!("all frames pinned; evicting the head of the insertion queue");
        self.fifo.pop_front().unwrap_or(0)
    }

    /// Classic second-chance scan: clear set reference bits, evict the
    /// first unpinned frame whose bit is already clear.
    fn pick_clock(&mut self) -> usize {
        let frames = self.frames.len();
        // two sweeps at most: the first may only clear reference bits
        for _ in 0..frames * 2 {
            let idx = self.clock_hand;
            self.clock_hand = (self.clock_hand + 1) % frames;
            let frame = &mut self.frames[idx];
            if frame.page_id.is_none() || frame.pin_count > 0 {
                continue;
            }
            if frame.reference_bit {
                frame.reference_bit = false;
                continue;
            }
            return idx;
        }
        error!("all frames pinned; evicting at the clock hand");
        let idx = self.clock_hand;
        self.clock_hand = (self.clock_hand + 1) % frames;
        idx
    }

    /// Writes the victim back if dirty, drops its residency mapping, and
    /// returns the freed frame index. A failed write-back propagates and
    /// leaves the frame resident and dirty for a later flush.
    fn release_frame(&mut self, idx: usize) -> DbResult<usize> {
        if self.frames[idx].is_dirty {
            if let Some(page) = self.frames[idx].page.as_mut() {
                self.store.save_page(page)?;
            }
            self.frames[idx].is_dirty = false;
            self.stats.page_writes += 1;
        }

        let frame = &mut self.frames[idx];
        frame.page = None;
        frame.pin_count = 0;
        frame.reference_bit = false;
        if let Some(page_id) = frame.page_id.take() {
            self.residency.remove(&page_id);
            self.lru.pop(&page_id);
            debug!(page = page_id.0, frame = idx, "evicted page");
        }
        self.fifo.retain(|&i| i != idx);

        self.stats.evictions += 1;
        Ok(idx)
    }
}
