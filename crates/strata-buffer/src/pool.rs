//! Buffer pool manager.

use crate::page::{FrameId, Page};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer};
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strata_common::page::{Lsn, PAGE_SIZE, PageId};
use strata_common::{Result, StorageConfig, StrataError};
use strata_storage::{DiskManager, DiskManagerConfig, DiskStore};
use strata_wal::{LogManager, LogManagerConfig, LogService};
use sysinfo::System;
use tracing::{debug, trace, warn};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl From<&StorageConfig> for BufferPoolConfig {
    fn from(config: &StorageConfig) -> Self {
        Self {
            num_frames: config.buffer_pool_frames,
        }
    }
}

impl BufferPoolConfig {
    /// Sizes the pool to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames so low-memory systems still get useful caching.
    /// For a system with 16GB available, this is ~4GB (~1M frames).
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self { num_frames }
    }
}

/// State guarded by the pool lock.
struct PoolState {
    /// Page ID to frame ID mapping.
    page_table: PageTable,
    /// Frames holding no page, taken from the front.
    free_list: VecDeque<FrameId>,
    /// Unpinned resident frames eligible for eviction.
    replacer: ClockReplacer,
}

/// Buffer pool manager.
///
/// Caches a fixed number of pages in memory on top of a `DiskStore`:
/// - Page ID to frame ID mapping
/// - Free frame list for new and fetched pages
/// - Clock replacement for eviction
/// - Pin counting so referenced pages are never evicted
/// - Dirty tracking with write-back on eviction and flush
///
/// Every operation runs under one pool lock, disk I/O included. Page bytes
/// have their own lock, so pinned holders read and write data without it.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Page slots, indexed by frame ID.
    pages: Vec<Page>,
    /// Page table, free list and replacer.
    state: Mutex<PoolState>,
    /// Durable page store.
    disk: Arc<dyn DiskStore>,
    /// Log consulted before every write-back.
    log: Arc<dyn LogService>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    writebacks: AtomicU64,
}

impl BufferPool {
    /// Creates a new buffer pool over the given page store and log.
    pub fn new(
        config: BufferPoolConfig,
        disk: Arc<dyn DiskStore>,
        log: Arc<dyn LogService>,
    ) -> Result<Self> {
        let num_frames = config.num_frames;
        if num_frames == 0 || num_frames > u32::MAX as usize {
            return Err(StrataError::InvalidParameter {
                name: "num_frames".to_string(),
                value: num_frames.to_string(),
            });
        }

        let pages: Vec<_> = (0..num_frames)
            .map(|i| Page::new(FrameId(i as u32)))
            .collect();

        // All frames start in free list
        let free_list: VecDeque<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        debug!(num_frames, "created buffer pool");

        Ok(Self {
            config,
            pages,
            state: Mutex::new(PoolState {
                page_table: PageTable::new(num_frames),
                free_list,
                replacer: ClockReplacer::new(num_frames),
            }),
            disk,
            log,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            writebacks: AtomicU64::new(0),
        })
    }

    /// Opens a pool backed by an on-disk page file and write-ahead log.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        let disk = DiskManager::new(DiskManagerConfig::from(config))?;
        let log = LogManager::open(LogManagerConfig::from(config))?;
        Self::new(BufferPoolConfig::from(config), Arc::new(disk), Arc::new(log))
    }

    /// Returns the page store.
    pub fn disk(&self) -> &Arc<dyn DiskStore> {
        &self.disk
    }

    /// Returns the log service.
    pub fn log(&self) -> &Arc<dyn LogService> {
        &self.log
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains(page_id)
    }

    /// Returns the pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        state
            .page_table
            .get(page_id)
            .map(|frame_id| self.pages[frame_id.index()].pin_count())
    }

    /// Returns the dirty flag of a resident page.
    pub fn is_dirty(&self, page_id: PageId) -> Option<bool> {
        let state = self.state.lock();
        state
            .page_table
            .get(page_id)
            .map(|frame_id| self.pages[frame_id.index()].is_dirty())
    }

    /// Returns the number of frames the replacer may evict.
    pub fn replacer_size(&self) -> usize {
        self.state.lock().replacer.size()
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// The page is pinned before being returned; the caller must call
    /// `unpin_page` when done. Returns `Ok(None)` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<&Page>> {
        let mut state = self.state.lock();

        if let Some(frame_id) = state.page_table.get(page_id) {
            debug_assert!(!state.free_list.contains(&frame_id));
            let page = &self.pages[frame_id.index()];
            state.replacer.pin(frame_id);
            let pins = page.pin();
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(%page_id, %frame_id, pins, "buffer hit");
            return Ok(Some(page));
        }

        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            debug!(%page_id, "fetch failed: all frames pinned");
            return Ok(None);
        };
        self.misses.fetch_add(1, Ordering::Relaxed);

        let page = &self.pages[frame_id.index()];
        let read = {
            let mut data = page.write_data();
            self.disk.read_page(page_id, &mut **data)
        };
        if let Err(e) = read {
            warn!(%page_id, error = %e, "page read failed");
            page.reset();
            state.free_list.push_back(frame_id);
            return Err(e);
        }

        page.install(page_id);
        state.page_table.insert(page_id, frame_id);
        debug!(%page_id, %frame_id, "buffer miss: loaded page");
        Ok(Some(page))
    }

    /// Allocates a new page on disk and pins a zeroed frame for it.
    ///
    /// The new page is clean: it is written back only once the caller
    /// unpins it dirty. Returns `Ok(None)` when every frame is pinned.
    pub fn new_page(&self) -> Result<Option<&Page>> {
        let mut state = self.state.lock();

        let Some(frame_id) = self.acquire_frame(&mut state)? else {
            debug!("new page failed: all frames pinned");
            return Ok(None);
        };

        let page = &self.pages[frame_id.index()];
        let page_id = match self.allocate_page_id(&state.page_table) {
            Ok(page_id) => page_id,
            Err(e) => {
                warn!(error = %e, "page allocation failed");
                page.reset();
                state.free_list.push_back(frame_id);
                return Err(e);
            }
        };

        page.reset();
        page.install(page_id);
        state.page_table.insert(page_id, frame_id);
        debug!(%page_id, %frame_id, "allocated new page");
        Ok(Some(page))
    }

    /// Unpins a page, marking it dirty if `is_dirty` is set.
    ///
    /// Dirty is sticky: unpinning clean never clears it. When the pin count
    /// reaches zero the page becomes evictable. Returns false if the page is
    /// not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();

        let Some(frame_id) = state.page_table.get(page_id) else {
            return false;
        };
        let page = &self.pages[frame_id.index()];

        let Some(remaining) = page.unpin() else {
            debug!(%page_id, "unpin of page with zero pin count");
            return false;
        };
        if is_dirty {
            page.set_dirty(true);
        }
        if remaining == 0 {
            state.replacer.unpin(frame_id);
        }
        true
    }

    /// Writes a dirty page back to disk.
    ///
    /// Returns true if the page was written, false if it is clean or not
    /// resident. A page whose bytes are write-locked by a pinned writer is
    /// left dirty and reported as `PageBusy`. The dirty flag is only cleared
    /// by a successful write.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let state = self.state.lock();

        let Some(frame_id) = state.page_table.get(page_id) else {
            return Ok(false);
        };
        let page = &self.pages[frame_id.index()];
        if !page.is_dirty() {
            return Ok(false);
        }

        let Some(data) = page.try_read_data() else {
            debug!(%page_id, "flush refused: page is write-locked");
            return Err(StrataError::PageBusy { page_id: page_id.0 });
        };
        self.write_back(page, &data).inspect_err(|e| {
            warn!(%page_id, error = %e, "page flush failed");
        })?;
        Ok(true)
    }

    /// Writes every dirty resident page back to disk.
    ///
    /// Keeps going past failures and write-locked pages. Returns the number
    /// of pages written, or the first error once every page has been tried.
    /// A dirty page that could not be read counts as `PageBusy`.
    pub fn flush_all(&self) -> Result<usize> {
        let state = self.state.lock();

        let mut flushed = 0;
        let mut first_error: Option<StrataError> = None;

        for (page_id, frame_id) in state.page_table.iter() {
            let page = &self.pages[frame_id.index()];
            if !page.is_dirty() {
                continue;
            }
            let Some(data) = page.try_read_data() else {
                debug!(%page_id, "flush refused: page is write-locked");
                first_error.get_or_insert(StrataError::PageBusy { page_id: page_id.0 });
                continue;
            };
            match self.write_back(page, &data) {
                Ok(()) => flushed += 1,
                Err(e) => {
                    warn!(%page_id, error = %e, "page flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        debug!(flushed, "flushed all pages");
        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// Deletes a page from disk and drops it from the pool.
    ///
    /// The page is deallocated in the store first, unconditionally. Returns
    /// false only if the page is resident and pinned; it then stays resident
    /// and untouched. A non-resident page is reported as deleted.
    pub fn delete_page(&self, page_id: PageId) -> bool {
        let mut state = self.state.lock();

        self.disk.deallocate_page(page_id);

        let Some(frame_id) = state.page_table.get(page_id) else {
            debug!(%page_id, "deleted non-resident page");
            return true;
        };
        let page = &self.pages[frame_id.index()];
        if page.is_pinned() {
            debug!(%page_id, pins = page.pin_count(), "cannot drop pinned page");
            return false;
        }

        state.replacer.remove(frame_id);
        state.page_table.remove(page_id);
        page.reset();
        state.free_list.push_back(frame_id);
        debug!(%page_id, %frame_id, "deleted page");
        true
    }

    /// Fetches a page and wraps it in a guard that unpins on drop.
    pub fn fetch_read(&self, page_id: PageId) -> Result<Option<PageReadGuard<'_>>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|page| PageReadGuard { pool: self, page }))
    }

    /// Fetches a page for modification.
    ///
    /// The guard unpins on drop, dirty if `mark_dirty` was called.
    pub fn fetch_write(&self, page_id: PageId) -> Result<Option<PageWriteGuard<'_>>> {
        Ok(self.fetch_page(page_id)?.map(|page| PageWriteGuard {
            pool: self,
            page,
            dirty: false,
        }))
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();

        let mut pinned_count = 0;
        let mut dirty_count = 0;
        for (_, frame_id) in state.page_table.iter() {
            let page = &self.pages[frame_id.index()];
            if page.is_pinned() {
                pinned_count += 1;
            }
            if page.is_dirty() {
                dirty_count += 1;
            }
        }

        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: state.free_list.len(),
            used_frames: state.page_table.len(),
            pinned_frames: pinned_count,
            dirty_frames: dirty_count,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            writebacks: self.writebacks.load(Ordering::Relaxed),
        }
    }

    /// Checks the pool's structural invariants.
    ///
    /// Every frame is either free or holds exactly the page the table maps
    /// to it, and the replacer tracks exactly the unpinned resident frames.
    pub fn verify_integrity(&self) -> Result<()> {
        let state = self.state.lock();
        let violation = |msg: String| Err(StrataError::Internal(msg));

        let mut owner = vec![PageId::INVALID; self.pages.len()];
        for (page_id, frame_id) in state.page_table.iter() {
            let Some(page) = self.pages.get(frame_id.index()) else {
                return violation(format!("{} mapped to missing {}", page_id, frame_id));
            };
            if owner[frame_id.index()].is_valid() {
                return violation(format!("{} mapped by two pages", frame_id));
            }
            owner[frame_id.index()] = page_id;

            if page.page_id() != page_id {
                return violation(format!(
                    "{} holds {}, table says {}",
                    frame_id,
                    page.page_id(),
                    page_id
                ));
            }
            if state.free_list.contains(&frame_id) {
                return violation(format!("{} is resident and free", frame_id));
            }
            if state.replacer.is_tracked(frame_id) == page.is_pinned() {
                return violation(format!(
                    "{} pinned={} but tracked={}",
                    frame_id,
                    page.is_pinned(),
                    state.replacer.is_tracked(frame_id)
                ));
            }
        }

        for &frame_id in &state.free_list {
            let page = &self.pages[frame_id.index()];
            if page.page_id().is_valid()
                || page.is_pinned()
                || state.replacer.is_tracked(frame_id)
            {
                return violation(format!("free {} is in use", frame_id));
            }
        }

        if state.replacer.capacity() != self.pages.len() {
            return violation(format!(
                "replacer covers {} frames, pool has {}",
                state.replacer.capacity(),
                self.pages.len()
            ));
        }

        if state.free_list.len() + state.page_table.len() != self.pages.len() {
            return violation(format!(
                "{} free + {} resident != {} frames",
                state.free_list.len(),
                state.page_table.len(),
                self.pages.len()
            ));
        }

        Ok(())
    }

    /// Takes a frame from the free list, or evicts the clock victim.
    ///
    /// A dirty victim is written back first. If that fails the victim stays
    /// resident, dirty and evictable, and the error is returned.
    fn acquire_frame(&self, state: &mut PoolState) -> Result<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = state.replacer.victim() else {
            return Ok(None);
        };
        let victim = &self.pages[frame_id.index()];
        debug_assert!(!victim.is_pinned());
        let victim_page_id = victim.page_id();

        if victim.is_dirty() {
            let data = victim.read_data();
            if let Err(e) = self.write_back(victim, &data) {
                warn!(page_id = %victim_page_id, error = %e, "eviction write-back failed");
                state.replacer.unpin(frame_id);
                return Err(e);
            }
        }

        state.page_table.remove(victim_page_id);
        self.evictions.fetch_add(1, Ordering::Relaxed);
        debug!(page_id = %victim_page_id, %frame_id, "evicted page");
        Ok(Some(frame_id))
    }

    /// Writes page bytes to disk, forcing the log first when needed.
    fn write_back(&self, page: &Page, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let lsn = page.lsn();
        if lsn.is_valid() && lsn > self.log.flushed_lsn() {
            self.log.flush_to(lsn)?;
        }

        self.disk.write_page(page.page_id(), data)?;
        page.set_dirty(false);
        self.writebacks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Allocates a page id that is not currently resident.
    ///
    /// A refused delete leaves a resident page's id free in the store; if the
    /// store hands it out again, it goes back to that page, which is marked
    /// dirty so its bytes replace the zeroed copy on disk.
    fn allocate_page_id(&self, page_table: &PageTable) -> Result<PageId> {
        loop {
            let page_id = self.disk.allocate_page()?;
            match page_table.get(page_id) {
                None => return Ok(page_id),
                Some(frame_id) => {
                    debug!(%page_id, "allocated id is still resident, skipping");
                    self.pages[frame_id.index()].set_dirty(true);
                }
            }
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
    /// Fetches served from memory.
    pub hits: u64,
    /// Fetches that read from disk.
    pub misses: u64,
    /// Pages evicted to free a frame.
    pub evictions: u64,
    /// Pages written back to disk.
    pub writebacks: u64,
}

impl BufferPoolStats {
    /// Fraction of fetches served from memory.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// RAII guard for reading a page.
pub struct PageReadGuard<'a> {
    pool: &'a BufferPool,
    page: &'a Page,
}

impl<'a> PageReadGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns the page data.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.page.read_data()
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page.page_id(), false);
    }
}

/// RAII guard for writing a page.
pub struct PageWriteGuard<'a> {
    pool: &'a BufferPool,
    page: &'a Page,
    dirty: bool,
}

impl<'a> PageWriteGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns the page data.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.page.read_data()
    }

    /// Returns mutable access to page data.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.page.write_data()
    }

    /// Marks the page dirty; it is unpinned dirty on drop.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Records the LSN of the log record describing this modification.
    pub fn set_lsn(&self, lsn: Lsn) {
        self.page.set_lsn(lsn);
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.pool.unpin_page(self.page.page_id(), self.dirty);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::MemoryDiskStore;
    use strata_wal::DisabledLog;

    fn create_test_pool(num_frames: usize, num_pages: u32) -> (BufferPool, Arc<MemoryDiskStore>) {
        let disk = Arc::new(MemoryDiskStore::with_pages(num_pages));
        let pool = BufferPool::new(
            BufferPoolConfig { num_frames },
            disk.clone(),
            Arc::new(DisabledLog),
        )
        .unwrap();
        (pool, disk)
    }

    /// Log double that records every forced flush.
    #[derive(Default)]
    struct RecordingLog {
        flushed: Mutex<Lsn>,
        flush_calls: Mutex<Vec<Lsn>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl LogService for RecordingLog {
        fn flushed_lsn(&self) -> Lsn {
            *self.flushed.lock()
        }

        fn flush_to(&self, lsn: Lsn) -> Result<()> {
            if self.fail.load(Ordering::Acquire) {
                return Err(StrataError::WalWriteFailed("injected".to_string()));
            }
            self.flush_calls.lock().push(lsn);
            let mut flushed = self.flushed.lock();
            *flushed = (*flushed).max(lsn);
            Ok(())
        }
    }

    #[test]
    fn test_buffer_pool_new() {
        let (pool, _) = create_test_pool(10, 0);

        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
        assert_eq!(pool.replacer_size(), 0);
        pool.verify_integrity().unwrap();
    }

    #[test]
    fn test_buffer_pool_rejects_zero_frames() {
        let result = BufferPool::new(
            BufferPoolConfig { num_frames: 0 },
            Arc::new(MemoryDiskStore::new()),
            Arc::new(DisabledLog),
        );
        assert!(matches!(result, Err(StrataError::InvalidParameter { .. })));
    }

    #[test]
    fn test_buffer_pool_config_from_storage_config() {
        let storage = StorageConfig {
            buffer_pool_frames: 77,
            ..Default::default()
        };
        assert_eq!(BufferPoolConfig::from(&storage).num_frames, 77);
        assert_eq!(BufferPoolConfig::default().num_frames, 1024);
        assert!(BufferPoolConfig::auto_sized().num_frames >= 1_000);
    }

    #[test]
    fn test_buffer_pool_new_page() {
        let (pool, disk) = create_test_pool(10, 0);

        let page = pool.new_page().unwrap().unwrap();
        let page_id = page.page_id();

        assert_eq!(page_id, PageId(0));
        assert_eq!(page.pin_count(), 1);
        assert!(!page.is_dirty());
        assert!(page.read_data().iter().all(|&b| b == 0));
        assert_eq!(pool.free_count(), 9);
        assert_eq!(pool.page_count(), 1);
        assert!(pool.contains(page_id));
        // No disk read for a new page
        assert_eq!(disk.read_count(), 0);
    }

    #[test]
    fn test_buffer_pool_new_page_after_eviction_is_zeroed() {
        let (pool, _) = create_test_pool(1, 0);

        let page = pool.new_page().unwrap().unwrap();
        page.write_data().fill(0xEE);
        let first = page.page_id();
        assert!(pool.unpin_page(first, false));

        let page = pool.new_page().unwrap().unwrap();
        assert_ne!(page.page_id(), first);
        assert!(page.read_data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_buffer_pool_fetch_miss_reads_disk() {
        let (pool, disk) = create_test_pool(10, 4);
        disk.write_page(PageId(2), &[0x42; PAGE_SIZE]).unwrap();

        let page = pool.fetch_page(PageId(2)).unwrap().unwrap();
        assert_eq!(page.page_id(), PageId(2));
        assert_eq!(page.pin_count(), 1);
        assert!(!page.is_dirty());
        assert_eq!(page.read_data()[100], 0x42);
        assert_eq!(disk.read_count(), 1);
        assert_eq!(pool.stats().misses, 1);
    }

    #[test]
    fn test_buffer_pool_fetch_hit_pins() {
        let (pool, disk) = create_test_pool(10, 4);

        pool.fetch_page(PageId(1)).unwrap().unwrap();
        let page = pool.fetch_page(PageId(1)).unwrap().unwrap();

        assert_eq!(page.pin_count(), 2);
        assert_eq!(disk.read_count(), 1);
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_buffer_pool_fetch_unallocated_fails() {
        let (pool, _) = create_test_pool(4, 2);

        let result = pool.fetch_page(PageId(9));
        assert!(matches!(result, Err(StrataError::PageNotAllocated { page_id: 9 })));

        // Frame went back to the free list, no mapping installed
        assert_eq!(pool.free_count(), 4);
        assert!(!pool.contains(PageId(9)));
        pool.verify_integrity().unwrap();
    }

    #[test]
    fn test_buffer_pool_fetch_read_failure_after_eviction() {
        let (pool, disk) = create_test_pool(1, 4);

        pool.fetch_page(PageId(0)).unwrap().unwrap();
        pool.unpin_page(PageId(0), false);

        disk.set_fail_reads(true);
        assert!(matches!(pool.fetch_page(PageId(1)), Err(StrataError::Io(_))));

        // Victim was clean and is gone; its frame is free again
        assert!(!pool.contains(PageId(0)));
        assert!(!pool.contains(PageId(1)));
        assert_eq!(pool.free_count(), 1);
        pool.verify_integrity().unwrap();

        disk.set_fail_reads(false);
        assert!(pool.fetch_page(PageId(1)).unwrap().is_some());
    }

    #[test]
    fn test_buffer_pool_unpin() {
        let (pool, _) = create_test_pool(10, 4);

        let page = pool.fetch_page(PageId(0)).unwrap().unwrap();
        assert!(page.is_pinned());

        assert!(pool.unpin_page(PageId(0), false));
        assert!(!page.is_pinned());
        assert_eq!(pool.replacer_size(), 1);
    }

    #[test]
    fn test_buffer_pool_unpin_rejected() {
        let (pool, _) = create_test_pool(10, 4);

        // Not resident
        assert!(!pool.unpin_page(PageId(3), true));

        pool.fetch_page(PageId(0)).unwrap().unwrap();
        assert!(pool.unpin_page(PageId(0), false));

        // Already at zero: nothing changes, dirty flag included
        assert!(!pool.unpin_page(PageId(0), true));
        assert_eq!(pool.pin_count(PageId(0)), Some(0));
        assert_eq!(pool.is_dirty(PageId(0)), Some(false));
    }

    #[test]
    fn test_buffer_pool_pin_unpin_symmetry() {
        let (pool, _) = create_test_pool(4, 4);

        for _ in 0..5 {
            pool.fetch_page(PageId(2)).unwrap().unwrap();
        }
        assert_eq!(pool.pin_count(PageId(2)), Some(5));
        assert_eq!(pool.replacer_size(), 0);

        for expected in (0..5).rev() {
            assert!(pool.unpin_page(PageId(2), false));
            assert_eq!(pool.pin_count(PageId(2)), Some(expected));
        }
        assert_eq!(pool.replacer_size(), 1);
        pool.verify_integrity().unwrap();
    }

    #[test]
    fn test_buffer_pool_dirty_is_sticky() {
        let (pool, _) = create_test_pool(10, 4);

        pool.fetch_page(PageId(0)).unwrap().unwrap();
        pool.fetch_page(PageId(0)).unwrap().unwrap();

        assert!(pool.unpin_page(PageId(0), true));
        assert!(pool.unpin_page(PageId(0), false));
        assert_eq!(pool.is_dirty(PageId(0)), Some(true));
    }

    #[test]
    fn test_buffer_pool_pool_exhausted() {
        let (pool, _) = create_test_pool(3, 4);

        for i in 0..3 {
            assert!(pool.fetch_page(PageId(i)).unwrap().is_some());
        }
        assert!(pool.fetch_page(PageId(3)).unwrap().is_none());

        // State unchanged by the failed fetch
        assert_eq!(pool.page_count(), 3);
        for i in 0..3 {
            assert_eq!(pool.pin_count(PageId(i)), Some(1));
        }
        pool.verify_integrity().unwrap();
    }

    #[test]
    fn test_buffer_pool_eviction() {
        let (pool, disk) = create_test_pool(3, 8);

        for i in 0..3 {
            pool.fetch_page(PageId(i)).unwrap().unwrap();
            pool.unpin_page(PageId(i), false);
        }
        assert_eq!(pool.free_count(), 0);

        let page = pool.fetch_page(PageId(5)).unwrap().unwrap();
        assert_eq!(page.page_id(), PageId(5));
        assert_eq!(pool.page_count(), 3);
        assert!(pool.contains(PageId(5)));
        assert!(!pool.contains(PageId(0)));
        // Clean victim: no write
        assert_eq!(disk.write_count(), 0);
        assert_eq!(pool.stats().evictions, 1);
        pool.verify_integrity().unwrap();
    }

    #[test]
    fn test_buffer_pool_no_eviction_while_pinned() {
        let (pool, _) = create_test_pool(2, 8);

        pool.fetch_page(PageId(0)).unwrap().unwrap();
        pool.fetch_page(PageId(1)).unwrap().unwrap();
        pool.unpin_page(PageId(1), false);

        // Each miss can only take the one unpinned frame
        for i in 2..8 {
            pool.fetch_page(PageId(i)).unwrap().unwrap();
            assert!(pool.contains(PageId(0)));
            pool.unpin_page(PageId(i), false);
        }
        assert_eq!(pool.pin_count(PageId(0)), Some(1));
    }

    #[test]
    fn test_buffer_pool_eviction_dirty() {
        let (pool, disk) = create_test_pool(1, 2);

        let page = pool.fetch_page(PageId(0)).unwrap().unwrap();
        page.write_data()[0] = 0xAB;
        pool.unpin_page(PageId(0), true);

        pool.fetch_page(PageId(1)).unwrap().unwrap();

        // One write of the victim, then one read of the requested page
        assert_eq!(disk.write_log(), vec![PageId(0)]);
        assert_eq!(disk.read_count(), 2);
        assert_eq!(disk.page_bytes(PageId(0)).unwrap()[0], 0xAB);
        assert!(!pool.contains(PageId(0)));
    }

    #[test]
    fn test_buffer_pool_eviction_write_failure_keeps_victim() {
        let (pool, disk) = create_test_pool(1, 2);

        let page = pool.fetch_page(PageId(0)).unwrap().unwrap();
        page.write_data()[0] = 0x11;
        pool.unpin_page(PageId(0), true);

        disk.set_fail_writes(true);
        assert!(pool.fetch_page(PageId(1)).is_err());

        assert!(pool.contains(PageId(0)));
        assert_eq!(pool.is_dirty(PageId(0)), Some(true));
        assert_eq!(pool.replacer_size(), 1);
        assert!(!pool.contains(PageId(1)));
        pool.verify_integrity().unwrap();

        disk.set_fail_writes(false);
        pool.fetch_page(PageId(1)).unwrap().unwrap();
        assert_eq!(disk.page_bytes(PageId(0)).unwrap()[0], 0x11);
    }

    #[test]
    fn test_buffer_pool_delete_page() {
        let (pool, disk) = create_test_pool(10, 4);

        pool.fetch_page(PageId(1)).unwrap().unwrap();
        pool.unpin_page(PageId(1), true);

        assert!(pool.delete_page(PageId(1)));
        assert!(!pool.contains(PageId(1)));
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.replacer_size(), 0);
        assert_eq!(disk.deallocations(), vec![PageId(1)]);
        // Deleted dirty page is dropped, not written
        assert_eq!(disk.write_count(), 0);
        pool.verify_integrity().unwrap();
    }

    #[test]
    fn test_buffer_pool_delete_non_resident() {
        let (pool, disk) = create_test_pool(10, 4);

        assert!(pool.delete_page(PageId(3)));
        assert_eq!(disk.deallocations(), vec![PageId(3)]);
    }

    #[test]
    fn test_buffer_pool_delete_pinned_page() {
        let (pool, disk) = create_test_pool(10, 0);

        let page_id = pool.new_page().unwrap().unwrap().page_id();

        assert!(!pool.delete_page(page_id));
        assert!(pool.contains(page_id));
        assert_eq!(pool.pin_count(page_id), Some(1));
        // Deallocation was issued before the pin check
        assert_eq!(disk.deallocations(), vec![page_id]);
    }

    #[test]
    fn test_buffer_pool_new_page_skips_resident_id() {
        let (pool, _) = create_test_pool(4, 0);

        let page = pool.new_page().unwrap().unwrap();
        let pinned_id = page.page_id();
        page.write_data()[0] = 0x77;

        // Refused delete frees the id in the store
        assert!(!pool.delete_page(pinned_id));

        let other = pool.new_page().unwrap().unwrap();
        assert_ne!(other.page_id(), pinned_id);
        // The resident page must reach disk again
        assert_eq!(pool.is_dirty(pinned_id), Some(true));
        pool.verify_integrity().unwrap();
    }

    #[test]
    fn test_buffer_pool_new_page_exhausted() {
        let (pool, disk) = create_test_pool(3, 0);

        let ids: Vec<_> = (0..3)
            .map(|_| pool.new_page().unwrap().unwrap().page_id())
            .collect();
        assert_eq!(ids, vec![PageId(0), PageId(1), PageId(2)]);

        assert!(pool.new_page().unwrap().is_none());
        assert!(pool.new_page().unwrap().is_none());
        // No page ids were burned by the failed calls
        assert_eq!(disk.num_pages(), 3);
    }

    #[test]
    fn test_buffer_pool_flush_page() {
        let (pool, disk) = create_test_pool(10, 4);

        let page = pool.fetch_page(PageId(1)).unwrap().unwrap();
        page.write_data()[7] = 0x99;
        pool.unpin_page(PageId(1), true);

        assert!(pool.flush_page(PageId(1)).unwrap());
        assert_eq!(pool.is_dirty(PageId(1)), Some(false));
        assert_eq!(disk.page_bytes(PageId(1)).unwrap()[7], 0x99);

        // Clean now: second flush writes nothing
        assert!(!pool.flush_page(PageId(1)).unwrap());
        assert_eq!(disk.write_count(), 1);

        // Not resident
        assert!(!pool.flush_page(PageId(3)).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_failure_keeps_dirty() {
        let (pool, disk) = create_test_pool(10, 4);

        pool.fetch_page(PageId(1)).unwrap().unwrap();
        pool.unpin_page(PageId(1), true);

        disk.set_fail_writes(true);
        assert!(pool.flush_page(PageId(1)).is_err());
        assert_eq!(pool.is_dirty(PageId(1)), Some(true));

        disk.set_fail_writes(false);
        assert!(pool.flush_page(PageId(1)).unwrap());
    }

    #[test]
    fn test_buffer_pool_flush_skips_write_locked_page() {
        let (pool, disk) = create_test_pool(10, 4);

        let page = pool.fetch_page(PageId(0)).unwrap().unwrap();
        pool.fetch_page(PageId(0)).unwrap().unwrap();
        pool.unpin_page(PageId(0), true);

        // A dirty neighbour still gets flushed around the busy page
        pool.fetch_page(PageId(1)).unwrap().unwrap();
        pool.unpin_page(PageId(1), true);

        let data = page.write_data();
        assert!(matches!(
            pool.flush_page(PageId(0)),
            Err(StrataError::PageBusy { page_id: 0 })
        ));
        assert!(matches!(
            pool.flush_all(),
            Err(StrataError::PageBusy { page_id: 0 })
        ));
        assert_eq!(pool.is_dirty(PageId(0)), Some(true));
        assert_eq!(pool.is_dirty(PageId(1)), Some(false));
        assert_eq!(disk.write_log(), vec![PageId(1)]);
        drop(data);

        assert!(pool.flush_page(PageId(0)).unwrap());
        assert_eq!(pool.flush_all().unwrap(), 0);
    }

    #[test]
    fn test_buffer_pool_flush_all() {
        let (pool, disk) = create_test_pool(10, 0);

        for i in 0..5 {
            let page_id = pool.new_page().unwrap().unwrap().page_id();
            pool.unpin_page(page_id, i % 2 == 0);
        }

        assert_eq!(pool.flush_all().unwrap(), 3);
        assert_eq!(disk.write_count(), 3);
        assert_eq!(pool.stats().dirty_frames, 0);
        assert_eq!(pool.flush_all().unwrap(), 0);
    }

    #[test]
    fn test_buffer_pool_flush_all_attempts_every_page() {
        let (pool, disk) = create_test_pool(10, 0);

        let mut ids = Vec::new();
        for _ in 0..4 {
            let page_id = pool.new_page().unwrap().unwrap().page_id();
            pool.unpin_page(page_id, true);
            ids.push(page_id);
        }

        // Only one page fails; every other page must still be written
        let failing = ids[1];
        disk.set_fail_page(Some(failing));
        assert!(matches!(pool.flush_all(), Err(StrataError::Io(_))));

        let mut written = disk.write_log();
        written.sort();
        let mut expected: Vec<_> = ids.iter().copied().filter(|&id| id != failing).collect();
        expected.sort();
        assert_eq!(written, expected);
        for &page_id in &ids {
            assert_eq!(pool.is_dirty(page_id), Some(page_id == failing));
        }

        disk.set_fail_page(None);
        assert_eq!(pool.flush_all().unwrap(), 1);
        assert_eq!(disk.write_count(), 4);
    }

    #[test]
    fn test_buffer_pool_wal_forced_before_write_back() {
        let disk = Arc::new(MemoryDiskStore::with_pages(4));
        let log = Arc::new(RecordingLog::default());
        let pool = BufferPool::new(BufferPoolConfig { num_frames: 1 }, disk.clone(), log.clone())
            .unwrap();

        let mut guard = pool.fetch_write(PageId(0)).unwrap().unwrap();
        guard.data_mut()[0] = 1;
        guard.set_lsn(Lsn(500));
        guard.mark_dirty();
        drop(guard);

        // Eviction forces the log up to the page's LSN first
        pool.fetch_page(PageId(1)).unwrap().unwrap();
        assert_eq!(*log.flush_calls.lock(), vec![Lsn(500)]);
        assert_eq!(disk.write_log(), vec![PageId(0)]);
        pool.unpin_page(PageId(1), false);

        // Already durable: no second log flush
        let mut guard = pool.fetch_write(PageId(0)).unwrap().unwrap();
        guard.set_lsn(Lsn(300));
        guard.mark_dirty();
        drop(guard);
        assert!(pool.flush_page(PageId(0)).unwrap());
        assert_eq!(log.flush_calls.lock().len(), 1);
    }

    #[test]
    fn test_buffer_pool_wal_failure_aborts_write_back() {
        let disk = Arc::new(MemoryDiskStore::with_pages(4));
        let log = Arc::new(RecordingLog::default());
        let pool = BufferPool::new(BufferPoolConfig { num_frames: 4 }, disk.clone(), log.clone())
            .unwrap();

        let mut guard = pool.fetch_write(PageId(2)).unwrap().unwrap();
        guard.set_lsn(Lsn(64));
        guard.mark_dirty();
        drop(guard);

        log.fail.store(true, Ordering::Release);
        assert!(matches!(
            pool.flush_page(PageId(2)),
            Err(StrataError::WalWriteFailed(_))
        ));
        assert_eq!(disk.write_count(), 0);
        assert_eq!(pool.is_dirty(PageId(2)), Some(true));
    }

    #[test]
    fn test_buffer_pool_read_guard() {
        let (pool, disk) = create_test_pool(10, 4);
        disk.write_page(PageId(1), &[0x3C; PAGE_SIZE]).unwrap();

        {
            let guard = pool.fetch_read(PageId(1)).unwrap().unwrap();
            assert_eq!(guard.page_id(), PageId(1));
            assert_eq!(guard.data()[0], 0x3C);
            assert_eq!(pool.pin_count(PageId(1)), Some(1));
        }

        assert_eq!(pool.pin_count(PageId(1)), Some(0));
        assert_eq!(pool.is_dirty(PageId(1)), Some(false));
    }

    #[test]
    fn test_buffer_pool_write_guard() {
        let (pool, _) = create_test_pool(10, 4);

        {
            let mut guard = pool.fetch_write(PageId(1)).unwrap().unwrap();
            guard.data_mut()[0] = 0xFF;
            guard.mark_dirty();
        }

        assert_eq!(pool.pin_count(PageId(1)), Some(0));
        assert_eq!(pool.is_dirty(PageId(1)), Some(true));

        let guard = pool.fetch_read(PageId(1)).unwrap().unwrap();
        assert_eq!(guard.data()[0], 0xFF);
    }

    #[test]
    fn test_buffer_pool_write_guard_unmarked_stays_clean() {
        let (pool, _) = create_test_pool(10, 4);

        drop(pool.fetch_write(PageId(1)).unwrap().unwrap());
        assert_eq!(pool.is_dirty(PageId(1)), Some(false));
    }

    #[test]
    fn test_buffer_pool_stats() {
        let (pool, _) = create_test_pool(10, 0);

        for i in 0..5 {
            let page_id = pool.new_page().unwrap().unwrap().page_id();
            if i % 2 == 0 {
                pool.unpin_page(page_id, true); // Dirty
            }
            // Odd pages remain pinned
        }
        pool.fetch_page(PageId(0)).unwrap().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total_frames, 10);
        assert_eq!(stats.free_frames, 5);
        assert_eq!(stats.used_frames, 5);
        assert_eq!(stats.pinned_frames, 3); // Pages 0, 1, 3
        assert_eq!(stats.dirty_frames, 3); // Pages 0, 2, 4
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.hit_ratio(), 1.0);
    }

    #[test]
    fn test_buffer_pool_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BufferPool>();
    }
}
