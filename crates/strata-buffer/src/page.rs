//! In-memory pages and the frames that hold them.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use strata_common::page::{Lsn, PAGE_SIZE, PageId};

/// Index of a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Position of this frame in the pool's frame array.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A page resident in a buffer pool frame.
///
/// Holds exactly `PAGE_SIZE` bytes plus the metadata the pool needs: which
/// page is loaded, how many holders have it pinned, whether the bytes differ
/// from disk, and the LSN of the last logged change.
///
/// Metadata changes are made by the pool while it holds its lock; the
/// fields are atomic so holders can read them without that lock. The bytes
/// sit behind their own reader-writer lock.
pub struct Page {
    /// Frame this page lives in.
    frame_id: FrameId,
    /// Loaded page, `PageId::INVALID` when the frame is free.
    page_id: AtomicU32,
    /// Page data buffer.
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
    /// Number of holders.
    pin_count: AtomicU32,
    /// Whether the page has been modified since it was last written.
    is_dirty: AtomicBool,
    /// LSN of the last logged modification.
    lsn: AtomicU64,
}

impl Page {
    /// Creates an empty page slot for the given frame.
    pub(crate) fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            page_id: AtomicU32::new(PageId::INVALID.0),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
            pin_count: AtomicU32::new(0),
            is_dirty: AtomicBool::new(false),
            lsn: AtomicU64::new(Lsn::INVALID.0),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the ID of the loaded page, or `PageId::INVALID`.
    #[inline]
    pub fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::Acquire))
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::Acquire)
    }

    /// Returns true if any holder has this page pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count() > 0
    }

    /// Returns true if the in-memory bytes differ from disk.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty.load(Ordering::Acquire)
    }

    /// Returns the LSN of the last logged modification.
    #[inline]
    pub fn lsn(&self) -> Lsn {
        Lsn(self.lsn.load(Ordering::Acquire))
    }

    /// Records that a modification of this page was logged at `lsn`.
    ///
    /// LSNs only move forward; an older LSN is ignored.
    #[inline]
    pub fn set_lsn(&self, lsn: Lsn) {
        self.lsn.fetch_max(lsn.0, Ordering::AcqRel);
    }

    /// Locks the page bytes for reading.
    #[inline]
    pub fn read_data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.read()
    }

    /// Locks the page bytes for writing.
    ///
    /// Writers must unpin with `is_dirty = true` afterwards.
    #[inline]
    pub fn write_data(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.data.write()
    }

    /// Read lock without blocking; `None` while a writer holds the bytes.
    #[inline]
    pub(crate) fn try_read_data(&self) -> Option<RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>>> {
        self.data.try_read()
    }

    /// Loads `page_id` into this frame with a single pin.
    pub(crate) fn install(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::Release);
        self.pin_count.store(1, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.lsn.store(Lsn::INVALID.0, Ordering::Release);
    }

    /// Increments the pin count and returns the new count.
    #[inline]
    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the pin count and returns the new count.
    ///
    /// Returns `None` without changing anything if the page is not pinned.
    #[inline]
    pub(crate) fn unpin(&self) -> Option<u32> {
        self.pin_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .ok()
            .map(|prev| prev - 1)
    }

    /// Sets or clears the dirty flag.
    #[inline]
    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.is_dirty.store(dirty, Ordering::Release);
    }

    /// Returns the frame to the empty state with zeroed bytes.
    pub(crate) fn reset(&self) {
        self.page_id.store(PageId::INVALID.0, Ordering::Release);
        self.pin_count.store(0, Ordering::Release);
        self.is_dirty.store(false, Ordering::Release);
        self.lsn.store(Lsn::INVALID.0, Ordering::Release);
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("frame_id", &self.frame_id)
            .field("page_id", &self.page_id())
            .field("pin_count", &self.pin_count())
            .field("is_dirty", &self.is_dirty())
            .field("lsn", &self.lsn())
            .finish()
    }
}
