//! In-memory page store.

use crate::disk::DiskStore;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::io::Error as IoError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use strata_common::page::{PAGE_SIZE, PageId};
use strata_common::{Result, StrataError};

/// A `DiskStore` that keeps every page in memory.
///
/// Same allocation rules as `DiskManager`. Counts reads and writes and can
/// be told to fail I/O, which makes buffer pool behavior observable in tests.
#[derive(Default)]
pub struct MemoryDiskStore {
    inner: Mutex<MemoryPages>,
    reads: AtomicU64,
    writes: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

#[derive(Default)]
struct MemoryPages {
    pages: Vec<Box<[u8; PAGE_SIZE]>>,
    free_pages: BTreeSet<u32>,
    /// Every deallocate call, in order.
    deallocations: Vec<PageId>,
    /// Every successful write, in order.
    write_log: Vec<PageId>,
    /// Writes to this page fail.
    fail_page: Option<PageId>,
}

impl MemoryDiskStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with `n` zeroed pages already allocated (ids `0..n`).
    pub fn with_pages(n: u32) -> Self {
        let store = Self::new();
        store.inner.lock().pages = (0..n).map(|_| Box::new([0u8; PAGE_SIZE])).collect();
        store
    }

    /// Number of successful page reads.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    /// Number of successful page writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Acquire)
    }

    /// Page ids written, in write order.
    pub fn write_log(&self) -> Vec<PageId> {
        self.inner.lock().write_log.clone()
    }

    /// Page ids passed to `deallocate_page`, in call order.
    pub fn deallocations(&self) -> Vec<PageId> {
        self.inner.lock().deallocations.clone()
    }

    /// Number of page ids ever allocated.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().pages.len() as u32
    }

    /// Makes subsequent reads fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    /// Makes subsequent writes fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Makes subsequent writes of one page fail with an I/O error.
    pub fn set_fail_page(&self, page_id: Option<PageId>) {
        self.inner.lock().fail_page = page_id;
    }

    /// Returns a copy of the durable contents of a page.
    pub fn page_bytes(&self, page_id: PageId) -> Option<Box<[u8; PAGE_SIZE]>> {
        self.inner.lock().pages.get(page_id.0 as usize).cloned()
    }
}

impl DiskStore for MemoryDiskStore {
    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_num) = inner.free_pages.pop_first() {
            inner.pages[page_num as usize].fill(0);
            return Ok(PageId::new(page_num));
        }

        let page_num = inner.pages.len() as u64;
        if page_num > PageId::MAX.0 as u64 {
            return Err(StrataError::PageIdsExhausted);
        }
        inner.pages.push(Box::new([0u8; PAGE_SIZE]));
        Ok(PageId::new(page_num as u32))
    }

    fn deallocate_page(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        inner.deallocations.push(page_id);
        if (page_id.0 as usize) < inner.pages.len() {
            inner.free_pages.insert(page_id.0);
        }
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(IoError::other("injected read failure").into());
        }

        let inner = self.inner.lock();
        let page = inner
            .pages
            .get(page_id.0 as usize)
            .ok_or(StrataError::PageNotAllocated { page_id: page_id.0 })?;
        buf.copy_from_slice(&page[..]);
        self.reads.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(IoError::other("injected write failure").into());
        }

        let mut inner = self.inner.lock();
        if inner.fail_page == Some(page_id) {
            return Err(IoError::other("injected write failure").into());
        }
        let page = inner
            .pages
            .get_mut(page_id.0 as usize)
            .ok_or(StrataError::PageNotAllocated { page_id: page_id.0 })?;
        page.copy_from_slice(buf);
        inner.write_log.push(page_id);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
