//! Disk manager for page-level file I/O.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use strata_common::page::{PAGE_SIZE, PageId};
use strata_common::{Result, StrataError};
use tracing::{debug, warn};

/// Durable page storage consumed by the buffer pool.
///
/// Implementations must be safe to share between threads; the buffer pool
/// holds them behind an `Arc`.
pub trait DiskStore: Send + Sync {
    /// Allocates a fresh page id.
    ///
    /// Fails only when the id space is exhausted.
    fn allocate_page(&self) -> Result<PageId>;

    /// Returns a page id to the store. Idempotent; unknown ids are ignored.
    fn deallocate_page(&self, page_id: PageId);

    /// Reads the page into `buf`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes `buf` as the page's durable contents.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;
}

/// Configuration for the disk manager.
#[derive(Debug, Clone)]
pub struct DiskManagerConfig {
    /// Base directory for the page file.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

impl From<&strata_common::StorageConfig> for DiskManagerConfig {
    fn from(config: &strata_common::StorageConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
        }
    }
}

/// Manages reading and writing pages in a single data file.
///
/// Page `n` lives at byte offset `n * PAGE_SIZE`. Deallocated ids are handed
/// out again (lowest first) before the file grows. The free set is mirrored
/// to a sidecar file, rewritten on every change, so it survives a reopen.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// Open data file and allocation state.
    inner: Mutex<PageFile>,
}

/// Handle for the open data file.
struct PageFile {
    /// The file handle.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
    /// Deallocated page numbers available for reuse.
    free_pages: BTreeSet<u32>,
}

impl DiskManager {
    /// Name of the page file inside the data directory.
    pub const FILE_NAME: &'static str = "pages.dat";

    /// Name of the free set file: little-endian u32 page numbers.
    pub const FREE_FILE_NAME: &'static str = "pages.free";

    /// Opens (or creates) the page file in the configured directory.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(Self::FILE_NAME);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;
        let free_pages = Self::load_free_pages(&config.data_dir, num_pages)?;
        debug!(
            path = %path.display(),
            num_pages,
            free = free_pages.len(),
            "opened page file"
        );

        Ok(Self {
            config,
            inner: Mutex::new(PageFile {
                file,
                num_pages,
                free_pages,
            }),
        })
    }

    /// Reads the persisted free set. Ids past the end of the page file are
    /// dropped.
    fn load_free_pages(data_dir: &Path, num_pages: u32) -> Result<BTreeSet<u32>> {
        let path = data_dir.join(Self::FREE_FILE_NAME);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let chunks = bytes.chunks_exact(4);
        if !chunks.remainder().is_empty() {
            warn!(path = %path.display(), len = bytes.len(), "free set file has a torn tail");
        }
        Ok(chunks
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .filter(|&page_num| page_num < num_pages)
            .collect())
    }

    /// Rewrites the free set file from `free_pages`.
    ///
    /// Writes a temporary file and renames it over the old one, so a crash
    /// leaves either the old or the new set.
    fn save_free_pages(&self, free_pages: &BTreeSet<u32>) -> Result<()> {
        let path = self.config.data_dir.join(Self::FREE_FILE_NAME);
        let tmp_path = path.with_extension("free.tmp");

        let mut bytes = Vec::with_capacity(free_pages.len() * 4);
        for &page_num in free_pages {
            bytes.extend_from_slice(&page_num.to_le_bytes());
        }

        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        if self.config.fsync_enabled {
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Returns the path of the page file.
    pub fn file_path(&self) -> PathBuf {
        self.config.data_dir.join(Self::FILE_NAME)
    }

    /// Returns the number of pages in the file, allocated or not.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Returns the number of deallocated pages waiting for reuse.
    pub fn free_page_count(&self) -> usize {
        self.inner.lock().free_pages.len()
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    /// Syncs and closes the page file, reporting any sync error.
    pub fn close(self) -> Result<()> {
        self.flush()
    }

    fn write_at(
        &self,
        inner: &mut PageFile,
        page_id: PageId,
        data: &[u8; PAGE_SIZE],
    ) -> Result<()> {
        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(data)?;

        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }
        Ok(())
    }
}

impl DiskStore for DiskManager {
    fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_num) = inner.free_pages.pop_first() {
            let page_id = PageId::new(page_num);
            // Reused ids must not leak the previous owner's bytes
            let reused = self
                .write_at(&mut inner, page_id, &[0u8; PAGE_SIZE])
                .and_then(|()| self.save_free_pages(&inner.free_pages));
            if let Err(e) = reused {
                inner.free_pages.insert(page_num);
                return Err(e);
            }
            debug!(%page_id, "reallocated page");
            return Ok(page_id);
        }

        let page_num = inner.num_pages;
        if page_num > PageId::MAX.0 {
            return Err(StrataError::PageIdsExhausted);
        }

        // Write an empty page to extend the file
        let page_id = PageId::new(page_num);
        self.write_at(&mut inner, page_id, &[0u8; PAGE_SIZE])?;
        inner.num_pages = page_num + 1;

        debug!(%page_id, "allocated page");
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) {
        let mut inner = self.inner.lock();
        if page_id.0 < inner.num_pages && inner.free_pages.insert(page_id.0) {
            debug!(%page_id, "deallocated page");
            // Still reusable for this process; only lost on reopen
            if let Err(e) = self.save_free_pages(&inner.free_pages) {
                warn!(%page_id, error = %e, "failed to persist free set");
            }
        }
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_id.0 >= inner.num_pages {
            return Err(StrataError::PageNotAllocated { page_id: page_id.0 });
        }

        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();

        if page_id.0 >= inner.num_pages {
            return Err(StrataError::PageNotAllocated { page_id: page_id.0 });
        }

        self.write_at(&mut inner, page_id, buf)
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.inner.get_mut().file.sync_all();
    }
}
