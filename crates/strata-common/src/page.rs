//! Page identity and sizing for Strata storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
///
/// Every page buffer and every page on disk has exactly this size. Changing it
/// requires reformatting all persisted pages.
pub const PAGE_SIZE: usize = 4 * 1024;

/// Identifier of a page in the page store.
///
/// Page ids are dense, starting at 0, and are assigned by the disk store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel for "no page".
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Largest id the store can hand out.
    pub const MAX: PageId = PageId(u32::MAX - 1);

    /// Creates a new PageId.
    pub const fn new(page_num: u32) -> Self {
        Self(page_num)
    }

    /// Returns true if this is not the sentinel id.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Byte offset of this page in a single-file store.
    pub fn file_offset(&self) -> u64 {
        self.0 as u64 * PAGE_SIZE as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "page:{}", self.0)
        } else {
            write!(f, "page:invalid")
        }
    }
}

/// Log Sequence Number.
///
/// Byte offset of a record in the write-ahead log. LSN 0 never names a record
/// and doubles as "nothing logged yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Invalid/uninitialized LSN.
    pub const INVALID: Lsn = Lsn(0);

    /// Returns true if this LSN names a logged record.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    /// Returns the LSN after advancing by the given number of bytes.
    pub fn advance(&self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}
