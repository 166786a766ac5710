//! Buffer pool management for Strata.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock (second-chance) eviction policy
//! - Pin counting so referenced pages are never evicted
//! - Dirty page tracking with write-back through a `DiskStore`
//! - Write-ahead-log enforcement before every write-back

mod page;
mod page_table;
mod pool;
mod replacer;

pub use page::{FrameId, Page};
pub use page_table::PageTable;
pub use pool::{BufferPool, BufferPoolConfig, BufferPoolStats, PageReadGuard, PageWriteGuard};
pub use replacer::{ClockReplacer, Replacer};
