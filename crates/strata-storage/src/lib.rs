//! Page storage for Strata.
//!
//! This crate provides:
//! - The `DiskStore` contract the buffer pool consumes
//! - A file-backed disk manager with page id allocation and reuse
//! - An in-memory store with I/O counters and failure injection

mod disk;
mod memory;

pub use disk::{DiskManager, DiskManagerConfig, DiskStore};
pub use memory::MemoryDiskStore;
