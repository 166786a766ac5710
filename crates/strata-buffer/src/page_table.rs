//! Page table mapping resident page IDs to frame IDs.

use crate::page::FrameId;
use std::collections::HashMap;
use strata_common::page::PageId;

/// Mapping from page ID to the frame holding that page.
///
/// The single source of truth for residency: a page is in the pool exactly
/// when it has an entry here. Only accessed under the pool lock.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: HashMap<PageId, FrameId>,
}

impl PageTable {
    /// Creates a page table sized for the given number of frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Looks up a page ID and returns its frame ID if present.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<FrameId> {
        self.entries.get(&page_id).copied()
    }

    /// Maps a page to a frame, returning the frame it was mapped to before.
    pub fn insert(&mut self, page_id: PageId, frame_id: FrameId) -> Option<FrameId> {
        self.entries.insert(page_id, frame_id)
    }

    /// Removes a page ID mapping. Returns the frame ID if it was present.
    pub fn remove(&mut self, page_id: PageId) -> Option<FrameId> {
        self.entries.remove(&page_id)
    }

    /// Returns true if the page is resident.
    #[inline]
    pub fn contains(&self, page_id: PageId) -> bool {
        self.entries.contains_key(&page_id)
    }

    /// Returns the number of resident pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no page is resident.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over all (page, frame) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (PageId, FrameId)> + '_ {
        self.entries.iter().map(|(&page_id, &frame_id)| (page_id, frame_id))
    }
}
