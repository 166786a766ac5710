//! Page replacement policies for the buffer pool.

use crate::page::FrameId;

/// Trait for page replacement algorithms.
///
/// A replacer tracks the frames that may be evicted (resident and unpinned)
/// and picks one when the pool needs a frame. It never sees page data.
pub trait Replacer: Send {
    /// Marks a frame as in use: it stops being an eviction candidate.
    fn pin(&mut self, frame_id: FrameId);

    /// Marks a frame as evictable and recently used.
    fn unpin(&mut self, frame_id: FrameId);

    /// Selects a victim frame and stops tracking it.
    ///
    /// Returns None if no frames are evictable.
    fn victim(&mut self) -> Option<FrameId>;

    /// Stops tracking a frame whose page left the pool.
    fn remove(&mut self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Per-frame clock state.
#[derive(Debug, Clone, Copy, Default)]
struct ClockSlot {
    /// Frame is an eviction candidate.
    tracked: bool,
    /// Frame was used since the hand last passed it.
    reference: bool,
}

/// Clock (second-chance) replacement.
///
/// Frames sit on a circle swept by a clock hand. A tracked frame whose
/// reference bit is set has the bit cleared and is passed over once; the
/// first tracked frame found with a clear bit is the victim. Every tracked
/// frame is visited at most twice per sweep.
#[derive(Debug)]
pub struct ClockReplacer {
    /// State for each frame, indexed by frame ID.
    slots: Vec<ClockSlot>,
    /// Current clock hand position.
    hand: usize,
    /// Number of tracked frames.
    tracked: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            slots: vec![ClockSlot::default(); num_frames],
            hand: 0,
            tracked: 0,
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the frame is currently an eviction candidate.
    pub fn is_tracked(&self, frame_id: FrameId) -> bool {
        self.slots
            .get(frame_id.index())
            .is_some_and(|slot| slot.tracked)
    }

    #[cfg(test)]
    fn hand(&self) -> usize {
        self.hand
    }

    /// Runs one sweep and reports how many tracked frames it inspected.
    fn sweep(&mut self) -> (Option<FrameId>, usize) {
        if self.tracked == 0 {
            return (None, 0);
        }

        let num_frames = self.slots.len();
        let mut inspected = 0;

        // Two full rotations always suffice: the first clears every
        // reference bit it passes.
        for _ in 0..(2 * num_frames) {
            let hand = self.hand;
            self.hand = (hand + 1) % num_frames;

            let slot = &mut self.slots[hand];
            if !slot.tracked {
                continue;
            }
            inspected += 1;

            if slot.reference {
                slot.reference = false;
            } else {
                slot.tracked = false;
                self.tracked -= 1;
                return (Some(FrameId(hand as u32)), inspected);
            }
        }

        unreachable!(
            "clock sweep found no victim among {} tracked frames",
            self.tracked
        )
    }
}

impl Replacer for ClockReplacer {
    fn pin(&mut self, frame_id: FrameId) {
        let Some(slot) = self.slots.get_mut(frame_id.index()) else {
            return;
        };
        if slot.tracked {
            slot.tracked = false;
            self.tracked -= 1;
        }
        slot.reference = false;
    }

    fn unpin(&mut self, frame_id: FrameId) {
        let Some(slot) = self.slots.get_mut(frame_id.index()) else {
            return;
        };
        if !slot.tracked {
            slot.tracked = true;
            self.tracked += 1;
        }
        slot.reference = true;
    }

    fn victim(&mut self) -> Option<FrameId> {
        self.sweep().0
    }

    fn remove(&mut self, frame_id: FrameId) {
        self.pin(frame_id);
    }

    fn size(&self) -> usize {
        self.tracked
    }
}
