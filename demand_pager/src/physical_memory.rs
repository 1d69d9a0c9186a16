use std::sync::{Mutex, MutexGuard};

use log::trace;

use crate::{
    address::{FrameId, PAGE_SIZE},
    util::{bit_array::BitArray, lock},
};

/// The pool of physical frames that may be handed out to user pages.
pub struct PhysicalMemory {
    frames: Vec<Mutex<Box<[u8]>>>,

    /// one bit per frame, set if allocated
    used: Mutex<BitArray>,
}

impl PhysicalMemory {
    pub fn new(frame_count: usize) -> Self {
        Self {
            frames: (0..frame_count)
                .map(|_| Mutex::new(vec![0u8; PAGE_SIZE].into_boxed_slice()))
                .collect(),
            used: Mutex::new(BitArray::new(frame_count)),
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn free_count(&self) -> usize {
        let used = lock(&self.used);
        used.len() - used.count_range(0, used.len())
    }

    /// Allocates a free frame, or returns `None` if the pool is exhausted.
    ///
    /// The contents of the returned frame are undefined.
    pub(crate) fn alloc(&self) -> Option<FrameId> {
        let frame = lock(&self.used).scan_group_and_set(1).map(FrameId);
        trace!("Allocated frame {:?}", frame);
        frame
    }

    pub(crate) fn free(&self, frame: FrameId) {
        let mut used = lock(&self.used);
        debug_assert!(used.is_set(frame.0), "double free of {:?}", frame);
        used.set(false, frame.0);
    }

    /// Access to the contents of `frame`
    pub fn frame(&self, frame: FrameId) -> MutexGuard<'_, Box<[u8]>> {
        lock(&self.frames[frame.0])
    }
}
