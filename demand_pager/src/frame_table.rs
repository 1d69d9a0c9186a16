use std::{
    sync::{Mutex, MutexGuard},
    thread,
    time::Duration,
};

use log::{error, trace, warn};

use crate::{
    address::{AddressSpaceId, FrameId, VirtAddr},
    error::{VmError, VmResult},
    modules::block_device::BlockDeviceModule,
    util::lock,
    vm_manager::VmManager,
};

/// How often [`VmManager::acquire_frame`] looks for a victim before it gives up
const EVICTION_ROUNDS: u32 = 8;

/// First wait between two rounds, doubled every round
const EVICTION_BACKOFF: Duration = Duration::from_millis(1);

/// A physical frame that currently holds (or is about to hold) a user page.
///
/// The page is referenced by relation, `(owner, page)` names the supplemental
/// entry that lives in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTableEntry {
    pub frame: FrameId,
    pub owner: AddressSpaceId,
    pub page: VirtAddr,
}

/// All user frames in use, in allocation order.
#[derive(Default)]
pub struct FrameTable {
    entries: Mutex<Vec<FrameTableEntry>>,
}

impl FrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Vec<FrameTableEntry>> {
        lock(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Entry of `frame`, if the frame is in use
    pub fn find(&self, frame: FrameId) -> Option<FrameTableEntry> {
        self.lock().iter().find(|e| e.frame == frame).copied()
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<FrameTableEntry> {
        self.lock().clone()
    }
}

impl<D: BlockDeviceModule> VmManager<D> {
    /// Gets a frame for page `page` of `owner`, evicting another page if the pool is empty.
    ///
    /// The caller holds the lock of the supplemental entry of `page` and makes
    /// the page resident in the returned frame. The frame contents are undefined.
    ///
    /// If every resident page is locked by somebody else, this backs off and
    /// tries again a few times before giving up with [`VmError::OutOfFrames`].
    pub fn acquire_frame(&self, owner: AddressSpaceId, page: VirtAddr) -> VmResult<FrameTableEntry> {
        let mut backoff = EVICTION_BACKOFF;

        for round in 0..EVICTION_ROUNDS {
            {
                let mut table = self.frames.lock();
                if let Some(frame) = self.memory.alloc() {
                    let entry = FrameTableEntry { frame, owner, page };
                    table.push(entry);
                    trace!("{}: {} gets free {:?}", owner, page, frame);
                    return Ok(entry);
                }
            }

            if let Some(victim) = self.evict_frame()? {
                let entry = FrameTableEntry {
                    frame: victim.frame,
                    owner,
                    page,
                };
                self.frames.lock().push(entry);
                trace!(
                    "{}: {} reuses {:?} of {}:{}",
                    owner,
                    page,
                    victim.frame,
                    victim.owner,
                    victim.page
                );
                return Ok(entry);
            }

            if round + 1 < EVICTION_ROUNDS {
                trace!("{}: {} waits {:?} for a frame", owner, page, backoff);
                thread::sleep(backoff);
                backoff *= 2;
            }
        }

        error!("{}: no frame can be evicted for {}", owner, page);
        Err(VmError::OutOfFrames)
    }

    /// Removes `frame` from the table and gives it back to the pool.
    ///
    /// Returns `false` if the frame was not in use.
    pub fn release_frame(&self, frame: FrameId) -> bool {
        let mut table = self.frames.lock();
        match table.iter().position(|e| e.frame == frame) {
            Some(index) => {
                table.remove(index);
                self.memory.free(frame);
                trace!("Released {:?}", frame);
                true
            }
            None => {
                warn!("Release of {:?} that is not in the frame table", frame);
                debug_assert!(false, "release of {:?} that is not in use", frame);
                false
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{Arc, Barrier},
        thread,
        time::Duration,
    };

    use crate::{
        address::{VirtAddr, PAGE_SIZE, SECTORS_PER_PAGE, USER_BASE},
        modules::{block_device::MemoryBlockDeviceModule, page_directory::SoftPageDirectory},
        sup_page_table::{PageOrigin, PageState, SupPageEntry},
        vm_manager::{VmConfig, VmManager},
    };

    fn small_vm(frames: usize) -> VmManager<MemoryBlockDeviceModule> {
        VmManager::new(
            VmConfig {
                user_frames: frames,
                ..VmConfig::default()
            },
            MemoryBlockDeviceModule::new(4 * SECTORS_PER_PAGE),
        )
        .unwrap()
    }

    #[test]
    fn test_acquire_and_release() {
        let vm = small_vm(2);
        let space = vm.create_address_space(Arc::new(SoftPageDirectory::new()));

        let a = vm
            .acquire_frame(space.id(), VirtAddr::new(USER_BASE))
            .unwrap();
        let b = vm
            .acquire_frame(space.id(), VirtAddr::new(USER_BASE + PAGE_SIZE))
            .unwrap();
        assert_ne!(a.frame, b.frame);
        assert_eq!(vm.frame_table().len(), 2);
        assert_eq!(vm.memory().free_count(), 0);

        assert!(vm.release_frame(a.frame));
        assert_eq!(vm.frame_table().find(a.frame), None);
        assert_eq!(vm.frame_table().find(b.frame), Some(b));
        assert_eq!(vm.memory().free_count(), 1);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "not in use"))]
    fn test_release_unknown_frame() {
        let vm = small_vm(1);
        let space = vm.create_address_space(Arc::new(SoftPageDirectory::new()));
        let a = vm
            .acquire_frame(space.id(), VirtAddr::new(USER_BASE))
            .unwrap();

        assert!(vm.release_frame(a.frame));

        // a double release is a bug, release builds only log it
        assert!(!vm.release_frame(a.frame));
        assert_eq!(vm.memory().free_count(), 1);
        assert!(vm.frame_table().is_empty());
    }

    #[test]
    fn test_acquire_waits_for_busy_page() {
        let vm = small_vm(1);
        let space = vm.create_address_space(Arc::new(SoftPageDirectory::new()));
        let first = VirtAddr::new(USER_BASE);
        let second = VirtAddr::new(USER_BASE + PAGE_SIZE);

        let entry = Arc::new(SupPageEntry::new(first, PageOrigin::Anonymous, true, 0));
        space.pages().insert(entry.clone()).unwrap();
        let frame = vm.acquire_frame(space.id(), first).unwrap().frame;
        entry.lock().frame = Some(frame);
        assert!(space.page_directory().install(first, frame, true));

        let locked = Barrier::new(2);
        thread::scope(|s| {
            // the only resident page stays busy for a moment
            s.spawn(|| {
                let page = entry.lock();
                locked.wait();
                thread::sleep(Duration::from_millis(10));
                drop(page);
            });

            locked.wait();
            let reused = vm.acquire_frame(space.id(), second).unwrap();
            assert_eq!(reused.frame, frame);
        });

        assert_eq!(vm.stats().evictions, 1);
        assert_eq!(entry.lock().state(), PageState::Swapped);
    }
}
