use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use log::{debug, info};

use crate::{
    address::{AddressSpaceId, VirtAddr, PAGE_SIZE},
    address_space::AddressSpace,
    error::{VmError, VmResult},
    filesys_lock::FilesysLock,
    frame_table::FrameTable,
    modules::{block_device::BlockDeviceModule, page_directory::PageDirectoryModule},
    physical_memory::PhysicalMemory,
    swap::SwapStore,
    util::lock,
};

/// Tunables of a [`VmManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Amount of physical frames in the user pool
    pub user_frames: usize,

    /// How far below the stack pointer an access may be and still grow the stack.
    ///
    /// 32 bytes is what a `pusha` touches before it moves the stack pointer.
    pub stack_slack: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_frames: 64,
            stack_slack: 32,
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) faults: AtomicU64,
    pub(crate) stack_growths: AtomicU64,
    pub(crate) file_loads: AtomicU64,
    pub(crate) swap_ins: AtomicU64,
    pub(crate) swap_outs: AtomicU64,
    pub(crate) write_backs: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl Counters {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of the event counters of a [`VmManager`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    pub faults: u64,
    pub stack_growths: u64,
    pub file_loads: u64,
    pub swap_ins: u64,
    pub swap_outs: u64,
    pub write_backs: u64,
    pub evictions: u64,
}

/// The virtual memory manager.
///
/// Owns the user frame pool, the frame table and the swap store and keeps
/// track of every live address space. All methods take `&self` and may be
/// called from any number of threads at the same time.
///
/// Locks are always taken in this order:
/// supplemental entry → frame table → (address space registry | page table | swap bitmap).
/// The filesystem lock is never taken while the frame table is held.
pub struct VmManager<D: BlockDeviceModule> {
    config: VmConfig,
    pub(crate) memory: PhysicalMemory,
    pub(crate) frames: FrameTable,
    pub(crate) swap: SwapStore<D>,
    pub(crate) filesys: FilesysLock,

    spaces: RwLock<HashMap<AddressSpaceId, Arc<AddressSpace>>>,
    next_space_id: AtomicU32,

    /// logical clock for `last_access`
    clock: AtomicU64,

    pub(crate) counters: Counters,
}

impl<D: BlockDeviceModule> VmManager<D> {
    pub fn new(config: VmConfig, swap_device: D) -> VmResult<Self> {
        if config.user_frames == 0 {
            return Err(VmError::InvalidConfig("user pool needs at least one frame"));
        }

        let swap = SwapStore::new(swap_device);
        info!(
            "VM initialized: {} user frames, {} swap slots ({} KiB)",
            config.user_frames,
            swap.slot_count(),
            swap.slot_count() * PAGE_SIZE / 1024
        );

        Ok(Self {
            config,
            memory: PhysicalMemory::new(config.user_frames),
            frames: FrameTable::new(),
            swap,
            filesys: FilesysLock::new(),
            spaces: RwLock::new(HashMap::new()),
            next_space_id: AtomicU32::new(1),
            clock: AtomicU64::new(0),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    pub fn frame_table(&self) -> &FrameTable {
        &self.frames
    }

    pub fn swap(&self) -> &SwapStore<D> {
        &self.swap
    }

    /// The lock every file store access is serialized with.
    ///
    /// The system call layer uses the same lock for its own file operations.
    pub fn filesys_lock(&self) -> &FilesysLock {
        &self.filesys
    }

    /// Creates the VM state of a new process that uses `pagedir` as its hardware page table
    pub fn create_address_space(&self, pagedir: Arc<dyn PageDirectoryModule>) -> Arc<AddressSpace> {
        let id = AddressSpaceId(self.next_space_id.fetch_add(1, Ordering::Relaxed));
        let space = Arc::new(AddressSpace::new(id, pagedir));

        self.spaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, space.clone());

        debug!("Created address space {}", id);
        space
    }

    /// Live address space with `id`
    pub fn address_space(&self, id: AddressSpaceId) -> Option<Arc<AddressSpace>> {
        self.spaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }

    pub fn address_space_count(&self) -> usize {
        self.spaces
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Tears down all VM state of `space` on process exit.
    ///
    /// Every mapping is unmapped (dirty pages are written back), then every
    /// remaining page gives back its frame and swap slot.
    pub fn free_address_space_vm_state(&self, space: &AddressSpace) {
        let ids = lock(&space.mmaps).ids();
        for id in ids {
            self.munmap(space, id);
        }

        for entry in space.pages().entries() {
            let mut page = entry.lock();
            if page.removed {
                continue;
            }
            self.drop_page(space, &entry, &mut page);
        }

        self.spaces
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&space.id());

        info!("Freed VM state of {}", space.id());
    }

    pub fn stats(&self) -> VmStats {
        let c = &self.counters;
        VmStats {
            faults: c.faults.load(Ordering::Relaxed),
            stack_growths: c.stack_growths.load(Ordering::Relaxed),
            file_loads: c.file_loads.load(Ordering::Relaxed),
            swap_ins: c.swap_ins.load(Ordering::Relaxed),
            swap_outs: c.swap_outs.load(Ordering::Relaxed),
            write_backs: c.write_backs.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
        }
    }

    /// Next value of the access clock
    pub(crate) fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn stack_slack(&self) -> usize {
        self.config.stack_slack
    }
}

/// `true` if `addr` may be reached by growing the stack whose pointer is `esp`
#[inline]
pub(crate) fn is_stack_access(addr: VirtAddr, esp: VirtAddr, slack: usize) -> bool {
    addr.as_usize() >= esp.as_usize().saturating_sub(slack)
}
