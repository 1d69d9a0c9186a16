mod address_space;
mod error;
mod eviction;
mod filesys_lock;
mod frame_table;
mod mmap;
mod page_fault;
mod physical_memory;
mod sup_page_table;
mod swap;
mod user_access;
mod util;
mod vm_manager;

#[cfg(test)]
mod test;

pub mod address;
pub mod modules;

pub use address::{AddressSpaceId, FrameId, VirtAddr};
pub use address_space::{AddressSpace, MapId, MmapEntry};
pub use error::{VmError, VmResult};
pub use filesys_lock::{FilesysGuard, FilesysLock};
pub use frame_table::{FrameTable, FrameTableEntry};
pub use mmap::{STDIN_FILENO, STDOUT_FILENO};
pub use physical_memory::PhysicalMemory;
pub use sup_page_table::{
    FileBacking, PageGuard, PageInner, PageOrigin, PageState, SupPageEntry,
    SupplementalPageTable,
};
pub use swap::{SwapSlot, SwapStore};
pub use vm_manager::{VmConfig, VmManager, VmStats};

static_assertions::assert_impl_all!(
    VmManager<modules::block_device::MemoryBlockDeviceModule>: Send, Sync
);
static_assertions::assert_impl_all!(AddressSpace: Send, Sync);
