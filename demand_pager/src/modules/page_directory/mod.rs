mod soft;

use crate::address::{FrameId, VirtAddr};

pub use soft::SoftPageDirectory;

/// A hardware translation currently present in a page directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub frame: FrameId,
    pub writable: bool,
}

/// The hardware page table of one address space.
///
/// The encoding of the entries and the hardware walk are not part of this
/// crate; implementations only need to provide these few operations.
/// All addresses handed in are page aligned.
pub trait PageDirectoryModule: Send + Sync {
    /// Maps `vaddr` to `frame`.
    ///
    /// Returns `false` if `vaddr` is already mapped or if the directory could not
    /// allocate the memory it needs for the new entry.
    fn install(&self, vaddr: VirtAddr, frame: FrameId, writable: bool) -> bool;

    /// Removes the translation for `vaddr`. Unmapped addresses are ignored.
    fn clear_mapping(&self, vaddr: VirtAddr);

    /// Current translation of `vaddr`, if any
    fn lookup(&self, vaddr: VirtAddr) -> Option<Mapping>;

    /// Hardware dirty bit of the translation for `vaddr` (`false` if unmapped)
    fn is_dirty(&self, vaddr: VirtAddr) -> bool;

    /// Sets or clears the dirty bit of the translation for `vaddr`
    fn set_dirty(&self, vaddr: VirtAddr, dirty: bool);
}
