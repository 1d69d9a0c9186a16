use std::{collections::BTreeMap, sync::Mutex};

use super::{Mapping, PageDirectoryModule};
use crate::{
    address::{FrameId, VirtAddr},
    util::lock,
};

#[derive(Debug, Clone, Copy)]
struct SoftEntry {
    mapping: Mapping,
    dirty: bool,
}

/// Page directory kept in ordinary memory.
///
/// Stands in for the MMU on hosted targets: the user-access helpers of
/// [`crate::VmManager`] consult it and set the dirty bit the way the hardware would.
#[derive(Default)]
pub struct SoftPageDirectory {
    entries: Mutex<BTreeMap<VirtAddr, SoftEntry>>,

    /// Maximum amount of translations, `None` for unlimited
    capacity: Option<usize>,
}

impl SoftPageDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory that refuses to hold more than `capacity` translations
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            capacity: Some(capacity),
        }
    }

    /// Amount of installed translations
    pub fn mapped_count(&self) -> usize {
        lock(&self.entries).len()
    }

    /// All mapped pages in ascending order
    pub fn mapped_pages(&self) -> Vec<VirtAddr> {
        lock(&self.entries).keys().copied().collect()
    }
}

impl PageDirectoryModule for SoftPageDirectory {
    fn install(&self, vaddr: VirtAddr, frame: FrameId, writable: bool) -> bool {
        debug_assert!(vaddr.is_page_aligned());
        let mut entries = lock(&self.entries);

        if entries.contains_key(&vaddr) {
            return false;
        }
        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity {
                return false;
            }
        }

        entries.insert(
            vaddr,
            SoftEntry {
                mapping: Mapping { frame, writable },
                dirty: false,
            },
        );
        true
    }

    fn clear_mapping(&self, vaddr: VirtAddr) {
        lock(&self.entries).remove(&vaddr);
    }

    fn lookup(&self, vaddr: VirtAddr) -> Option<Mapping> {
        lock(&self.entries).get(&vaddr).map(|e| e.mapping)
    }

    fn is_dirty(&self, vaddr: VirtAddr) -> bool {
        lock(&self.entries)
            .get(&vaddr)
            .map(|e| e.dirty)
            .unwrap_or(false)
    }

    fn set_dirty(&self, vaddr: VirtAddr, dirty: bool) {
        if let Some(entry) = lock(&self.entries).get_mut(&vaddr) {
            entry.dirty = dirty;
        }
    }
}

#[cfg(test)]
mod test {
    use super::SoftPageDirectory;
    use crate::{
        address::{FrameId, VirtAddr, PAGE_SIZE, USER_BASE},
        modules::page_directory::{Mapping, PageDirectoryModule},
    };

    #[test]
    fn test_install_twice_fails() {
        let dir = SoftPageDirectory::new();
        let page = VirtAddr::new(USER_BASE);

        assert!(dir.install(page, FrameId(1), true));
        assert!(!dir.install(page, FrameId(2), false));
        assert_eq!(
            dir.lookup(page),
            Some(Mapping {
                frame: FrameId(1),
                writable: true
            })
        );
    }

    #[test]
    fn test_dirty_bit_follows_mapping() {
        let dir = SoftPageDirectory::new();
        let page = VirtAddr::new(USER_BASE + PAGE_SIZE);

        dir.set_dirty(page, true);
        assert!(!dir.is_dirty(page), "unmapped pages are never dirty");

        assert!(dir.install(page, FrameId(0), true));
        assert!(!dir.is_dirty(page));
        dir.set_dirty(page, true);
        assert!(dir.is_dirty(page));

        dir.clear_mapping(page);
        assert!(!dir.is_dirty(page));
        assert_eq!(dir.lookup(page), None);

        // a fresh install starts clean
        assert!(dir.install(page, FrameId(3), true));
        assert!(!dir.is_dirty(page));
    }

    #[test]
    fn test_capacity_limit() {
        let dir = SoftPageDirectory::with_capacity_limit(1);
        assert!(dir.install(VirtAddr::new(USER_BASE), FrameId(0), true));
        assert!(!dir.install(VirtAddr::new(USER_BASE + PAGE_SIZE), FrameId(1), true));
        assert_eq!(dir.mapped_count(), 1);
    }
}
