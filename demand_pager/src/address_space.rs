use std::sync::{Arc, Mutex};

use log::info;

use crate::{
    address::{AddressSpaceId, VirtAddr},
    modules::{file_store::FileRef, page_directory::PageDirectoryModule},
    sup_page_table::SupplementalPageTable,
    util::lock,
};

/// Identifier of a memory mapping, unique within its address space
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MapId(pub i32);

/// A file mapped into an address space
pub struct MmapEntry {
    pub(crate) id: MapId,
    pub(crate) addr: VirtAddr,
    /// private handle, independent of the descriptor `mmap` was called with
    pub(crate) file: FileRef,
    pub(crate) page_count: usize,
}

impl MmapEntry {
    pub fn id(&self) -> MapId {
        self.id
    }

    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

#[derive(Default)]
pub(crate) struct MmapTable {
    next_id: i32,
    entries: Vec<MmapEntry>,
}

impl MmapTable {
    pub(crate) fn push(&mut self, addr: VirtAddr, file: FileRef, page_count: usize) -> MapId {
        let id = MapId(self.next_id);
        self.next_id += 1;
        self.entries.push(MmapEntry {
            id,
            addr,
            file,
            page_count,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: MapId) -> Option<MmapEntry> {
        let index = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(index))
    }

    pub(crate) fn ids(&self) -> Vec<MapId> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

/// Virtual memory state of one process.
pub struct AddressSpace {
    id: AddressSpaceId,
    pagedir: Arc<dyn PageDirectoryModule>,
    pages: SupplementalPageTable,
    pub(crate) mmaps: Mutex<MmapTable>,
    exit_status: Mutex<Option<i32>>,
}

impl AddressSpace {
    pub(crate) fn new(id: AddressSpaceId, pagedir: Arc<dyn PageDirectoryModule>) -> Self {
        Self {
            id,
            pagedir,
            pages: SupplementalPageTable::new(),
            mmaps: Mutex::new(MmapTable::default()),
            exit_status: Mutex::new(None),
        }
    }

    pub fn id(&self) -> AddressSpaceId {
        self.id
    }

    /// The hardware page table of this address space
    pub fn page_directory(&self) -> &dyn PageDirectoryModule {
        self.pagedir.as_ref()
    }

    pub fn pages(&self) -> &SupplementalPageTable {
        &self.pages
    }

    pub fn mmap_count(&self) -> usize {
        lock(&self.mmaps).entries.len()
    }

    /// `(base address, page count)` of mapping `id`
    pub fn mapping(&self, id: MapId) -> Option<(VirtAddr, usize)> {
        lock(&self.mmaps)
            .entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| (e.addr, e.page_count))
    }

    /// Records that the owning process has to exit with `status`.
    ///
    /// Only the first status is kept.
    pub fn terminate(&self, status: i32) {
        let mut exit_status = lock(&self.exit_status);
        if exit_status.is_none() {
            info!("{}: terminated with exit status {}", self.id, status);
            *exit_status = Some(status);
        }
    }

    pub fn exit_status(&self) -> Option<i32> {
        *lock(&self.exit_status)
    }

    pub fn is_terminated(&self) -> bool {
        self.exit_status().is_some()
    }
}
