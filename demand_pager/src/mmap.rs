use log::{error, info, warn};

use crate::{
    address::{VirtAddr, PAGE_SIZE, PHYS_BASE},
    address_space::{AddressSpace, MapId, MmapEntry},
    error::{VmError, VmResult},
    modules::{block_device::BlockDeviceModule, file_store::FileRef},
    page_fault::pages_for,
    sup_page_table::{PageInner, PageOrigin, SupPageEntry},
    util::lock,
    vm_manager::{Counters, VmManager},
};

/// Descriptors of the console, they can never be mapped
pub const STDIN_FILENO: i32 = 0;
pub const STDOUT_FILENO: i32 = 1;

impl<D: BlockDeviceModule> VmManager<D> {
    /// Maps the whole of `file`, opened as descriptor `fd`, at `addr`.
    ///
    /// The mapping uses its own handle of the file, so closing `fd` does not
    /// affect it. Pages are loaded on first access and written back to the
    /// file when they are dirty on eviction or unmap.
    pub fn mmap(&self, space: &AddressSpace, fd: i32, file: &FileRef, addr: VirtAddr) -> VmResult<MapId> {
        if fd == STDIN_FILENO || fd == STDOUT_FILENO {
            return Err(VmError::InvalidMapping("console descriptor"));
        }
        if addr.is_null() {
            return Err(VmError::InvalidMapping("null address"));
        }
        if !addr.is_page_aligned() {
            return Err(VmError::InvalidMapping("unaligned address"));
        }

        let length = {
            let _filesys = self.filesys.acquire();
            file.length()?
        };
        let length = usize::try_from(length).map_err(|_| VmError::InvalidMapping("file too large"))?;
        if length == 0 {
            return Err(VmError::InvalidMapping("empty file"));
        }

        let page_count = pages_for(length);
        match addr.checked_add_pages(page_count) {
            Some(end) if addr.is_legal_user() && end.as_usize() <= PHYS_BASE => {}
            _ => return Err(VmError::InvalidMapping("outside of user space")),
        }
        self.check_unmapped(space, addr, page_count)?;

        let private = {
            let _filesys = self.filesys.acquire();
            file.reopen()?
        };

        let zero_len = page_count * PAGE_SIZE - length;
        if let Err(e) = self.register_file_pages(space, &private, 0, addr, length, zero_len, true, true) {
            let _filesys = self.filesys.acquire();
            private.close();
            return Err(e);
        }

        let id = lock(&space.mmaps).push(addr, private, page_count);
        info!(
            "{}: mapped {} bytes at {} as {:?}",
            space.id(),
            length,
            addr,
            id
        );
        Ok(id)
    }

    /// Every page of the range must be free in both the supplemental and the hardware table
    fn check_unmapped(&self, space: &AddressSpace, addr: VirtAddr, page_count: usize) -> VmResult<()> {
        for i in 0..page_count {
            let page = VirtAddr::new(addr.as_usize() + i * PAGE_SIZE);
            if space.pages().find(page).is_some() || space.page_directory().lookup(page).is_some() {
                return Err(VmError::InvalidMapping("overlaps an existing mapping"));
            }
        }
        Ok(())
    }

    /// Removes mapping `id`, writing dirty pages back to the file.
    ///
    /// Returns `false` if `space` has no such mapping. May be called with the
    /// filesystem lock held by the caller.
    pub fn munmap(&self, space: &AddressSpace, id: MapId) -> bool {
        let Some(mapping) = lock(&space.mmaps).remove(id) else {
            warn!("{}: munmap of unknown {:?}", space.id(), id);
            return false;
        };

        self.unmap_pages(space, &mapping);

        {
            let _filesys = self.filesys.acquire();
            mapping.file.close();
        }

        info!("{}: unmapped {:?} at {}", space.id(), id, mapping.addr);
        true
    }

    fn unmap_pages(&self, space: &AddressSpace, mapping: &MmapEntry) {
        for i in 0..mapping.page_count {
            let addr = VirtAddr::new(mapping.addr.as_usize() + i * PAGE_SIZE);
            let Some(entry) = space.pages().find(addr) else {
                continue;
            };
            let mut page = entry.lock();
            if page.removed {
                continue;
            }
            self.drop_page(space, &entry, &mut page);
        }
    }

    /// Unmaps and forgets one page, writing it back first if it is a dirty mapped page.
    ///
    /// A failed write-back is logged and the page is dropped anyway.
    pub(crate) fn drop_page(&self, space: &AddressSpace, entry: &SupPageEntry, page: &mut PageInner) {
        let addr = entry.addr();

        if let Some(frame) = page.frame.take() {
            let pagedir = space.page_directory();

            if let PageOrigin::Mmap(backing) = &page.origin {
                if pagedir.is_dirty(addr) {
                    match self.write_back(backing, frame) {
                        Ok(()) => Counters::bump(&self.counters.write_backs),
                        Err(e) => error!("{}: write-back of {} failed: {}", space.id(), addr, e),
                    }
                }
            }

            pagedir.clear_mapping(addr);
            self.release_frame(frame);
        }

        space.pages().remove_and_release(entry, page, &self.swap);
    }
}
