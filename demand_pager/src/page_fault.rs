use std::sync::Arc;

use log::{debug, error, trace};

use crate::{
    address::{FrameId, VirtAddr, PAGE_SIZE, PHYS_BASE},
    address_space::AddressSpace,
    error::{VmError, VmResult},
    modules::{block_device::BlockDeviceModule, file_store::FileRef},
    sup_page_table::{FileBacking, PageInner, PageOrigin, SupPageEntry},
    util::div_ceil,
    vm_manager::{is_stack_access, Counters, VmManager},
};

impl<D: BlockDeviceModule> VmManager<D> {
    /// Page fault entry point.
    ///
    /// Returns `true` if the faulting access can be retried. Otherwise `space`
    /// has been marked as terminated with [`VmError::EXIT_CODE`].
    pub fn page_fault(&self, space: &AddressSpace, fault_addr: VirtAddr, esp: VirtAddr) -> bool {
        match self.resolve_fault(space, fault_addr, esp) {
            Ok(()) => true,
            Err(e) => {
                error!("{}: unresolvable fault at {}: {}", space.id(), fault_addr, e);
                space.terminate(VmError::EXIT_CODE);
                false
            }
        }
    }

    /// Makes the page containing `fault_addr` resident in `space`.
    ///
    /// `esp` is the user stack pointer at the time of the fault, it decides
    /// whether an access to an unknown page grows the stack.
    pub fn resolve_fault(
        &self,
        space: &AddressSpace,
        fault_addr: VirtAddr,
        esp: VirtAddr,
    ) -> VmResult<()> {
        Counters::bump(&self.counters.faults);

        if !fault_addr.is_legal_user() {
            return Err(VmError::BadAddress(fault_addr));
        }

        match space.pages().find(fault_addr) {
            Some(entry) => self.load_page(space, &entry),
            None if is_stack_access(fault_addr, esp, self.stack_slack()) => {
                self.grow_stack(space, fault_addr)
            }
            None => Err(VmError::InvalidStackAccess {
                addr: fault_addr,
                esp,
            }),
        }
    }

    /// Adds a zeroed, writable page at `addr` to `space` and makes it resident.
    pub fn grow_stack(&self, space: &AddressSpace, addr: VirtAddr) -> VmResult<()> {
        if !addr.is_legal_user() {
            return Err(VmError::BadAddress(addr));
        }

        let entry = Arc::new(SupPageEntry::new(
            addr,
            PageOrigin::Anonymous,
            true,
            self.tick(),
        ));
        let mut page = entry.lock();

        // the entry is locked before it becomes visible, nobody else can load it
        match space.pages().insert(entry.clone()) {
            Ok(()) => {}
            Err(VmError::AlreadyExists(_)) => {
                // another thread grew the stack onto this page first
                drop(page);
                return match space.pages().find(addr) {
                    Some(existing) => self.load_page(space, &existing),
                    None => Err(VmError::BadAddress(addr)),
                };
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.make_resident(space, &entry, &mut page) {
            space.pages().remove_and_release(&entry, &mut page, &self.swap);
            return Err(e);
        }

        Counters::bump(&self.counters.stack_growths);
        debug!("{}: stack grown to {}", space.id(), entry.addr());
        Ok(())
    }

    /// Registers a demand paged executable segment.
    ///
    /// The `read_len` bytes at `offset` of `file` are mapped starting at
    /// `vaddr`, followed by `zero_len` zero bytes. Nothing is read yet, every
    /// page is loaded on its first fault. On error no page of the segment is
    /// left behind.
    #[allow(clippy::too_many_arguments)]
    pub fn register_demand_segment(
        &self,
        space: &AddressSpace,
        file: &FileRef,
        offset: u64,
        vaddr: VirtAddr,
        read_len: usize,
        zero_len: usize,
        writable: bool,
    ) -> VmResult<()> {
        self.register_file_pages(space, file, offset, vaddr, read_len, zero_len, writable, false)?;
        Ok(())
    }

    /// Creates one supplemental entry per page of a file backed region.
    /// Returns the amount of pages.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn register_file_pages(
        &self,
        space: &AddressSpace,
        file: &FileRef,
        offset: u64,
        vaddr: VirtAddr,
        read_len: usize,
        zero_len: usize,
        writable: bool,
        mmap: bool,
    ) -> VmResult<usize> {
        let total = read_len
            .checked_add(zero_len)
            .ok_or(VmError::UnalignedSegment(vaddr))?;
        if !vaddr.is_page_aligned() || total % PAGE_SIZE != 0 {
            return Err(VmError::UnalignedSegment(vaddr));
        }

        let page_count = total / PAGE_SIZE;
        match vaddr.checked_add_pages(page_count) {
            Some(end) if vaddr.is_legal_user() && end.as_usize() <= PHYS_BASE => {}
            _ => return Err(VmError::BadAddress(vaddr)),
        }

        let mut inserted: Vec<Arc<SupPageEntry>> = Vec::with_capacity(page_count);
        let mut remaining = read_len;
        let mut file_offset = offset;

        for i in 0..page_count {
            let page_read = remaining.min(PAGE_SIZE);
            let backing = FileBacking {
                file: file.clone(),
                offset: file_offset,
                read_len: page_read,
                zero_len: PAGE_SIZE - page_read,
            };
            let origin = if mmap {
                PageOrigin::Mmap(backing)
            } else {
                PageOrigin::File(backing)
            };

            let upage = VirtAddr::new(vaddr.as_usize() + i * PAGE_SIZE);
            let entry = Arc::new(SupPageEntry::new(upage, origin, writable, self.tick()));
            if let Err(e) = space.pages().insert(entry.clone()) {
                self.discard_pages(space, &inserted);
                return Err(e);
            }
            inserted.push(entry);

            remaining -= page_read;
            file_offset += page_read as u64;
        }

        trace!(
            "{}: registered {} file pages at {} ({} bytes from offset {})",
            space.id(),
            page_count,
            vaddr,
            read_len,
            offset
        );
        Ok(page_count)
    }

    /// Drops freshly registered pages again.
    ///
    /// The pages were visible to other threads in the meantime, so any of
    /// them may have been faulted in already.
    pub(crate) fn discard_pages(&self, space: &AddressSpace, entries: &[Arc<SupPageEntry>]) {
        for entry in entries {
            let mut page = entry.lock();
            if !page.removed {
                self.drop_page(space, entry, &mut page);
            }
        }
    }

    fn load_page(&self, space: &AddressSpace, entry: &SupPageEntry) -> VmResult<()> {
        let mut page = entry.lock();
        if page.removed {
            // unmapped while we were waiting for the lock
            return Err(VmError::BadAddress(entry.addr()));
        }
        if page.is_resident() {
            // somebody else resolved the same fault
            return Ok(());
        }

        let from_swap = page.swap_slot.is_some();
        match self.make_resident(space, entry, &mut page) {
            Ok(()) => Ok(()),
            Err(e) => {
                if from_swap && page.swap_slot.is_none() {
                    // the contents only existed in the slot that was just freed
                    space.pages().remove_and_release(entry, &mut page, &self.swap);
                }
                Err(e)
            }
        }
    }

    /// Fills a fresh frame with the contents of `page` and installs it.
    ///
    /// On error the frame is given back, `page` stays non-resident.
    fn make_resident(
        &self,
        space: &AddressSpace,
        entry: &SupPageEntry,
        page: &mut PageInner,
    ) -> VmResult<()> {
        let addr = entry.addr();
        let frame = self.acquire_frame(space.id(), addr)?.frame;

        if let Err(e) = self.fill_frame(frame, page) {
            self.release_frame(frame);
            return Err(e);
        }

        if !space.page_directory().install(addr, frame, page.writable) {
            self.release_frame(frame);
            return Err(VmError::InstallFailed(addr));
        }

        page.frame = Some(frame);
        page.last_access = self.tick();
        trace!("{}: {} resident in {:?}", space.id(), addr, frame);
        Ok(())
    }

    fn fill_frame(&self, frame: FrameId, page: &mut PageInner) -> VmResult<()> {
        if let Some(slot) = page.swap_slot {
            let mut data = self.memory.frame(frame);
            self.swap.read_page(slot, &mut data)?;
            page.swap_slot = None;
            Counters::bump(&self.counters.swap_ins);
            return Ok(());
        }

        match &page.origin {
            PageOrigin::Anonymous => self.memory.frame(frame).fill(0),
            PageOrigin::File(backing) | PageOrigin::Mmap(backing) => {
                let _filesys = self.filesys.acquire();
                let mut data = self.memory.frame(frame);

                let done = backing
                    .file
                    .read_at(&mut data[..backing.read_len], backing.offset)?;
                if done != backing.read_len {
                    return Err(VmError::ShortRead {
                        offset: backing.offset,
                        done,
                        expected: backing.read_len,
                    });
                }
                data[backing.read_len..].fill(0);
                Counters::bump(&self.counters.file_loads);
            }
        }
        Ok(())
    }
}

/// Amount of pages needed to map `len` bytes
#[inline]
pub(crate) fn pages_for(len: usize) -> usize {
    div_ceil(len, PAGE_SIZE)
}
