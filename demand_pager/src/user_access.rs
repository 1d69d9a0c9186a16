use crate::{
    address::{VirtAddr, PAGE_SIZE},
    address_space::AddressSpace,
    error::{VmError, VmResult},
    modules::block_device::BlockDeviceModule,
    vm_manager::VmManager,
};

impl<D: BlockDeviceModule> VmManager<D> {
    /// Copies `buf.len()` bytes of user memory at `addr` into `buf`.
    ///
    /// Non-resident pages are faulted in like a user access would, `esp` is the
    /// user stack pointer used for the stack growth check.
    pub fn read_user(&self, space: &AddressSpace, addr: VirtAddr, buf: &mut [u8], esp: VirtAddr) -> VmResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cur = checked_offset(addr, done)?;
            let offset = cur.page_offset();
            let n = (PAGE_SIZE - offset).min(buf.len() - done);

            self.with_resident_page(space, cur, esp, false, &mut |page: &mut [u8]| {
                buf[done..done + n].copy_from_slice(&page[offset..offset + n]);
            })?;
            done += n;
        }
        Ok(())
    }

    /// Copies `data` into user memory at `addr`, marking the touched pages dirty.
    ///
    /// Fails with [`VmError::ReadOnly`] on the first read-only page.
    pub fn write_user(&self, space: &AddressSpace, addr: VirtAddr, data: &[u8], esp: VirtAddr) -> VmResult<()> {
        let mut done = 0;
        while done < data.len() {
            let cur = checked_offset(addr, done)?;
            let offset = cur.page_offset();
            let n = (PAGE_SIZE - offset).min(data.len() - done);

            self.with_resident_page(space, cur, esp, true, &mut |page: &mut [u8]| {
                page[offset..offset + n].copy_from_slice(&data[done..done + n]);
            })?;
            done += n;
        }
        Ok(())
    }

    /// Runs `f` on the frame holding the page of `addr` while the page can not be evicted
    fn with_resident_page(
        &self,
        space: &AddressSpace,
        addr: VirtAddr,
        esp: VirtAddr,
        write: bool,
        f: &mut dyn FnMut(&mut [u8]),
    ) -> VmResult<()> {
        if !addr.is_legal_user() {
            return Err(VmError::BadAddress(addr));
        }
        let page_addr = addr.page_round_down();

        loop {
            if let Some(entry) = space.pages().find(addr) {
                let page = entry.lock();
                if !page.removed {
                    if let Some(frame) = page.frame {
                        if write && !page.writable {
                            return Err(VmError::ReadOnly(page_addr));
                        }

                        let mut data = self.memory.frame(frame);
                        f(&mut data[..]);
                        if write {
                            space.page_directory().set_dirty(page_addr, true);
                        }
                        return Ok(());
                    }
                }
            }

            // not resident, fault it in and look again
            self.resolve_fault(space, addr, esp)?;
        }
    }
}

fn checked_offset(addr: VirtAddr, offset: usize) -> VmResult<VirtAddr> {
    addr.as_usize()
        .checked_add(offset)
        .map(VirtAddr::new)
        .ok_or(VmError::BadAddress(addr))
}
