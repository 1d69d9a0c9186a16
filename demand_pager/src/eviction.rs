use std::sync::Arc;

use log::{debug, error, trace};

use crate::{
    address::FrameId,
    address_space::AddressSpace,
    error::{VmError, VmResult},
    frame_table::FrameTableEntry,
    modules::block_device::BlockDeviceModule,
    sup_page_table::{FileBacking, PageOrigin, SupPageEntry},
    swap::SwapSlot,
    vm_manager::{Counters, VmManager},
};

/// Ordering of eviction candidates, smallest is evicted first:
/// least recently used, then writable pages, then user pages.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
struct VictimKey {
    last_access: u64,
    read_only: bool,
    kernel: bool,
}

struct Candidate {
    key: VictimKey,
    frame: FrameId,
    space: Arc<AddressSpace>,
    entry: Arc<SupPageEntry>,
}

enum Persist {
    WriteBack(FileBacking),
    Swap(SwapSlot),
}

impl<D: BlockDeviceModule> VmManager<D> {
    /// Frees a frame by moving its page out of memory.
    ///
    /// Pages whose entry lock is held by somebody else are skipped, so this
    /// never waits for another resolver. Returns `None` if every candidate was
    /// skipped. The returned entry is no longer in the frame table; its frame
    /// stays allocated for the caller.
    pub(crate) fn evict_frame(&self) -> VmResult<Option<FrameTableEntry>> {
        let mut table = self.frames.lock();

        let mut candidates = Vec::with_capacity(table.len());
        for fte in table.iter() {
            let Some(space) = self.address_space(fte.owner) else {
                continue;
            };
            let Some(entry) = space.pages().find(fte.page) else {
                continue;
            };
            let key = match entry.try_lock() {
                Some(page) if page.frame == Some(fte.frame) => VictimKey {
                    last_access: page.last_access,
                    read_only: !page.writable,
                    kernel: fte.page.is_kernel(),
                },
                _ => continue,
            };
            candidates.push(Candidate {
                key,
                frame: fte.frame,
                space,
                entry,
            });
        }
        candidates.sort_by_key(|c| c.key);

        for cand in &candidates {
            let Some(mut page) = cand.entry.try_lock() else {
                continue;
            };
            if page.removed || page.frame != Some(cand.frame) {
                continue;
            }
            let Some(index) = table.iter().position(|e| e.frame == cand.frame) else {
                continue;
            };

            let addr = cand.entry.addr();
            let pagedir = cand.space.page_directory();
            let dirty = pagedir.is_dirty(addr);

            let persist = match page.origin() {
                PageOrigin::Mmap(backing) if dirty => Persist::WriteBack(backing.clone()),
                _ => Persist::Swap(self.swap.allocate_slot()?),
            };

            pagedir.clear_mapping(addr);
            let victim = table.remove(index);
            page.frame = None;
            drop(table);

            // the frame table is free again, a write-back may wait for the filesystem lock
            match self.persist_frame(&persist, cand.frame) {
                Ok(()) => {
                    match persist {
                        Persist::Swap(slot) => {
                            page.swap_slot = Some(slot);
                            Counters::bump(&self.counters.swap_outs);
                        }
                        Persist::WriteBack(_) => Counters::bump(&self.counters.write_backs),
                    }
                    Counters::bump(&self.counters.evictions);
                    debug!(
                        "Evicted {}:{} from {:?} (last access {})",
                        victim.owner, addr, victim.frame, cand.key.last_access
                    );
                    return Ok(Some(victim));
                }
                Err(e) => {
                    error!("Eviction of {}:{} failed: {}", victim.owner, addr, e);

                    if let Persist::Swap(slot) = persist {
                        self.swap.release_slot(slot);
                    }
                    self.frames.lock().push(victim);
                    page.frame = Some(cand.frame);
                    if pagedir.install(addr, cand.frame, page.writable) {
                        pagedir.set_dirty(addr, dirty);
                    } else {
                        error!("Could not restore mapping of {}:{}", victim.owner, addr);
                    }
                    return Err(e);
                }
            }
        }

        trace!(
            "No victim among {} frames ({} candidates)",
            table.len(),
            candidates.len()
        );
        Ok(None)
    }

    fn persist_frame(&self, persist: &Persist, frame: FrameId) -> VmResult<()> {
        match persist {
            Persist::Swap(slot) => {
                let data = self.memory.frame(frame);
                self.swap.write_page_to(*slot, &data)
            }
            Persist::WriteBack(backing) => self.write_back(backing, frame),
        }
    }

    /// Writes the file part of the page in `frame` back to its file
    pub(crate) fn write_back(&self, backing: &FileBacking, frame: FrameId) -> VmResult<()> {
        let _filesys = self.filesys.acquire();
        let data = self.memory.frame(frame);

        let done = backing
            .file
            .write_at(&data[..backing.read_len], backing.offset)?;
        if done != backing.read_len {
            return Err(VmError::ShortWrite {
                offset: backing.offset,
                done,
                expected: backing.read_len,
            });
        }
        Ok(())
    }
}
