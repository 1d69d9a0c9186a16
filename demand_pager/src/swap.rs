use std::sync::Mutex;

use log::{error, trace};

use crate::{
    address::{PAGE_SIZE, SECTORS_PER_PAGE},
    error::{VmError, VmResult},
    modules::block_device::BlockDeviceModule,
    util::{bit_array::BitArray, lock},
};

/// A page-sized group of consecutive sectors on the swap device
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// Index of the first sector of this slot
    pub fn first_sector(self) -> usize {
        self.0
    }
}

/// Swap space: a block device plus a bitmap of used sectors.
///
/// Sectors are always allocated and released in groups of [`SECTORS_PER_PAGE`],
/// starting at a multiple of it, so a group is either completely free or
/// completely in use.
pub struct SwapStore<D: BlockDeviceModule> {
    device: Mutex<D>,

    /// one bit per sector, set if in use
    used: Mutex<BitArray>,
}

impl<D: BlockDeviceModule> SwapStore<D> {
    pub fn new(device: D) -> Self {
        let sectors = device.sector_count();
        if sectors % SECTORS_PER_PAGE != 0 {
            log::warn!(
                "Swap device has {} sectors, the last {} can not be used",
                sectors,
                sectors % SECTORS_PER_PAGE
            );
        }

        Self {
            device: Mutex::new(device),
            used: Mutex::new(BitArray::new(sectors)),
        }
    }

    /// Amount of pages the device can hold
    pub fn slot_count(&self) -> usize {
        lock(&self.used).len() / SECTORS_PER_PAGE
    }

    pub fn free_slot_count(&self) -> usize {
        let used = lock(&self.used);
        (0..used.len() / SECTORS_PER_PAGE)
            .filter(|slot| used.count_range(slot * SECTORS_PER_PAGE, SECTORS_PER_PAGE) == 0)
            .count()
    }

    pub fn is_allocated(&self, slot: SwapSlot) -> bool {
        let used = lock(&self.used);
        let cnt = used.count_range(slot.0, SECTORS_PER_PAGE);
        debug_assert!(
            cnt == 0 || cnt == SECTORS_PER_PAGE,
            "partially allocated swap slot {:?}",
            slot
        );
        cnt == SECTORS_PER_PAGE
    }

    /// Reserves a free slot.
    ///
    /// Fails with [`VmError::SwapExhausted`] if every slot is in use, which is
    /// fatal for the process that needs the slot.
    pub fn allocate_slot(&self) -> VmResult<SwapSlot> {
        match lock(&self.used).scan_group_and_set(SECTORS_PER_PAGE) {
            Some(sector) => {
                trace!("Allocated swap slot at sector {}", sector);
                Ok(SwapSlot(sector))
            }
            None => {
                error!("Swap device exhausted");
                Err(VmError::SwapExhausted)
            }
        }
    }

    /// Frees `slot`. Releasing a free slot is a no-op.
    pub fn release_slot(&self, slot: SwapSlot) {
        trace!("Released swap slot at sector {}", slot.0);
        lock(&self.used).set_range(false, slot.0, SECTORS_PER_PAGE);
    }

    /// Allocates a slot and writes the page `src` to it
    pub fn write_page(&self, src: &[u8]) -> VmResult<SwapSlot> {
        let slot = self.allocate_slot()?;
        if let Err(e) = self.write_page_to(slot, src) {
            self.release_slot(slot);
            return Err(e);
        }
        Ok(slot)
    }

    /// Writes the page `src` to the already allocated `slot`
    pub(crate) fn write_page_to(&self, slot: SwapSlot, src: &[u8]) -> VmResult<()> {
        debug_assert_eq!(src.len(), PAGE_SIZE);
        debug_assert!(self.is_allocated(slot));

        lock(&self.device).write_sectors(slot.0, src)?;
        Ok(())
    }

    /// Reads the page stored in `slot` into `dst` and frees the slot.
    ///
    /// If the read fails the slot stays allocated, its owner releases it on teardown.
    pub fn read_page(&self, slot: SwapSlot, dst: &mut [u8]) -> VmResult<()> {
        debug_assert_eq!(dst.len(), PAGE_SIZE);
        debug_assert!(self.is_allocated(slot));

        lock(&self.device).read_sectors(slot.0, dst)?;
        self.release_slot(slot);
        Ok(())
    }
}
