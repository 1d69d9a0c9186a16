mod file_device;
mod memory_device;

use std::io;

use crate::address::SECTOR_SIZE;

pub use file_device::FileBlockDeviceModule;
pub use memory_device::MemoryBlockDeviceModule;

/// A block device made of fixed-size sectors, used as swap medium.
pub trait BlockDeviceModule: Send {
    /// Reads sector `sector` into `dest` which is exactly [`SECTOR_SIZE`] bytes big.
    ///
    /// If this call fails, it could be that already some data was written to `dest`.
    fn read_sector(&mut self, sector: usize, dest: &mut [u8]) -> io::Result<()>;

    /// Writes `src` ([`SECTOR_SIZE`] bytes) to sector `sector`
    fn write_sector(&mut self, sector: usize, src: &[u8]) -> io::Result<()>;

    /// Returns the amount of sectors of this device
    ///
    /// **It is illegal to read/write sectors at or above this number!**
    fn sector_count(&self) -> usize;

    /// Reads `dest.len() / SECTOR_SIZE` consecutive sectors starting at `first`
    fn read_sectors(&mut self, first: usize, dest: &mut [u8]) -> io::Result<()> {
        debug_assert_eq!(dest.len() % SECTOR_SIZE, 0);
        for (i, chunk) in dest.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            self.read_sector(first + i, chunk)?;
        }
        Ok(())
    }

    /// Writes `src` to `src.len() / SECTOR_SIZE` consecutive sectors starting at `first`
    fn write_sectors(&mut self, first: usize, src: &[u8]) -> io::Result<()> {
        debug_assert_eq!(src.len() % SECTOR_SIZE, 0);
        for (i, chunk) in src.chunks_exact(SECTOR_SIZE).enumerate() {
            self.write_sector(first + i, chunk)?;
        }
        Ok(())
    }
}
