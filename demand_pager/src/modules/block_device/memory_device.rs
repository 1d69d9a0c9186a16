/*
 *  Copyright (C) 2025  Markus Elias Gerber
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  You should have received a copy of the GNU General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::io;

use super::BlockDeviceModule;
use crate::address::SECTOR_SIZE;

/// Swap device that lives in RAM. Mostly useful for tests.
pub struct MemoryBlockDeviceModule {
    data: Vec<u8>,
}

impl MemoryBlockDeviceModule {
    pub fn new(sector_count: usize) -> Self {
        Self {
            data: vec![0; sector_count * SECTOR_SIZE],
        }
    }

    fn range(&self, sector: usize, len: usize) -> io::Result<core::ops::Range<usize>> {
        debug_assert_eq!(len, SECTOR_SIZE);
        let start = sector * SECTOR_SIZE;
        if start + len > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sector {} out of range {}", sector, self.sector_count()),
            ));
        }
        Ok(start..start + len)
    }
}

impl BlockDeviceModule for MemoryBlockDeviceModule {
    fn read_sector(&mut self, sector: usize, dest: &mut [u8]) -> io::Result<()> {
        let range = self.range(sector, dest.len())?;
        dest.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_sector(&mut self, sector: usize, src: &[u8]) -> io::Result<()> {
        let range = self.range(sector, src.len())?;
        self.data[range].copy_from_slice(src);
        Ok(())
    }

    fn sector_count(&self) -> usize {
        self.data.len() / SECTOR_SIZE
    }
}
