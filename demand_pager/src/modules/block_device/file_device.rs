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

use std::{
    fs::{remove_file, File},
    io::{self, Read, Seek, SeekFrom, Write},
    mem::ManuallyDrop,
    path::Path,
};

use super::BlockDeviceModule;
use crate::address::SECTOR_SIZE;

/// Swap device backed by a regular host file.
pub struct FileBlockDeviceModule {
    /// underlying file which holds all sectors
    file: ManuallyDrop<File>,

    /// path of file, save for deleting file later
    file_path: String,

    /// cached sector count, so no `metadata` call necessary
    sector_count: usize,
}

impl FileBlockDeviceModule {
    /// Creates a new device with `sector_count` zeroed sectors.
    ///
    /// The file is truncated on creation and removed once the device is dropped.
    pub fn new(filepath: String, sector_count: usize) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .truncate(true)
            .create(true)
            .open(filepath.clone())?;

        file.set_len((sector_count * SECTOR_SIZE) as u64)?;

        Ok(Self {
            file: ManuallyDrop::new(file),
            file_path: filepath,
            sector_count,
        })
    }

    fn seek_sector(&mut self, sector: usize, len: usize) -> io::Result<()> {
        debug_assert_eq!(len, SECTOR_SIZE);
        if sector >= self.sector_count {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("sector {} out of range {}", sector, self.sector_count),
            ));
        }

        self.file
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        Ok(())
    }
}

impl BlockDeviceModule for FileBlockDeviceModule {
    fn read_sector(&mut self, sector: usize, dest: &mut [u8]) -> io::Result<()> {
        self.seek_sector(sector, dest.len())?;
        self.file.read_exact(dest)
    }

    fn write_sector(&mut self, sector: usize, src: &[u8]) -> io::Result<()> {
        self.seek_sector(sector, src.len())?;
        self.file.write_all(src)
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }
}

impl Drop for FileBlockDeviceModule {
    fn drop(&mut self) {
        // drop and close file before removing
        // note that after this call, file should never be accessed again...
        unsafe {
            ManuallyDrop::drop(&mut self.file);
        }

        if Path::new(self.file_path.as_str()).exists() {
            let _ = remove_file(self.file_path.as_str());
        }
    }
}
