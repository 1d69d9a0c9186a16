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
    fs::File,
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use super::{closed_error, BackingFile, FileRef};
use crate::util::lock;

/// File of the host file system
pub struct HostFile {
    /// kept so the file can be reopened independently
    path: PathBuf,

    /// `None` once closed
    file: Mutex<Option<File>>,
}

impl HostFile {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Arc<Self>> {
        let file = File::options().read(true).write(true).open(path.as_ref())?;

        Ok(Arc::new(Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(Some(file)),
        }))
    }
}

impl BackingFile for HostFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let mut guard = lock(&self.file);
        let file = guard.as_mut().ok_or_else(closed_error)?;

        file.seek(SeekFrom::Start(offset))?;
        let mut done = 0;
        while done < buf.len() {
            match file.read(&mut buf[done..])? {
                0 => break,
                n => done += n,
            }
        }
        Ok(done)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let mut guard = lock(&self.file);
        let file = guard.as_mut().ok_or_else(closed_error)?;

        // same semantics as the kernel file store: no growth through writes
        let len = file.metadata()?.len();
        if offset >= len {
            return Ok(0);
        }
        let writable = ((len - offset) as usize).min(buf.len());

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&buf[..writable])?;
        Ok(writable)
    }

    fn length(&self) -> io::Result<u64> {
        let guard = lock(&self.file);
        let file = guard.as_ref().ok_or_else(closed_error)?;
        Ok(file.metadata()?.len())
    }

    fn reopen(&self) -> io::Result<FileRef> {
        if lock(&self.file).is_none() {
            return Err(closed_error());
        }
        let reopened: FileRef = HostFile::open(&self.path)?;
        Ok(reopened)
    }

    fn close(&self) {
        lock(&self.file).take();
    }
}
