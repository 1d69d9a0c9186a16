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
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use super::{closed_error, BackingFile, FileRef};
use crate::util::lock;

/// Contents of a file, shared by all handles that were reopened from each other
struct Inode {
    data: Mutex<Vec<u8>>,
    deny_write: AtomicBool,
}

/// In-memory file. Files never grow through `write_at`.
pub struct MemoryFile {
    inode: Arc<Inode>,
    closed: AtomicBool,
}

impl MemoryFile {
    pub fn new(contents: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            inode: Arc::new(Inode {
                data: Mutex::new(contents),
                deny_write: AtomicBool::new(false),
            }),
            closed: AtomicBool::new(false),
        })
    }

    /// Copy of the current file contents
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.inode.data).clone()
    }

    /// Denies (or allows again) writes to the file, e.g. while it is executed
    pub fn deny_write(&self, deny: bool) {
        self.inode.deny_write.store(deny, Ordering::SeqCst);
    }

    /// Shrinks or grows the file, new bytes are zero
    pub fn set_len(&self, len: usize) {
        lock(&self.inode.data).resize(len, 0);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> io::Result<()> {
        if self.is_closed() {
            Err(closed_error())
        } else {
            Ok(())
        }
    }
}

impl BackingFile for MemoryFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.check_open()?;
        let data = lock(&self.inode.data);

        let start = (offset as usize).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        self.check_open()?;
        if self.inode.deny_write.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut data = lock(&self.inode.data);

        let start = (offset as usize).min(data.len());
        let len = buf.len().min(data.len() - start);
        data[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn length(&self) -> io::Result<u64> {
        self.check_open()?;
        Ok(lock(&self.inode.data).len() as u64)
    }

    fn reopen(&self) -> io::Result<FileRef> {
        self.check_open()?;
        Ok(Arc::new(MemoryFile {
            inode: self.inode.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
