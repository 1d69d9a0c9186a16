mod host_file;
mod memory_file;

use std::{io, sync::Arc};

pub use host_file::HostFile;
pub use memory_file::MemoryFile;

/// Shared handle to an open file of the file store
pub type FileRef = Arc<dyn BackingFile>;

/// An already opened file of the file store.
///
/// Path lookup and directories are handled elsewhere; the pager only reads,
/// writes and reopens handles it was given. Callers hold the
/// [`crate::FilesysLock`] around every call.
pub trait BackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    /// Returns the amount of bytes read, which is smaller at the end of the file.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    /// Writes up to `buf.len()` bytes starting at `offset`.
    /// Returns the amount of bytes written, which is smaller at the end of the file
    /// or if writes to the file are denied.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;

    /// Current length of the file in bytes
    fn length(&self) -> io::Result<u64>;

    /// Opens a new, independent handle to the same file
    fn reopen(&self) -> io::Result<FileRef>;

    /// Closes this handle. Other handles of the same file stay usable.
    fn close(&self);
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "file handle is closed")
}
