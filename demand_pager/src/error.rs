use std::io;

use thiserror::Error;

use crate::address::VirtAddr;

/// Errors surfaced by the virtual memory manager.
///
/// Every error that reaches a faulting process is terminal for it: the
/// system-call layer turns it into an exit with [`VmError::EXIT_CODE`].
#[derive(Debug, Error)]
pub enum VmError {
    /// Null, kernel or below-code-segment address.
    #[error("illegal user address {0}")]
    BadAddress(VirtAddr),

    /// Access below the stack pointer that is too far away to be stack growth.
    #[error("access at {addr} is too far below stack pointer {esp}")]
    InvalidStackAccess { addr: VirtAddr, esp: VirtAddr },

    /// Write to a page that is mapped read-only.
    #[error("write to read-only page {0}")]
    ReadOnly(VirtAddr),

    /// Every sector group of the swap device is in use.
    #[error("swap device exhausted")]
    SwapExhausted,

    /// No free frame and no frame that could be evicted.
    #[error("out of physical frames")]
    OutOfFrames,

    /// Backing file returned fewer bytes than recorded for the page.
    #[error("short read at offset {offset}: {done} of {expected} bytes")]
    ShortRead {
        offset: u64,
        done: usize,
        expected: usize,
    },

    /// Backing file accepted fewer bytes than the page write-back needed.
    #[error("short write at offset {offset}: {done} of {expected} bytes")]
    ShortWrite {
        offset: u64,
        done: usize,
        expected: usize,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A supplemental entry for this page exists already.
    #[error("page {0} already has a supplemental entry")]
    AlreadyExists(VirtAddr),

    /// The page directory refused to map the page.
    #[error("page directory refused mapping at {0}")]
    InstallFailed(VirtAddr),

    /// A demand segment that does not start on a page boundary or does not cover whole pages.
    #[error("segment at {0} is not page aligned")]
    UnalignedSegment(VirtAddr),

    /// `mmap` request rejected.
    #[error("invalid mapping: {0}")]
    InvalidMapping(&'static str),

    /// Invalid configuration passed to [`crate::VmManager::new`].
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl VmError {
    /// Exit status of a process that is killed because of a VM error
    pub const EXIT_CODE: i32 = -1;
}

pub type VmResult<T> = Result<T, VmError>;
