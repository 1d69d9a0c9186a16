use core::fmt;
use static_assertions::const_assert_eq;

/// Size of a virtual page and of a physical frame in bytes
pub const PAGE_SIZE: usize = 4096;

/// Size of a sector of the swap device in bytes
pub const SECTOR_SIZE: usize = 512;

/// Amount of consecutive sectors that make up one swap slot
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// Lowest user address that may ever be faulted in (start of the code segment)
pub const USER_BASE: usize = 0x0804_8000;

/// First kernel address, everything below belongs to user space
pub const PHYS_BASE: usize = 0xC000_0000;

const_assert_eq!(PAGE_SIZE % SECTOR_SIZE, 0);
const_assert_eq!(USER_BASE % PAGE_SIZE, 0);
const_assert_eq!(PHYS_BASE % PAGE_SIZE, 0);

/// A user virtual address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Start of the page that contains this address
    #[inline]
    pub const fn page_round_down(self) -> Self {
        Self(self.0 & !(PAGE_SIZE - 1))
    }

    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `true` if this address lies in the kernel half of the address space
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= PHYS_BASE
    }

    /// `true` if a user process may legally touch this address at all
    #[inline]
    pub const fn is_legal_user(self) -> bool {
        !self.is_null() && self.0 >= USER_BASE && self.0 < PHYS_BASE
    }

    /// Returns the address `pages` pages above this one, or `None` on overflow
    #[inline]
    pub fn checked_add_pages(self, pages: usize) -> Option<Self> {
        pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| self.0.checked_add(bytes))
            .map(Self)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for VirtAddr {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// Identity of a physical user frame (index into the user pool).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FrameId(pub usize);

/// Identity of an address space (the owning process).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct AddressSpaceId(pub u32);

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as#{}", self.0)
    }
}
