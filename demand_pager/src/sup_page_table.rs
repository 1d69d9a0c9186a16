use std::{
    collections::{btree_map::Entry, BTreeMap},
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr,
    sync::{Arc, Condvar, Mutex},
};

use log::trace;
use try_lock::{Locked, TryLock};

use crate::{
    address::{FrameId, VirtAddr},
    error::{VmError, VmResult},
    modules::{block_device::BlockDeviceModule, file_store::FileRef},
    swap::{SwapSlot, SwapStore},
    util::lock,
};

/// Where the contents of a file-backed page come from
#[derive(Clone)]
pub struct FileBacking {
    pub file: FileRef,
    pub offset: u64,
    /// bytes that are read from `file`
    pub read_len: usize,
    /// bytes after `read_len` that are zeroed
    pub zero_len: usize,
}

impl fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBacking")
            .field("offset", &self.offset)
            .field("read_len", &self.read_len)
            .field("zero_len", &self.zero_len)
            .finish()
    }
}

/// How a page was created
#[derive(Clone, Debug)]
pub enum PageOrigin {
    /// stack page, zero filled on first touch
    Anonymous,
    /// demand paged executable segment
    File(FileBacking),
    /// page of a memory mapped file, written back to the file
    Mmap(FileBacking),
}

/// Where the current contents of a page can be found if it is not resident
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageState {
    AnonymousZero,
    FileBacked,
    Mmap,
    Swapped,
}

/// Mutable part of a [`SupPageEntry`], only reachable through its lock.
#[derive(Debug)]
pub struct PageInner {
    pub(crate) origin: PageOrigin,
    pub(crate) swap_slot: Option<SwapSlot>,
    /// frame holding this page while it is resident
    pub(crate) frame: Option<FrameId>,
    pub(crate) writable: bool,
    pub(crate) last_access: u64,
    /// set once the entry was removed from its table
    pub(crate) removed: bool,
}

impl PageInner {
    /// Content location. Swap wins over the origin as long as the page lives there.
    pub fn state(&self) -> PageState {
        if self.swap_slot.is_some() {
            return PageState::Swapped;
        }
        match self.origin {
            PageOrigin::Anonymous => PageState::AnonymousZero,
            PageOrigin::File(_) => PageState::FileBacked,
            PageOrigin::Mmap(_) => PageState::Mmap,
        }
    }

    pub fn origin(&self) -> &PageOrigin {
        &self.origin
    }

    pub fn swap_slot(&self) -> Option<SwapSlot> {
        self.swap_slot
    }

    pub fn frame(&self) -> Option<FrameId> {
        self.frame
    }

    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    pub fn is_mmap(&self) -> bool {
        matches!(self.origin, PageOrigin::Mmap(_))
    }
}

/// Supplemental information about one virtual page of an address space.
pub struct SupPageEntry {
    addr: VirtAddr,
    inner: TryLock<PageInner>,

    /// threads blocked in [`SupPageEntry::lock`] sleep here
    waiters: Mutex<()>,
    unlocked: Condvar,
}

impl SupPageEntry {
    pub fn new(addr: VirtAddr, origin: PageOrigin, writable: bool, last_access: u64) -> Self {
        Self {
            addr: addr.page_round_down(),
            inner: TryLock::new(PageInner {
                origin,
                swap_slot: None,
                frame: None,
                writable,
                last_access,
                removed: false,
            }),
            waiters: Mutex::new(()),
            unlocked: Condvar::new(),
        }
    }

    /// Page aligned address of this page
    pub fn addr(&self) -> VirtAddr {
        self.addr
    }

    /// Blocks until the entry lock is acquired.
    ///
    /// The calling thread sleeps while the page is in transition, which can
    /// include a whole swap or file transfer.
    pub fn lock(&self) -> PageGuard<'_> {
        if let Some(guard) = self.try_lock() {
            return guard;
        }

        let mut waiting = lock(&self.waiters);
        loop {
            // checked with `waiters` held, an unlock can not slip in between
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            waiting = self
                .unlocked
                .wait(waiting)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Acquires the entry lock if it is free
    pub fn try_lock(&self) -> Option<PageGuard<'_>> {
        self.inner.try_lock().map(|inner| PageGuard {
            entry: self,
            inner: ManuallyDrop::new(inner),
        })
    }
}

/// Exclusive access to the [`PageInner`] of a [`SupPageEntry`].
///
/// Wakes up threads waiting in [`SupPageEntry::lock`] when dropped.
pub struct PageGuard<'a> {
    entry: &'a SupPageEntry,
    inner: ManuallyDrop<Locked<'a, PageInner>>,
}

impl Deref for PageGuard<'_> {
    type Target = PageInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for PageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: `inner` is never used again after this
        unsafe { ManuallyDrop::drop(&mut self.inner) };

        let _waiting = lock(&self.entry.waiters);
        self.entry.unlocked.notify_all();
    }
}

impl fmt::Debug for SupPageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupPageEntry")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// Supplemental page table of one address space, keyed by page address.
#[derive(Default)]
pub struct SupplementalPageTable {
    entries: Mutex<BTreeMap<VirtAddr, Arc<SupPageEntry>>>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entry of the page containing `vaddr`
    pub fn find(&self, vaddr: VirtAddr) -> Option<Arc<SupPageEntry>> {
        lock(&self.entries).get(&vaddr.page_round_down()).cloned()
    }

    /// Adds `entry`. An existing entry for the same page is never replaced.
    pub fn insert(&self, entry: Arc<SupPageEntry>) -> VmResult<()> {
        match lock(&self.entries).entry(entry.addr()) {
            Entry::Occupied(_) => Err(VmError::AlreadyExists(entry.addr())),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    /// Removes `entry` from the table and releases the swap slot it still holds.
    ///
    /// `page` is the locked inner state of `entry`. Waiters that acquire the
    /// lock afterwards see `removed` and give up.
    pub fn remove_and_release<D: BlockDeviceModule>(
        &self,
        entry: &SupPageEntry,
        page: &mut PageInner,
        swap: &SwapStore<D>,
    ) {
        debug_assert!(page.frame.is_none(), "page {} is still resident", entry.addr());

        {
            let mut entries = lock(&self.entries);
            if let Some(stored) = entries.get(&entry.addr()) {
                if ptr::eq(Arc::as_ptr(stored), entry) {
                    entries.remove(&entry.addr());
                }
            }
        }

        if let Some(slot) = page.swap_slot.take() {
            swap.release_slot(slot);
        }
        page.removed = true;
        trace!("Removed supplemental entry {}", entry.addr());
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    /// All page addresses in ascending order
    pub fn pages(&self) -> Vec<VirtAddr> {
        lock(&self.entries).keys().copied().collect()
    }

    /// Snapshot of all entries in ascending address order
    pub fn entries(&self) -> Vec<Arc<SupPageEntry>> {
        lock(&self.entries).values().cloned().collect()
    }
}
