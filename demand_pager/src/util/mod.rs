pub(crate) mod bit_array;

use std::sync::{Mutex, MutexGuard};

/// efficient way to calculate: ceil(num / div)
#[inline]
pub(crate) const fn div_ceil(num: usize, div: usize) -> usize {
    (num + div - 1) / div
}

/// Locks `mutex`, ignoring poisoning.
///
/// A panic in one faulting context must not make the shared tables unusable for everybody else.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
