use std::{
    marker::PhantomData,
    sync::{Condvar, Mutex},
    thread::{self, ThreadId},
};

use crate::util::lock;

#[derive(Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Global lock that serializes every access to the file store.
///
/// The lock is reentrant: a thread that already holds it (e.g. a `close`
/// system call that ends up unmapping a file) acquires it again instead of
/// deadlocking on itself.
#[derive(Default)]
pub struct FilesysLock {
    state: Mutex<LockState>,
    released: Condvar,
}

/// Proof that the current thread holds the [`FilesysLock`].
///
/// Not `Send`: the lock is owned by a thread, not by a value.
pub struct FilesysGuard<'a> {
    lock: &'a FilesysLock,
    _not_send: PhantomData<*const ()>,
}

impl FilesysLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the lock is free or already owned by the calling thread.
    pub fn acquire(&self) -> FilesysGuard<'_> {
        let me = thread::current().id();
        let mut state = lock(&self.state);

        loop {
            match state.owner {
                None => {
                    state.owner = Some(me);
                    state.depth = 1;
                    break;
                }
                Some(owner) if owner == me => {
                    state.depth += 1;
                    break;
                }
                Some(_) => {
                    state = self
                        .released
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
        }

        FilesysGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Acquires the lock only if that is possible without blocking.
    pub fn try_acquire(&self) -> Option<FilesysGuard<'_>> {
        let me = thread::current().id();
        let mut state = lock(&self.state);

        match state.owner {
            None => {
                state.owner = Some(me);
                state.depth = 1;
            }
            Some(owner) if owner == me => state.depth += 1,
            Some(_) => return None,
        }

        Some(FilesysGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        lock(&self.state).owner == Some(thread::current().id())
    }
}

impl Drop for FilesysGuard<'_> {
    fn drop(&mut self) {
        let mut state = lock(&self.lock.state);
        debug_assert_eq!(state.owner, Some(thread::current().id()));

        state.depth -= 1;
        if state.depth == 0 {
            state.owner = None;
            drop(state);
            self.lock.released.notify_one();
        }
    }
}
