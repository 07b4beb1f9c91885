//! Writer-preferring reader-writer lock.
//!
//! A new reader is held back as soon as any writer is waiting, even while no
//! writer owns the lock. Writers cannot starve; readers can, for as long as
//! writers keep arriving. Among several waiting writers there is no FIFO
//! order, one of them is woken per release.

use std::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
};

#[derive(Debug, Default, Clone, Copy)]
struct LockState {
    readers: usize,
    writers: usize,
    waiting_writers: usize,
}

/// Guards one value of type `T`.
///
/// The lock is not reentrant: a thread holding a [`ReadGuard`] must not call
/// [`acquire_write`](Self::acquire_write) and a thread holding a
/// [`WriteGuard`] must not acquire anything. Both deadlock.
pub struct ReaderWriterLock<T> {
    state: Mutex<LockState>,
    accept_write: Condvar,
    accept_read: Condvar,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is handed out only through guards, and the state
// machine admits either any number of readers or exactly one writer.
unsafe impl<T: Send> Send for ReaderWriterLock<T> {}
// SAFETY: readers share `&T` across threads (needs `Sync`), a writer may
// mutate the value from any thread (needs `Send`).
unsafe impl<T: Send + Sync> Sync for ReaderWriterLock<T> {}

impl<T> ReaderWriterLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            accept_write: Condvar::new(),
            accept_read: Condvar::new(),
            value: UnsafeCell::new(value),
        }
    }

    // The counters are only touched in short sections that cannot panic, so a
    // poisoned mutex still holds consistent state.
    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until no writer is active or waiting, then enters a shared
    /// section that lasts until the guard is dropped.
    pub fn acquire_read(&self) -> ReadGuard<'_, T> {
        let mut state = self.state();
        while state.waiting_writers > 0 || state.writers > 0 {
            state = self
                .accept_read
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    fn release_read(&self) {
        let mut state = self.state();
        state.readers -= 1;
        if state.readers == 0 {
            self.accept_write.notify_one();
        }
    }

    /// Registers as a waiting writer, blocks until no reader and no writer is
    /// active, then enters the exclusive section.
    pub fn acquire_write(&self) -> WriteGuard<'_, T> {
        let mut state = self.state();
        state.waiting_writers += 1;
        while state.readers > 0 || state.writers > 0 {
            state = self
                .accept_write
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.waiting_writers -= 1;
        state.writers = 1;
        WriteGuard { lock: self }
    }

    fn release_write(&self) {
        let mut state = self.state();
        state.writers = 0;
        if state.waiting_writers > 0 {
            self.accept_write.notify_one();
        } else {
            self.accept_read.notify_all();
        }
    }

    /// Number of threads currently blocked in [`acquire_write`](Self::acquire_write).
    pub fn waiting_writers(&self) -> usize {
        self.state().waiting_writers
    }

    pub fn active_readers(&self) -> usize {
        self.state().readers
    }
}

impl<T> fmt::Debug for ReaderWriterLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = *self.state();
        f.debug_struct("ReaderWriterLock")
            .field("readers", &state.readers)
            .field("writers", &state.writers)
            .field("waiting_writers", &state.waiting_writers)
            .finish_non_exhaustive()
    }
}

/// Shared section of a [`ReaderWriterLock`]; released on drop.
pub struct ReadGuard<'a, T> {
    lock: &'a ReaderWriterLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: while a read guard exists no writer is active.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Exclusive section of a [`ReaderWriterLock`]; released on drop.
pub struct WriteGuard<'a, T> {
    lock: &'a ReaderWriterLock<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the write guard is the only live access to the value.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the write guard is the only live access to the value.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}
