//! `PrioritySharedMutex` (spec §4.5): a writer-preferring, reentrant-writer
//! shared/exclusive latch.
//!
//! The state machine is specified in terms of atomics, but every access to
//! it here happens while holding a small internal `Mutex<State>` — a
//! condition variable needs a mutex to wait on regardless, so there is
//! nothing to gain from lock-free counters on top of it. What the spec
//! actually requires — new readers blocked the instant a writer announces
//! intent, and a writer able to re-enter its own lock — is exactly what
//! this gives you.

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};

struct State {
    readers_active: u32,
    writers_waiting: u32,
    writer_active: bool,
    owner: Option<ThreadId>,
    write_recursion_depth: u32,
}

impl State {
    fn new() -> Self {
        State {
            readers_active: 0,
            writers_waiting: 0,
            writer_active: false,
            owner: None,
            write_recursion_depth: 0,
        }
    }
}

/// A shared/exclusive latch in which a waiting writer blocks all new
/// readers (preventing writer starvation) and a thread already holding the
/// exclusive lock may re-acquire it (reentrant write-in-write).
pub struct PrioritySharedMutex<T> {
    data: std::cell::UnsafeCell<T>,
    state: Mutex<State>,
    cond: Condvar,
}

unsafe impl<T: Send> Send for PrioritySharedMutex<T> {}
unsafe impl<T: Send> Sync for PrioritySharedMutex<T> {}

impl<T> PrioritySharedMutex<T> {
    pub fn new(value: T) -> Self {
        PrioritySharedMutex {
            data: std::cell::UnsafeCell::new(value),
            state: Mutex::new(State::new()),
            cond: Condvar::new(),
        }
    }

    /// Acquire shared (read) ownership, blocking while any writer is
    /// waiting or active.
    pub fn read(&self) -> SharedGuard<'_, T> {
        self.lock_shared();
        SharedGuard { lock: self }
    }

    /// Acquire exclusive (write) ownership. Reentrant: if the calling
    /// thread already holds the exclusive lock, this increments a
    /// recursion counter instead of deadlocking.
    pub fn write(&self) -> ExclusiveGuard<'_, T> {
        self.lock();
        ExclusiveGuard { lock: self }
    }

    fn lock_shared(&self) {
        let mut st = self.state.lock().unwrap();
        loop {
            if !st.writer_active && st.writers_waiting == 0 {
                break;
            }
            st = self.cond.wait(st).unwrap();
        }
        st.readers_active += 1;
    }

    fn unlock_shared(&self) {
        let mut st = self.state.lock().unwrap();
        st.readers_active -= 1;
        if st.readers_active == 0 {
            self.cond.notify_all();
        }
    }

    fn lock(&self) {
        let me = thread::current().id();
        let mut st = self.state.lock().unwrap();

        if st.writer_active && st.owner == Some(me) {
            st.write_recursion_depth += 1;
            return;
        }

        st.writers_waiting += 1;
        // Force any reader re-checking the gate (or about to) to see the
        // intent to write before we actually hold anything.
        self.cond.notify_all();

        while st.writer_active {
            st = self.cond.wait(st).unwrap();
        }
        st.writer_active = true;
        st.owner = Some(me);

        while st.readers_active > 0 {
            st = self.cond.wait(st).unwrap();
        }

        st.writers_waiting -= 1;
        st.write_recursion_depth = 1;
        self.cond.notify_all();
    }

    fn unlock(&self) {
        let mut st = self.state.lock().unwrap();
        debug_assert_eq!(st.owner, Some(thread::current().id()));
        st.write_recursion_depth -= 1;
        if st.write_recursion_depth > 0 {
            return;
        }
        st.owner = None;
        st.writer_active = false;
        self.cond.notify_all();
    }
}

/// A scoped shared-read hold. Released on drop.
pub struct SharedGuard<'a, T> {
    lock: &'a PrioritySharedMutex<T>,
}

impl<'a, T> Deref for SharedGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> Drop for SharedGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock_shared();
    }
}

/// A scoped exclusive-write hold. Released (or depth-decremented, if
/// reentrant) on drop.
pub struct ExclusiveGuard<'a, T> {
    lock: &'a PrioritySharedMutex<T>,
}

impl<'a, T> Deref for ExclusiveGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T> DerefMut for ExclusiveGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T> Drop for ExclusiveGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
