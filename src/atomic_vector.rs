//! `SingleWriter<T>` and `AtomicVector<T>` (spec §4.4.3): a copy-mutate-
//! publish cell backing the append-mostly UTXO tail. Lock-free on the
//! read side via `arc_swap::ArcSwap`; writers serialize through an
//! internal `Mutex` and publish their edit atomically on scope exit.

use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};

/// A copy-mutate-publish cell. `Snapshot()` is lock-free (an atomic load
/// of the current `Arc`); `Edit()` serializes writers through a mutex,
/// clones the current value lazily, and publishes the mutated clone on
/// drop unless `Cancel()`led.
pub struct SingleWriter<T> {
    current: ArcSwap<T>,
    writer_lock: Mutex<()>,
}

impl<T> SingleWriter<T> {
    pub fn new(value: T) -> Self {
        SingleWriter {
            current: ArcSwap::from_pointee(value),
            writer_lock: Mutex::new(()),
        }
    }

    /// An atomic-load snapshot of the current value. Lock-free; multiple
    /// readers may call this concurrently with each other and with a
    /// writer's in-progress `Edit`.
    pub fn snapshot(&self) -> Arc<T> {
        self.current.load_full()
    }

    /// Atomically stores `new_value` without cloning the existing value.
    pub fn publish(&self, new_value: T) {
        self.current.store(Arc::new(new_value));
    }
}

impl<T: Clone> SingleWriter<T> {
    /// Acquires the writer serialization lock and returns an `Edit`
    /// handle wrapping a clone of the current value. Dropping the handle
    /// publishes the (possibly mutated) clone, unless `cancel()` was
    /// called first.
    pub fn edit(&self) -> Edit<'_, T> {
        let guard = self
            .writer_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let draft = (*self.current.load_full()).clone();
        Edit {
            owner: self,
            _guard: guard,
            draft: Some(draft),
        }
    }
}

/// A scoped, exclusive mutation handle over a lazily-cloned draft. On
/// drop, publishes the draft as the new current value unless `cancel()`
/// was called.
pub struct Edit<'a, T: Clone> {
    owner: &'a SingleWriter<T>,
    _guard: std::sync::MutexGuard<'a, ()>,
    draft: Option<T>,
}

impl<'a, T: Clone> Edit<'a, T> {
    /// Discards the draft: on drop, the underlying value is left
    /// unpublished.
    pub fn cancel(mut self) {
        self.draft = None;
    }
}

impl<'a, T: Clone> std::ops::Deref for Edit<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.draft.as_ref().expect("Edit: draft taken by cancel()")
    }
}

impl<'a, T: Clone> std::ops::DerefMut for Edit<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.draft.as_mut().expect("Edit: draft taken by cancel()")
    }
}

impl<'a, T: Clone> Drop for Edit<'a, T> {
    fn drop(&mut self) {
        if let Some(draft) = self.draft.take() {
            self.owner.current.store(Arc::new(draft));
        }
    }
}

/// A `SingleWriter<Vec<Arc<T>>>` with convenience operations for an
/// append-mostly, occasionally-truncated-at-either-end collection (the
/// UTXO tail is the motivating use case).
pub struct AtomicVector<T> {
    inner: SingleWriter<Vec<Arc<T>>>,
}

impl<T> AtomicVector<T> {
    pub fn new() -> Self {
        AtomicVector {
            inner: SingleWriter::new(Vec::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<Vec<Arc<T>>> {
        self.inner.snapshot()
    }

    pub fn get(&self, index: usize) -> Option<Arc<T>> {
        self.snapshot().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn emplace_back(&self, value: T) {
        let mut edit = self.inner.edit();
        edit.push(Arc::new(value));
    }

    pub fn erase_front(&self) {
        let mut edit = self.inner.edit();
        if !edit.is_empty() {
            edit.remove(0);
        }
    }

    pub fn erase_back(&self) {
        let mut edit = self.inner.edit();
        edit.pop();
    }

    /// Inserts `value` keeping the vector sorted by `key`. Used when the
    /// tail is addressed by an ordered key (e.g. outpoint index) rather
    /// than strictly appended.
    pub fn insert_sorted<K: Ord>(&self, value: T, key: impl Fn(&T) -> K) {
        let mut edit = self.inner.edit();
        let target = key(&value);
        let pos = edit.partition_point(|existing| key(existing) < target);
        edit.insert(pos, Arc::new(value));
    }
}

impl<T> Default for AtomicVector<T> {
    fn default() -> Self {
        Self::new()
    }
}
