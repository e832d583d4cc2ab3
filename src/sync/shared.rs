//! Holders for state written by platform callbacks and read by the test thread.
//!
//! Every holder is a cheap `Clone` around an `Arc`, so the callback and the
//! test keep the same cell. Atomics use `SeqCst`: a predicate that reads two
//! flags must never observe the second write without the first.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Boolean set by a callback, observed by the test.
#[derive(Debug, Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Read and clear in one step.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

/// Monotonic event counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new value.
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Add `n` and return the new value.
    pub fn add(&self, n: u64) -> u64 {
        self.0.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

/// Mutex-guarded payload for values that are not a single word.
///
/// Compound read-modify-write goes through [`SharedCell::update`] so the
/// callback and the reader never interleave inside one logical step.
#[derive(Debug, Default)]
pub struct SharedCell<T>(Arc<Mutex<T>>);

impl<T> Clone for SharedCell<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> SharedCell<T> {
    pub fn new(value: T) -> Self {
        Self(Arc::new(Mutex::new(value)))
    }

    pub fn set(&self, value: T) {
        *self.0.lock() = value;
    }

    /// Replace the value, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.0.lock(), value)
    }

    /// Mutate under the lock and return whatever the closure returns.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut *self.0.lock())
    }

    /// Read under the lock.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&*self.0.lock())
    }
}

impl<T: Clone> SharedCell<T> {
    pub fn get(&self) -> T {
        self.0.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn flag_take_clears() {
        let flag = Flag::new();
        assert!(!flag.take());
        flag.set();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.is_set());
    }

    #[test]
    fn flag_clone_shares_state() {
        let flag = Flag::new();
        let writer = flag.clone();
        thread::spawn(move || writer.set()).join().unwrap();
        assert!(flag.is_set());
    }

    #[test]
    fn counter_concurrent_increments_are_not_lost() {
        let counter = Counter::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = counter.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.increment();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.get(), 8000);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn shared_cell_update_is_atomic() {
        let cell = SharedCell::new(Vec::<u32>::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let c = cell.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        c.update(|v| v.push(i * 100 + j));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cell.with(Vec::len), 400);
    }

    #[test]
    fn shared_cell_replace_returns_previous() {
        let cell = SharedCell::new(String::from("old"));
        assert_eq!(cell.replace("new".to_string()), "old");
        assert_eq!(cell.get(), "new");
    }
}
