/*
 * SPDX-License-Identifier: MIT OR BlueOak-1.0.0
 * Copyright (c) 2019 Andre Richter <andre.o.richter@gmail.com>
 * Original code distributed under MIT, additional changes are under BlueOak-1.0.0
 */

use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    sync::atomic::{AtomicBool, Ordering},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Synchronization interfaces.
pub mod interface {

    /// Any object implementing this trait guarantees exclusive access to the data wrapped within
    /// the Mutex for the duration of the provided closure.
    pub trait Mutex {
        /// The type of the data that is wrapped by this mutex.
        type Data;

        /// Locks the mutex and grants the closure temporary mutable access to the wrapped data.
        fn lock<R>(&self, f: impl FnOnce(&mut Self::Data) -> R) -> R;
    }
}

/// A spinning mutual exclusion lock.
///
/// Register read-modify-write sequences are short, so waiters busy-spin instead of sleeping.
/// The lock is not reentrant: locking it again from inside the closure deadlocks.
pub struct SpinLock<T>
where
    T: ?Sized,
{
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

/// Releases the lock when the closure returns or unwinds.
struct SpinLockGuard<'a> {
    locked: &'a AtomicBool,
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

/// The data is only ever reached through `lock()`, which hands out one mutable reference at a
/// time, so sharing the lock between threads is sound as long as the data itself can be sent.
///
/// Literature:
/// * <https://doc.rust-lang.org/beta/nomicon/send-and-sync.html>
/// * <https://doc.rust-lang.org/book/ch16-04-extensible-concurrency-sync-and-send.html>
unsafe impl<T> Send for SpinLock<T> where T: ?Sized + Send {}
unsafe impl<T> Sync for SpinLock<T> where T: ?Sized + Send {}

impl<T> SpinLock<T> {
    /// Create an instance.
    pub const fn new(data: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }
}

impl Drop for SpinLockGuard<'_> {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::Release);
    }
}

//------------------------------------------------------------------------------
// OS Interface Code
//------------------------------------------------------------------------------

impl<T> interface::Mutex for SpinLock<T> {
    type Data = T;

    fn lock<R>(&self, f: impl FnOnce(&mut Self::Data) -> R) -> R {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
        let _guard = SpinLockGuard {
            locked: &self.locked,
        };

        let data = unsafe { &mut *self.data.get() };

        f(data)
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use {
        super::{interface::Mutex, SpinLock},
        std::thread,
    };

    #[test]
    fn lock_grants_mutable_access() {
        let lock = SpinLock::new(41u32);
        lock.lock(|value| *value += 1);
        assert_eq!(lock.lock(|value| *value), 42);
    }

    #[test]
    fn lock_serializes_read_modify_write() {
        let lock = SpinLock::new(0u64);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..10_000 {
                        lock.lock(|value| {
                            let read = *value;
                            *value = read + 1;
                        });
                    }
                });
            }
        });

        assert_eq!(lock.lock(|value| *value), 40_000);
    }
}
