use core::cell::UnsafeCell;
use core::hint;
use core::ops::{Deref, DerefMut};
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use crate::proc::{Cpu, current_cpu, lock_current_cpu};

/// Mutual-exclusion lock guarding a `T`, usable from interrupt context.
///
/// Acquiring the lock disables interrupts on the current hart for as long as the guard is alive,
/// mirroring xv6's `acquire`/`release` discipline: a spinlock held with interrupts on would let a
/// timer interrupt re-enter the same lock on the same hart and deadlock.
#[derive(Debug)]
pub struct SpinLock<T> {
    name: &'static str,
    locked: AtomicBool,
    cpu: AtomicPtr<Cpu>,
    data: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

pub struct SpinLockGuard<'a, T: 'a> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> SpinLock<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            cpu: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(data),
        }
    }

    /// # Safety
    /// Must be called with interrupts disabled.
    unsafe fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.cpu.load(Ordering::Relaxed) == unsafe { current_cpu() as *mut Cpu }
    }

    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        // disables interrupts before touching `locked`, and keeps them disabled until the guard
        // is dropped, via the per-cpu push_off/pop_off nesting counter.
        core::mem::forget(lock_current_cpu());

        unsafe {
            assert!(!self.holding(), "acquire {}", self.name);

            loop {
                if self
                    .locked
                    .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                    .is_ok()
                {
                    self.cpu.store(current_cpu() as *mut Cpu, Ordering::Relaxed);
                    break;
                }

                hint::spin_loop();
            }
        }

        SpinLockGuard { lock: self }
    }

    fn release(&self) {
        unsafe {
            assert!(self.holding(), "release {}", self.name);
        }

        self.cpu.store(ptr::null_mut(), Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);

        unsafe { current_cpu() }.unlock();
    }

    /// Releases a lock this process is holding without going through a live guard.
    ///
    /// Used by `fork_ret` to drop the process lock that `scheduler()` acquired before the context
    /// switch: that lock's guard never left the scheduler's stack frame, so there is nothing here
    /// to `Drop`.
    ///
    /// # Safety
    /// The caller must actually be holding this lock.
    pub unsafe fn force_unlock(&self) {
        self.release();
    }

    /// Releases the lock that `guard` represents and returns the lock so it can be re-acquired
    /// later, without giving the caller access to the data in between.
    ///
    /// Used by `sleep()` to atomically drop a condition lock just before parking on a channel.
    pub fn unlock(guard: SpinLockGuard<'_, T>) -> &'_ SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    // Since this call consumes self, we can guarantee no one else is holding a reference.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }

    // Since this call mutably borrows self, we can guarantee no one else is holding a reference.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Use this over `get_mut` when only a shared reference is available.
    ///
    /// # Safety
    /// The caller must ensure no one else is concurrently accessing the data.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default(), "spinlock")
    }
}

impl<'a, T: 'a> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
