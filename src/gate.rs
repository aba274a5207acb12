//! Blocking admission gate
//!
//! A counting semaphore whose slots are taken and returned by separate calls
//! rather than by an RAII permit, because a wait group admits work in `add` and
//! releases it later from `done`, usually on another thread.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Fixed-capacity pool of admission slots
///
/// Threads calling [`AdmissionGate::acquire`] while every slot is held are
/// parked on a condition variable until [`AdmissionGate::release`] hands a slot
/// back. Which parked thread wins a freed slot is up to the OS scheduler.
pub(crate) struct AdmissionGate {
    /// Total slots (fixed at construction)
    capacity: usize,
    /// Slots currently held
    held: Mutex<usize>,
    /// Signalled once per released slot
    slot_freed: Condvar,
}

impl AdmissionGate {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            held: Mutex::new(0),
            slot_freed: Condvar::new(),
        }
    }

    /// Take one slot, parking the calling thread while the gate is full
    pub(crate) fn acquire(&self) {
        let mut held = self.lock();
        while *held >= self.capacity {
            held = self
                .slot_freed
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *held += 1;
    }

    /// Take one slot only if one is free right now
    #[must_use]
    pub(crate) fn try_acquire(&self) -> bool {
        let mut held = self.lock();
        if *held >= self.capacity {
            return false;
        }
        *held += 1;
        true
    }

    /// Hand one slot back and wake a thread parked in `acquire`
    ///
    /// Returns `false` without changing anything when no slot is held.
    #[must_use]
    pub(crate) fn release(&self) -> bool {
        let mut held = self.lock();
        if *held == 0 {
            return false;
        }
        *held -= 1;
        drop(held);
        self.slot_freed.notify_one();
        true
    }

    /// Whether the gate is full
    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        *self.lock() >= self.capacity
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held
    #[must_use]
    pub(crate) fn in_use(&self) -> usize {
        *self.lock()
    }

    // The guarded value is a plain count that is never left half-updated, so a
    // panic on another thread cannot poison it in any meaningful way.
    fn lock(&self) -> MutexGuard<'_, usize> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_gate_new() {
        let gate = AdmissionGate::new(4);
        assert_eq!(gate.capacity(), 4);
        assert_eq!(gate.in_use(), 0);
        assert!(!gate.is_full());
    }

    #[test]
    fn test_gate_try_acquire_until_full() {
        let gate = AdmissionGate::new(2);

        assert!(gate.try_acquire());
        assert!(gate.try_acquire());
        assert_eq!(gate.in_use(), 2);
        assert!(gate.is_full());

        assert!(!gate.try_acquire());
        assert_eq!(gate.in_use(), 2);

        assert!(gate.release());
        assert!(gate.try_acquire());
    }

    #[test]
    fn test_gate_release_when_empty() {
        let gate = AdmissionGate::new(1);
        assert!(!gate.release());
        assert_eq!(gate.in_use(), 0);

        gate.acquire();
        assert!(gate.release());
        assert!(!gate.release());
    }

    #[test]
    fn test_gate_acquire_blocks_until_release() {
        let gate = Arc::new(AdmissionGate::new(1));
        gate.acquire();

        let admitted = Arc::new(AtomicBool::new(false));
        let handle = {
            let gate = Arc::clone(&gate);
            let admitted = Arc::clone(&admitted);
            thread::spawn(move || {
                gate.acquire();
                admitted.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!admitted.load(Ordering::SeqCst));

        assert!(gate.release());
        handle.join().unwrap();
        assert!(admitted.load(Ordering::SeqCst));
        assert_eq!(gate.in_use(), 1);
    }
}
