//! Async admission gate
//!
//! Slots are taken by [`Acquire`] and handed back by [`Gate::release`], which
//! can happen on a different task than the one that took them. Blocked tasks
//! queue their wakers in FIFO order; each release wakes exactly one.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use tracing::trace;

/// Fixed-capacity pool of admission slots for async tasks
///
/// # Design
///
/// - **Lock-free fast path**: free slots are taken and returned with atomics
/// - **FIFO waiters**: one waiter is woken per returned slot
/// - **Checked release**: returning a slot that was never taken is refused
pub(crate) struct Gate {
    /// Free slots
    available: AtomicUsize,
    /// Total slots
    capacity: usize,
    /// Tasks waiting for a slot
    waiters: Mutex<WaiterQueue>,
}

/// Registered wakers, each tagged so its owner can find and remove it
#[derive(Default)]
struct WaiterQueue {
    next_id: u64,
    queue: VecDeque<(u64, Waker)>,
}

impl Gate {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            available: AtomicUsize::new(capacity),
            capacity,
            waiters: Mutex::new(WaiterQueue::default()),
        }
    }

    /// Future that resolves once a slot has been taken
    pub(crate) fn acquire(&self) -> Acquire<'_> {
        Acquire {
            gate: self,
            waiter: None,
            acquired: false,
        }
    }

    /// Take a slot if one is free right now
    #[must_use]
    pub(crate) fn try_acquire(&self) -> bool {
        let mut current = self.available.load(Ordering::Acquire);

        loop {
            if current == 0 {
                return false;
            }

            match self.available.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Return one slot and wake the longest-waiting task
    ///
    /// Returns `false` without changing anything when every slot is already free.
    #[must_use]
    pub(crate) fn release(&self) -> bool {
        let mut current = self.available.load(Ordering::Acquire);

        loop {
            if current >= self.capacity {
                return false;
            }

            match self.available.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.wake_next();
        true
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently taken
    #[must_use]
    pub(crate) fn in_use(&self) -> usize {
        self.capacity - self.available.load(Ordering::Acquire)
    }

    fn wake_next(&self) {
        let next = self.lock_waiters().queue.pop_front();
        if let Some((_, waker)) = next {
            waker.wake();
        }
    }

    /// Queue `waker`, or refresh it if `id` is still queued; returns the id to poll with next time
    fn register(&self, id: Option<u64>, waker: &Waker) -> u64 {
        let mut waiters = self.lock_waiters();

        if let Some(id) = id {
            if let Some(entry) = waiters.queue.iter_mut().find(|(queued, _)| *queued == id) {
                if !entry.1.will_wake(waker) {
                    entry.1 = waker.clone();
                }
                return id;
            }
        }

        let id = waiters.next_id;
        waiters.next_id += 1;
        waiters.queue.push_back((id, waker.clone()));
        id
    }

    /// Remove a queued waiter; `false` means it was already popped and woken
    fn deregister(&self, id: u64) -> bool {
        let mut waiters = self.lock_waiters();
        match waiters.queue.iter().position(|(queued, _)| *queued == id) {
            Some(index) => {
                waiters.queue.remove(index);
                true
            }
            None => false,
        }
    }

    fn lock_waiters(&self) -> MutexGuard<'_, WaiterQueue> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Future returned by [`Gate::acquire`]
///
/// 1. Take a slot on the fast path if one is free
/// 2. Otherwise queue the task's waker and check once more, so a slot
///    returned while registering is not missed
/// 3. If dropped after being woken but before taking a slot, pass the wakeup
///    on to the next waiter
pub(crate) struct Acquire<'a> {
    gate: &'a Gate,
    waiter: Option<u64>,
    acquired: bool,
}

impl Acquire<'_> {
    fn finish(&mut self) -> Poll<()> {
        self.acquired = true;
        if let Some(id) = self.waiter.take() {
            self.gate.deregister(id);
        }
        Poll::Ready(())
    }
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.acquired {
            return Poll::Ready(());
        }

        if this.gate.try_acquire() {
            return this.finish();
        }

        if this.waiter.is_none() {
            trace!(capacity = this.gate.capacity, "gate full, parking task");
        }
        this.waiter = Some(this.gate.register(this.waiter, cx.waker()));

        if this.gate.try_acquire() {
            return this.finish();
        }

        Poll::Pending
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        if let Some(id) = self.waiter.take() {
            if !self.gate.deregister(id) {
                self.gate.wake_next();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::poll;

    #[test]
    fn test_gate_new() {
        let gate = Gate::new(100);
        assert_eq!(gate.capacity(), 100);
        assert_eq!(gate.in_use(), 0);
    }

    #[test]
    fn test_gate_try_acquire() {
        let gate = Gate::new(2);

        assert!(gate.try_acquire());
        assert_eq!(gate.in_use(), 1);

        assert!(gate.try_acquire());
        assert_eq!(gate.in_use(), 2);

        assert!(!gate.try_acquire());
        assert_eq!(gate.in_use(), 2);

        assert!(gate.release());
        assert_eq!(gate.in_use(), 1);

        assert!(gate.try_acquire());
        assert_eq!(gate.in_use(), 2);
    }

    #[test]
    fn test_gate_refuses_over_release() {
        let gate = Gate::new(1);
        assert!(!gate.release());

        assert!(gate.try_acquire());
        assert!(gate.release());
        assert!(!gate.release());
        assert_eq!(gate.in_use(), 0);
    }

    #[compio::test]
    async fn test_gate_acquire_basic() {
        let gate = Gate::new(2);

        gate.acquire().await;
        assert_eq!(gate.in_use(), 1);

        gate.acquire().await;
        assert_eq!(gate.in_use(), 2);

        assert!(gate.release());
        assert!(gate.release());
        assert_eq!(gate.in_use(), 0);
    }

    #[compio::test]
    async fn test_gate_acquire_waits_for_release() {
        let gate = Gate::new(1);
        gate.acquire().await;

        let mut acquire = gate.acquire();
        assert!(poll!(&mut acquire).is_pending());
        assert_eq!(gate.lock_waiters().queue.len(), 1);

        // Polling again must not queue a second entry
        assert!(poll!(&mut acquire).is_pending());
        assert_eq!(gate.lock_waiters().queue.len(), 1);

        assert!(gate.release());
        assert!(gate.lock_waiters().queue.is_empty());
        acquire.await;
        assert_eq!(gate.in_use(), 1);
    }

    #[compio::test]
    async fn test_dropped_waiter_leaves_queue() {
        let gate = Gate::new(1);
        gate.acquire().await;

        let mut acquire = gate.acquire();
        assert!(poll!(&mut acquire).is_pending());
        drop(acquire);

        assert!(gate.lock_waiters().queue.is_empty());
        assert_eq!(gate.in_use(), 1);
    }

    #[compio::test]
    async fn test_woken_then_dropped_waiter_passes_wakeup_on() {
        let gate = Gate::new(1);
        gate.acquire().await;

        let mut first = gate.acquire();
        let mut second = gate.acquire();
        assert!(poll!(&mut first).is_pending());
        assert!(poll!(&mut second).is_pending());
        assert_eq!(gate.lock_waiters().queue.len(), 2);

        // Pops `first`; dropping it must pop `second` in turn
        assert!(gate.release());
        drop(first);
        assert!(gate.lock_waiters().queue.is_empty());

        second.await;
        assert_eq!(gate.in_use(), 1);
    }
}
