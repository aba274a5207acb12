//! Async completion counter

use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

/// Count of outstanding units with an awaitable "reached zero" signal
///
/// Each drain to zero ends a generation. A [`Drained`] future resolves once the
/// generation it first saw has ended, so it is released even if a new round
/// starts before it is polled again.
#[derive(Default)]
pub(crate) struct Counter {
    state: Mutex<CounterState>,
}

#[derive(Default)]
struct CounterState {
    count: usize,
    /// Number of times the count has drained to zero
    generation: u64,
    next_id: u64,
    /// Tasks waiting for the count to reach zero, tagged for removal on drop
    waiters: Vec<(u64, Waker)>,
}

impl Counter {
    pub(crate) fn increment(&self) {
        self.lock().count += 1;
    }

    /// Subtract one, waking every waiter if the count reaches zero
    ///
    /// Returns `false` without changing anything when the count is already zero.
    #[must_use]
    pub(crate) fn decrement(&self) -> bool {
        let drained = {
            let mut state = self.lock();
            match state.count {
                0 => return false,
                1 => {
                    state.count = 0;
                    state.generation = state.generation.wrapping_add(1);
                    std::mem::take(&mut state.waiters)
                }
                _ => {
                    state.count -= 1;
                    Vec::new()
                }
            }
        };

        for (_, waker) in drained {
            waker.wake();
        }
        true
    }

    /// Future that resolves once the count drains to zero
    pub(crate) fn drained(&self) -> Drained<'_> {
        Drained {
            counter: self,
            generation: None,
            waiter: None,
        }
    }

    #[must_use]
    pub(crate) fn value(&self) -> usize {
        self.lock().count
    }

    fn lock(&self) -> MutexGuard<'_, CounterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Future returned by [`Counter::drained`]
pub(crate) struct Drained<'a> {
    counter: &'a Counter,
    /// Generation seen on first poll
    generation: Option<u64>,
    waiter: Option<u64>,
}

impl Future for Drained<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.counter.lock();

        let generation = *this.generation.get_or_insert(state.generation);
        if state.count == 0 || state.generation != generation {
            // Entries are drained with the generation that ends; only a stale
            // one from an unfinished poll can still be queued.
            if let Some(id) = this.waiter.take() {
                state.waiters.retain(|(queued, _)| *queued != id);
            }
            return Poll::Ready(());
        }

        let queued = this
            .waiter
            .and_then(|id| state.waiters.iter_mut().find(|(queued, _)| *queued == id));
        match queued {
            Some((_, waker)) => {
                if !waker.will_wake(cx.waker()) {
                    *waker = cx.waker().clone();
                }
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.waiters.push((id, cx.waker().clone()));
                this.waiter = Some(id);
            }
        }
        Poll::Pending
    }
}

impl Drop for Drained<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.waiter.take() {
            self.counter
                .lock()
                .waiters
                .retain(|(queued, _)| *queued != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::poll;

    #[test]
    fn test_counter_refuses_to_go_negative() {
        let counter = Counter::default();
        assert!(!counter.decrement());

        counter.increment();
        counter.increment();
        assert_eq!(counter.value(), 2);
        assert!(counter.decrement());
        assert!(counter.decrement());
        assert!(!counter.decrement());
        assert_eq!(counter.value(), 0);
    }

    #[compio::test]
    async fn test_drained_ready_at_zero() {
        let counter = Counter::default();
        counter.drained().await;
    }

    #[compio::test]
    async fn test_drained_pending_until_zero() {
        let counter = Counter::default();
        counter.increment();
        counter.increment();

        let mut drained = counter.drained();
        assert!(poll!(&mut drained).is_pending());
        assert!(poll!(&mut drained).is_pending());
        assert_eq!(counter.lock().waiters.len(), 1);

        assert!(counter.decrement());
        assert!(poll!(&mut drained).is_pending());

        assert!(counter.decrement());
        assert!(counter.lock().waiters.is_empty());
        drained.await;
    }

    #[compio::test]
    async fn test_drained_ready_after_new_round_starts() {
        let counter = Counter::default();
        counter.increment();

        let mut drained = counter.drained();
        assert!(poll!(&mut drained).is_pending());

        assert!(counter.decrement());
        counter.increment();
        assert!(poll!(&mut drained).is_ready());
        assert_eq!(counter.value(), 1);
    }

    #[compio::test]
    async fn test_dropped_drained_leaves_no_waker() {
        let counter = Counter::default();
        counter.increment();

        let mut drained = counter.drained();
        assert!(poll!(&mut drained).is_pending());
        assert_eq!(counter.lock().waiters.len(), 1);

        drop(drained);
        assert!(counter.lock().waiters.is_empty());
        assert!(counter.decrement());
    }
}
