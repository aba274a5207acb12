//! Completion counter with a blocking wait-for-zero

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Count of outstanding units of work
///
/// Every waiter parked when the count drops to zero is released, even if a new
/// round calls `increment` before the waiter gets the lock back. Each drain to
/// zero bumps a generation number, and a waiter returns once the generation it
/// parked under has ended.
#[derive(Default)]
pub(crate) struct CompletionCounter {
    state: Mutex<CounterState>,
    drained: Condvar,
}

#[derive(Default)]
struct CounterState {
    count: usize,
    /// Number of times the count has drained to zero
    generation: u64,
}

impl CompletionCounter {
    pub(crate) fn increment(&self) {
        self.lock().count += 1;
    }

    /// Subtract one, waking every waiter if the count reaches zero
    ///
    /// Returns `false` without changing anything when the count is already zero.
    #[must_use]
    pub(crate) fn decrement(&self) -> bool {
        let mut state = self.lock();
        match state.count {
            0 => false,
            1 => {
                state.count = 0;
                state.generation = state.generation.wrapping_add(1);
                drop(state);
                self.drained.notify_all();
                true
            }
            _ => {
                state.count -= 1;
                true
            }
        }
    }

    /// Park the calling thread until the count drains to zero
    pub(crate) fn wait(&self) {
        let mut state = self.lock();
        let generation = state.generation;
        while state.count > 0 && state.generation == generation {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
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
