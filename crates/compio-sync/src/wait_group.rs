//! Async sized wait group
//!
//! Same contract as [`sizedwaitgroup::SizedWaitGroup`], but `add` and `wait`
//! suspend the calling task instead of parking its thread, so a single compio
//! runtime thread can drive thousands of bounded tasks.
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_sync::SizedWaitGroup;
//!
//! # async fn example() {
//! let group = SizedWaitGroup::new(8);
//!
//! for query in 0..100 {
//!     group.add(1).await; // suspends while 8 queries are running
//!     let group = group.clone();
//!     compio::runtime::spawn(async move {
//!         println!("query {query}");
//!         group.done();
//!     })
//!     .detach();
//! }
//!
//! group.wait().await;
//! # }
//! ```

use crate::counter::Counter;
use crate::gate::{Acquire, Gate};
use sizedwaitgroup::{cpu_limit, effective_limit, Result, WaitGroupError};
use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error};

/// An async wait group that never admits more than [`size`](Self::size) units at once
///
/// Cloning yields another handle onto the same group.
///
/// # Cancellation
///
/// Dropping an unfinished `add` future keeps the units it already admitted and
/// rolls back the one it was waiting on, so the counters stay consistent.
#[derive(Clone)]
pub struct SizedWaitGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    gate: Gate,
    counter: Counter,
}

impl SizedWaitGroup {
    /// Create a group admitting at most `limit` units at once
    ///
    /// A `limit` of zero or less means [`sizedwaitgroup::UNBOUNDED_LIMIT`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use compio_sync::SizedWaitGroup;
    ///
    /// assert_eq!(SizedWaitGroup::new(16).size(), 16);
    /// assert_eq!(SizedWaitGroup::new(0).size(), sizedwaitgroup::UNBOUNDED_LIMIT);
    /// ```
    #[must_use]
    pub fn new(limit: isize) -> Self {
        Self::with_size(effective_limit(limit))
    }

    /// Create a group admitting one unit per logical CPU
    #[must_use]
    pub fn per_cpu() -> Self {
        Self::with_size(cpu_limit())
    }

    fn with_size(size: usize) -> Self {
        debug!(size, "created async sized wait group");
        Self {
            inner: Arc::new(GroupInner {
                gate: Gate::new(size),
                counter: Counter::default(),
            }),
        }
    }

    /// Admit (`delta > 0`) or release (`delta < 0`) units of work
    ///
    /// Admitting suspends while the group is full.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is negative and more units are released than are admitted.
    pub async fn add(&self, delta: isize) {
        if let Err(err) = self.checked_add(delta).await {
            panic!("{err}");
        }
    }

    /// [`add`](Self::add) that reports over-release instead of panicking
    ///
    /// # Errors
    ///
    /// Returns [`WaitGroupError::ExcessRelease`] if `delta` is negative and
    /// fewer than `|delta|` units are admitted.
    pub async fn checked_add(&self, delta: isize) -> Result<()> {
        match delta.cmp(&0) {
            Ordering::Greater => {
                for _ in 0..delta {
                    self.admit_one().await;
                }
                Ok(())
            }
            Ordering::Less => self.release(delta.unsigned_abs()),
            Ordering::Equal => Ok(()),
        }
    }

    /// Mark one admitted unit as finished
    ///
    /// # Panics
    ///
    /// Panics if no unit is admitted.
    pub fn done(&self) {
        if let Err(err) = self.checked_done() {
            panic!("{err}");
        }
    }

    /// [`done`](Self::done) that reports over-release instead of panicking
    ///
    /// # Errors
    ///
    /// Returns [`WaitGroupError::ExcessRelease`] if no unit is admitted.
    pub fn checked_done(&self) -> Result<()> {
        self.release(1)
    }

    /// Wait until every admitted unit has been released
    pub async fn wait(&self) {
        self.inner.counter.drained().await;
    }

    /// Admit one unit only if a slot is free right now
    #[must_use]
    pub fn try_admit(&self) -> bool {
        self.inner.counter.increment();
        if self.inner.gate.try_acquire() {
            return true;
        }
        let uncounted = self.inner.counter.decrement();
        debug_assert!(uncounted, "counter lost a unit it had just counted");
        false
    }

    /// Admit one unit and return a guard that releases it when dropped
    #[must_use = "dropping the slot immediately marks the unit as done"]
    pub async fn admit(&self) -> Slot {
        self.admit_one().await;
        Slot {
            group: self.clone(),
        }
    }

    /// Configured concurrency cap
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.gate.capacity()
    }

    /// Units counted and not yet released, including tasks suspended in `add`
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.counter.value()
    }

    /// Units currently holding a slot
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.gate.in_use()
    }

    fn admit_one(&self) -> Admit<'_> {
        Admit {
            counter: &self.inner.counter,
            acquire: self.inner.gate.acquire(),
            counted: false,
            admitted: false,
        }
    }

    fn release(&self, requested: usize) -> Result<()> {
        for released in 0..requested {
            if !self.inner.gate.release() {
                return Err(WaitGroupError::ExcessRelease {
                    requested,
                    released,
                });
            }
            let uncounted = self.inner.counter.decrement();
            debug_assert!(uncounted, "released a slot that was never counted");
        }
        Ok(())
    }
}

impl Default for SizedWaitGroup {
    fn default() -> Self {
        Self::new(0)
    }
}

impl fmt::Debug for SizedWaitGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedWaitGroup")
            .field("size", &self.size())
            .field("outstanding", &self.outstanding())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// One unit moving through admission: counted on first poll, then waiting for a slot
struct Admit<'a> {
    counter: &'a Counter,
    acquire: Acquire<'a>,
    counted: bool,
    admitted: bool,
}

impl Future for Admit<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.counted {
            this.counter.increment();
            this.counted = true;
        }

        match Pin::new(&mut this.acquire).poll(cx) {
            Poll::Ready(()) => {
                this.admitted = true;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Admit<'_> {
    fn drop(&mut self) {
        if self.counted && !self.admitted {
            let uncounted = self.counter.decrement();
            debug_assert!(uncounted, "rolled back a unit that was never counted");
        }
    }
}

/// RAII guard for one admitted unit, returned by [`SizedWaitGroup::admit`]
pub struct Slot {
    group: SizedWaitGroup,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Err(err) = self.group.checked_done() {
            error!(%err, "failed to release async sized wait group slot");
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("group", &self.group).finish()
    }
}
