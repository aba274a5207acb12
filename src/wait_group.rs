//! Wait group with a cap on concurrently admitted work
//!
//! [`SizedWaitGroup`] pairs a completion counter with an admission gate.
//! Every unit of work is counted before it asks the gate for a slot and is
//! uncounted only after its slot is back in the gate, so at any instant
//!
//! ```text
//! outstanding = in_flight + callers still parked in add()
//! ```
//!
//! and [`SizedWaitGroup::wait`] cannot return while a slot is still held.
//!
//! # Example
//!
//! ```rust
//! use sizedwaitgroup::SizedWaitGroup;
//! use std::thread;
//!
//! let group = SizedWaitGroup::new(4);
//!
//! for query in 0..32 {
//!     group.add(1); // blocks while 4 queries are running
//!     let group = group.clone();
//!     thread::spawn(move || {
//!         println!("running query {query}");
//!         group.done();
//!     });
//! }
//!
//! group.wait();
//! assert_eq!(group.outstanding(), 0);
//! ```

use crate::counter::CompletionCounter;
use crate::error::{Result, WaitGroupError};
use crate::gate::AdmissionGate;
use crate::limit::{cpu_limit, effective_limit};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// A wait group that never admits more than [`size`](Self::size) units at once
///
/// Cloning yields another handle onto the same group; the counters are shared,
/// never duplicated.
///
/// # Blocking
///
/// - `add` with a positive delta blocks while the group is full
/// - `wait` blocks until nothing is outstanding
/// - everything else returns immediately
///
/// There is no timeout. A unit that is admitted and never released holds its
/// slot forever, and `wait` will not return.
#[derive(Clone)]
pub struct SizedWaitGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    gate: AdmissionGate,
    counter: CompletionCounter,
}

impl SizedWaitGroup {
    /// Create a group admitting at most `limit` units at once
    ///
    /// A `limit` of zero or less means [`UNBOUNDED_LIMIT`](crate::UNBOUNDED_LIMIT).
    ///
    /// # Example
    ///
    /// ```rust
    /// use sizedwaitgroup::{SizedWaitGroup, UNBOUNDED_LIMIT};
    ///
    /// assert_eq!(SizedWaitGroup::new(10).size(), 10);
    /// assert_eq!(SizedWaitGroup::new(-1).size(), UNBOUNDED_LIMIT);
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
        debug!(size, "created sized wait group");
        Self {
            inner: Arc::new(GroupInner {
                gate: AdmissionGate::new(size),
                counter: CompletionCounter::default(),
            }),
        }
    }

    /// Admit (`delta > 0`) or release (`delta < 0`) units of work
    ///
    /// Each admitted unit is counted first and then waits for a free slot, so
    /// this blocks while the group is full. Releasing behaves like calling
    /// [`done`](Self::done) `|delta|` times.
    ///
    /// # Panics
    ///
    /// Panics if `delta` is negative and more units are released than are
    /// admitted. Units released before running dry stay released.
    pub fn add(&self, delta: isize) {
        if let Err(err) = self.checked_add(delta) {
            panic!("{err}");
        }
    }

    /// [`add`](Self::add) that reports over-release instead of panicking
    ///
    /// # Errors
    ///
    /// Returns [`WaitGroupError::ExcessRelease`] if `delta` is negative and
    /// fewer than `|delta|` units are admitted.
    pub fn checked_add(&self, delta: isize) -> Result<()> {
        match delta.cmp(&0) {
            Ordering::Greater => {
                for _ in 0..delta {
                    self.admit_one();
                }
                Ok(())
            }
            Ordering::Less => self.release(delta.unsigned_abs()),
            Ordering::Equal => Ok(()),
        }
    }

    /// Mark one admitted unit as finished
    ///
    /// Frees its slot, which may unblock one caller parked in `add`, and wakes
    /// every caller of `wait` if it was the last outstanding unit.
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
    /// Returns [`WaitGroupError::ExcessRelease`] if no unit is admitted. The
    /// group is left untouched in that case.
    pub fn checked_done(&self) -> Result<()> {
        self.release(1)
    }

    /// Block until every admitted unit has been released
    ///
    /// Returns immediately if nothing is outstanding. New units may be added
    /// while or after this returns; it is a barrier for the current round only.
    pub fn wait(&self) {
        self.inner.counter.wait();
    }

    /// Admit one unit only if a slot is free right now
    ///
    /// # Example
    ///
    /// ```rust
    /// use sizedwaitgroup::SizedWaitGroup;
    ///
    /// let group = SizedWaitGroup::new(1);
    /// assert!(group.try_admit());
    /// assert!(!group.try_admit());
    /// group.done();
    /// ```
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
    ///
    /// Blocks like `add(1)`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use sizedwaitgroup::SizedWaitGroup;
    ///
    /// let group = SizedWaitGroup::new(2);
    /// {
    ///     let _slot = group.admit();
    ///     assert_eq!(group.in_flight(), 1);
    /// }
    /// assert_eq!(group.in_flight(), 0);
    /// ```
    #[must_use = "dropping the slot immediately marks the unit as done"]
    pub fn admit(&self) -> Slot {
        self.admit_one();
        Slot {
            group: self.clone(),
        }
    }

    /// Configured concurrency cap
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.gate.capacity()
    }

    /// Units counted and not yet released, including callers blocked in `add`
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.counter.value()
    }

    /// Units currently holding a slot
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.gate.in_use()
    }

    fn admit_one(&self) {
        self.inner.counter.increment();
        if self.inner.gate.is_full() {
            trace!(size = self.size(), "sized wait group full, waiting for a slot");
        }
        self.inner.gate.acquire();
    }

    // Slot first, count second: a rejected release touches nothing, and the
    // count never drops below the number of held slots.
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
    /// An unbounded group
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

/// RAII guard for one admitted unit, returned by [`SizedWaitGroup::admit`]
///
/// Dropping it has the effect of [`SizedWaitGroup::done`].
pub struct Slot {
    group: SizedWaitGroup,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Err(err) = self.group.checked_done() {
            error!(%err, "failed to release sized wait group slot");
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot").field("group", &self.group).finish()
    }
}
