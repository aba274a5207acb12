//! sizedwaitgroup: a wait group that bounds how much work runs at once
//!
//! Launching thousands of tasks against a shared resource (a database, a remote
//! API, a disk) is easy; keeping only a handful of them in flight is not.
//! [`SizedWaitGroup`] has the familiar `add` / `done` / `wait` surface of a wait
//! group, but `add` blocks once `size` units are admitted and only resumes when
//! one of them calls `done`.
//!
//! The group does not run anything itself. Spawn threads (or async tasks, see
//! the `compio-sync` crate) however you like and bracket each one with
//! `add(1)` and `done()`.
//!
//! # Example
//!
//! ```rust
//! use sizedwaitgroup::SizedWaitGroup;
//! use std::thread;
//!
//! let group = SizedWaitGroup::new(2);
//!
//! for query in 0..5 {
//!     let slot = group.admit(); // at most 2 queries hold a slot
//!     thread::spawn(move || {
//!         println!("query {query}");
//!         drop(slot);
//!     });
//! }
//!
//! group.wait();
//! ```

mod counter;
pub mod error;
mod gate;
pub mod limit;
mod wait_group;

// Re-export commonly used types
pub use error::{Result, WaitGroupError};
pub use limit::{cpu_limit, effective_limit, UNBOUNDED_LIMIT};
pub use wait_group::{SizedWaitGroup, Slot};
