//! Async sized wait group for the compio runtime
//!
//! This crate provides the async flavour of
//! [`sizedwaitgroup::SizedWaitGroup`]: a wait group whose `add` suspends the
//! calling task once `size` units are in flight. The futures are plain std
//! futures, so any executor can drive them; the crate is tested on
//! [compio](https://github.com/compio-rs/compio).
//!
//! # Primitives
//!
//! - [`SizedWaitGroup`] - Async wait group bounding concurrency
//! - [`Slot`] - RAII guard for one admitted unit
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_sync::SizedWaitGroup;
//!
//! #[compio::main]
//! async fn main() {
//!     let group = SizedWaitGroup::new(100);
//!
//!     // Spawn many tasks, but only 100 run concurrently
//!     for i in 0..1000 {
//!         let slot = group.admit().await;
//!         compio::runtime::spawn(async move {
//!             println!("Task {}", i);
//!             drop(slot);
//!         })
//!         .detach();
//!     }
//!
//!     group.wait().await;
//! }
//! ```

mod counter;
mod gate;
mod wait_group;

pub use sizedwaitgroup::{Result, WaitGroupError, UNBOUNDED_LIMIT};
pub use wait_group::{SizedWaitGroup, Slot};
