//! Error handling and types

use thiserror::Error;

/// Misuse of a sized wait group
///
/// The only failure a wait group can report is being asked to release work it
/// never admitted. Blocking forever because `done` is never called is a caller
/// bug the group cannot observe, so it has no variant here.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitGroupError {
    /// A `done` or negative `add` asked to release more units than are admitted
    #[error(
        "sized wait group released {released} of {requested} unit(s) before running out of admitted work"
    )]
    ExcessRelease {
        /// Units the caller asked to release
        requested: usize,
        /// Units actually released before the group ran dry
        released: usize,
    },
}

/// Result type for wait group operations
pub type Result<T> = std::result::Result<T, WaitGroupError>;
