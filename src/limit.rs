//! Concurrency limit normalization
//!
//! A wait group is built from a signed limit so that callers can pass `0` or a
//! negative number to mean "no limit". These helpers turn that request into the
//! capacity the admission gate is actually created with.

/// Capacity used when no positive limit is requested (2^32 - 1)
pub const UNBOUNDED_LIMIT: usize = 4_294_967_295;

/// Resolve a requested limit into the gate capacity
///
/// Positive values are used as-is; zero and negative values mean unbounded.
///
/// # Example
///
/// ```rust
/// use sizedwaitgroup::{effective_limit, UNBOUNDED_LIMIT};
///
/// assert_eq!(effective_limit(8), 8);
/// assert_eq!(effective_limit(0), UNBOUNDED_LIMIT);
/// assert_eq!(effective_limit(-1), UNBOUNDED_LIMIT);
/// ```
#[must_use]
pub fn effective_limit(requested: isize) -> usize {
    match usize::try_from(requested) {
        Ok(limit) if limit > 0 => limit,
        _ => UNBOUNDED_LIMIT,
    }
}

/// Number of logical CPUs, never less than one
#[must_use]
pub fn cpu_limit() -> usize {
    std::cmp::max(1, num_cpus::get())
}
