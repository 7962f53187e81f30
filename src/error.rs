//! # Error Taxonomy
//!
//! Every fallible kernel operation returns `Result<_, KernelError>`.
//! Errors are always returned, never thrown: the kernel allocates nothing
//! on an error path and leaves the failing object untouched. The only
//! non-recoverable condition is an internal invariant violation, which
//! takes the fatal path in [`crate::fault`] instead of surfacing here.

/// Recoverable kernel error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Malformed argument: out-of-range priority, zero-sized queue item,
    /// stale handle.
    InvalidParam,
    /// Operation inconsistent with the current kernel or object state:
    /// double init, start before init, unlock by a non-owner.
    InvalidState,
    /// Static pool or arena exhausted.
    NoMemory,
    /// A finite-timeout wait elapsed without the resource appearing.
    Timeout,
    /// Non-blocking send found the queue full.
    Full,
    /// Non-blocking receive found the queue empty.
    Empty,
    /// Semaphore signalled past its maximum count; the signal was not
    /// applied.
    Overflow,
    /// Catch-all for unanticipated failures, e.g. recursive lock depth
    /// exhausted.
    General,
}
