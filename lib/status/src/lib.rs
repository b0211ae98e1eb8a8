//! The typed status codes shared by every reactor-facing operation.
//!
//! Fatal programmer-error conditions (broken invariants, bad owner tags, pool
//! corruption) are not represented here: those are reported with
//! [`invariant`] and turn into a panic, matching the policy that environment
//! failures and programmer errors are distinct error channels.

use std::fmt;

/// Outcome of a reactor-facing operation that can fail for reasons other than
/// a broken invariant.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Status {
    /// Operation completed.
    Ok,
    /// Unspecified failure; see the accompanying log message for context.
    Generic,
    /// A fixed-size buffer or slot pool has no room left.
    OutOfBuffer,
    /// A retry was attempted and also failed.
    RetryFailed,
    /// The requested key/handle does not exist.
    NotFound,
    /// The key is already present.
    Occupied,
    /// The operation would block; the caller should retry on the next
    /// readiness notification.
    WouldBlock,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Ok => "ok",
            Status::Generic => "generic failure",
            Status::OutOfBuffer => "out of buffer",
            Status::RetryFailed => "retry failed",
            Status::NotFound => "not found",
            Status::Occupied => "occupied",
            Status::WouldBlock => "would block",
        };
        f.write_str(s)
    }
}

impl std::error::Error for Status {}

/// Logs a broken-invariant condition at ERROR with the call site, then
/// aborts the process.
///
/// Used for conditions that indicate a programmer error rather than an
/// environmental failure (corrupted slot pool, event owner mismatch, a null
/// reference where one is forbidden). These are never recoverable, so unlike
/// [`Status`] they are not returned to the caller.
#[track_caller]
pub fn invariant(condition: bool, message: &str) {
    if !condition {
        let loc = std::panic::Location::caller();
        log::error!(
            "[invariant violation] {message} at {}:{}:{}",
            loc.file(),
            loc.line(),
            loc.column()
        );
        panic!("invariant violation: {message}");
    }
}
