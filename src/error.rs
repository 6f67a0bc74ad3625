//! Closed error taxonomy for the guest execution core.
//!
//! `GuestException` is deliberately absent here: legitimate SH-4 exceptions
//! are always recovered internally by `sh4::interrupt` and never escape as a
//! `Result`. Everything in this enum is surfaced to the outer host, which may
//! choose to terminate the process.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// An invariant was violated: unmapped memory access, impossible
    /// register index, a code-cache entry whose key doesn't match its PC.
    /// Fatal; the caller should abort with diagnostics.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// A code path not yet written was reached.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Backing file missing or corrupt (disc image, BIOS ROM, config file).
    #[error("I/O error: {0}")]
    Io(String),

    /// Malformed maple frame, unknown TA command word, or similar recoverable
    /// protocol violation. Logged and ignored where possible by the caller;
    /// returned here so the caller can decide.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
