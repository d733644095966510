//! Kernel error taxonomy.
//!
//! Every failure in the kernel is exactly one of:
//! - a Non-Action (`types::Outcome::NonAction`) — a terminal refusal value,
//!   not an error type;
//! - a [`ValidationError`] — a record constructor rejected its inputs;
//! - a [`KernelError::InvariantViolation`] — a caller reached for something
//!   the kernel forbids structurally (direct execution, registration after
//!   lock);
//! - a [`ProhibitedBehaviorError`](crate::negative::ProhibitedBehaviorError)
//!   — a negative-capability trap fired;
//! - a [`CapabilityError`] — a capability-local refusal, converted at the
//!   final gate into Non-Action `execution_failed`.

use thiserror::Error;

use crate::negative::ProhibitedBehaviorError;

/// Constructor rejection for the immutable value records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Context: {0}")]
    Context(String),
    #[error("Intent: {0}")]
    Intent(String),
    #[error("Principal: {0}")]
    Principal(String),
    #[error("Grant: {0}")]
    Grant(String),
    #[error("RevocationEvent: {0}")]
    Revocation(String),
    #[error("CapabilityContract: {0}")]
    Contract(String),
}

/// Errors that indicate a bug in the caller or a forbidden structural move.
///
/// These crash loudly; they are never converted into a Non-Action.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A kernel invariant was violated (direct execution attempt,
    /// registration after lock, duplicate registration).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A negative-capability trap fired.
    #[error(transparent)]
    Prohibited(#[from] ProhibitedBehaviorError),

    /// A record constructor rejected its inputs.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Append-only store persistence failed.
    #[error("storage: {0}")]
    Storage(String),

    /// Configuration could not be read or parsed.
    #[error("config: {0}")]
    Config(String),
}

/// A capability-local refusal raised by a capability's execution function.
///
/// The guard catches these at the execution gate and converts them into
/// Non-Action `execution_failed`, preserving `refusal` and `details`.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{refusal}] {details}")]
pub struct CapabilityError {
    /// Machine-readable refusal code from the capability's own taxonomy.
    pub refusal: String,
    /// Human-readable detail.
    pub details: String,
}

impl CapabilityError {
    pub fn new(refusal: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            refusal: refusal.into(),
            details: details.into(),
        }
    }
}
