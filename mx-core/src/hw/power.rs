//! Power collaborators

use crate::error::Result;

/// Supply rail. Enable and disable are idempotent on the provider side but
/// may fail.
#[cfg_attr(test, mockall::automock)]
pub trait Regulator: Send + Sync {
    fn enable(&self) -> Result<()>;
    fn disable(&self) -> Result<()>;
}

/// Reset GPIO. Fire-and-forget, no read-back.
#[cfg_attr(test, mockall::automock)]
pub trait ResetLine: Send + Sync {
    fn set(&self, asserted: bool);
}
