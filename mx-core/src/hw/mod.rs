//! Hardware collaborator interfaces
//!
//! The fabric never touches silicon directly. Register traffic goes through
//! [`RegisterBus`], power through [`Regulator`] and [`ResetLine`], and every
//! delay through [`Clock`] so tests can observe and accelerate them.

mod bus;
mod clock;
mod power;

pub use bus::{ChipIo, RegisterBus};
pub use clock::{Clock, RecordingClock, SystemClock};
pub use power::{Regulator, ResetLine};

#[cfg(test)]
pub use power::{MockRegulator, MockResetLine};
