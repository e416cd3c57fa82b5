//! Hardware simulator
//!
//! Used by the command-line dry runs and by tests. Nothing here is needed
//! when driving real silicon.

mod board;
mod bus;
mod power;

pub use board::{SimConfig, SimDeviceConfig};
pub use bus::{BusOp, Collision, SimBus, SimDevice};
pub use power::{SimRegulator, SimResetLine};
