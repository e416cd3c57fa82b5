//! Data types, configuration, and validation modules
//!
//! Contains the static configuration consumed at attach and the runtime
//! element state the fabric mutates.

mod config;
mod types;
mod validation;

pub use config::{
    AliasConfig, CsiBusType, CsiConfig, DeskewPolicy, FabricConfig, LinkConfig, LinkType,
    PipeConfig, PipeMap, PipeSource, RemoteDeviceConfig, RouteConfig, TimingConfig,
};
pub use types::{
    CsiLink, CsiSnapshot, FabricSnapshot, LineFault, LineFaultStatus, LinkSnapshot, LinkState,
    RemoteDevice, SerialLink, VideoPipe,
};
pub use validation::{validate_bus_addr, validate_fabric_config};
