//! max9x Core Library
//!
//! Common core for GMSL serializer and deserializer bridges.
//!
//! # Features
//!
//! - **Chip Dispatch**: Capability tables for the MAX9295, MAX96717, MAX9296 and MAX96724
//! - **Isolation**: One link at a time is made exclusively reachable so identical remotes never collide
//! - **Address Translation**: Remote devices are moved off their shared factory address
//! - **Link Bring-up**: Lock, pipes and CSI links with an exponential backoff ladder
//! - **Power Sequencing**: Idempotent enable/disable, suspend and resume
//! - **Routing**: Stream routes between serial-link pads and CSI pads
//!
//! # Module Structure
//!
//! - `chip/` - Descriptors, capability traits and the four chip variants
//! - `data/` - Configuration, runtime element types, validation
//! - `fabric/` - Link fabric, isolation, translation, power
//! - `hw/` - Register bus, regulator, reset line and clock interfaces
//! - `sim/` - Register-level simulator for dry runs and tests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mx_core::{Fabric, FabricConfig, LinkConfig, SimConfig};
//!
//! let bus = Arc::new(SimConfig::quad_deserializer(1).build());
//! let config = FabricConfig {
//!     name: "des0".into(),
//!     addr: 0x27,
//!     links: vec![LinkConfig::default()],
//!     ..Default::default()
//! };
//! let fabric = Fabric::builder(config, bus).attach().unwrap();
//! println!("{:?}", fabric.enabled_links());
//! ```

// Grouped modules
pub mod chip;
pub mod data;
pub mod fabric;
pub mod hw;
pub mod sim;

// Standalone modules
pub mod constants;
pub mod error;
pub mod routing;

// Re-export error types
pub use error::{Result, SerdesError};

// Re-export configuration and state types from data/
pub use data::{
    AliasConfig, CsiBusType, CsiConfig, DeskewPolicy, FabricConfig, FabricSnapshot, LineFaultStatus,
    LinkConfig, LinkState, LinkType, PipeConfig, PipeMap, PipeSource, RemoteDeviceConfig,
    RouteConfig, TimingConfig,
};
pub use data::{validate_bus_addr, validate_fabric_config};

// Re-export chip dispatch
pub use chip::{ChipDescriptor, ChipIdentity, ChipRegistry, ChipVariant, SerdesChip};

// Re-export the fabric
pub use fabric::{Alias, Fabric, FabricBuilder, IsolationGuard, LinkChannel, LinkIsolation};

// Re-export hardware interfaces
pub use hw::{ChipIo, Clock, RecordingClock, RegisterBus, Regulator, ResetLine, SystemClock};

// Re-export routing
pub use routing::{FrameDescEntry, RouteTable, StreamEndpoint};

// Re-export the simulator
pub use sim::{SimBus, SimConfig, SimDevice, SimRegulator, SimResetLine};
