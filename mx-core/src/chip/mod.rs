//! Chip descriptors and capability dispatch
//!
//! Four variants are known out of the box: the MAX9295 and MAX96717
//! serializers and the MAX9296 and MAX96724 deserializers. Integrators can
//! register further models through [`ChipRegistry::register`].

mod descriptor;
mod identify;
mod ops;

pub mod max9295;
pub mod max9296;
pub mod max96717;
pub mod max96724;

pub use descriptor::{ChipDescriptor, ChipIdentity, ChipVariant};
pub use identify::{identify, probe_addresses, probe_device_id, resolve, ChipRegistry};
pub use ops::{
    CommonOps, CsiLinkOps, LineFaultOps, SerdesChip, SerialLinkOps, TranslationOps, VideoPipeOps,
};
