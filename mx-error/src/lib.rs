//! Unified error handling for max9x
//!
//! This crate provides the single error type used across the link fabric and
//! its front-ends. It uses thiserror for Display and Error trait impls.
//!
//! The variants fall into the families the fabric reasons about:
//! configuration errors (fatal to attach), register I/O errors (retried by
//! callers with a bounded attempt count), absent devices, timeouts, and
//! programming errors such as re-isolating a link that is already isolated.

use std::io;
use std::path::PathBuf;

/// Result type alias using SerdesError
pub type Result<T> = std::result::Result<T, SerdesError>;

/// Unified error type for all max9x operations
#[derive(thiserror::Error, Debug)]
pub enum SerdesError {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid {kind} index {index} (chip has {count})")]
    InvalidIndex {
        kind: &'static str,
        index: usize,
        count: usize,
    },

    #[error("Unrecognized device id {device_id:#04x} at address {addr:#04x}")]
    UnknownDevice {
        addr: u8,
        device_id: u8,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to access file {path}: {source}")]
    FileIo {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Bus and Device Errors
    // ============================================================================
    #[error("Register access failed at {addr:#04x} reg {reg:#06x}: {reason}")]
    Io {
        addr: u8,
        reg: u16,
        reason: String,
    },

    #[error("No device answering at address {addr:#04x}")]
    NotPresent {
        addr: u8,
    },

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Regulator {name} failed: {reason}")]
    Regulator {
        name: String,
        reason: String,
    },

    // ============================================================================
    // Coordination Errors
    // ============================================================================
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Link {link} is already isolated")]
    AlreadyInProgress {
        link: usize,
    },

    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl SerdesError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a register I/O error
    pub fn io(addr: u8, reg: u16, reason: impl Into<String>) -> Self {
        Self::Io {
            addr,
            reg,
            reason: reason.into(),
        }
    }

    /// Create an index error for the given element kind
    pub fn invalid_index(kind: &'static str, index: usize, count: usize) -> Self {
        Self::InvalidIndex { kind, index, count }
    }

    /// Create a timeout error from a string
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a regulator error
    pub fn regulator(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Regulator {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that make an attach fatal (bad index or descriptor)
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidIndex { .. } | Self::UnknownDevice { .. } | Self::JsonParse(_)
        )
    }

    /// True for register access failures
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }

    pub fn is_not_present(&self) -> bool {
        matches!(self, Self::NotPresent { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<String> for SerdesError {
    fn from(s: String) -> Self {
        Self::Config(s)
    }
}

impl From<&str> for SerdesError {
    fn from(s: &str) -> Self {
        Self::Config(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(SerdesError::config("bad").is_config());
        assert!(SerdesError::invalid_index("serial link", 4, 2).is_config());
        assert!(SerdesError::io(0x48, 0x10, "nak").is_io());
        assert!(SerdesError::NotPresent { addr: 0x40 }.is_not_present());
        assert!(SerdesError::timeout("lock").is_timeout());
        assert!(!SerdesError::AlreadyInProgress { link: 0 }.is_config());
    }

    #[test]
    fn test_display_formats_addresses_in_hex() {
        let err = SerdesError::io(0x48, 0x0013, "nak");
        assert_eq!(err.to_string(), "Register access failed at 0x48 reg 0x0013: nak");

        let err = SerdesError::UnknownDevice { addr: 0x27, device_id: 0x5a };
        assert_eq!(err.to_string(), "Unrecognized device id 0x5a at address 0x27");
    }
}
