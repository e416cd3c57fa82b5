//! Constants and configuration defaults for the link fabric
//!
//! Centralizes the retry counts, delays and register locations that are
//! shared by every chip variant. Per-chip register tables live next to the
//! chip implementations in `chip/`.

/// Timing defaults. Every value here can be overridden through
/// [`crate::data::TimingConfig`].
pub mod timing {
    /// Identity probe attempts at attach
    pub const PROBE_ATTEMPTS: u32 = 50;

    /// Delay between identity probe attempts at attach
    pub const PROBE_INTERVAL_MS: u64 = 20;

    /// Identity probe attempts at resume (hardware may not be ready yet)
    pub const RESUME_PROBE_ATTEMPTS: u32 = 50;

    /// Delay between identity probe attempts at resume
    pub const RESUME_PROBE_INTERVAL_MS: u64 = 100;

    /// First sleep of the per-link bring-up backoff ladder
    pub const BACKOFF_INITIAL_MS: u64 = 32;

    /// Largest sleep of the backoff ladder; the link is given up once the next
    /// delay would exceed it
    pub const BACKOFF_MAX_MS: u64 = 512;

    /// Poll interval while waiting for the isolation/selection predicate
    pub const ISOLATION_POLL_MS: u64 = 1;

    /// Upper bound on waiting for isolation or selection
    pub const ISOLATION_TIMEOUT_MS: u64 = 10_000;

    /// Poll interval of the link lock-status register
    pub const LOCK_POLL_MS: u64 = 10;

    /// Default link lock timeout when the chip does not supply one
    pub const LOCK_TIMEOUT_MS: u64 = 250;

    /// Width of the GPIO reset pulse
    pub const RESET_PULSE_MS: u64 = 1;

    /// Settle time after a reset before the chip accepts traffic
    pub const RESET_SETTLE_MS: u64 = 100;

    /// Settle time after writing the address-change register
    pub const REMAP_SETTLE_MS: u64 = 100;
}

/// Bus address and register locations common to the whole max9x family
pub mod regs {
    /// Device address register (bits 7:1 hold the 7-bit address)
    pub const DEV_ADDR: u16 = 0x0000;

    /// Device identifier register
    pub const DEV_ID: u16 = 0x000D;

    /// Default revision register (bits 3:0)
    pub const DEV_REV: u16 = 0x000E;

    /// Revision field mask in the revision register
    pub const DEV_REV_MASK: u8 = 0x0F;
}

/// Configuration limits
pub mod limits {
    /// Highest valid 7-bit bus address
    pub const MAX_BUS_ADDR: u8 = 0x7F;

    /// Highest CSI-2 virtual channel
    pub const MAX_VIRTUAL_CHANNEL: u8 = 15;

    /// Highest virtual channel the deserializer map registers hold
    pub const MAX_DESERIALIZER_VC: u8 = 3;

    /// Highest CSI rate the DPLL code can express, in MHz
    pub const MAX_CSI_FREQ_MHZ: u32 = 3100;

    /// Highest CSI-2 data type
    pub const MAX_DATA_TYPE: u8 = 0x3F;

    /// Maximum number of maps per video pipe
    pub const MAX_PIPE_MAPS: usize = 16;

    /// Maximum CSI lane count
    pub const MAX_CSI_LANES: u8 = 4;

    /// Alias slots per translation sub-bus
    pub const ALIAS_SLOTS_PER_BUS: usize = 2;
}
