use thiserror::Error;

use crate::Diagnostics;

/// Error classes used for run-result aggregation and policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// The device model broke the bus or verification protocol.
    Protocol,
    /// The tick budget ran out before a terminal condition.
    Timeout,
    /// The harness could not be assembled from its inputs.
    Configuration,
}

/// Bus protocol defects attributable to the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ProtocolViolation {
    /// Write targeted a word beyond the memory image.
    #[error("write to bus address {address:#x} beyond the {limit_words}-word memory image")]
    WriteOutOfBounds {
        /// Bus address as driven by the model.
        address: u32,
        /// Size of the memory image in words.
        limit_words: usize,
    },
    /// Write targeted the read-only part of the memory image.
    #[error("write to read-only bus address {address:#x}")]
    WriteToReadOnly {
        /// Bus address as driven by the model.
        address: u32,
    },
    /// Model request direction disagrees with the scripted access in flight.
    #[error("write-enable mismatch at bus address {address:#x} (scripted write: {expected_write})")]
    WriteEnableMismatch {
        /// Bus address as driven by the model.
        address: u32,
        /// Direction of the scripted access.
        expected_write: bool,
    },
    /// Acknowledge observed on the verification port with nothing pending.
    #[error("acknowledge observed without a pending request")]
    UnsolicitedAck,
}

impl ProtocolViolation {
    /// Violations whose severity is decided by [`crate::ViolationPolicy`].
    ///
    /// The remaining kinds always abort the run.
    #[must_use]
    pub const fn is_policy_controlled(self) -> bool {
        matches!(
            self,
            Self::WriteOutOfBounds { .. } | Self::WriteToReadOnly { .. }
        )
    }
}

/// Harness assembly failures. Only raised while constructing a driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    /// A configured pin name is not exposed by the device model.
    #[error("device model has no signal named `{name}`")]
    MissingSignal {
        /// Configured pin name.
        name: String,
    },
    /// Memory image has no bytes.
    #[error("memory image is empty")]
    EmptyImage,
    /// Memory image length is not a whole number of 32-bit words.
    #[error("memory image length {len} is not a multiple of 4 bytes")]
    MisalignedImage {
        /// Offending length in bytes.
        len: usize,
    },
    /// Memory image is smaller than the configured minimum.
    #[error("memory image holds {len} bytes, {required} required")]
    ImageTooSmall {
        /// Supplied length in bytes.
        len: usize,
        /// Configured minimum in bytes.
        required: usize,
    },
    /// A host load would not fit inside the image.
    #[error("load of {len} bytes at offset {offset:#x} exceeds the {size}-byte image")]
    LoadOutOfRange {
        /// Byte offset of the load.
        offset: usize,
        /// Length of the loaded data.
        len: usize,
        /// Size of the image in bytes.
        size: usize,
    },
    /// Read-only boundary lies beyond the image.
    #[error("read-only boundary word {word} lies beyond the {len_words}-word image")]
    ReadOnlyBoundary {
        /// Requested first read-only word.
        word: usize,
        /// Size of the image in words.
        len_words: usize,
    },
    /// Clock divisor of zero can never toggle.
    #[error("clock `{signal}` has a zero divisor")]
    ZeroClockDivisor {
        /// Configured clock pin name.
        signal: String,
    },
    /// Bus address shift must convert to byte addresses without loss.
    #[error("bus address shift {0} is outside 0..=2")]
    InvalidAddressShift(u32),
    /// Colour channel width cannot be widened to a byte.
    #[error("channel width {0} is outside 1..=8 bits")]
    InvalidChannelWidth(u8),
    /// Frame geometry has a zero dimension.
    #[error("frame geometry {width}x{height} is empty")]
    EmptyFrame {
        /// Configured width in pixels.
        width: usize,
        /// Configured height in pixels.
        height: usize,
    },
    /// Verification script installed without master-port pins.
    #[error("verification script requires master port pins")]
    MissingMasterPins,
    /// Requested image size does not fit in memory.
    #[error("memory image of {words} words is too large")]
    ImageTooLarge {
        /// Requested size in words.
        words: usize,
    },
}

impl ConfigError {
    /// Returns the aggregation class for this failure.
    #[must_use]
    pub const fn class(&self) -> FaultClass {
        FaultClass::Configuration
    }
}

/// Malformed line in a verification access script.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("script line {line}: {reason}")]
pub struct ScriptParseError {
    /// One-based line number; zero when parsing a lone access.
    pub line: usize,
    /// What was wrong with the line.
    pub reason: String,
}

/// Terminal failure of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    /// Protocol violation surfaced to the caller.
    #[error("protocol violation at tick {tick}: {violation}")]
    Protocol {
        /// Tick on which the violation was observed.
        tick: u64,
        /// Violation detail.
        violation: ProtocolViolation,
    },
    /// Tick budget exhausted without reaching a terminal condition.
    #[error("no terminal condition after {ticks} ticks")]
    Timeout {
        /// Ticks simulated before giving up.
        ticks: u64,
        /// Counters as of the last simulated tick.
        diagnostics: Box<Diagnostics>,
    },
}

impl RunError {
    /// Returns the aggregation class for this failure.
    #[must_use]
    pub const fn class(&self) -> FaultClass {
        match self {
            Self::Protocol { .. } => FaultClass::Protocol,
            Self::Timeout { .. } => FaultClass::Timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, FaultClass, ProtocolViolation, RunError};
    use crate::Diagnostics;

    #[test]
    fn only_memory_writes_follow_violation_policy() {
        assert!(ProtocolViolation::WriteOutOfBounds {
            address: 0,
            limit_words: 0
        }
        .is_policy_controlled());
        assert!(ProtocolViolation::WriteToReadOnly { address: 0 }.is_policy_controlled());
        assert!(!ProtocolViolation::WriteEnableMismatch {
            address: 0,
            expected_write: true
        }
        .is_policy_controlled());
        assert!(!ProtocolViolation::UnsolicitedAck.is_policy_controlled());
    }

    #[test]
    fn class_mapping_matches_taxonomy() {
        let protocol = RunError::Protocol {
            tick: 3,
            violation: ProtocolViolation::UnsolicitedAck,
        };
        let timeout = RunError::Timeout {
            ticks: 10,
            diagnostics: Box::default(),
        };
        let config = ConfigError::EmptyImage;

        assert_eq!(protocol.class(), FaultClass::Protocol);
        assert_eq!(timeout.class(), FaultClass::Timeout);
        assert_eq!(config.class(), FaultClass::Configuration);
    }

    #[test]
    fn messages_carry_addresses_in_hex() {
        let violation = ProtocolViolation::WriteOutOfBounds {
            address: 0x40_0000,
            limit_words: 16,
        };
        assert_eq!(
            violation.to_string(),
            "write to bus address 0x400000 beyond the 16-word memory image"
        );

        let timeout = RunError::Timeout {
            ticks: 99,
            diagnostics: Box::new(Diagnostics::default()),
        };
        assert_eq!(timeout.to_string(), "no terminal condition after 99 ticks");
    }
}
