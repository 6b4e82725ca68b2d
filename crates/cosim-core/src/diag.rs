//! Run diagnostics counters and verification verdicts.

use crate::ProtocolViolation;

/// Counters maintained by the harness across a run.
///
/// All counters saturate instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Diagnostics {
    /// Bytes returned to the model by serviced reads.
    pub bytes_read: u64,
    /// Bytes merged into memory by serviced writes.
    pub bytes_written: u64,
    /// Serviced read beats, including burst continuations.
    pub reads: u64,
    /// Serviced write transactions.
    pub writes: u64,
    /// Read bursts started.
    pub bursts: u64,
    /// Beats delivered after the first word of a burst.
    pub burst_beats: u64,
    /// Acknowledge pulses or beats driven to the model.
    pub acknowledges: u64,
    /// Reads beyond the memory image answered with the sentinel.
    pub out_of_bounds_reads: u64,
    /// Writes beyond the image or into its read-only part.
    pub out_of_bounds_writes: u64,
    /// Protocol violations observed, whether recorded or aborting.
    pub protocol_violations: u64,
    /// Most recent protocol violation.
    pub last_violation: Option<ProtocolViolation>,
    /// Frames flushed to the display sink.
    pub frames: u64,
    /// Scripted verification accesses completed.
    pub verified_accesses: u64,
}

impl Diagnostics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a serviced read of `bytes` bytes.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_read(&mut self, bytes: u64) {
        self.reads = self.reads.saturating_add(1);
        self.bytes_read = self.bytes_read.saturating_add(bytes);
    }

    /// Records a serviced write that touched `bytes` byte lanes.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_write(&mut self, bytes: u64) {
        self.writes = self.writes.saturating_add(1);
        self.bytes_written = self.bytes_written.saturating_add(bytes);
    }

    /// Records the start of a read burst.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_burst(&mut self) {
        self.bursts = self.bursts.saturating_add(1);
    }

    /// Records a burst continuation beat.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_burst_beat(&mut self) {
        self.burst_beats = self.burst_beats.saturating_add(1);
    }

    /// Records an acknowledge driven to the model.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_acknowledge(&mut self) {
        self.acknowledges = self.acknowledges.saturating_add(1);
    }

    /// Records a read answered with the sentinel.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_out_of_bounds_read(&mut self) {
        self.out_of_bounds_reads = self.out_of_bounds_reads.saturating_add(1);
    }

    /// Records a protocol violation and, for rejected writes, the write counter.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_violation(&mut self, violation: ProtocolViolation) {
        if violation.is_policy_controlled() {
            self.out_of_bounds_writes = self.out_of_bounds_writes.saturating_add(1);
        }
        self.protocol_violations = self.protocol_violations.saturating_add(1);
        self.last_violation = Some(violation);
    }

    /// Records a frame flush.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Records a completed scripted access.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_verified_access(&mut self) {
        self.verified_accesses = self.verified_accesses.saturating_add(1);
    }

    /// Resets every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Why a scripted verification run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum VerificationFailure {
    /// Read-back data differed from the scripted expectation.
    ReadMismatch {
        /// Zero-based index of the access in the script.
        index: usize,
        /// Scripted address.
        address: u32,
        /// Expected read data.
        expected: u32,
        /// Data observed on the master port.
        actual: u32,
    },
    /// The device raised its error line for a scripted access.
    DataAbort {
        /// Zero-based index of the access in the script.
        index: usize,
        /// Scripted address.
        address: u32,
    },
}

/// Pass/fail result of a harness-driven verification scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Verdict {
    /// Every scripted access completed with the expected data.
    Pass,
    /// The script stopped at the first failing access.
    Fail(VerificationFailure),
}

impl Verdict {
    /// Returns `true` for [`Verdict::Pass`].
    #[must_use]
    pub const fn passed(self) -> bool {
        matches!(self, Self::Pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_counters_are_zero() {
        let diag = Diagnostics::default();
        assert_eq!(diag.bytes_read, 0);
        assert_eq!(diag.acknowledges, 0);
        assert_eq!(diag.last_violation, None);
    }

    #[test]
    fn read_and_write_accumulate_bytes() {
        let mut diag = Diagnostics::new();
        diag.record_read(4);
        diag.record_read(4);
        diag.record_write(2);
        assert_eq!(diag.reads, 2);
        assert_eq!(diag.bytes_read, 8);
        assert_eq!(diag.writes, 1);
        assert_eq!(diag.bytes_written, 2);
    }

    #[test]
    fn counters_saturate() {
        let mut diag = Diagnostics {
            acknowledges: u64::MAX,
            bytes_read: u64::MAX - 1,
            ..Diagnostics::default()
        };
        diag.record_acknowledge();
        diag.record_read(4);
        assert_eq!(diag.acknowledges, u64::MAX);
        assert_eq!(diag.bytes_read, u64::MAX);
    }

    #[test]
    fn violations_track_last_and_write_rejections() {
        let mut diag = Diagnostics::new();
        diag.record_violation(ProtocolViolation::WriteToReadOnly { address: 0x10 });
        diag.record_violation(ProtocolViolation::UnsolicitedAck);
        assert_eq!(diag.protocol_violations, 2);
        assert_eq!(diag.out_of_bounds_writes, 1);
        assert_eq!(diag.last_violation, Some(ProtocolViolation::UnsolicitedAck));

        diag.reset();
        assert_eq!(diag, Diagnostics::default());
    }

    #[test]
    fn verdict_pass_helper() {
        assert!(Verdict::Pass.passed());
        assert!(!Verdict::Fail(VerificationFailure::DataAbort {
            index: 0,
            address: 0
        })
        .passed());
    }
}
