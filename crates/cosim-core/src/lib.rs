//! Cycle-accurate co-simulation harness core for clocked device models.

/// Per-tick rising/falling edge detection.
pub mod edge;
pub use edge::EdgeDetector;

/// Fault taxonomy for protocol, timeout, and configuration failures.
pub mod fault;
pub use fault::{ConfigError, FaultClass, ProtocolViolation, RunError, ScriptParseError};

/// Host-facing contracts: device model, display and trace sinks.
pub mod api;
pub use api::{DeviceModel, DisplaySink, SignalId, SignalSample, SignalTable, TraceSink};

/// Harness configuration and defaults.
pub mod config;
pub use config::{
    BurstTiming, BusConfig, BusPins, ClockConfig, HarnessConfig, MasterPins, ResetConfig,
    SyncEdge, SyncPolarity, VideoConfig, VideoPins, ViolationPolicy, DEFAULT_ADDRESS_SHIFT,
    DEFAULT_CHANNEL_BITS, DEFAULT_FRAME_HEIGHT, DEFAULT_FRAME_WIDTH, DEFAULT_MAX_TICKS,
    DEFAULT_RESET_HOLD_TICKS, INCREMENTING_BURST_CYCLE_TYPE,
};

/// Word-addressed memory image served on the bus.
pub mod memory;
pub use memory::{byte_lane_mask, merge_masked, MemoryImage, WriteRejection, WORD_BYTES};

/// Memory bus responder state machine.
pub mod bus;
pub use bus::{BusEvent, BusResponder, BusState, BusTransaction};

/// Raster capture of the video output.
pub mod raster;
pub use raster::{
    widen_channel, FrameBuffer, RasterCapture, RasterCursor, RasterEvent, BYTES_PER_PIXEL,
};

/// Run counters and verification verdicts.
pub mod diag;
pub use diag::{Diagnostics, Verdict, VerificationFailure};

/// Scripted slave-port verification.
pub mod verify;
pub use verify::{parse_script, MasterEvent, ScriptedAccess, VerificationMaster};

/// Tick loop and run lifecycle.
pub mod driver;
pub use driver::{RunOutcome, SimulationDriver, StepOutcome, TerminationReason, TickContext};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
