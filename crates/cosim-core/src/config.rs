//! Harness configuration: pin names, clock domains, reset, bus and video policy.
//!
//! Defaults reproduce the Archimedes bench wiring: a Wishbone memory port
//! clocked by `CLKCPU_I`, a pixel clock derived from `CLKPIX2X_I`, and a
//! 4-bit-per-channel video output.

use crate::ConfigError;

/// Ticks during which reset is held asserted by default.
pub const DEFAULT_RESET_HOLD_TICKS: u64 = 33;
/// Default frame width in pixels.
pub const DEFAULT_FRAME_WIDTH: usize = 800;
/// Default frame height in pixels.
pub const DEFAULT_FRAME_HEIGHT: usize = 524;
/// Default colour channel width in bits.
pub const DEFAULT_CHANNEL_BITS: u8 = 4;
/// Wishbone cycle-type code for an incrementing burst.
pub const INCREMENTING_BURST_CYCLE_TYPE: u64 = 2;
/// Default bus address shift (word-addressed bus).
pub const DEFAULT_ADDRESS_SHIFT: u32 = 2;
/// Default tick budget, enough for several full frames at the default clocks.
pub const DEFAULT_MAX_TICKS: u64 = 50_000_000;

/// A harness-driven clock or strobe input.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ClockConfig {
    /// Pin toggled by the harness.
    pub signal: String,
    /// The pin toggles on every tick `t` with `t % divisor == 0`.
    pub divisor: u64,
    /// First tick on which toggling is allowed.
    pub start_tick: u64,
}

impl ClockConfig {
    /// Creates a clock that toggles from tick zero.
    #[must_use]
    pub fn new(signal: impl Into<String>, divisor: u64) -> Self {
        Self {
            signal: signal.into(),
            divisor,
            start_tick: 0,
        }
    }

    /// Delays the first toggle until `tick`.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn starting_at(mut self, tick: u64) -> Self {
        self.start_tick = tick;
        self
    }

    /// Returns `true` when the clock toggles on `tick`.
    #[must_use]
    pub const fn toggles_at(&self, tick: u64) -> bool {
        tick >= self.start_tick && self.divisor != 0 && tick % self.divisor == 0
    }
}

/// Reset line handling.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ResetConfig {
    /// Reset input pin.
    pub signal: String,
    /// Reset is asserted on every tick below this count.
    pub hold_ticks: u64,
    /// Level that asserts reset.
    pub active_high: bool,
    /// Pin values written once when reset is released.
    pub preload: Vec<(String, u64)>,
}

impl ResetConfig {
    /// Active-high reset held for [`DEFAULT_RESET_HOLD_TICKS`].
    #[must_use]
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
            hold_ticks: DEFAULT_RESET_HOLD_TICKS,
            active_high: true,
            preload: Vec::new(),
        }
    }

    /// Pin level for the given tick.
    #[must_use]
    pub const fn level_at(&self, tick: u64) -> u64 {
        let asserted = tick < self.hold_ticks;
        if asserted == self.active_high {
            1
        } else {
            0
        }
    }
}

/// Severity of out-of-bounds and read-only writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum ViolationPolicy {
    /// Stop the run with [`crate::RunError::Protocol`].
    #[default]
    Abort,
    /// Log, count, and continue.
    Record,
}

/// Acknowledge timing for read bursts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum BurstTiming {
    /// Acknowledge drops for one bus clock between beats.
    #[default]
    WaitState,
    /// Acknowledge stays asserted and a new word is staged every bus clock.
    Pipelined,
}

/// Memory port pin names, from the model's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusPins {
    /// Bus clock sampled for rising edges.
    pub clock: String,
    /// Strobe output.
    pub strobe: String,
    /// Cycle output.
    pub cycle: String,
    /// Write-enable output.
    pub write_enable: String,
    /// 4-bit byte-select output.
    pub byte_select: String,
    /// Address output.
    pub address: String,
    /// Write data driven by the model.
    pub write_data: String,
    /// Read data driven by the harness.
    pub read_data: String,
    /// Acknowledge driven by the harness.
    pub ack: String,
    /// Cycle-type output used for burst continuation.
    pub cycle_type: Option<String>,
}

impl Default for BusPins {
    fn default() -> Self {
        Self {
            clock: "CLKCPU_I".to_owned(),
            strobe: "MEM_STB_O".to_owned(),
            cycle: "MEM_CYC_O".to_owned(),
            write_enable: "MEM_WE_O".to_owned(),
            byte_select: "MEM_SEL_O".to_owned(),
            address: "MEM_ADDR_O".to_owned(),
            write_data: "MEM_DAT_O".to_owned(),
            read_data: "MEM_DAT_I".to_owned(),
            ack: "MEM_ACK_I".to_owned(),
            cycle_type: Some("MEM_CTI_O".to_owned()),
        }
    }
}

/// Memory port behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BusConfig {
    /// Pin names.
    pub pins: BusPins,
    /// Bus address to byte address conversion (`byte = addr << shift`).
    pub address_shift: u32,
    /// Word returned for reads beyond the image.
    pub sentinel: u32,
    /// Cycle-type code that continues a read burst.
    pub burst_cycle_type: u64,
    /// Acknowledge timing between burst beats.
    pub burst_timing: BurstTiming,
    /// Extra bus clocks before each serviced beat.
    ///
    /// Pipelined burst continuations are staged without waiting.
    pub wait_states: u32,
    /// Severity of rejected writes.
    pub violation_policy: ViolationPolicy,
    /// First word of the read-only region, if any.
    pub read_only_from_word: Option<usize>,
    /// Smallest acceptable memory image in bytes.
    pub min_image_bytes: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            pins: BusPins::default(),
            address_shift: DEFAULT_ADDRESS_SHIFT,
            sentinel: 0,
            burst_cycle_type: INCREMENTING_BURST_CYCLE_TYPE,
            burst_timing: BurstTiming::default(),
            wait_states: 0,
            violation_policy: ViolationPolicy::default(),
            read_only_from_word: None,
            min_image_bytes: 4,
        }
    }
}

/// Which raw transition of a sync line delimits frames or rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SyncEdge {
    /// Low to high.
    #[default]
    Rising,
    /// High to low.
    Falling,
}

/// Level at which the sync lines are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SyncPolarity {
    /// Sync pulses drive the line high; video is active while both are low.
    ActiveHigh,
    /// Sync pulses drive the line low; video is active while both are high.
    #[default]
    ActiveLow,
}

/// Video output pin names.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VideoPins {
    /// Pixel clock sampled for rising edges.
    pub pixel_clock: String,
    /// Horizontal sync.
    pub hsync: String,
    /// Vertical sync.
    pub vsync: String,
    /// Dedicated display-enable line; sync levels are used when absent.
    pub display_enable: Option<String>,
    /// Red channel.
    pub red: String,
    /// Green channel.
    pub green: String,
    /// Blue channel.
    pub blue: String,
}

impl Default for VideoPins {
    fn default() -> Self {
        Self {
            pixel_clock: "CLKPIX_O".to_owned(),
            hsync: "HSYNC".to_owned(),
            vsync: "VSYNC".to_owned(),
            display_enable: None,
            red: "VIDEO_R".to_owned(),
            green: "VIDEO_G".to_owned(),
            blue: "VIDEO_B".to_owned(),
        }
    }
}

/// Raster capture behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct VideoConfig {
    /// Pin names.
    pub pins: VideoPins,
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Width of each colour channel in bits.
    pub channel_bits: u8,
    /// Vsync transition that flushes the frame.
    pub vsync_edge: SyncEdge,
    /// Hsync transition that starts a new row.
    pub hsync_edge: SyncEdge,
    /// Sync level used to derive display enable.
    pub sync_polarity: SyncPolarity,
    /// Frames with fewer rows are not presented.
    pub min_rows_for_flush: usize,
    /// Zero the buffer after each flush.
    pub clear_on_flush: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            pins: VideoPins::default(),
            width: DEFAULT_FRAME_WIDTH,
            height: DEFAULT_FRAME_HEIGHT,
            channel_bits: DEFAULT_CHANNEL_BITS,
            vsync_edge: SyncEdge::default(),
            hsync_edge: SyncEdge::default(),
            sync_polarity: SyncPolarity::default(),
            min_rows_for_flush: 0,
            clear_on_flush: false,
        }
    }
}

/// Slave-port pin names used by the verification master.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MasterPins {
    /// Strobe input.
    pub strobe: String,
    /// Cycle input.
    pub cycle: String,
    /// Write-enable input.
    pub write_enable: String,
    /// Byte-select input.
    pub byte_select: String,
    /// Byte address input.
    pub address: String,
    /// Write data driven by the harness.
    pub write_data: String,
    /// Read data returned by the model.
    pub read_data: String,
    /// Acknowledge output.
    pub ack: String,
    /// Error output, if the port has one.
    pub error: Option<String>,
}

impl Default for MasterPins {
    fn default() -> Self {
        Self {
            strobe: "cpu_stb".to_owned(),
            cycle: "cpu_cyc".to_owned(),
            write_enable: "cpu_we".to_owned(),
            byte_select: "cpu_sel".to_owned(),
            address: "cpu_address".to_owned(),
            write_data: "cpu_dat_o".to_owned(),
            read_data: "cpu_dat_i".to_owned(),
            ack: "cpu_ack".to_owned(),
            error: Some("cpu_err".to_owned()),
        }
    }
}

/// Top-level configuration for one harness run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct HarnessConfig {
    /// Harness-toggled clocks, in toggle order.
    pub clocks: Vec<ClockConfig>,
    /// Reset sequencing.
    pub reset: Option<ResetConfig>,
    /// Model output that signals completion.
    pub finished_signal: Option<String>,
    /// Memory port; absent for video-only benches.
    pub bus: Option<BusConfig>,
    /// Video capture; absent for bus-only benches.
    pub video: Option<VideoConfig>,
    /// Verification master port.
    pub master: Option<MasterPins>,
    /// Tick budget; `None` runs until another terminal condition.
    ///
    /// Defaults to [`DEFAULT_MAX_TICKS`].
    pub max_ticks: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            clocks: vec![
                ClockConfig::new("CLKCPU_I", 2),
                ClockConfig::new("CLKPIX2X_I", 3),
            ],
            reset: Some(ResetConfig::new("RESET_I")),
            finished_signal: None,
            bus: Some(BusConfig::default()),
            video: Some(VideoConfig::default()),
            master: None,
            max_ticks: Some(DEFAULT_MAX_TICKS),
        }
    }
}

impl HarnessConfig {
    /// Checks the value constraints that do not depend on the device model.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(clock) = self.clocks.iter().find(|clock| clock.divisor == 0) {
            return Err(ConfigError::ZeroClockDivisor {
                signal: clock.signal.clone(),
            });
        }
        if let Some(bus) = &self.bus {
            if bus.address_shift > 2 {
                return Err(ConfigError::InvalidAddressShift(bus.address_shift));
            }
        }
        if let Some(video) = &self.video {
            if !(1..=8).contains(&video.channel_bits) {
                return Err(ConfigError::InvalidChannelWidth(video.channel_bits));
            }
            if video.width == 0 || video.height == 0 {
                return Err(ConfigError::EmptyFrame {
                    width: video.width,
                    height: video.height,
                });
            }
        }
        Ok(())
    }
}
