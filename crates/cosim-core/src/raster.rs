//! Raster capture: samples a video output into a frame buffer.
//!
//! Each step resolves at most one action, in priority order: a vertical-sync
//! edge flushes the frame, a horizontal-sync edge starts the next row, and a
//! pixel-clock rising edge stores one pixel while display-enable is asserted.

use std::fmt;

use tracing::debug;

use crate::api::{read_level, resolve_optional, resolve_signal};
use crate::{
    ConfigError, DeviceModel, Diagnostics, DisplaySink, EdgeDetector, SignalId, SyncEdge,
    SyncPolarity, VideoConfig,
};

/// Bytes per stored pixel: blue, green, red, padding.
pub const BYTES_PER_PIXEL: usize = 4;

/// Widens a `bits`-wide colour channel to 8 bits by bit replication.
///
/// A 4-bit channel becomes `v << 4 | v`; a 1-bit channel becomes `0x00` or
/// `0xFF`. Bits above the channel width are ignored.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_lossless)]
pub const fn widen_channel(value: u64, bits: u8) -> u8 {
    if bits == 0 {
        return 0;
    }
    let bits = if bits > 8 { 8 } else { bits as u32 };
    let channel = value & ((1u64 << bits) - 1);
    let mut widened = 0u64;
    let mut filled = 0u32;
    while filled < 8 {
        widened = (widened << bits) | channel;
        filled += bits;
    }
    ((widened >> (filled - 8)) & 0xFF) as u8
}

/// Captured frame, row-major, four bytes per pixel.
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: usize,
    height: usize,
    pixels: Box<[u8]>,
    written: usize,
}

impl FrameBuffer {
    /// Allocates a zeroed `width` by `height` frame.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyFrame`] when either dimension is zero or
    /// the buffer size does not fit in memory.
    pub fn new(width: usize, height: usize) -> Result<Self, ConfigError> {
        let len = width
            .checked_mul(height)
            .and_then(|count| count.checked_mul(BYTES_PER_PIXEL))
            .filter(|len| *len > 0)
            .ok_or(ConfigError::EmptyFrame { width, height })?;
        Ok(Self {
            width,
            height,
            pixels: vec![0; len].into_boxed_slice(),
            written: 0,
        })
    }

    /// Frame width in pixels.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    #[must_use]
    pub const fn height(&self) -> usize {
        self.height
    }

    /// Raw pixel bytes in blue, green, red, padding order.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixels stored since the last flush.
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    const fn offset(&self, column: usize, row: usize) -> Option<usize> {
        if column < self.width && row < self.height {
            Some((row * self.width + column) * BYTES_PER_PIXEL)
        } else {
            None
        }
    }

    /// Returns the `[blue, green, red, padding]` bytes of one pixel.
    #[must_use]
    pub fn pixel(&self, column: usize, row: usize) -> Option<[u8; BYTES_PER_PIXEL]> {
        let start = self.offset(column, row)?;
        let mut pixel = [0; BYTES_PER_PIXEL];
        pixel.copy_from_slice(&self.pixels[start..start + BYTES_PER_PIXEL]);
        Some(pixel)
    }

    /// Stores one pixel. Returns `false` outside the frame.
    pub fn put_pixel(&mut self, column: usize, row: usize, red: u8, green: u8, blue: u8) -> bool {
        let Some(start) = self.offset(column, row) else {
            return false;
        };
        self.pixels[start..start + BYTES_PER_PIXEL].copy_from_slice(&[blue, green, red, 0]);
        self.written = self.written.saturating_add(1);
        true
    }

    /// Zero-fills the frame.
    pub fn clear(&mut self) {
        self.pixels.fill(0);
        self.written = 0;
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("written", &self.written)
            .finish_non_exhaustive()
    }
}

/// Position of the next pixel in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct RasterCursor {
    /// Zero-based column.
    pub column: usize,
    /// Zero-based row.
    pub row: usize,
}

/// Action taken by one capture step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RasterEvent {
    /// Vertical sync: the frame was flushed and the cursor reset.
    FrameSync {
        /// Zero-based index of the frame that ended.
        frame_index: u64,
        /// Rows captured in the frame.
        rows: usize,
        /// Whether the frame met the row threshold and was flushed.
        flushed: bool,
    },
    /// Horizontal sync: the cursor moved to the start of `row`.
    LineSync {
        /// New row.
        row: usize,
    },
    /// A pixel was stored at this position.
    Pixel(RasterCursor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VideoSignals {
    pixel_clock: SignalId,
    hsync: SignalId,
    vsync: SignalId,
    display_enable: Option<SignalId>,
    red: SignalId,
    green: SignalId,
    blue: SignalId,
}

const fn edge_fired(detector: &EdgeDetector, edge: SyncEdge) -> bool {
    match edge {
        SyncEdge::Rising => detector.rising(),
        SyncEdge::Falling => detector.falling(),
    }
}

/// Frame grabber driven by the model's video pins.
pub struct RasterCapture {
    signals: VideoSignals,
    channel_bits: u8,
    vsync_edge: SyncEdge,
    hsync_edge: SyncEdge,
    polarity: SyncPolarity,
    min_rows_for_flush: usize,
    clear_on_flush: bool,
    pixel_clock: EdgeDetector,
    hsync: EdgeDetector,
    vsync: EdgeDetector,
    frame: FrameBuffer,
    cursor: RasterCursor,
    frame_index: u64,
    sink: Option<Box<dyn DisplaySink>>,
}

impl fmt::Debug for RasterCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RasterCapture")
            .field("cursor", &self.cursor)
            .field("frame_index", &self.frame_index)
            .field("frame", &self.frame)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl RasterCapture {
    /// Resolves the video pins and allocates the frame buffer.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unresolved pins, a channel width outside
    /// `1..=8`, or empty frame geometry.
    pub fn new(model: &dyn DeviceModel, config: &VideoConfig) -> Result<Self, ConfigError> {
        if !(1..=8).contains(&config.channel_bits) {
            return Err(ConfigError::InvalidChannelWidth(config.channel_bits));
        }
        let pins = &config.pins;
        let signals = VideoSignals {
            pixel_clock: resolve_signal(model, &pins.pixel_clock)?,
            hsync: resolve_signal(model, &pins.hsync)?,
            vsync: resolve_signal(model, &pins.vsync)?,
            display_enable: resolve_optional(model, pins.display_enable.as_deref())?,
            red: resolve_signal(model, &pins.red)?,
            green: resolve_signal(model, &pins.green)?,
            blue: resolve_signal(model, &pins.blue)?,
        };

        Ok(Self {
            signals,
            channel_bits: config.channel_bits,
            vsync_edge: config.vsync_edge,
            hsync_edge: config.hsync_edge,
            polarity: config.sync_polarity,
            min_rows_for_flush: config.min_rows_for_flush,
            clear_on_flush: config.clear_on_flush,
            pixel_clock: EdgeDetector::new(),
            hsync: EdgeDetector::new(),
            vsync: EdgeDetector::new(),
            frame: FrameBuffer::new(config.width, config.height)?,
            cursor: RasterCursor::default(),
            frame_index: 0,
            sink: None,
        })
    }

    /// Installs the consumer of flushed frames.
    pub fn set_sink(&mut self, sink: Box<dyn DisplaySink>) {
        self.sink = Some(sink);
    }

    /// Frame being captured.
    #[must_use]
    pub const fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    /// Position of the next pixel.
    #[must_use]
    pub const fn cursor(&self) -> RasterCursor {
        self.cursor
    }

    /// Vertical-sync edges seen so far.
    #[must_use]
    pub const fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Samples the video pins after the model has been evaluated.
    pub fn step(&mut self, model: &dyn DeviceModel, diag: &mut Diagnostics) -> Option<RasterEvent> {
        let hsync_level = read_level(model, self.signals.hsync);
        let vsync_level = read_level(model, self.signals.vsync);
        self.pixel_clock
            .update(read_level(model, self.signals.pixel_clock));
        self.hsync.update(hsync_level);
        self.vsync.update(vsync_level);

        if edge_fired(&self.vsync, self.vsync_edge) {
            return Some(self.end_frame(diag));
        }
        if edge_fired(&self.hsync, self.hsync_edge) {
            self.cursor.row = self.cursor.row.saturating_add(1);
            self.cursor.column = 0;
            return Some(RasterEvent::LineSync {
                row: self.cursor.row,
            });
        }
        if !self.pixel_clock.rising() || !self.display_enabled(model, hsync_level, vsync_level) {
            return None;
        }

        let at = self.cursor;
        let red = self.channel(model, self.signals.red);
        let green = self.channel(model, self.signals.green);
        let blue = self.channel(model, self.signals.blue);
        if self.frame.put_pixel(at.column, at.row, red, green, blue) {
            self.cursor.column += 1;
            Some(RasterEvent::Pixel(at))
        } else {
            None
        }
    }

    fn display_enabled(&self, model: &dyn DeviceModel, hsync: bool, vsync: bool) -> bool {
        match self.signals.display_enable {
            Some(pin) => read_level(model, pin),
            None => match self.polarity {
                SyncPolarity::ActiveLow => hsync && vsync,
                SyncPolarity::ActiveHigh => !hsync && !vsync,
            },
        }
    }

    fn channel(&self, model: &dyn DeviceModel, pin: SignalId) -> u8 {
        widen_channel(model.read(pin), self.channel_bits)
    }

    fn end_frame(&mut self, diag: &mut Diagnostics) -> RasterEvent {
        let frame_index = self.frame_index;
        let rows = self.cursor.row;
        let flushed = rows >= self.min_rows_for_flush;
        if flushed {
            if let Some(sink) = self.sink.as_mut() {
                sink.present(&self.frame, frame_index);
            }
            diag.record_frame();
            debug!(
                frame_index,
                rows,
                pixels = self.frame.written(),
                "frame flushed"
            );
            if self.clear_on_flush {
                self.frame.clear();
            }
        } else {
            debug!(frame_index, rows, "runt frame skipped");
        }
        self.frame.written = 0;
        self.cursor = RasterCursor::default();
        self.frame_index = self.frame_index.saturating_add(1);
        RasterEvent::FrameSync {
            frame_index,
            rows,
            flushed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SignalTable;
    use rstest::rstest;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct VideoModel(SignalTable);

    impl VideoModel {
        fn new() -> Self {
            Self(SignalTable::with_signals(&[
                "CLKPIX_O", "HSYNC", "VSYNC", "VIDEO_R", "VIDEO_G", "VIDEO_B", "DE",
            ]))
        }

        fn set(&mut self, name: &str, value: u64) {
            assert!(self.0.set_value(name, value));
        }
    }

    impl DeviceModel for VideoModel {
        fn signal(&self, name: &str) -> Option<SignalId> {
            self.0.lookup(name)
        }

        fn read(&self, id: SignalId) -> u64 {
            self.0.get(id)
        }

        fn write(&mut self, id: SignalId, value: u64) {
            self.0.set(id, value);
        }

        fn evaluate(&mut self) {}
    }

    #[derive(Default)]
    struct Frames(Rc<RefCell<Vec<(u64, usize)>>>);

    impl DisplaySink for Frames {
        fn present(&mut self, frame: &FrameBuffer, frame_index: u64) {
            self.0.borrow_mut().push((frame_index, frame.written()));
        }
    }

    fn small_config() -> VideoConfig {
        VideoConfig {
            width: 3,
            height: 2,
            ..VideoConfig::default()
        }
    }

    /// Drives one pixel-clock period with the given colour.
    fn pixel(capture: &mut RasterCapture, model: &mut VideoModel, diag: &mut Diagnostics, rgb: u64) {
        model.set("VIDEO_R", (rgb >> 8) & 0xF);
        model.set("VIDEO_G", (rgb >> 4) & 0xF);
        model.set("VIDEO_B", rgb & 0xF);
        model.set("CLKPIX_O", 1);
        capture.step(model, diag);
        model.set("CLKPIX_O", 0);
        capture.step(model, diag);
    }

    #[rstest]
    #[case(0x0, 4, 0x00)]
    #[case(0xA, 4, 0xAA)]
    #[case(0xF, 4, 0xFF)]
    #[case(0x1F, 4, 0xFF)]
    #[case(1, 1, 0xFF)]
    #[case(0, 1, 0x00)]
    #[case(0b101, 3, 0b1011_0110)]
    #[case(0x5A, 8, 0x5A)]
    fn widening_replicates_bits(#[case] value: u64, #[case] bits: u8, #[case] expected: u8) {
        assert_eq!(widen_channel(value, bits), expected);
    }

    #[test]
    fn frame_buffer_rejects_empty_geometry() {
        assert_eq!(
            FrameBuffer::new(0, 4).err(),
            Some(ConfigError::EmptyFrame {
                width: 0,
                height: 4
            })
        );
    }

    #[test]
    fn frame_buffer_stores_bgr_padding() {
        let mut frame = FrameBuffer::new(2, 2).expect("frame");
        assert!(frame.put_pixel(1, 1, 0x11, 0x22, 0x33));
        assert!(!frame.put_pixel(2, 0, 0, 0, 0));
        assert_eq!(frame.pixel(1, 1), Some([0x33, 0x22, 0x11, 0]));
        assert_eq!(frame.written(), 1);
        frame.clear();
        assert_eq!(frame.pixel(1, 1), Some([0; 4]));
    }

    #[test]
    fn captures_pixels_between_syncs() {
        let mut model = VideoModel::new();
        model.set("HSYNC", 1);
        model.set("VSYNC", 1);
        let mut capture = RasterCapture::new(&model, &small_config()).expect("pins");
        let mut diag = Diagnostics::new();
        capture.step(&model, &mut diag);

        pixel(&mut capture, &mut model, &mut diag, 0xF00);
        pixel(&mut capture, &mut model, &mut diag, 0x0F0);
        assert_eq!(capture.cursor(), RasterCursor { column: 2, row: 0 });
        assert_eq!(capture.frame().pixel(0, 0), Some([0, 0, 0xFF, 0]));
        assert_eq!(capture.frame().pixel(1, 0), Some([0, 0xFF, 0, 0]));

        model.set("HSYNC", 0);
        capture.step(&model, &mut diag);
        model.set("HSYNC", 1);
        assert_eq!(
            capture.step(&model, &mut diag),
            Some(RasterEvent::LineSync { row: 1 })
        );
        pixel(&mut capture, &mut model, &mut diag, 0x00F);
        assert_eq!(capture.frame().pixel(0, 1), Some([0xFF, 0, 0, 0]));
    }

    #[test]
    fn blanking_suppresses_pixels() {
        let mut model = VideoModel::new();
        let mut capture = RasterCapture::new(&model, &small_config()).expect("pins");
        let mut diag = Diagnostics::new();
        capture.step(&model, &mut diag);

        pixel(&mut capture, &mut model, &mut diag, 0xFFF);
        assert_eq!(capture.frame().written(), 0);
        assert_eq!(capture.cursor(), RasterCursor::default());
    }

    #[test]
    fn display_enable_pin_overrides_sync_levels() {
        let mut model = VideoModel::new();
        let config = VideoConfig {
            pins: crate::VideoPins {
                display_enable: Some("DE".to_owned()),
                ..crate::VideoPins::default()
            },
            ..small_config()
        };
        let mut capture = RasterCapture::new(&model, &config).expect("pins");
        let mut diag = Diagnostics::new();
        capture.step(&model, &mut diag);

        model.set("DE", 1);
        pixel(&mut capture, &mut model, &mut diag, 0x123);
        assert_eq!(capture.frame().pixel(0, 0), Some([0x33, 0x22, 0x11, 0]));
    }

    #[test]
    fn active_high_syncs_capture_while_both_low() {
        let mut model = VideoModel::new();
        let config = VideoConfig {
            sync_polarity: SyncPolarity::ActiveHigh,
            ..small_config()
        };
        let mut capture = RasterCapture::new(&model, &config).expect("pins");
        let mut diag = Diagnostics::new();
        capture.step(&model, &mut diag);

        pixel(&mut capture, &mut model, &mut diag, 0xFFF);
        assert_eq!(capture.frame().written(), 1);
    }

    #[test]
    fn vertical_sync_wins_over_horizontal_and_pixel() {
        let mut model = VideoModel::new();
        let frames = Frames::default();
        let seen = Rc::clone(&frames.0);
        let mut capture = RasterCapture::new(&model, &small_config()).expect("pins");
        capture.set_sink(Box::new(frames));
        let mut diag = Diagnostics::new();
        capture.step(&model, &mut diag);

        model.set("HSYNC", 1);
        model.set("VSYNC", 1);
        model.set("CLKPIX_O", 1);
        let event = capture.step(&model, &mut diag);
        assert_eq!(
            event,
            Some(RasterEvent::FrameSync {
                frame_index: 0,
                rows: 0,
                flushed: true
            })
        );
        assert_eq!(capture.cursor(), RasterCursor::default());
        assert_eq!(capture.frame().written(), 0);
        assert_eq!(*seen.borrow(), vec![(0, 0)]);
        assert_eq!(diag.frames, 1);
    }

    #[test]
    fn falling_vsync_edge_can_delimit_frames() {
        let mut model = VideoModel::new();
        let config = VideoConfig {
            vsync_edge: SyncEdge::Falling,
            ..small_config()
        };
        let mut capture = RasterCapture::new(&model, &config).expect("pins");
        let mut diag = Diagnostics::new();
        capture.step(&model, &mut diag);

        model.set("VSYNC", 1);
        assert_eq!(capture.step(&model, &mut diag), None);
        model.set("VSYNC", 0);
        assert!(matches!(
            capture.step(&model, &mut diag),
            Some(RasterEvent::FrameSync { .. })
        ));
    }

    #[test]
    fn runt_frames_are_not_presented() {
        let mut model = VideoModel::new();
        let frames = Frames::default();
        let seen = Rc::clone(&frames.0);
        let config = VideoConfig {
            min_rows_for_flush: 2,
            clear_on_flush: true,
            ..small_config()
        };
        let mut capture = RasterCapture::new(&model, &config).expect("pins");
        capture.set_sink(Box::new(frames));
        let mut diag = Diagnostics::new();
        model.set("HSYNC", 1);
        capture.step(&model, &mut diag);

        let toggle_vsync = |capture: &mut RasterCapture, model: &mut VideoModel, diag: &mut Diagnostics| {
            model.set("VSYNC", 1);
            let event = capture.step(model, diag);
            model.set("VSYNC", 0);
            capture.step(model, diag);
            event
        };
        let toggle_hsync = |capture: &mut RasterCapture, model: &mut VideoModel, diag: &mut Diagnostics| {
            model.set("HSYNC", 0);
            capture.step(model, diag);
            model.set("HSYNC", 1);
            capture.step(model, diag);
        };

        let runt = toggle_vsync(&mut capture, &mut model, &mut diag);
        assert_eq!(
            runt,
            Some(RasterEvent::FrameSync {
                frame_index: 0,
                rows: 0,
                flushed: false
            })
        );

        toggle_hsync(&mut capture, &mut model, &mut diag);
        toggle_hsync(&mut capture, &mut model, &mut diag);
        let full = toggle_vsync(&mut capture, &mut model, &mut diag);
        assert_eq!(
            full,
            Some(RasterEvent::FrameSync {
                frame_index: 1,
                rows: 2,
                flushed: true
            })
        );
        assert_eq!(*seen.borrow(), vec![(1, 0)]);
        assert_eq!(diag.frames, 1);
    }
}
