//! Top-level stepping loop.
//!
//! One call to [`SimulationDriver::step`] simulates one tick:
//!
//! 1. drive the reset pin,
//! 2. toggle every clock whose divisor divides the tick,
//! 3. evaluate the model,
//! 4. sample the bus clock and reset edges,
//! 5. on the falling reset edge, release reset (preload pins, run the reset hook),
//! 6. step the verification master, the bus responder, and raster capture,
//! 7. publish the trace snapshot,
//! 8. check the terminal conditions and the tick budget.

use std::fmt;

use tracing::{error, info};

use crate::api::{read_level, resolve_optional, resolve_signal};
use crate::{
    BusEvent, BusPins, BusResponder, BusState, ConfigError, DeviceModel, Diagnostics,
    DisplaySink, EdgeDetector, FrameBuffer, HarnessConfig, MasterEvent, MasterPins, MemoryImage,
    ProtocolViolation, RasterCapture, RunError, ScriptedAccess, SignalId, SignalSample,
    TraceSink, Verdict, VerificationMaster,
};

/// State visible to a caller-supplied termination predicate.
#[derive(Debug, Clone, Copy)]
pub struct TickContext<'a> {
    /// Tick just simulated.
    pub tick: u64,
    /// Counters including this tick.
    pub diagnostics: &'a Diagnostics,
    /// Most recent acknowledged bus transfer.
    pub last_bus_event: Option<BusEvent>,
    /// Byte address of [`TickContext::last_bus_event`].
    pub last_byte_address: Option<u64>,
    /// Size of the memory image in bytes.
    pub memory_bytes: usize,
    /// Reset has been released.
    pub reset_released: bool,
}

/// Why a run stopped without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TerminationReason {
    /// The model raised its finished flag or pin.
    Finished,
    /// The caller's termination predicate returned `true`.
    Predicate,
    /// Every scripted access completed as expected.
    ScriptComplete,
    /// A scripted access failed; see [`RunOutcome::verdict`].
    VerificationFailed,
}

/// Result of one [`SimulationDriver::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepOutcome {
    /// No terminal condition yet.
    Continue,
    /// The run has ended. Further steps return the same outcome.
    Terminated(TerminationReason),
}

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Ticks simulated.
    pub ticks: u64,
    /// Terminal condition that ended the run.
    pub reason: TerminationReason,
    /// Final counters.
    pub diagnostics: Diagnostics,
    /// Verification verdict when a script was installed.
    pub verdict: Option<Verdict>,
}

type TerminationPredicate = Box<dyn FnMut(&TickContext<'_>) -> bool>;
type ResetHook = Box<dyn FnMut(&mut dyn DeviceModel)>;

#[derive(Debug, Clone)]
struct ResetLine {
    id: SignalId,
    config: crate::ResetConfig,
    preload: Vec<(SignalId, u64)>,
}

/// Owns a device model and drives it tick by tick.
///
/// The model is finalized exactly once: at the end of [`SimulationDriver::run`],
/// by an explicit [`SimulationDriver::finalize`], or when the driver is dropped.
pub struct SimulationDriver<M: DeviceModel> {
    model: M,
    memory: MemoryImage,
    clocks: Vec<(SignalId, crate::ClockConfig)>,
    reset: Option<ResetLine>,
    reset_edge: EdgeDetector,
    reset_released: bool,
    finished_pin: Option<SignalId>,
    bus_clock: Option<(SignalId, EdgeDetector)>,
    bus: Option<BusResponder>,
    address_shift: u32,
    raster: Option<RasterCapture>,
    master_pins: Option<MasterPins>,
    master: Option<VerificationMaster>,
    trace: Option<Box<dyn TraceSink>>,
    traced: Vec<(String, SignalId)>,
    termination: Option<TerminationPredicate>,
    reset_hook: Option<ResetHook>,
    diagnostics: Diagnostics,
    last_bus_event: Option<BusEvent>,
    max_ticks: Option<u64>,
    tick: u64,
    halted: Option<Result<TerminationReason, RunError>>,
    finalized: bool,
}

impl<M: DeviceModel> fmt::Debug for SimulationDriver<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationDriver")
            .field("tick", &self.tick)
            .field("reset_released", &self.reset_released)
            .field("bus", &self.bus)
            .field("raster", &self.raster)
            .field("diagnostics", &self.diagnostics)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

impl<M: DeviceModel> SimulationDriver<M> {
    /// Assembles a harness around `model`.
    ///
    /// Every configured pin is resolved here; nothing is looked up by name
    /// once the run starts. The model is finalized when assembly fails.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for invalid configuration values, an
    /// undersized memory image, or pins the model does not expose.
    pub fn new(
        model: M,
        memory: MemoryImage,
        config: HarnessConfig,
    ) -> Result<Self, ConfigError> {
        let mut driver = Self {
            model,
            memory,
            clocks: Vec::new(),
            reset: None,
            reset_edge: EdgeDetector::new(),
            reset_released: false,
            finished_pin: None,
            bus_clock: None,
            bus: None,
            address_shift: crate::DEFAULT_ADDRESS_SHIFT,
            raster: None,
            master_pins: None,
            master: None,
            trace: None,
            traced: Vec::new(),
            termination: None,
            reset_hook: None,
            diagnostics: Diagnostics::new(),
            last_bus_event: None,
            max_ticks: config.max_ticks,
            tick: 0,
            halted: None,
            finalized: false,
        };
        driver.assemble(config)?;
        Ok(driver)
    }

    fn assemble(&mut self, config: HarnessConfig) -> Result<(), ConfigError> {
        config.validate()?;

        self.clocks = config
            .clocks
            .into_iter()
            .map(|clock| Ok((resolve_signal(&self.model, &clock.signal)?, clock)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        self.reset = config
            .reset
            .map(|reset| {
                let preload = reset
                    .preload
                    .iter()
                    .map(|(name, value)| Ok((resolve_signal(&self.model, name)?, *value)))
                    .collect::<Result<Vec<_>, ConfigError>>()?;
                Ok::<_, ConfigError>(ResetLine {
                    id: resolve_signal(&self.model, &reset.signal)?,
                    config: reset,
                    preload,
                })
            })
            .transpose()?;
        // Reset counts as asserted before the first tick.
        self.reset_edge.update(true);
        self.finished_pin = resolve_optional(&self.model, config.finished_signal.as_deref())?;

        if let Some(bus) = &config.bus {
            if self.memory.len_bytes() < bus.min_image_bytes {
                return Err(ConfigError::ImageTooSmall {
                    len: self.memory.len_bytes(),
                    required: bus.min_image_bytes,
                });
            }
            if let Some(word) = bus.read_only_from_word {
                self.memory.set_read_only_from(word)?;
            }
            self.address_shift = bus.address_shift;
            self.bus = Some(BusResponder::new(&mut self.model, bus)?);
        }
        if config.bus.is_some() || config.master.is_some() {
            let name = config
                .bus
                .as_ref()
                .map_or_else(|| BusPins::default().clock, |bus| bus.pins.clock.clone());
            self.bus_clock = Some((resolve_signal(&self.model, &name)?, EdgeDetector::new()));
        }
        self.raster = config
            .video
            .as_ref()
            .map(|video| RasterCapture::new(&self.model, video))
            .transpose()?;
        self.master_pins = config.master;
        Ok(())
    }

    /// Sends flushed frames to `sink`. Ignored without video capture.
    #[must_use]
    pub fn with_display_sink(mut self, sink: Box<dyn DisplaySink>) -> Self {
        if let Some(raster) = self.raster.as_mut() {
            raster.set_sink(sink);
        }
        self
    }

    /// Publishes the named pins and every bus acknowledge to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSignal`] for an unknown pin name.
    pub fn with_trace_sink(
        mut self,
        sink: Box<dyn TraceSink>,
        signals: &[&str],
    ) -> Result<Self, ConfigError> {
        self.traced = signals
            .iter()
            .map(|name| Ok(((*name).to_owned(), resolve_signal(&self.model, name)?)))
            .collect::<Result<_, ConfigError>>()?;
        self.trace = Some(sink);
        Ok(self)
    }

    /// Ends the run when `predicate` returns `true` after a tick.
    #[must_use]
    pub fn with_termination(
        mut self,
        predicate: impl FnMut(&TickContext<'_>) -> bool + 'static,
    ) -> Self {
        self.termination = Some(Box::new(predicate));
        self
    }

    /// Runs `hook` once, on the tick reset is released.
    #[must_use]
    pub fn with_reset_hook(mut self, hook: impl FnMut(&mut dyn DeviceModel) + 'static) -> Self {
        self.reset_hook = Some(Box::new(hook));
        self
    }

    /// Replays `script` on the master port; the run ends when it completes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingMasterPins`] when the configuration has
    /// no master port, or [`ConfigError::MissingSignal`] for its pins.
    pub fn with_script(mut self, script: Vec<ScriptedAccess>) -> Result<Self, ConfigError> {
        let pins = self
            .master_pins
            .as_ref()
            .ok_or(ConfigError::MissingMasterPins)?;
        self.master = Some(VerificationMaster::new(&mut self.model, pins, script)?);
        Ok(self)
    }

    /// Device model under test.
    #[must_use]
    pub const fn model(&self) -> &M {
        &self.model
    }

    /// Mutable access to the device model between ticks.
    #[allow(clippy::missing_const_for_fn)]
    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    /// Memory image served on the bus.
    #[must_use]
    pub const fn memory(&self) -> &MemoryImage {
        &self.memory
    }

    /// Counters so far.
    #[must_use]
    pub const fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Ticks simulated so far.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Frame currently being captured.
    #[must_use]
    pub fn frame(&self) -> Option<&FrameBuffer> {
        self.raster.as_ref().map(RasterCapture::frame)
    }

    /// Bus responder phase.
    #[must_use]
    pub fn bus_state(&self) -> Option<BusState> {
        self.bus.as_ref().map(BusResponder::state)
    }

    /// Verification verdict once the script has ended.
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        self.master.as_ref().and_then(VerificationMaster::verdict)
    }

    /// Simulates one tick.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Protocol`] for an aborting violation and
    /// [`RunError::Timeout`] once the tick budget is exhausted. The driver
    /// is halted afterwards and keeps returning the same error.
    pub fn step(&mut self) -> Result<StepOutcome, RunError> {
        if let Some(halted) = &self.halted {
            return halted.clone().map(StepOutcome::Terminated);
        }
        let outcome = self.simulate_tick();
        match &outcome {
            Ok(StepOutcome::Continue) => {}
            Ok(StepOutcome::Terminated(reason)) => self.halted = Some(Ok(*reason)),
            Err(err) => self.halted = Some(Err(err.clone())),
        }
        outcome
    }

    /// Steps until a terminal condition, then finalizes the model.
    ///
    /// Without a tick budget or termination predicate this only returns once
    /// the model finishes.
    ///
    /// # Errors
    ///
    /// Returns the error that stopped the run; see [`SimulationDriver::step`].
    pub fn run(&mut self) -> Result<RunOutcome, RunError> {
        let result = loop {
            match self.step() {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Terminated(reason)) => break Ok(reason),
                Err(err) => break Err(err),
            }
        };
        self.finalize();
        let reason = result?;

        let verdict = self.verdict();
        info!(
            ticks = self.tick,
            ?reason,
            ?verdict,
            reads = self.diagnostics.reads,
            writes = self.diagnostics.writes,
            frames = self.diagnostics.frames,
            "run complete"
        );
        Ok(RunOutcome {
            ticks: self.tick,
            reason,
            diagnostics: self.diagnostics,
            verdict,
        })
    }

    /// Puts the model into its terminated state. Later calls do nothing.
    pub fn finalize(&mut self) {
        if !self.finalized {
            self.finalized = true;
            self.model.finalize();
        }
    }

    fn simulate_tick(&mut self) -> Result<StepOutcome, RunError> {
        let tick = self.tick;

        let reset_asserted = self.reset.as_ref().is_some_and(|reset| {
            self.model.write(reset.id, reset.config.level_at(tick));
            tick < reset.config.hold_ticks
        });
        for (id, clock) in &self.clocks {
            if clock.toggles_at(tick) {
                let level = !read_level(&self.model, *id);
                self.model.write(*id, u64::from(level));
            }
        }

        self.model.evaluate();

        let bus_edge = self.bus_clock.as_mut().is_some_and(|(id, detector)| {
            detector.update(read_level(&self.model, *id));
            detector.rising()
        });
        self.reset_edge.update(reset_asserted);
        if self.reset_edge.falling() {
            self.release_reset(tick);
        }

        let (script_end, bus_event) = if bus_edge {
            self.bus_clock_edge(tick)?
        } else {
            (None, None)
        };
        if let Some(raster) = self.raster.as_mut() {
            raster.step(&self.model, &mut self.diagnostics);
        }
        if bus_event.is_some() {
            self.last_bus_event = bus_event;
        }

        if let Some(sink) = self.trace.as_mut() {
            let samples: Vec<SignalSample<'_>> = self
                .traced
                .iter()
                .map(|(name, id)| SignalSample {
                    name,
                    value: self.model.read(*id),
                })
                .collect();
            sink.on_tick(tick, &samples);
            if let Some(event) = &bus_event {
                sink.on_bus_event(tick, event);
            }
        }

        self.tick = tick + 1;
        if let Some(reason) = self.terminal_condition(tick, script_end) {
            return Ok(StepOutcome::Terminated(reason));
        }
        if self.max_ticks.is_some_and(|limit| self.tick >= limit) {
            error!(
                ticks = self.tick,
                reads = self.diagnostics.reads,
                writes = self.diagnostics.writes,
                "tick budget exhausted"
            );
            return Err(RunError::Timeout {
                ticks: self.tick,
                diagnostics: Box::new(self.diagnostics),
            });
        }
        Ok(StepOutcome::Continue)
    }

    fn bus_clock_edge(
        &mut self,
        tick: u64,
    ) -> Result<(Option<Verdict>, Option<BusEvent>), RunError> {
        let mut script_end = None;
        if let Some(master) = self.master.as_mut() {
            match master.on_rising_edge(&mut self.model, &mut self.diagnostics, self.reset_released)
            {
                Ok(MasterEvent::Finished(verdict)) => script_end = Some(verdict),
                Ok(_) => {}
                Err(violation) => return Err(Self::abort(tick, violation)),
            }
        }
        let Some(bus) = self.bus.as_mut() else {
            return Ok((script_end, None));
        };
        let scripted = self.master.as_ref().and_then(VerificationMaster::in_flight);
        match bus.on_rising_edge(&mut self.model, &mut self.memory, &mut self.diagnostics, scripted) {
            Ok(event) => Ok((script_end, event)),
            Err(violation) => Err(Self::abort(tick, violation)),
        }
    }

    fn release_reset(&mut self, tick: u64) {
        self.reset_released = true;
        if let Some(reset) = &self.reset {
            for (id, value) in &reset.preload {
                self.model.write(*id, *value);
            }
        }
        if let Some(hook) = self.reset_hook.as_mut() {
            hook(&mut self.model);
        }
        info!(tick, "reset released");
    }

    fn abort(tick: u64, violation: ProtocolViolation) -> RunError {
        error!(tick, %violation, "protocol violation, aborting run");
        RunError::Protocol { tick, violation }
    }

    fn terminal_condition(
        &mut self,
        tick: u64,
        script_end: Option<Verdict>,
    ) -> Option<TerminationReason> {
        if self.model.finished()
            || self
                .finished_pin
                .is_some_and(|pin| read_level(&self.model, pin))
        {
            return Some(TerminationReason::Finished);
        }
        match script_end {
            Some(Verdict::Pass) => return Some(TerminationReason::ScriptComplete),
            Some(Verdict::Fail(_)) => return Some(TerminationReason::VerificationFailed),
            None => {}
        }
        let predicate = self.termination.as_mut()?;
        let context = TickContext {
            tick,
            diagnostics: &self.diagnostics,
            last_bus_event: self.last_bus_event,
            last_byte_address: self
                .last_bus_event
                .map(|event| u64::from(event.address) << self.address_shift),
            memory_bytes: self.memory.len_bytes(),
            reset_released: self.reset_released,
        };
        predicate(&context).then_some(TerminationReason::Predicate)
    }
}

impl<M: DeviceModel> Drop for SimulationDriver<M> {
    fn drop(&mut self) {
        self.finalize();
    }
}
