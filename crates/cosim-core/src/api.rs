//! Host-facing contracts between the harness core and its collaborators.
//!
//! The device model, the display sink, and the trace recorder are all
//! external. The core only talks to them through the traits in this module.

use crate::{BusEvent, ConfigError, FrameBuffer};

/// Opaque handle for a device-model pin, resolved once from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(usize);

impl SignalId {
    /// Wraps a model-specific pin index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the model-specific pin index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Clocked device model driven by the harness.
///
/// `evaluate` propagates the model's logic to a fixed point for the current
/// input values. It is invoked exactly once per simulation tick.
pub trait DeviceModel {
    /// Resolves a pin name to its handle.
    fn signal(&self, name: &str) -> Option<SignalId>;

    /// Reads the current value of a pin.
    fn read(&self, id: SignalId) -> u64;

    /// Drives an input pin.
    fn write(&mut self, id: SignalId, value: u64);

    /// Propagates the model for the current inputs.
    fn evaluate(&mut self);

    /// Model-raised "simulation finished" flag.
    fn finished(&self) -> bool {
        false
    }

    /// Brings the model into its terminated state. Called once per run.
    fn finalize(&mut self) {}
}

/// Consumer of completed frames.
pub trait DisplaySink {
    /// Receives the frame flushed on a vertical-sync edge.
    fn present(&mut self, frame: &FrameBuffer, frame_index: u64);
}

/// Value of one monitored pin at the end of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalSample<'a> {
    /// Configured pin name.
    pub name: &'a str,
    /// Pin value after evaluation and bus response.
    pub value: u64,
}

/// Per-tick observer used for external waveform recording.
///
/// Installing or omitting a sink never changes simulation behaviour.
pub trait TraceSink {
    /// Called once at the end of every tick.
    fn on_tick(&mut self, tick: u64, signals: &[SignalSample<'_>]);

    /// Called for every acknowledge the bus responder drives.
    fn on_bus_event(&mut self, _tick: u64, _event: &BusEvent) {}
}

/// Resolves a configured pin name or reports it missing.
pub(crate) fn resolve_signal(model: &dyn DeviceModel, name: &str) -> Result<SignalId, ConfigError> {
    model.signal(name).ok_or_else(|| ConfigError::MissingSignal {
        name: name.to_owned(),
    })
}

/// Resolves an optional pin name.
pub(crate) fn resolve_optional(
    model: &dyn DeviceModel,
    name: Option<&str>,
) -> Result<Option<SignalId>, ConfigError> {
    name.map(|name| resolve_signal(model, name)).transpose()
}

/// Reads a pin as a level.
pub(crate) fn read_level(model: &dyn DeviceModel, id: SignalId) -> bool {
    model.read(id) != 0
}

/// Reads the low 32 bits of a pin.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn read_word(model: &dyn DeviceModel, id: SignalId) -> u32 {
    model.read(id) as u32
}

/// Name-indexed pin storage for hand-written device models.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignalTable {
    names: Vec<String>,
    values: Vec<u64>,
}

impl SignalTable {
    /// Creates a table with every pin at zero.
    #[must_use]
    pub fn with_signals(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|name| (*name).to_owned()).collect(),
            values: vec![0; names.len()],
        }
    }

    /// Resolves a pin name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<SignalId> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .map(SignalId::new)
    }

    /// Reads a pin, returning zero for unknown handles.
    #[must_use]
    pub fn get(&self, id: SignalId) -> u64 {
        self.values.get(id.index()).copied().unwrap_or(0)
    }

    /// Writes a pin; unknown handles are ignored.
    pub fn set(&mut self, id: SignalId, value: u64) {
        if let Some(slot) = self.values.get_mut(id.index()) {
            *slot = value;
        }
    }

    /// Reads a pin by name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<u64> {
        self.lookup(name).map(|id| self.get(id))
    }

    /// Writes a pin by name, returning `false` when it does not exist.
    pub fn set_value(&mut self, name: &str, value: u64) -> bool {
        match self.lookup(name) {
            Some(id) => {
                self.set(id, value);
                true
            }
            None => false,
        }
    }

    /// Reads a pin by name as a level.
    #[must_use]
    pub fn high(&self, name: &str) -> bool {
        self.value(name).is_some_and(|value| value != 0)
    }
}
