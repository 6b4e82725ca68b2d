//! Two-phase memory bus responder.
//!
//! The responder answers strobe/cycle requests from the device model against
//! a [`MemoryImage`]. Requests are only sampled on rising edges of the bus
//! clock; the caller invokes [`BusResponder::on_rising_edge`] on exactly those
//! ticks.
//!
//! ```text
//!   Idle --request--> Servicing --service--> AckHeld --edge--> Idle
//!                        ^                      |
//!                        +---burst (wait state)-+
//! ```

use tracing::warn;

use crate::api::{read_level, read_word, resolve_optional, resolve_signal};
use crate::memory::WriteRejection;
use crate::{
    BurstTiming, BusConfig, ConfigError, DeviceModel, Diagnostics, MemoryImage,
    ProtocolViolation, ScriptedAccess, SignalId, ViolationPolicy,
};

/// Transient request captured from the model's bus outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusTransaction {
    /// Address in bus units.
    pub address: u32,
    /// Direction of the transfer.
    pub is_write: bool,
    /// 4-bit byte-select mask (writes only).
    pub byte_select: u8,
    /// Read issued with the incrementing-burst cycle type.
    pub burst: bool,
}

/// Acknowledge driven to the model, published to trace sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusEvent {
    /// Address in bus units for this beat.
    pub address: u32,
    /// Direction of the transfer.
    pub is_write: bool,
    /// Word staged for reads or written for writes.
    pub data: u32,
    /// Zero for the first transfer, counting up through a burst.
    pub beat: u32,
}

/// Externally visible responder phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusState {
    /// No request in progress.
    Idle,
    /// Request accepted, waiting for its service edge.
    Servicing,
    /// Acknowledge asserted to the model.
    AckHeld,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Servicing {
        txn: BusTransaction,
        beat: u32,
        wait: u32,
    },
    AckHeld {
        txn: BusTransaction,
        beat: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BusSignals {
    clock: SignalId,
    strobe: SignalId,
    cycle: SignalId,
    write_enable: SignalId,
    byte_select: SignalId,
    address: SignalId,
    write_data: SignalId,
    read_data: SignalId,
    ack: SignalId,
    cycle_type: Option<SignalId>,
}

/// Memory-mapped bus responder with single and burst transfers.
#[derive(Debug, Clone)]
pub struct BusResponder {
    signals: BusSignals,
    address_shift: u32,
    sentinel: u32,
    burst_cycle_type: u64,
    burst_timing: BurstTiming,
    wait_states: u32,
    policy: ViolationPolicy,
    phase: Phase,
    ack: bool,
}

impl BusResponder {
    /// Resolves the configured pins and drives acknowledge low.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSignal`] for an unresolved pin and
    /// [`ConfigError::InvalidAddressShift`] for a shift above 2.
    pub fn new(model: &mut dyn DeviceModel, config: &BusConfig) -> Result<Self, ConfigError> {
        if config.address_shift > 2 {
            return Err(ConfigError::InvalidAddressShift(config.address_shift));
        }
        let pins = &config.pins;
        let signals = BusSignals {
            clock: resolve_signal(model, &pins.clock)?,
            strobe: resolve_signal(model, &pins.strobe)?,
            cycle: resolve_signal(model, &pins.cycle)?,
            write_enable: resolve_signal(model, &pins.write_enable)?,
            byte_select: resolve_signal(model, &pins.byte_select)?,
            address: resolve_signal(model, &pins.address)?,
            write_data: resolve_signal(model, &pins.write_data)?,
            read_data: resolve_signal(model, &pins.read_data)?,
            ack: resolve_signal(model, &pins.ack)?,
            cycle_type: resolve_optional(model, pins.cycle_type.as_deref())?,
        };
        model.write(signals.ack, 0);

        Ok(Self {
            signals,
            address_shift: config.address_shift,
            sentinel: config.sentinel,
            burst_cycle_type: config.burst_cycle_type,
            burst_timing: config.burst_timing,
            wait_states: config.wait_states,
            policy: config.violation_policy,
            phase: Phase::Idle,
            ack: false,
        })
    }

    /// Pin whose rising edges clock the responder.
    #[must_use]
    pub const fn clock_signal(&self) -> SignalId {
        self.signals.clock
    }

    /// Current protocol phase.
    #[must_use]
    pub const fn state(&self) -> BusState {
        match self.phase {
            Phase::Idle => BusState::Idle,
            Phase::Servicing { .. } => BusState::Servicing,
            Phase::AckHeld { .. } => BusState::AckHeld,
        }
    }

    /// Transaction currently being serviced or acknowledged.
    #[must_use]
    pub const fn pending(&self) -> Option<BusTransaction> {
        match self.phase {
            Phase::Idle => None,
            Phase::Servicing { txn, .. } | Phase::AckHeld { txn, .. } => Some(txn),
        }
    }

    /// Acknowledge level currently driven to the model.
    #[must_use]
    pub const fn ack(&self) -> bool {
        self.ack
    }

    /// Converts a bus address to a byte address.
    #[must_use]
    pub fn byte_address(&self, address: u32) -> u64 {
        u64::from(address) << self.address_shift
    }

    fn word_index(&self, address: u32) -> usize {
        usize::try_from(self.byte_address(address) >> 2).unwrap_or(usize::MAX)
    }

    const fn next_address(&self, address: u32) -> u32 {
        address.wrapping_add(1 << (2 - self.address_shift))
    }

    /// Advances the protocol by one bus-clock rising edge.
    ///
    /// `scripted` is the verification access in flight, if any; a model
    /// request at the same word with the opposite direction is reported as
    /// [`ProtocolViolation::WriteEnableMismatch`].
    ///
    /// # Errors
    ///
    /// Returns the violation when it must abort the run. Violations allowed
    /// by [`ViolationPolicy::Record`] are counted in `diag` and logged instead.
    pub fn on_rising_edge(
        &mut self,
        model: &mut dyn DeviceModel,
        memory: &mut MemoryImage,
        diag: &mut Diagnostics,
        scripted: Option<&ScriptedAccess>,
    ) -> Result<Option<BusEvent>, ProtocolViolation> {
        match self.phase {
            Phase::Idle => {
                let requested = read_level(model, self.signals.strobe)
                    && read_level(model, self.signals.cycle);
                if !requested || self.ack {
                    return Ok(None);
                }
                let txn = self.sample_request(model);
                if let Some(access) = scripted {
                    if access.word_index() == self.word_index(txn.address)
                        && access.write != txn.is_write
                    {
                        let violation = ProtocolViolation::WriteEnableMismatch {
                            address: txn.address,
                            expected_write: access.write,
                        };
                        diag.record_violation(violation);
                        return Err(violation);
                    }
                }
                if self.wait_states == 0 {
                    self.service(txn, 0, model, memory, diag)
                } else {
                    self.phase = Phase::Servicing {
                        txn,
                        beat: 0,
                        wait: self.wait_states - 1,
                    };
                    Ok(None)
                }
            }
            Phase::Servicing { txn, beat, wait } => {
                if wait == 0 {
                    self.service(txn, beat, model, memory, diag)
                } else {
                    self.phase = Phase::Servicing {
                        txn,
                        beat,
                        wait: wait - 1,
                    };
                    Ok(None)
                }
            }
            Phase::AckHeld { txn, beat } => {
                if self.burst_continues(model, txn) {
                    let next = BusTransaction {
                        address: self.next_address(txn.address),
                        ..txn
                    };
                    match self.burst_timing {
                        BurstTiming::Pipelined => self.service(next, beat + 1, model, memory, diag),
                        BurstTiming::WaitState => {
                            self.drive_ack(model, false);
                            self.phase = Phase::Servicing {
                                txn: next,
                                beat: beat + 1,
                                wait: self.wait_states,
                            };
                            Ok(None)
                        }
                    }
                } else {
                    self.drive_ack(model, false);
                    self.phase = Phase::Idle;
                    Ok(None)
                }
            }
        }
    }

    fn sample_request(&self, model: &dyn DeviceModel) -> BusTransaction {
        let is_write = read_level(model, self.signals.write_enable);
        let burst = !is_write && self.burst_cycle_requested(model);
        BusTransaction {
            address: read_word(model, self.signals.address),
            is_write,
            byte_select: u8::try_from(model.read(self.signals.byte_select) & 0xF).unwrap_or(0xF),
            burst,
        }
    }

    fn burst_cycle_requested(&self, model: &dyn DeviceModel) -> bool {
        self.signals
            .cycle_type
            .is_some_and(|cti| model.read(cti) == self.burst_cycle_type)
    }

    fn burst_continues(&self, model: &dyn DeviceModel, txn: BusTransaction) -> bool {
        txn.burst && read_level(model, self.signals.cycle) && self.burst_cycle_requested(model)
    }

    fn drive_ack(&mut self, model: &mut dyn DeviceModel, level: bool) {
        self.ack = level;
        model.write(self.signals.ack, u64::from(level));
    }

    fn service(
        &mut self,
        txn: BusTransaction,
        beat: u32,
        model: &mut dyn DeviceModel,
        memory: &mut MemoryImage,
        diag: &mut Diagnostics,
    ) -> Result<Option<BusEvent>, ProtocolViolation> {
        let word = self.word_index(txn.address);
        let data = if txn.is_write {
            let data = read_word(model, self.signals.write_data);
            match memory.write_masked(word, data, txn.byte_select) {
                Ok(()) => diag.record_write(u64::from(txn.byte_select.count_ones())),
                Err(rejection) => {
                    let violation = match rejection {
                        WriteRejection::OutOfBounds => ProtocolViolation::WriteOutOfBounds {
                            address: txn.address,
                            limit_words: memory.len_words(),
                        },
                        WriteRejection::ReadOnly => ProtocolViolation::WriteToReadOnly {
                            address: txn.address,
                        },
                    };
                    diag.record_violation(violation);
                    if self.policy == ViolationPolicy::Abort {
                        return Err(violation);
                    }
                    warn!(address = txn.address, %violation, "write dropped");
                }
            }
            data
        } else {
            let data = memory.read_word(word).unwrap_or_else(|| {
                diag.record_out_of_bounds_read();
                warn!(
                    address = txn.address,
                    limit_words = memory.len_words(),
                    sentinel = self.sentinel,
                    "read beyond memory image"
                );
                self.sentinel
            });
            model.write(self.signals.read_data, u64::from(data));
            diag.record_read(4);
            data
        };

        if txn.burst {
            if beat == 0 {
                diag.record_burst();
            } else {
                diag.record_burst_beat();
            }
        }
        self.drive_ack(model, true);
        diag.record_acknowledge();
        self.phase = Phase::AckHeld { txn, beat };

        Ok(Some(BusEvent {
            address: txn.address,
            is_write: txn.is_write,
            data,
            beat,
        }))
    }
}
