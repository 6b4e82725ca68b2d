//! Harness-driven verification master.
//!
//! Replays an access script against the device's slave port, one access per
//! bus cycle, and checks read-back data. Script lines have the form
//!
//! ```text
//! # we, address, data, byte select, expected read data
//! 1, 0x03400000, 0x12345678, 0xf, 0
//! 0, 0x03400000, 0x00000000, 0xf, 0x12345678
//! ```

use std::str::FromStr;

use tracing::debug;

use crate::api::{read_level, read_word, resolve_optional, resolve_signal};
use crate::{
    ConfigError, DeviceModel, Diagnostics, MasterPins, ProtocolViolation, ScriptParseError,
    SignalId, Verdict, VerificationFailure,
};

/// One scripted slave-port access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ScriptedAccess {
    /// Write (`true`) or read.
    pub write: bool,
    /// Byte address on the slave port.
    pub address: u32,
    /// Data driven for writes.
    pub data: u32,
    /// 4-bit byte-select mask.
    pub byte_select: u8,
    /// Data a read must return. Ignored for writes.
    pub expected: u32,
}

impl ScriptedAccess {
    /// Word index addressed by this access.
    #[must_use]
    pub fn word_index(&self) -> usize {
        usize::try_from(self.address >> 2).unwrap_or(usize::MAX)
    }
}

fn parse_number(field: &str, what: &str) -> Result<u32, ScriptParseError> {
    let field = field.trim();
    let parsed = match field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => field.parse(),
    };
    parsed.map_err(|err| ScriptParseError {
        line: 0,
        reason: format!("invalid {what} `{field}`: {err}"),
    })
}

impl FromStr for ScriptedAccess {
    type Err = ScriptParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split(',').collect();
        let [we, address, data, select, expected] = fields.as_slice() else {
            return Err(ScriptParseError {
                line: 0,
                reason: format!("expected 5 comma-separated fields, found {}", fields.len()),
            });
        };
        let byte_select = parse_number(select, "byte select")?;
        if byte_select > 0xF {
            return Err(ScriptParseError {
                line: 0,
                reason: format!("byte select {byte_select:#x} wider than 4 bits"),
            });
        }
        Ok(Self {
            write: parse_number(we, "write flag")? != 0,
            address: parse_number(address, "address")?,
            data: parse_number(data, "data")?,
            byte_select: u8::try_from(byte_select).unwrap_or(0xF),
            expected: parse_number(expected, "expected data")?,
        })
    }
}

/// Parses a whole script, skipping blank lines and `#` comments.
///
/// # Errors
///
/// Returns the first malformed line with its one-based line number.
pub fn parse_script(text: &str) -> Result<Vec<ScriptedAccess>, ScriptParseError> {
    text.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(number, line)| {
            line.parse()
                .map_err(|err: ScriptParseError| ScriptParseError { line: number, ..err })
        })
        .collect()
}

/// What the master did on a bus-clock edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterEvent {
    /// Nothing to do this edge.
    Waiting,
    /// Started the access at this script index.
    Issued(usize),
    /// Acknowledged access at this script index checked out.
    Completed(usize),
    /// The script has ended with this verdict.
    Finished(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MasterSignals {
    strobe: SignalId,
    cycle: SignalId,
    write_enable: SignalId,
    byte_select: SignalId,
    address: SignalId,
    write_data: SignalId,
    read_data: SignalId,
    ack: SignalId,
    error: Option<SignalId>,
}

/// Bus master that replays a [`ScriptedAccess`] list.
#[derive(Debug, Clone)]
pub struct VerificationMaster {
    signals: MasterSignals,
    script: Vec<ScriptedAccess>,
    next: usize,
    in_flight: Option<usize>,
    verdict: Option<Verdict>,
}

impl VerificationMaster {
    /// Resolves the slave-port pins and idles the port.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingSignal`] for an unresolved pin.
    pub fn new(
        model: &mut dyn DeviceModel,
        pins: &MasterPins,
        script: Vec<ScriptedAccess>,
    ) -> Result<Self, ConfigError> {
        let signals = MasterSignals {
            strobe: resolve_signal(model, &pins.strobe)?,
            cycle: resolve_signal(model, &pins.cycle)?,
            write_enable: resolve_signal(model, &pins.write_enable)?,
            byte_select: resolve_signal(model, &pins.byte_select)?,
            address: resolve_signal(model, &pins.address)?,
            write_data: resolve_signal(model, &pins.write_data)?,
            read_data: resolve_signal(model, &pins.read_data)?,
            ack: resolve_signal(model, &pins.ack)?,
            error: resolve_optional(model, pins.error.as_deref())?,
        };
        model.write(signals.strobe, 0);
        model.write(signals.cycle, 0);

        Ok(Self {
            signals,
            script,
            next: 0,
            in_flight: None,
            verdict: None,
        })
    }

    /// Access currently driven on the port.
    #[must_use]
    pub fn in_flight(&self) -> Option<&ScriptedAccess> {
        self.in_flight.and_then(|index| self.script.get(index))
    }

    /// Accesses completed so far.
    #[must_use]
    pub const fn completed(&self) -> usize {
        match self.in_flight {
            Some(index) => index,
            None => self.next,
        }
    }

    /// Final verdict once the script has ended.
    #[must_use]
    pub const fn verdict(&self) -> Option<Verdict> {
        self.verdict
    }

    /// Advances the master on a bus-clock rising edge.
    ///
    /// No access is issued while `reset_released` is false.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolViolation::UnsolicitedAck`] when the port
    /// acknowledges with nothing pending.
    pub fn on_rising_edge(
        &mut self,
        model: &mut dyn DeviceModel,
        diag: &mut Diagnostics,
        reset_released: bool,
    ) -> Result<MasterEvent, ProtocolViolation> {
        if let Some(verdict) = self.verdict {
            return Ok(MasterEvent::Finished(verdict));
        }
        let acked = read_level(model, self.signals.ack);

        let Some(index) = self.in_flight else {
            if !reset_released {
                return Ok(MasterEvent::Waiting);
            }
            if acked {
                diag.record_violation(ProtocolViolation::UnsolicitedAck);
                return Err(ProtocolViolation::UnsolicitedAck);
            }
            return Ok(self.issue_next(model));
        };
        let Some(access) = self.script.get(index).copied() else {
            self.in_flight = None;
            return Ok(MasterEvent::Waiting);
        };

        if acked {
            self.idle_port(model);
            if !access.write {
                let actual = read_word(model, self.signals.read_data);
                if actual != access.expected {
                    return Ok(self.finish(Verdict::Fail(VerificationFailure::ReadMismatch {
                        index,
                        address: access.address,
                        expected: access.expected,
                        actual,
                    })));
                }
            }
            diag.record_verified_access();
            debug!(index, address = access.address, write = access.write, "access verified");
            return Ok(MasterEvent::Completed(index));
        }
        if self
            .signals
            .error
            .is_some_and(|error| read_level(model, error))
        {
            self.idle_port(model);
            return Ok(self.finish(Verdict::Fail(VerificationFailure::DataAbort {
                index,
                address: access.address,
            })));
        }
        Ok(MasterEvent::Waiting)
    }

    fn issue_next(&mut self, model: &mut dyn DeviceModel) -> MasterEvent {
        let Some(access) = self.script.get(self.next).copied() else {
            return self.finish(Verdict::Pass);
        };
        let signals = self.signals;
        model.write(signals.address, u64::from(access.address));
        model.write(signals.write_enable, u64::from(access.write));
        model.write(signals.write_data, u64::from(access.data));
        model.write(signals.byte_select, u64::from(access.byte_select));
        model.write(signals.strobe, 1);
        model.write(signals.cycle, 1);

        let index = self.next;
        self.in_flight = Some(index);
        self.next += 1;
        debug!(index, address = access.address, write = access.write, "access issued");
        MasterEvent::Issued(index)
    }

    fn idle_port(&mut self, model: &mut dyn DeviceModel) {
        model.write(self.signals.strobe, 0);
        model.write(self.signals.cycle, 0);
        self.in_flight = None;
    }

    #[allow(clippy::missing_const_for_fn)]
    fn finish(&mut self, verdict: Verdict) -> MasterEvent {
        self.verdict = Some(verdict);
        MasterEvent::Finished(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SignalTable;
    use rstest::rstest;

    struct SlavePort(SignalTable);

    impl SlavePort {
        fn new() -> Self {
            Self(SignalTable::with_signals(&[
                "cpu_stb",
                "cpu_cyc",
                "cpu_we",
                "cpu_sel",
                "cpu_address",
                "cpu_dat_o",
                "cpu_dat_i",
                "cpu_ack",
                "cpu_err",
            ]))
        }
    }

    impl DeviceModel for SlavePort {
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

    fn read_of(address: u32, expected: u32) -> ScriptedAccess {
        ScriptedAccess {
            write: false,
            address,
            data: 0,
            byte_select: 0xF,
            expected,
        }
    }

    #[rstest]
    #[case("1, 0x03400000, 0x12345678, 0xf, 0", true, 0x0340_0000, 0x1234_5678, 0xF, 0)]
    #[case("0,0x10,0x0,0x3,0xdeadbeef", false, 0x10, 0, 0x3, 0xDEAD_BEEF)]
    #[case(" 0 , 0X20 , 0x0 , 0x1 , 42 ", false, 0x20, 0, 0x1, 42)]
    fn parses_access_lines(
        #[case] line: &str,
        #[case] write: bool,
        #[case] address: u32,
        #[case] data: u32,
        #[case] byte_select: u8,
        #[case] expected: u32,
    ) {
        assert_eq!(
            line.parse::<ScriptedAccess>(),
            Ok(ScriptedAccess {
                write,
                address,
                data,
                byte_select,
                expected
            })
        );
    }

    #[rstest]
    #[case("1, 0x10, 0x0, 0xf")]
    #[case("1, 0x10, 0xzz, 0xf, 0")]
    #[case("1, 0x10, 0x0, 0x1f, 0")]
    fn rejects_malformed_lines(#[case] line: &str) {
        assert!(line.parse::<ScriptedAccess>().is_err());
    }

    #[test]
    fn script_errors_carry_line_numbers() {
        let text = "# header\n\n1, 0x0, 0x1, 0xf, 0\n0, 0x0\n";
        let err = parse_script(text).expect_err("line 4 is short");
        assert_eq!(err.line, 4);
        assert!(err.to_string().starts_with("script line 4:"));
    }

    #[test]
    fn script_skips_comments_and_blanks() {
        let text = "# w\n1, 0x8, 0x55, 0xf, 0\n\n  # r\n0, 0x8, 0x0, 0xf, 0x55\n";
        let script = parse_script(text).expect("valid");
        assert_eq!(script.len(), 2);
        assert_eq!(script[1], read_of(8, 0x55));
        assert_eq!(script[1].word_index(), 2);
    }

    #[test]
    fn waits_for_reset_release() {
        let mut port = SlavePort::new();
        let mut master =
            VerificationMaster::new(&mut port, &MasterPins::default(), vec![read_of(0, 0)])
                .expect("pins");
        let mut diag = Diagnostics::new();
        assert_eq!(
            master.on_rising_edge(&mut port, &mut diag, false),
            Ok(MasterEvent::Waiting)
        );
        assert!(!port.0.high("cpu_stb"));
        assert_eq!(
            master.on_rising_edge(&mut port, &mut diag, true),
            Ok(MasterEvent::Issued(0))
        );
        assert!(port.0.high("cpu_stb"));
        assert!(port.0.high("cpu_cyc"));
    }

    #[test]
    fn read_back_mismatch_fails_the_script() {
        let mut port = SlavePort::new();
        let mut master = VerificationMaster::new(
            &mut port,
            &MasterPins::default(),
            vec![read_of(4, 0x1234)],
        )
        .expect("pins");
        let mut diag = Diagnostics::new();
        master
            .on_rising_edge(&mut port, &mut diag, true)
            .expect("issued");

        port.0.set_value("cpu_dat_i", 0x4321);
        port.0.set_value("cpu_ack", 1);
        let failure = VerificationFailure::ReadMismatch {
            index: 0,
            address: 4,
            expected: 0x1234,
            actual: 0x4321,
        };
        assert_eq!(
            master.on_rising_edge(&mut port, &mut diag, true),
            Ok(MasterEvent::Finished(Verdict::Fail(failure)))
        );
        assert!(!port.0.high("cpu_stb"));
        assert_eq!(master.verdict(), Some(Verdict::Fail(failure)));
        assert_eq!(diag.verified_accesses, 0);
    }

    #[test]
    fn error_line_is_a_data_abort() {
        let mut port = SlavePort::new();
        let mut master =
            VerificationMaster::new(&mut port, &MasterPins::default(), vec![read_of(12, 0)])
                .expect("pins");
        let mut diag = Diagnostics::new();
        master
            .on_rising_edge(&mut port, &mut diag, true)
            .expect("issued");
        port.0.set_value("cpu_err", 1);
        assert_eq!(
            master.on_rising_edge(&mut port, &mut diag, true),
            Ok(MasterEvent::Finished(Verdict::Fail(
                VerificationFailure::DataAbort {
                    index: 0,
                    address: 12
                }
            )))
        );
    }

    #[test]
    fn unsolicited_ack_is_a_violation() {
        let mut port = SlavePort::new();
        let mut master =
            VerificationMaster::new(&mut port, &MasterPins::default(), Vec::new()).expect("pins");
        let mut diag = Diagnostics::new();
        port.0.set_value("cpu_ack", 1);
        assert_eq!(
            master.on_rising_edge(&mut port, &mut diag, true),
            Err(ProtocolViolation::UnsolicitedAck)
        );
    }

    #[test]
    fn completed_script_passes() {
        let mut port = SlavePort::new();
        let script = vec![
            ScriptedAccess {
                write: true,
                address: 0,
                data: 7,
                byte_select: 0xF,
                expected: 0,
            },
            read_of(0, 7),
        ];
        let mut master =
            VerificationMaster::new(&mut port, &MasterPins::default(), script).expect("pins");
        let mut diag = Diagnostics::new();

        let mut stored = 0;
        let mut events = Vec::new();
        for _ in 0..6 {
            let event = master
                .on_rising_edge(&mut port, &mut diag, true)
                .expect("no violation");
            // Loopback slave: acknowledge the issued access on the next edge
            // and return whatever was last written.
            if matches!(event, MasterEvent::Issued(_)) {
                if port.0.high("cpu_we") {
                    stored = port.0.value("cpu_dat_o").expect("pin");
                }
                port.0.set_value("cpu_dat_i", stored);
                port.0.set_value("cpu_ack", 1);
            } else {
                port.0.set_value("cpu_ack", 0);
            }
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                MasterEvent::Issued(0),
                MasterEvent::Completed(0),
                MasterEvent::Issued(1),
                MasterEvent::Completed(1),
                MasterEvent::Finished(Verdict::Pass),
                MasterEvent::Finished(Verdict::Pass),
            ]
        );
        assert_eq!(master.completed(), 2);
        assert_eq!(diag.verified_accesses, 2);
    }
}
