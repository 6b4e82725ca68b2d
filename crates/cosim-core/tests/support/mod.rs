//! Hand-written device models shared by the integration suites.

#![allow(dead_code)]

use std::collections::VecDeque;

use cosim_core::{
    BusConfig, ClockConfig, DeviceModel, HarnessConfig, MemoryImage, ResetConfig, SignalId,
    SignalTable,
};

/// Pins of the memory-port master model.
pub const MASTER_PINS: &[&str] = &[
    "CLKCPU_I",
    "RESET_I",
    "MEM_STB_O",
    "MEM_CYC_O",
    "MEM_WE_O",
    "MEM_SEL_O",
    "MEM_ADDR_O",
    "MEM_DAT_O",
    "MEM_DAT_I",
    "MEM_ACK_I",
    "MEM_CTI_O",
];

/// One planned bus operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Op {
    pub address: u64,
    pub write: bool,
    pub data: u64,
    pub select: u64,
    pub beats: u32,
}

impl Op {
    pub const fn read(address: u64) -> Self {
        Self {
            address,
            write: false,
            data: 0,
            select: 0xF,
            beats: 1,
        }
    }

    pub const fn write(address: u64, data: u64, select: u64) -> Self {
        Self {
            address,
            write: true,
            data,
            select,
            beats: 1,
        }
    }

    pub const fn burst(address: u64, beats: u32) -> Self {
        Self {
            address,
            write: false,
            data: 0,
            select: 0xF,
            beats,
        }
    }
}

/// Registered Wishbone master: acts on rising edges of `CLKCPU_I` only.
pub struct BusMaster {
    pub pins: SignalTable,
    plan: VecDeque<Op>,
    current: Option<Op>,
    received: u32,
    last_clock: bool,
    pub reads: Vec<u32>,
    pub done: bool,
    pub evaluations: u64,
    pub finalize_calls: u32,
}

impl BusMaster {
    pub fn new(plan: impl IntoIterator<Item = Op>) -> Self {
        Self {
            pins: SignalTable::with_signals(MASTER_PINS),
            plan: plan.into_iter().collect(),
            current: None,
            received: 0,
            last_clock: false,
            reads: Vec::new(),
            done: false,
            evaluations: 0,
            finalize_calls: 0,
        }
    }

    fn set(&mut self, name: &str, value: u64) {
        assert!(self.pins.set_value(name, value), "unknown pin {name}");
    }

    fn issue(&mut self, op: Op) {
        self.set("MEM_ADDR_O", op.address);
        self.set("MEM_WE_O", u64::from(op.write));
        self.set("MEM_DAT_O", op.data);
        self.set("MEM_SEL_O", op.select);
        self.set("MEM_CTI_O", if op.beats > 1 { 2 } else { 0 });
        self.set("MEM_STB_O", 1);
        self.set("MEM_CYC_O", 1);
        self.current = Some(op);
        self.received = 0;
    }

    fn release(&mut self) {
        self.set("MEM_STB_O", 0);
        self.set("MEM_CYC_O", 0);
        self.set("MEM_CTI_O", 0);
        self.current = None;
    }
}

impl DeviceModel for BusMaster {
    fn signal(&self, name: &str) -> Option<SignalId> {
        self.pins.lookup(name)
    }

    fn read(&self, id: SignalId) -> u64 {
        self.pins.get(id)
    }

    fn write(&mut self, id: SignalId, value: u64) {
        self.pins.set(id, value);
    }

    fn evaluate(&mut self) {
        self.evaluations += 1;
        let clock = self.pins.high("CLKCPU_I");
        let rising = clock && !self.last_clock;
        self.last_clock = clock;
        if !rising || self.pins.high("RESET_I") || self.done {
            return;
        }

        let ack = self.pins.high("MEM_ACK_I");
        match self.current {
            None if !ack => match self.plan.pop_front() {
                Some(op) => self.issue(op),
                None => self.done = true,
            },
            None => {}
            Some(op) if ack => {
                if !op.write {
                    let data = self.pins.value("MEM_DAT_I").unwrap_or_default();
                    self.reads.push(u32::try_from(data).expect("32-bit bus"));
                }
                self.received += 1;
                if self.received == op.beats {
                    self.release();
                }
            }
            Some(_) => {}
        }
    }

    fn finished(&self) -> bool {
        self.done
    }

    fn finalize(&mut self) {
        self.finalize_calls += 1;
    }
}

/// Memory-port-only harness: CPU clock, short reset, default bus.
pub fn bus_config(bus: BusConfig, max_ticks: u64) -> HarnessConfig {
    HarnessConfig {
        clocks: vec![ClockConfig::new("CLKCPU_I", 2)],
        reset: Some(ResetConfig {
            hold_ticks: 8,
            ..ResetConfig::new("RESET_I")
        }),
        finished_signal: None,
        bus: Some(bus),
        video: None,
        master: None,
        max_ticks: Some(max_ticks),
    }
}

/// Image whose word `n` holds `0xA000_0000 | n`.
pub fn patterned_image(words: u32) -> MemoryImage {
    let bytes = (0..words)
        .flat_map(|word| (0xA000_0000 | word).to_le_bytes())
        .collect();
    MemoryImage::new(bytes).expect("aligned image")
}
