#![no_main]

use cosim_core::{
    BurstTiming, BusConfig, BusResponder, DeviceModel, Diagnostics, MemoryImage, SignalId,
    SignalTable, ViolationPolicy,
};
use libfuzzer_sys::fuzz_target;

/// Model whose bus outputs are replayed from the fuzz input.
struct Replay(SignalTable);

impl DeviceModel for Replay {
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

fuzz_target!(|data: &[u8]| {
    let Some((&mode, frames)) = data.split_first() else {
        return;
    };

    let config = BusConfig {
        address_shift: u32::from(mode & 0x3).min(2),
        burst_timing: if mode & 0x4 == 0 {
            BurstTiming::WaitState
        } else {
            BurstTiming::Pipelined
        },
        violation_policy: ViolationPolicy::Record,
        wait_states: u32::from((mode >> 3) & 0x3),
        ..BusConfig::default()
    };
    let mut model = Replay(SignalTable::with_signals(&[
        "CLKCPU_I",
        "MEM_STB_O",
        "MEM_CYC_O",
        "MEM_WE_O",
        "MEM_SEL_O",
        "MEM_ADDR_O",
        "MEM_DAT_O",
        "MEM_DAT_I",
        "MEM_ACK_I",
        "MEM_CTI_O",
    ]));
    let Ok(mut bus) = BusResponder::new(&mut model, &config) else {
        return;
    };
    let Ok(mut memory) = MemoryImage::zeroed(64) else {
        return;
    };
    let mut diag = Diagnostics::new();

    for frame in frames.chunks_exact(6) {
        let control = frame[0];
        model.0.set_value("MEM_STB_O", u64::from(control & 1));
        model.0.set_value("MEM_CYC_O", u64::from((control >> 1) & 1));
        model.0.set_value("MEM_WE_O", u64::from((control >> 2) & 1));
        model.0.set_value("MEM_CTI_O", u64::from((control >> 3) & 0x7));
        model.0.set_value("MEM_SEL_O", u64::from(control >> 4));
        model.0.set_value("MEM_ADDR_O", u64::from(frame[1]));
        model.0.set_value(
            "MEM_DAT_O",
            u64::from(u32::from_le_bytes([frame[2], frame[3], frame[4], frame[5]])),
        );

        let _ = bus.on_rising_edge(&mut model, &mut memory, &mut diag, None);
        assert!(diag.acknowledges >= diag.reads + diag.writes);
        assert_eq!(memory.len_words(), 64);
    }
});
