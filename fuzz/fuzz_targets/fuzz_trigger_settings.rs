//! Fuzz target: trigger descriptors and the trigger engine
//!
//! Arbitrary descriptor writes followed by arbitrary samples. The decoders
//! must never panic, accepted settings must read back byte-for-byte, and
//! a disabled trigger must never notify.
//!
//! cargo fuzz run fuzz_trigger_settings

#![no_main]

use camsense::app::ports::{Radio, TriggerDelegate};
use camsense::error::RadioError;
use camsense::gatt::Attribute;
use camsense::triggers::{TriggerEngine, TriggerId};
use libfuzzer_sys::fuzz_target;

#[derive(Default)]
struct Peer {
    notified: Vec<TriggerId>,
}

impl Radio for Peer {
    fn notify(&mut self, attribute: Attribute, _tag: u16, _data: &[u8]) -> Result<(), RadioError> {
        if let Attribute::TriggerValue(id) = attribute {
            self.notified.push(id);
        }
        Ok(())
    }
}

struct Nop;

impl TriggerDelegate for Nop {
    fn on_trigger_updated(&mut self, _id: TriggerId) {}
}

fuzz_target!(|data: &[u8]| {
    let Some((&head, rest)) = data.split_first() else {
        return;
    };
    let mut engine = TriggerEngine::new(head & 0x80 != 0);
    let id = TriggerId::ALL[usize::from(head) % TriggerId::COUNT];
    let split = rest.len().min(usize::from(head & 0x0F));
    let (setting, samples) = rest.split_at(split);

    if engine.write_value_setting(id, setting, &mut Nop).is_ok() {
        assert_eq!(engine.read_value_setting(id).as_slice(), setting);
    }
    if engine.write_time_setting(id, setting, &mut Nop).is_ok() {
        assert_eq!(engine.read_time_setting(id).as_slice(), setting);
    }
    let _ = engine.write_subscription(id, setting, &mut Nop);

    let mut peer = Peer::default();
    let mut now = 0u32;
    for sample in samples.chunks(4) {
        let mut raw = [0u8; 4];
        raw[..sample.len()].copy_from_slice(sample);
        now = now.wrapping_add(u32::from(raw[0]) * 100);
        let _ = engine.push_value(id, i32::from_le_bytes(raw), now, &mut peer);
        let _ = engine.poll(now, &mut peer);
    }
    if !engine.is_enabled(id) {
        assert!(peer.notified.is_empty());
    }
});
