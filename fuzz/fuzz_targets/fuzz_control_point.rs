//! Fuzz target: picture transfer engine
//!
//! Interprets the input as a script of peer writes, producer pushes and
//! radio confirmations, and checks that the engine never panics, never
//! exceeds the pending limit and never sends a packet past the image.
//!
//! cargo fuzz run fuzz_control_point

#![no_main]

use camsense::app::ports::{Radio, TransferDelegate};
use camsense::error::RadioError;
use camsense::gatt::Attribute;
use camsense::transfer::flow::MAX_PENDING;
use camsense::transfer::protocol::DataPacket;
use camsense::transfer::{CaptureMode, ImageTransfer};
use libfuzzer_sys::fuzz_target;

#[derive(Default)]
struct Peer {
    in_flight: u32,
    total: u32,
}

impl Radio for Peer {
    fn notify(&mut self, attribute: Attribute, _tag: u16, data: &[u8]) -> Result<(), RadioError> {
        if attribute == Attribute::ImageData {
            let packet = DataPacket::parse(data).expect("data packet without offset");
            let end = packet.offset as u64 + packet.payload.len() as u64;
            assert!(end <= u64::from(self.total), "packet past the end of the image");
            self.in_flight += 1;
        }
        Ok(())
    }
}

struct Nop;

impl TransferDelegate for Nop {
    fn on_capture_requested(&mut self, _mode: CaptureMode) {}
    fn on_transfer_requested(&mut self) {}
    fn on_space_available(&mut self) {}
    fn on_transfer_done(&mut self, _mode: CaptureMode) {}
    fn on_capture_cancelled(&mut self) {}
}

fuzz_target!(|data: &[u8]| {
    let mut engine = ImageTransfer::new();
    let mut peer = Peer::default();
    let mut nop = Nop;
    let payload = [0xA5u8; 1024];

    let mut ops = data.chunks(3);
    while let Some(op) = ops.next() {
        let arg = op.get(1).copied().unwrap_or(0);
        let arg2 = op.get(2).copied().unwrap_or(0);
        match op[0] % 9 {
            0 => engine.on_connect(),
            1 => engine.on_disconnect(&mut nop),
            2 => {
                let _ = engine.on_packet_size_changed(u16::from_le_bytes([arg, arg2]));
            }
            3 => {
                let _ = engine.write_info_subscription(&[arg, arg2]);
            }
            4 => {
                let _ = engine.handle_control_write(&[arg], &mut peer, &mut nop);
            }
            5 => {
                let size = u32::from_le_bytes([arg, arg2, 0, 0]);
                if engine.start_image_transfer(size, &mut peer).is_ok() {
                    peer.total = size;
                }
            }
            6 => {
                let n = usize::from(arg) * 4;
                let allowed = engine.max_push_size();
                let result = engine.push_image_data(&payload[..n.min(payload.len())], &mut peer);
                if n <= allowed && n <= payload.len() {
                    assert!(result.is_ok() || allowed == 0);
                }
            }
            7 => {
                peer.in_flight = peer.in_flight.saturating_sub(1);
                engine.on_notification_complete(Attribute::ImageData, engine.epoch(), &mut nop);
            }
            _ => {
                // Confirmation of an abandoned transfer.
                engine.on_notification_complete(
                    Attribute::ImageData,
                    engine.epoch().wrapping_sub(u16::from(arg) + 1),
                    &mut nop,
                );
            }
        }
        assert!(engine.flow().pending() <= MAX_PENDING);
        assert!(engine.bytes_queued() <= engine.bytes_total());
    }
});
