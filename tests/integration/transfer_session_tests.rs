//! Picture transfer sessions driven through the `CameraService`.
//!
//! The mock board stands in for the ISP and the radio; the tests play the
//! ISP (serving chunk reads) and the peer (confirming notifications).

use crate::mock_hw::{BoardCall, MockBoard, RecordingSink};

use camsense::app::events::AppEvent;
use camsense::app::ports::ConnProfile;
use camsense::app::service::{CameraService, HCI_LOCAL_HOST_TERMINATED};
use camsense::config::SystemConfig;
use camsense::error::{AttError, FlowError};
use camsense::events::{IspEvent, IspReadyReason};
use camsense::gatt::{Attribute, Subscription};
use camsense::transfer::flow::MAX_PENDING;
use camsense::transfer::protocol::DataPacket;
use camsense::transfer::{CaptureMode, TransferState};

const CACHE: usize = 8 * 1024;

const ONE_SHOT: u8 = 1;
const CONTINUOUS: u8 = 2;
const CANCEL: u8 = 3;
const DATA_REQUEST: u8 = 4;

type App = CameraService<CACHE>;

fn test_image(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 7 + 3) as u8).collect()
}

/// Connected, info notifications on, link renegotiated to `packet_size`.
fn connected(packet_size: u16) -> (App, MockBoard, RecordingSink) {
    let mut app = App::new(SystemConfig::default()).unwrap();
    let mut hw = MockBoard::new();
    let mut sink = RecordingSink::new();
    app.on_connect(&mut hw, &mut sink);
    app.on_packet_size_changed(packet_size, &mut hw).unwrap();
    app.write_info_subscription(&Subscription::Notify.encode())
        .unwrap();
    hw.clear();
    (app, hw, sink)
}

/// Request a capture and let the ISP announce an image of `size` bytes.
fn capture(app: &mut App, hw: &mut MockBoard, sink: &mut RecordingSink, opcode: u8, size: u32) {
    app.write_control_point(&[opcode], hw, sink).unwrap();
    hw.advance(40);
    app.on_isp_event(IspEvent::Ready(IspReadyReason::PowerUp), hw, sink);
    hw.advance(120);
    app.on_isp_event(
        IspEvent::ImageInfo {
            size,
            width: 320,
            height: 240,
        },
        hw,
        sink,
    );
}

/// Serve chunk reads and confirm notifications until nothing moves.
///
/// Returns the number of chunk reads served.
fn stream(app: &mut App, hw: &mut MockBoard, sink: &mut RecordingSink, image: &[u8]) -> usize {
    let chunk = usize::from(app.config().isp_chunk_size);
    let mut isp_offset = 0;
    let mut served = 0;
    loop {
        if hw.count(&BoardCall::ReadChunk) > served {
            served += 1;
            let n = chunk.min(image.len() - isp_offset);
            assert!(n > 0, "chunk read past the end of the image");
            let data = &image[isp_offset..isp_offset + n];
            app.on_isp_event(
                IspEvent::ImageData {
                    offset: isp_offset as u32,
                    data,
                },
                hw,
                sink,
            );
            isp_offset += n;
            if isp_offset == image.len() {
                app.on_isp_event(IspEvent::Ready(IspReadyReason::TransferComplete), hw, sink);
            }
            continue;
        }
        if let Some((attribute, tag)) = hw.pop_unconfirmed() {
            hw.advance(8);
            app.on_notification_complete(attribute, tag, hw, sink);
            continue;
        }
        return served;
    }
}

/// Rebuild the image from the data notifications, checking offsets.
fn reassemble(hw: &MockBoard) -> Vec<u8> {
    let mut image = Vec::new();
    for bytes in hw.sent_on(Attribute::ImageData) {
        let packet = DataPacket::parse(&bytes).unwrap();
        assert_eq!(packet.offset as usize, image.len(), "offsets must be contiguous");
        image.extend_from_slice(packet.payload);
    }
    image
}

// ── Full sessions ─────────────────────────────────────────────

#[test]
fn one_shot_capture_delivers_the_whole_image() {
    let (mut app, mut hw, mut sink) = connected(251);
    let image = test_image(3_000);

    app.write_control_point(&[ONE_SHOT], &mut hw, &mut sink).unwrap();
    assert!(hw.called(&BoardCall::Capture));
    assert_eq!(hw.last_conn_params(), Some(ConnProfile::LowLatency));
    assert!(sink.contains(&AppEvent::CaptureStarted(CaptureMode::OneShot)));
    assert_eq!(app.transfer().state(), TransferState::CaptureRequested);

    app.on_isp_event(IspEvent::Ready(IspReadyReason::PowerUp), &mut hw, &mut sink);
    app.on_isp_event(
        IspEvent::ImageInfo {
            size: 3_000,
            width: 320,
            height: 240,
        },
        &mut hw,
        &mut sink,
    );
    assert_eq!(app.transfer().state(), TransferState::ImageInfoProvided);
    assert_eq!(
        hw.sent_on(Attribute::ImageInfo),
        vec![vec![0x01, 0xB8, 0x0B, 0x00, 0x00]]
    );

    app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink).unwrap();
    assert_eq!(app.transfer().state(), TransferState::Transmitting);
    assert!(hw.called(&BoardCall::ReadChunk));

    let reads = stream(&mut app, &mut hw, &mut sink, &image);
    assert_eq!(reads, 3);
    assert_eq!(reassemble(&hw), image);
    assert_eq!(hw.peak_pending, usize::from(MAX_PENDING));

    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert_eq!(hw.last_conn_params(), Some(ConnProfile::LowPower));
    assert_eq!(hw.count(&BoardCall::PowerDown), 1);
    assert_eq!(hw.last_led(), Some(app.config().led_idle_duty));
    assert_eq!(app.cache_used(), 0);
    assert!(sink.events.iter().any(|e| matches!(
        e,
        AppEvent::TransferStats(stats) if stats.image_size == 3_000
    )));
}

#[test]
fn minimum_packet_size_still_completes() {
    let (mut app, mut hw, mut sink) = connected(27);
    let image = test_image(500);

    capture(&mut app, &mut hw, &mut sink, ONE_SHOT, 500);
    app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink).unwrap();
    stream(&mut app, &mut hw, &mut sink, &image);

    assert_eq!(reassemble(&hw), image);
    // 18-byte packets: 4 offset bytes + 14 payload bytes.
    assert!(hw.sent_on(Attribute::ImageData).iter().all(|p| p.len() <= 18));
    assert_eq!(app.transfer().state(), TransferState::Connected);
}

#[test]
fn continuous_capture_starts_the_next_frame() {
    let (mut app, mut hw, mut sink) = connected(251);
    let image = test_image(1_500);

    capture(&mut app, &mut hw, &mut sink, CONTINUOUS, 1_500);
    app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink).unwrap();
    stream(&mut app, &mut hw, &mut sink, &image);

    assert_eq!(reassemble(&hw), image);
    assert_eq!(app.transfer().state(), TransferState::CaptureRequested);
    assert_eq!(hw.count(&BoardCall::Capture), 2);
    assert!(!hw.called(&BoardCall::PowerDown));

    app.on_isp_event(
        IspEvent::ImageInfo {
            size: 1_200,
            width: 320,
            height: 240,
        },
        &mut hw,
        &mut sink,
    );
    assert_eq!(app.transfer().state(), TransferState::ImageInfoProvided);
    assert_eq!(hw.sent_on(Attribute::ImageInfo).len(), 2);

    app.write_control_point(&[CANCEL], &mut hw, &mut sink).unwrap();
    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert!(hw.called(&BoardCall::PowerDown));
}

#[test]
fn continuous_isp_ready_waits_for_delivery() {
    let (mut app, mut hw, mut sink) = connected(251);
    let image = test_image(1_000);

    capture(&mut app, &mut hw, &mut sink, CONTINUOUS, 1_000);
    app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink).unwrap();
    assert_eq!(hw.count(&BoardCall::ReadChunk), 1);
    app.on_isp_event(IspEvent::ImageData { offset: 0, data: &image }, &mut hw, &mut sink);
    app.on_isp_event(IspEvent::Ready(IspReadyReason::TransferComplete), &mut hw, &mut sink);

    assert_eq!(app.transfer().state(), TransferState::Transmitting);
    assert_eq!(hw.count(&BoardCall::Capture), 1);
    assert!(app.is_isp_powered());

    while let Some((attribute, tag)) = hw.pop_unconfirmed() {
        app.on_notification_complete(attribute, tag, &mut hw, &mut sink);
    }

    assert_eq!(reassemble(&hw), image);
    assert_eq!(app.transfer().state(), TransferState::CaptureRequested);
    assert_eq!(hw.count(&BoardCall::Capture), 2);
    assert!(!hw.called(&BoardCall::PowerDown));
}

// ── Control point errors ──────────────────────────────────────

#[test]
fn capture_needs_info_notifications() {
    let mut app = App::new(SystemConfig::default()).unwrap();
    let mut hw = MockBoard::new();
    let mut sink = RecordingSink::new();
    app.on_connect(&mut hw, &mut sink);

    let err = app
        .write_control_point(&[ONE_SHOT], &mut hw, &mut sink)
        .unwrap_err();
    assert_eq!(err, AttError::NotificationsDisabled);
    assert_eq!(err.code(), 0x80);
    assert!(!hw.called(&BoardCall::Capture));
}

#[test]
fn control_point_rejects_out_of_order_commands() {
    let (mut app, mut hw, mut sink) = connected(251);

    assert_eq!(
        app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink),
        Err(AttError::TransferNotAllowed)
    );

    app.write_control_point(&[ONE_SHOT], &mut hw, &mut sink).unwrap();
    assert_eq!(
        app.write_control_point(&[CONTINUOUS], &mut hw, &mut sink),
        Err(AttError::ProcedureInProgress)
    );
    assert_eq!(
        app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink),
        Err(AttError::TransferNotAllowed)
    );
    assert_eq!(app.transfer().capture_mode(), CaptureMode::OneShot);
}

#[test]
fn second_data_request_is_in_progress() {
    let (mut app, mut hw, mut sink) = connected(251);
    capture(&mut app, &mut hw, &mut sink, ONE_SHOT, 2_000);
    app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink).unwrap();
    let err = app
        .write_control_point(&[DATA_REQUEST], &mut hw, &mut sink)
        .unwrap_err();
    assert_eq!(err, AttError::ProcedureInProgress);
    assert_eq!(err.code(), 0x81);
}

#[test]
fn malformed_control_writes() {
    let (mut app, mut hw, mut sink) = connected(251);
    assert_eq!(
        app.write_control_point(&[], &mut hw, &mut sink),
        Err(AttError::InvalidAttributeValueLength)
    );
    assert_eq!(
        app.write_control_point(&[ONE_SHOT, 0], &mut hw, &mut sink),
        Err(AttError::InvalidAttributeValueLength)
    );
    assert_eq!(
        app.write_control_point(&[9], &mut hw, &mut sink),
        Err(AttError::RequestNotSupported)
    );
    assert_eq!(app.transfer().state(), TransferState::Connected);
}

// ── Aborts ────────────────────────────────────────────────────

#[test]
fn peer_cancel_aborts_and_releases_the_isp() {
    let (mut app, mut hw, mut sink) = connected(251);
    capture(&mut app, &mut hw, &mut sink, ONE_SHOT, 2_000);

    app.write_control_point(&[CANCEL], &mut hw, &mut sink).unwrap();
    assert_eq!(hw.sent_on(Attribute::ImageInfo).last(), Some(&vec![0x00, 0x01]));
    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert!(hw.called(&BoardCall::PowerDown));
    assert!(!app.is_isp_powered());
    assert_eq!(hw.last_conn_params(), Some(ConnProfile::LowPower));
}

#[test]
fn cancel_on_congested_link_still_releases_the_isp() {
    let (mut app, mut hw, mut sink) = connected(251);
    capture(&mut app, &mut hw, &mut sink, ONE_SHOT, 2_000);

    hw.refuse_notify = true;
    assert_eq!(app.write_control_point(&[CANCEL], &mut hw, &mut sink), Ok(()));
    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert!(hw.called(&BoardCall::PowerDown));
    assert!(!app.is_isp_powered());
    assert_eq!(app.cache_used(), 0);
    assert_eq!(hw.last_conn_params(), Some(ConnProfile::LowPower));
    assert_eq!(hw.last_led(), Some(app.config().led_idle_duty));
}

#[test]
fn refused_packet_fails_the_capture() {
    let (mut app, mut hw, mut sink) = connected(251);
    let image = test_image(1_000);
    capture(&mut app, &mut hw, &mut sink, ONE_SHOT, 1_000);
    app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink).unwrap();

    hw.refuse_notify = true;
    app.on_isp_event(IspEvent::ImageData { offset: 0, data: &image }, &mut hw, &mut sink);

    assert!(sink.contains(&AppEvent::CaptureFailed));
    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert!(hw.called(&BoardCall::PowerDown));
    assert_eq!(app.cache_used(), 0);
}

#[test]
fn cancel_with_nothing_to_cancel_is_accepted() {
    let (mut app, mut hw, mut sink) = connected(251);
    assert_eq!(app.write_control_point(&[CANCEL], &mut hw, &mut sink), Ok(()));
    assert!(hw.sent.is_empty());
}

#[test]
fn isp_error_aborts_by_server() {
    let (mut app, mut hw, mut sink) = connected(251);
    app.write_control_point(&[ONE_SHOT], &mut hw, &mut sink).unwrap();

    app.on_isp_event(IspEvent::Error { state: 2, code: 7 }, &mut hw, &mut sink);
    assert_eq!(hw.sent_on(Attribute::ImageInfo), vec![vec![0x00, 0x00]]);
    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert!(sink.contains(&AppEvent::CaptureFailed));
    assert!(hw.called(&BoardCall::PowerDown));
}

#[test]
fn empty_image_is_refused() {
    let (mut app, mut hw, mut sink) = connected(251);
    capture(&mut app, &mut hw, &mut sink, ONE_SHOT, 0);
    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert_eq!(hw.sent_on(Attribute::ImageInfo), vec![vec![0x00, 0x00]]);
}

// ── Link events ───────────────────────────────────────────────

#[test]
fn renegotiation_mid_transfer_drops_the_link() {
    let (mut app, mut hw, mut sink) = connected(251);

    app.write_control_point(&[ONE_SHOT], &mut hw, &mut sink).unwrap();
    // Still allowed: nothing promised to the peer yet.
    assert_eq!(app.on_packet_size_changed(100, &mut hw), Ok(()));

    app.on_isp_event(
        IspEvent::ImageInfo {
            size: 900,
            width: 320,
            height: 240,
        },
        &mut hw,
        &mut sink,
    );
    assert_eq!(
        app.on_packet_size_changed(251, &mut hw),
        Err(FlowError::TransferInProgress)
    );
    assert!(hw.called(&BoardCall::Disconnect(HCI_LOCAL_HOST_TERMINATED)));
    assert_eq!(app.transfer().flow().max_tx_octets(), 100);
}

#[test]
fn out_of_range_packet_size_is_ignored() {
    let (mut app, mut hw, _sink) = connected(251);
    assert_eq!(app.on_packet_size_changed(20, &mut hw), Err(FlowError::OutOfRange(20)));
    assert_eq!(app.transfer().flow().max_tx_octets(), 251);
    assert!(hw.calls.is_empty());
}

#[test]
fn disconnect_mid_transfer_cleans_up() {
    let (mut app, mut hw, mut sink) = connected(251);
    let image = test_image(3_000);
    capture(&mut app, &mut hw, &mut sink, ONE_SHOT, 3_000);
    app.write_control_point(&[DATA_REQUEST], &mut hw, &mut sink).unwrap();
    app.on_isp_event(
        IspEvent::ImageData {
            offset: 0,
            data: &image[..1_024],
        },
        &mut hw,
        &mut sink,
    );
    assert!(!hw.unconfirmed.is_empty());

    app.on_disconnect(&mut hw, &mut sink);
    assert_eq!(app.transfer().state(), TransferState::Idle);
    assert!(hw.called(&BoardCall::PowerDown));
    assert_eq!(app.cache_used(), 0);
    assert!(sink.contains(&AppEvent::Disconnected));

    // Confirmations of the old link arrive after a reconnect.
    app.on_connect(&mut hw, &mut sink);
    hw.clear();
    while let Some((attribute, tag)) = hw.pop_unconfirmed() {
        app.on_notification_complete(attribute, tag, &mut hw, &mut sink);
    }
    assert_eq!(app.transfer().state(), TransferState::Connected);
    assert!(hw.sent.is_empty());
    assert!(hw.calls.is_empty());
}

#[test]
fn state_changes_are_reported() {
    let (mut app, mut hw, mut sink) = connected(251);
    app.write_control_point(&[ONE_SHOT], &mut hw, &mut sink).unwrap();
    assert!(sink.contains(&AppEvent::TransferStateChanged {
        from: TransferState::Connected,
        to: TransferState::CaptureRequested,
    }));
}
