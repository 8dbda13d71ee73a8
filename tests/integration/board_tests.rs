//! End-to-end session on the host board: simulated BLE link, simulated
//! camera peripherals and the GATT request path, wired the way the
//! firmware run loop wires them.

use core::convert::Infallible;

use embedded_hal::pwm::{ErrorType, SetDutyCycle};

use crate::mock_hw::RecordingSink;

use camsense::adapters::ble_gatt::{BleGattAdapter, attribute_plan, conn_params, route};
use camsense::adapters::hardware::{CameraBoard, SimPeripherals};
use camsense::adapters::time::Esp32TimeAdapter;
use camsense::app::ports::ConnProfile;
use camsense::app::service::CameraService;
use camsense::config::SystemConfig;
use camsense::drivers::status_led::StatusLed;
use camsense::error::AttError;
use camsense::gatt::{Attribute, GattTarget, Subscription};
use camsense::transfer::TransferState;
use camsense::transfer::protocol::{DataPacket, InfoEvent};
use camsense::triggers::TriggerId;

const CACHE: usize = 8 * 1024;
const IMAGE_SIZE: u32 = 3_000;

struct NullPwm;

impl ErrorType for NullPwm {
    type Error = Infallible;
}

impl SetDutyCycle for NullPwm {
    fn max_duty_cycle(&self) -> u16 {
        255
    }

    fn set_duty_cycle(&mut self, _duty: u16) -> Result<(), Self::Error> {
        Ok(())
    }
}

struct Rig {
    app: CameraService<CACHE>,
    board: CameraBoard<NullPwm>,
    sink: RecordingSink,
    isp_buf: Vec<u8>,
    trans_id: u32,
}

impl Rig {
    fn connected() -> Self {
        let config = SystemConfig::default();
        let board = CameraBoard::new(
            BleGattAdapter::new(config.device_name.clone()),
            StatusLed::new(NullPwm),
            Esp32TimeAdapter::new(),
            SimPeripherals::new(usize::from(config.isp_chunk_size), IMAGE_SIZE),
        );
        let isp_buf = vec![0u8; usize::from(config.isp_chunk_size)];
        let mut rig = Self {
            app: CameraService::new(config).unwrap(),
            board,
            sink: RecordingSink::new(),
            isp_buf,
            trans_id: 0,
        };
        rig.board.ble.start();
        rig.board.ble.on_connected();
        rig.app.on_connect(&mut rig.board, &mut rig.sink);
        rig.board.ble.sim().ll_tx_octets = 251;
        rig.board.ble.sim().att_mtu = 247;
        rig.app
            .on_packet_size_changed(rig.board.ble.packet_size(), &mut rig.board)
            .unwrap();
        rig
    }

    fn handle(&mut self, target: GattTarget) -> u16 {
        let sim = self.board.ble.sim();
        (1..=attribute_plan().len() as u16)
            .find(|h| sim.handles.target(*h) == Some(target))
            .unwrap()
    }

    /// Issue one peer request and return the response it got.
    fn request(&mut self, target: GattTarget, write: Option<&[u8]>) -> Result<Vec<u8>, AttError> {
        self.trans_id += 1;
        let handle = self.handle(target);
        self.board.ble.sim_request(handle, self.trans_id, write);
        while let Some(request) = self.board.ble.take_request() {
            let result = route(&mut self.app, &request, &mut self.board, &mut self.sink);
            self.board.ble.respond(&request, &result);
        }
        let (id, result) = self.board.ble.sim().responses.pop().unwrap();
        assert_eq!(id, self.trans_id);
        result.map(|v| v.to_vec())
    }

    fn pump_isp(&mut self) {
        while let Some(event) = self.board.peripherals.take_isp_event(&mut self.isp_buf) {
            self.app.on_isp_event(event, &mut self.board, &mut self.sink);
        }
    }

    /// Run ISP and peer until neither has anything left to do.
    fn settle(&mut self) {
        loop {
            self.pump_isp();
            if self.board.ble.in_flight() == 0 {
                return;
            }
            self.board.ble.sim().confirmed += 1;
            while let Some((attribute, tag)) = self.board.ble.take_completion() {
                self.app
                    .on_notification_complete(attribute, tag, &mut self.board, &mut self.sink);
            }
        }
    }

    fn sent_on(&mut self, attribute: Attribute) -> Vec<Vec<u8>> {
        self.board
            .ble
            .sim()
            .sent
            .iter()
            .filter(|(a, _)| *a == attribute)
            .map(|(_, d)| d.clone())
            .collect()
    }
}

#[test]
fn picture_travels_from_isp_to_peer() {
    let mut rig = Rig::connected();

    rig.request(GattTarget::InfoSubscription, Some(&Subscription::Notify.encode()))
        .unwrap();
    assert_eq!(
        rig.request(GattTarget::InfoSubscription, None).unwrap(),
        Subscription::Notify.encode().to_vec()
    );

    rig.request(GattTarget::ControlPoint, Some(&[1])).unwrap();
    assert_eq!(
        rig.board.ble.sim().conn_params,
        Some(conn_params(ConnProfile::LowLatency))
    );
    rig.settle();

    let info = rig.sent_on(Attribute::ImageInfo);
    assert_eq!(
        InfoEvent::decode(&info[0]),
        Some(InfoEvent::ImageCaptured { size: IMAGE_SIZE })
    );
    assert_eq!(rig.app.transfer().state(), TransferState::ImageInfoProvided);

    rig.request(GattTarget::ControlPoint, Some(&[4])).unwrap();
    rig.settle();

    let mut image = Vec::new();
    for bytes in rig.sent_on(Attribute::ImageData) {
        let packet = DataPacket::parse(&bytes).unwrap();
        assert_eq!(packet.offset as usize, image.len());
        image.extend_from_slice(packet.payload);
    }
    assert_eq!(image.len(), IMAGE_SIZE as usize);
    assert_eq!(&image[..2], &[0xFF, 0xD8]);
    assert_eq!(&image[image.len() - 2..], &[0xFF, 0xD9]);

    assert_eq!(rig.app.transfer().state(), TransferState::Connected);
    assert!(!rig.board.peripherals.is_isp_powered());
    assert_eq!(
        rig.board.ble.sim().conn_params,
        Some(conn_params(ConnProfile::LowPower))
    );
    assert_eq!(rig.board.led.current_duty(), rig.app.config().led_idle_duty);
}

#[test]
fn rejected_requests_carry_att_codes() {
    let mut rig = Rig::connected();

    let err = rig.request(GattTarget::ControlPoint, Some(&[1])).unwrap_err();
    assert_eq!(err.code(), 0x80);

    rig.request(GattTarget::InfoSubscription, Some(&Subscription::Notify.encode()))
        .unwrap();
    let err = rig.request(GattTarget::ControlPoint, Some(&[4])).unwrap_err();
    assert_eq!(err.code(), 0x82);

    // Readable only.
    let err = rig
        .request(GattTarget::TriggerValue(TriggerId::Motion), Some(&[1]))
        .unwrap_err();
    assert_eq!(err, AttError::RequestNotSupported);
}

#[test]
fn trigger_subscription_reaches_the_sensors() {
    let mut rig = Rig::connected();

    rig.request(GattTarget::TriggerSubscription(TriggerId::Motion), Some(&[1, 0]))
        .unwrap();
    assert!(rig.board.peripherals.pir_enabled());

    rig.request(GattTarget::TriggerSubscription(TriggerId::Temperature), Some(&[1, 0]))
        .unwrap();
    assert_eq!(rig.board.peripherals.env_period(), Some(10_000));

    rig.request(GattTarget::ValueTriggerSetting(TriggerId::Temperature), Some(&[0]))
        .unwrap();
    rig.request(GattTarget::TimeTriggerSetting(TriggerId::Temperature), Some(&[2, 4, 0, 0]))
        .unwrap();
    assert_eq!(rig.board.peripherals.env_period(), Some(4_000));

    rig.app.on_disconnect(&mut rig.board, &mut rig.sink);
    rig.board.ble.on_disconnected();
    assert!(!rig.board.peripherals.pir_enabled());
    assert_eq!(rig.board.peripherals.env_period(), None);
}

#[test]
fn dfu_request_disconnects_the_peer() {
    let mut rig = Rig::connected();
    rig.request(GattTarget::DfuEnter, Some(&[1])).unwrap();
    assert!(rig.app.dfu_requested());
    assert_eq!(rig.board.ble.sim().disconnect_reason, Some(0x13));
}
