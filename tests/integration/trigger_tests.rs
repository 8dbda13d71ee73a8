//! Sensor trigger service driven through the `CameraService`.

use crate::mock_hw::{BoardCall, MockBoard, RecordingSink};

use camsense::app::events::AppEvent;
use camsense::app::service::{CameraService, HCI_REMOTE_USER_TERMINATED};
use camsense::config::SystemConfig;
use camsense::error::AttError;
use camsense::events::EnvSample;
use camsense::gatt::{Attribute, GattTarget, Subscription};
use camsense::triggers::TriggerId;

const CACHE: usize = 8 * 1024;

const ON: [u8; 2] = Subscription::Notify.encode();
const OFF: [u8; 2] = Subscription::Off.encode();

const VALUE_CHANGED: [u8; 1] = [0];
const TIME_NONE: [u8; 1] = [0];

type App = CameraService<CACHE>;

fn min_interval(secs: u32) -> [u8; 4] {
    let b = secs.to_le_bytes();
    [2, b[0], b[1], b[2]]
}

fn crossed_boundary(b: i32) -> [u8; 5] {
    let v = b.to_le_bytes();
    [1, v[0], v[1], v[2], v[3]]
}

fn connected_with(config: SystemConfig) -> (App, MockBoard, RecordingSink) {
    let mut app = App::new(config).unwrap();
    let mut hw = MockBoard::new();
    let mut sink = RecordingSink::new();
    app.on_connect(&mut hw, &mut sink);
    hw.clear();
    hw.now.set(100_000);
    (app, hw, sink)
}

fn connected() -> (App, MockBoard, RecordingSink) {
    connected_with(SystemConfig::default())
}

fn env(temperature: i32, humidity: i32) -> EnvSample {
    EnvSample {
        temperature,
        humidity,
    }
}

// ── Enable / disable ──────────────────────────────────────────

#[test]
fn motion_subscription_powers_the_pir() {
    let (mut app, mut hw, mut sink) = connected();

    app.write_trigger_subscription(TriggerId::Motion, &ON, &mut hw, &mut sink)
        .unwrap();
    assert!(app.triggers().is_enabled(TriggerId::Motion));
    assert!(hw.called(&BoardCall::SetPir(true)));
    assert!(sink.events.iter().any(|e| matches!(
        e,
        AppEvent::TriggerUpdated { id: TriggerId::Motion, enabled: true, .. }
    )));

    app.write_trigger_subscription(TriggerId::Motion, &OFF, &mut hw, &mut sink)
        .unwrap();
    assert!(hw.called(&BoardCall::SetPir(false)));
}

#[test]
fn acceleration_subscription_arms_motion_detection() {
    let (mut app, mut hw, mut sink) = connected();
    app.write_trigger_subscription(TriggerId::Acceleration, &ON, &mut hw, &mut sink)
        .unwrap();
    assert!(hw.called(&BoardCall::SetAccel(true)));
    assert!(!hw.called(&BoardCall::SetPir(true)));
}

#[test]
fn bad_subscription_values() {
    let (mut app, mut hw, mut sink) = connected();
    assert_eq!(
        app.write_trigger_subscription(TriggerId::Motion, &[1], &mut hw, &mut sink),
        Err(AttError::InvalidAttributeValueLength)
    );
    assert_eq!(
        app.write_trigger_subscription(TriggerId::Motion, &[2, 0], &mut hw, &mut sink),
        Err(AttError::RequestNotSupported)
    );
    assert!(!app.triggers().is_enabled(TriggerId::Motion));
}

#[test]
fn disconnect_disables_every_trigger() {
    let (mut app, mut hw, mut sink) = connected();
    app.write_trigger_subscription(TriggerId::Motion, &ON, &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_subscription(TriggerId::Temperature, &ON, &mut hw, &mut sink)
        .unwrap();
    hw.clear();

    app.on_disconnect(&mut hw, &mut sink);
    for id in TriggerId::ALL {
        assert!(!app.triggers().is_enabled(id));
    }
    assert!(hw.called(&BoardCall::SetPir(false)));
    assert!(hw.called(&BoardCall::StopMeasurement));
    assert_eq!(app.env_sample_period(), None);
    assert!(sink.contains(&AppEvent::EnvSamplingChanged(None)));
}

// ── Environmental sampling period ─────────────────────────────

#[test]
fn env_period_follows_the_enabled_triggers() {
    let (mut app, mut hw, mut sink) = connected();

    app.write_trigger_value_setting(TriggerId::Temperature, &VALUE_CHANGED, &mut hw, &mut sink)
        .unwrap();
    // Not enabled yet: nothing to power.
    assert!(hw.calls.is_empty());

    app.write_trigger_subscription(TriggerId::Temperature, &ON, &mut hw, &mut sink)
        .unwrap();
    assert_eq!(app.env_sample_period(), Some(10_000));
    assert!(hw.called(&BoardCall::StartMeasurement(10_000)));

    app.write_trigger_time_setting(TriggerId::Temperature, &min_interval(2), &mut hw, &mut sink)
        .unwrap();
    assert_eq!(app.env_sample_period(), Some(2_000));
    assert!(hw.called(&BoardCall::StartMeasurement(2_000)));

    app.write_trigger_time_setting(TriggerId::Temperature, &min_interval(0), &mut hw, &mut sink)
        .unwrap();
    assert_eq!(app.env_sample_period(), Some(1_000));

    app.write_trigger_subscription(TriggerId::Temperature, &OFF, &mut hw, &mut sink)
        .unwrap();
    assert_eq!(app.env_sample_period(), None);
    assert_eq!(hw.calls.last(), Some(&BoardCall::StopMeasurement));
    assert!(sink.contains(&AppEvent::EnvSamplingChanged(Some(2_000))));
    assert!(sink.contains(&AppEvent::EnvSamplingChanged(None)));
}

#[test]
fn interval_without_value_condition_keeps_the_default_period() {
    let (mut app, mut hw, mut sink) = connected();
    app.write_trigger_time_setting(TriggerId::Humidity, &min_interval(3), &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_subscription(TriggerId::Humidity, &ON, &mut hw, &mut sink)
        .unwrap();
    assert_eq!(app.env_sample_period(), Some(10_000));
}

// ── Notifications ─────────────────────────────────────────────

#[test]
fn temperature_crossing_a_boundary_notifies() {
    let (mut app, mut hw, mut sink) = connected();
    app.write_trigger_value_setting(TriggerId::Temperature, &crossed_boundary(2_500), &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_subscription(TriggerId::Temperature, &ON, &mut hw, &mut sink)
        .unwrap();

    for t in [2_400, 2_600, 2_700, 2_450] {
        hw.advance(1_000);
        app.on_env_sample(env(t, 4_500), &mut hw, &mut sink);
    }

    let sent = hw.sent_on(Attribute::TriggerValue(TriggerId::Temperature));
    assert_eq!(sent, vec![2_600i32.to_le_bytes().to_vec(), 2_450i32.to_le_bytes().to_vec()]);
    assert!(hw.sent_on(Attribute::TriggerValue(TriggerId::Humidity)).is_empty());
    assert!(sink.contains(&AppEvent::TriggerNotified {
        id: TriggerId::Temperature,
        value: 2_600
    }));
}

#[test]
fn pir_edges_report_motion_then_idle() {
    let (mut app, mut hw, mut sink) = connected();
    app.write_trigger_value_setting(TriggerId::Motion, &VALUE_CHANGED, &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_subscription(TriggerId::Motion, &ON, &mut hw, &mut sink)
        .unwrap();

    app.on_pir_edge(true, &mut hw, &mut sink);
    let sent = hw.sent_on(Attribute::TriggerValue(TriggerId::Motion));
    assert_eq!(sent, vec![vec![1, 0, 0, 0], vec![0, 0, 0, 0]]);
}

#[test]
fn disabled_trigger_stays_quiet() {
    let (mut app, mut hw, mut sink) = connected();
    app.write_trigger_value_setting(TriggerId::Acceleration, &VALUE_CHANGED, &mut hw, &mut sink)
        .unwrap();
    app.on_accel_event(&mut hw, &mut sink);
    assert!(hw.sent.is_empty());
    assert_eq!(app.triggers().value(TriggerId::Acceleration), 0);
}

#[test]
fn min_interval_drops_changes_by_default() {
    let (mut app, mut hw, mut sink) = connected();
    app.write_trigger_value_setting(TriggerId::Motion, &VALUE_CHANGED, &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_time_setting(TriggerId::Motion, &min_interval(5), &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_subscription(TriggerId::Motion, &ON, &mut hw, &mut sink)
        .unwrap();

    app.on_pir_edge(true, &mut hw, &mut sink);
    hw.advance(10_000);
    app.tick(&mut hw);
    assert_eq!(
        hw.sent_on(Attribute::TriggerValue(TriggerId::Motion)),
        vec![vec![1, 0, 0, 0]]
    );
}

#[test]
fn deferred_change_goes_out_once_the_gate_opens() {
    let mut config = SystemConfig::default();
    config.retry_deferred_notifications = true;
    let (mut app, mut hw, mut sink) = connected_with(config);
    app.write_trigger_value_setting(TriggerId::Motion, &VALUE_CHANGED, &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_time_setting(TriggerId::Motion, &min_interval(5), &mut hw, &mut sink)
        .unwrap();
    app.write_trigger_subscription(TriggerId::Motion, &ON, &mut hw, &mut sink)
        .unwrap();

    app.on_pir_edge(true, &mut hw, &mut sink);
    assert!(app.triggers().is_deferred(TriggerId::Motion));

    hw.advance(4_999);
    app.tick(&mut hw);
    assert_eq!(hw.sent_on(Attribute::TriggerValue(TriggerId::Motion)).len(), 1);

    hw.advance(1);
    app.tick(&mut hw);
    assert_eq!(
        hw.sent_on(Attribute::TriggerValue(TriggerId::Motion)),
        vec![vec![1, 0, 0, 0], vec![0, 0, 0, 0]]
    );
    assert!(!app.triggers().is_deferred(TriggerId::Motion));
}

// ── Reads ─────────────────────────────────────────────────────

#[test]
fn value_read_enables_and_returns_the_cached_sample() {
    let (mut app, mut hw, mut sink) = connected();

    assert_eq!(app.read_trigger_value(TriggerId::Humidity, &mut hw, &mut sink), [0; 4]);
    assert!(app.triggers().is_enabled(TriggerId::Humidity));
    assert!(hw.called(&BoardCall::StartMeasurement(10_000)));

    app.on_env_sample(env(2_100, 4_550), &mut hw, &mut sink);
    assert_eq!(
        app.read_trigger_value(TriggerId::Humidity, &mut hw, &mut sink),
        4_550i32.to_le_bytes()
    );
    // Default value condition never notifies.
    assert!(hw.sent.is_empty());

    let sub = app
        .handle_gatt_read(GattTarget::TriggerSubscription(TriggerId::Humidity), &mut hw, &mut sink)
        .unwrap();
    assert_eq!(sub.as_slice(), &ON);
}

#[test]
fn settings_read_back_as_written() {
    let (mut app, mut hw, mut sink) = connected();
    let value = crossed_boundary(-150);
    app.handle_gatt_write(GattTarget::ValueTriggerSetting(TriggerId::Temperature), &value, &mut hw, &mut sink)
        .unwrap();
    app.handle_gatt_write(GattTarget::TimeTriggerSetting(TriggerId::Temperature), &min_interval(60), &mut hw, &mut sink)
        .unwrap();

    let read = app
        .handle_gatt_read(GattTarget::ValueTriggerSetting(TriggerId::Temperature), &mut hw, &mut sink)
        .unwrap();
    assert_eq!(read.as_slice(), &value);
    let read = app
        .handle_gatt_read(GattTarget::TimeTriggerSetting(TriggerId::Temperature), &mut hw, &mut sink)
        .unwrap();
    assert_eq!(read.as_slice(), &min_interval(60));

    let read = app
        .handle_gatt_read(GattTarget::TimeTriggerSetting(TriggerId::Motion), &mut hw, &mut sink)
        .unwrap();
    assert_eq!(read.as_slice(), &TIME_NONE);
}

#[test]
fn unsupported_conditions_are_refused() {
    let (mut app, mut hw, mut sink) = connected();

    let err = app
        .write_trigger_value_setting(TriggerId::Motion, &crossed_boundary(1), &mut hw, &mut sink)
        .unwrap_err();
    assert_eq!(err, AttError::TriggerConditionNotSupported);
    assert_eq!(err.code(), 0x80);

    // Periodic is not offered by any trigger.
    assert_eq!(
        app.write_trigger_time_setting(TriggerId::Temperature, &[1, 10, 0, 0], &mut hw, &mut sink),
        Err(AttError::TriggerConditionNotSupported)
    );
    assert_eq!(
        app.write_trigger_value_setting(TriggerId::Humidity, &[9], &mut hw, &mut sink),
        Err(AttError::TriggerConditionNotSupported)
    );
    assert_eq!(
        app.write_trigger_value_setting(TriggerId::Humidity, &[0, 1], &mut hw, &mut sink),
        Err(AttError::InvalidAttributeValueLength)
    );
    assert_eq!(
        app.handle_gatt_write(GattTarget::TriggerValue(TriggerId::Humidity), &[0; 4], &mut hw, &mut sink),
        Err(AttError::RequestNotSupported)
    );
}

// ── DFU ───────────────────────────────────────────────────────

#[test]
fn dfu_write_arms_and_drops_the_peer() {
    let (mut app, mut hw, mut sink) = connected();

    assert_eq!(
        app.handle_gatt_write(GattTarget::DfuEnter, &[2], &mut hw, &mut sink),
        Err(AttError::RequestNotSupported)
    );
    assert_eq!(
        app.handle_gatt_write(GattTarget::DfuEnter, &[], &mut hw, &mut sink),
        Err(AttError::InvalidAttributeValueLength)
    );
    assert!(!app.dfu_requested());

    app.handle_gatt_write(GattTarget::DfuEnter, &[1], &mut hw, &mut sink)
        .unwrap();
    assert!(app.dfu_requested());
    assert!(hw.called(&BoardCall::Disconnect(HCI_REMOTE_USER_TERMINATED)));
    assert_eq!(hw.last_led(), Some(app.config().led_dfu_duty));
    assert!(sink.contains(&AppEvent::DfuArmed));
}
