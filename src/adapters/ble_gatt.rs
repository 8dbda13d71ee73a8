//! BLE GATT server adapter.
//!
//! Implements [`Radio`] and [`LinkPort`] on top of the GATT server and
//! queues peer reads and writes for the run loop, which routes them into
//! the [`CameraService`] and answers with the resulting ATT status.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: Bluedroid GATT server via `esp_idf_svc::sys`.
//! - **all other targets**: simulation backend for host-side runs and tests.
//!
//! ## Request path
//!
//! ```text
//!   Bluedroid task                     run loop
//!   ──────────────                     ────────
//!   READ/WRITE_EVT ──▶ request queue ──▶ take_request() ──▶ route() ──▶ respond()
//!   CONF_EVT       ──▶ confirm count ──▶ take_completion() ──▶ on_notification_complete()
//!   MTU / pkt len  ──▶ EVENTS        ──▶ packet_size()      ──▶ on_packet_size_changed()
//! ```
//!
//! The attribute table is registered one attribute per callback, following
//! [`attribute_plan`]. Handles reported back by the stack are recorded in a
//! [`HandleMap`].

use heapless::{Deque, Vec};
use log::{debug, info, warn};

use crate::app::ports::{Board, ConnProfile, EventSink, LinkPort, Radio};
use crate::app::service::{CameraService, ReadValue};
use crate::config::DEVICE_NAME_CAP;
use crate::error::{AttError, RadioError};
use crate::gatt::{
    Attribute, CHAR_CONTROL_POINT, CHAR_DFU_ENTER, CHAR_IMAGE_DATA, CHAR_IMAGE_INFO,
    DESC_PRESENTATION_FORMAT, DESC_SUBSCRIPTION, DESC_TIME_TRIGGER_SETTING, DESC_USER_DESCRIPTION,
    DESC_VALUE_TRIGGER_SETTING, DFU_SERVICE_UUID, GattTarget, PICTURE_SERVICE_UUID,
    TRIGGER_SERVICE_UUID,
};
use crate::transfer::flow::{MAX_TX_OCTETS, MIN_TX_OCTETS, NOTIFY_OVERHEAD};
use crate::triggers::TriggerId;

// ───────────────────────────────────────────────────────────────
// Constants
// ───────────────────────────────────────────────────────────────

/// Longest write value accepted into the request queue.
pub const MAX_WRITE_LEN: usize = 16;
/// Requests waiting for the run loop.
pub const REQUEST_QUEUE_CAP: usize = 8;
/// Notifications handed to the stack and not yet confirmed.
pub const NOTIFY_QUEUE_CAP: usize = 16;
/// ATT MTU every connection starts with.
pub const DEFAULT_ATT_MTU: u16 = 23;
/// ATT notification header (opcode + handle).
const ATT_NOTIFY_HEADER: u16 = 3;

const PLAN_CAP: usize = 48;
const HANDLE_MAP_CAP: usize = 40;
const FIXED_VALUE_CAP: usize = 24;

// ───────────────────────────────────────────────────────────────
// Connection parameters
// ───────────────────────────────────────────────────────────────

/// Connection parameter update request, in link-layer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnParams {
    /// Interval, 1.25 ms units.
    pub min_interval: u16,
    pub max_interval: u16,
    pub latency: u16,
    /// Supervision timeout, 10 ms units.
    pub timeout: u16,
}

/// Parameters asked of the central for `profile`.
pub const fn conn_params(profile: ConnProfile) -> ConnParams {
    match profile {
        // 11.25 – 26.25 ms, no slave latency.
        ConnProfile::LowLatency => ConnParams {
            min_interval: 9,
            max_interval: 21,
            latency: 0,
            timeout: 600,
        },
        // 60 – 150 ms, three skipped events.
        ConnProfile::LowPower => ConnParams {
            min_interval: 48,
            max_interval: 120,
            latency: 3,
            timeout: 600,
        },
    }
}

/// Link-layer payload the flow controller may plan with.
///
/// A notification must fit both the link-layer payload (`ll_tx_octets`) and
/// the ATT MTU, so the smaller of the two wins.
pub fn effective_tx_octets(ll_tx_octets: u16, att_mtu: u16) -> u16 {
    let mtu_octets = att_mtu
        .saturating_sub(ATT_NOTIFY_HEADER)
        .saturating_add(NOTIFY_OVERHEAD as u16);
    ll_tx_octets.min(mtu_octets).clamp(MIN_TX_OCTETS, MAX_TX_OCTETS)
}

// ───────────────────────────────────────────────────────────────
// Attribute table
// ───────────────────────────────────────────────────────────────

/// Characteristic properties, mirrored onto the stack's bit flags.
pub mod props {
    pub const READ: u8 = 0x02;
    pub const WRITE: u8 = 0x08;
    pub const NOTIFY: u8 = 0x10;
}

/// One step of the attribute registration sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanItem {
    Service {
        uuid: u128,
        handles: u16,
    },
    Characteristic {
        uuid: u128,
        props: u8,
        target: Option<GattTarget>,
        notify: Option<Attribute>,
    },
    /// Descriptor answered by the run loop.
    Descriptor { uuid: u16, target: GattTarget },
    /// Read-only descriptor answered by the stack.
    FixedDescriptor {
        uuid: u16,
        value: Vec<u8, FIXED_VALUE_CAP>,
    },
}

fn fixed(uuid: u16, bytes: &[u8]) -> PlanItem {
    let mut value = Vec::new();
    let take = bytes.len().min(FIXED_VALUE_CAP);
    // `take` never exceeds the capacity.
    let _ = value.extend_from_slice(&bytes[..take]);
    PlanItem::FixedDescriptor { uuid, value }
}

/// Full registration sequence: picture transfer, sensor triggers, DFU.
pub fn attribute_plan() -> Vec<PlanItem, PLAN_CAP> {
    let mut plan: Vec<PlanItem, PLAN_CAP> = Vec::new();
    let mut add = |item: PlanItem| {
        if plan.push(item).is_err() {
            warn!("BLE: attribute plan overflow");
        }
    };

    add(PlanItem::Service { uuid: PICTURE_SERVICE_UUID, handles: 10 });
    add(PlanItem::Characteristic {
        uuid: CHAR_CONTROL_POINT,
        props: props::WRITE,
        target: Some(GattTarget::ControlPoint),
        notify: None,
    });
    add(PlanItem::Characteristic {
        uuid: CHAR_IMAGE_INFO,
        props: props::NOTIFY,
        target: None,
        notify: Some(Attribute::ImageInfo),
    });
    add(PlanItem::Descriptor { uuid: DESC_SUBSCRIPTION, target: GattTarget::InfoSubscription });
    add(PlanItem::Characteristic {
        uuid: CHAR_IMAGE_DATA,
        props: props::NOTIFY,
        target: None,
        notify: Some(Attribute::ImageData),
    });
    add(PlanItem::Descriptor { uuid: DESC_SUBSCRIPTION, target: GattTarget::DataSubscription });

    add(PlanItem::Service { uuid: TRIGGER_SERVICE_UUID, handles: 32 });
    for id in TriggerId::ALL {
        add(PlanItem::Characteristic {
            uuid: Attribute::TriggerValue(id).uuid(),
            props: props::READ | props::NOTIFY,
            target: Some(GattTarget::TriggerValue(id)),
            notify: Some(Attribute::TriggerValue(id)),
        });
        add(PlanItem::Descriptor { uuid: DESC_SUBSCRIPTION, target: GattTarget::TriggerSubscription(id) });
        add(PlanItem::Descriptor {
            uuid: DESC_VALUE_TRIGGER_SETTING,
            target: GattTarget::ValueTriggerSetting(id),
        });
        add(PlanItem::Descriptor {
            uuid: DESC_TIME_TRIGGER_SETTING,
            target: GattTarget::TimeTriggerSetting(id),
        });
        add(fixed(DESC_PRESENTATION_FORMAT, &id.presentation_format().encode()));
        add(fixed(DESC_USER_DESCRIPTION, id.user_description().as_bytes()));
    }

    add(PlanItem::Service { uuid: DFU_SERVICE_UUID, handles: 4 });
    add(PlanItem::Characteristic {
        uuid: CHAR_DFU_ENTER,
        props: props::WRITE,
        target: Some(GattTarget::DfuEnter),
        notify: None,
    });
    plan
}

/// Attribute handles assigned by the stack during registration.
#[derive(Debug, Default)]
pub struct HandleMap {
    targets: Vec<(u16, GattTarget), HANDLE_MAP_CAP>,
    notify: Vec<(Attribute, u16), 8>,
}

impl HandleMap {
    pub const fn new() -> Self {
        Self {
            targets: Vec::new(),
            notify: Vec::new(),
        }
    }

    /// Record the handle the stack gave `item`.
    pub fn bind(&mut self, handle: u16, item: &PlanItem) {
        let (target, notify) = match item {
            PlanItem::Characteristic { target, notify, .. } => (*target, *notify),
            PlanItem::Descriptor { target, .. } => (Some(*target), None),
            PlanItem::Service { .. } | PlanItem::FixedDescriptor { .. } => (None, None),
        };
        if let Some(t) = target {
            if self.targets.push((handle, t)).is_err() {
                warn!("BLE: handle map full, {:?} unreachable", t);
            }
        }
        if let Some(a) = notify {
            if self.notify.push((a, handle)).is_err() {
                warn!("BLE: handle map full, {:?} cannot notify", a);
            }
        }
    }

    pub fn target(&self, handle: u16) -> Option<GattTarget> {
        self.targets
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, t)| *t)
    }

    pub fn notify_handle(&self, attribute: Attribute) -> Option<u16> {
        self.notify
            .iter()
            .find(|(a, _)| *a == attribute)
            .map(|(_, h)| *h)
    }

    pub fn clear(&mut self) {
        self.targets.clear();
        self.notify.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// Requests
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattOp {
    Read,
    Write(Vec<u8, MAX_WRITE_LEN>),
}

/// A peer read or write waiting for the run loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattRequest {
    pub target: GattTarget,
    pub op: GattOp,
    /// Attribute handle, echoed in the response.
    pub handle: u16,
    pub trans_id: u32,
    /// Write without response sets this to `false`.
    pub need_rsp: bool,
}

impl GattRequest {
    pub fn read(target: GattTarget, handle: u16, trans_id: u32) -> Result<Self, AttError> {
        if !target.readable() {
            return Err(AttError::RequestNotSupported);
        }
        Ok(Self {
            target,
            op: GattOp::Read,
            handle,
            trans_id,
            need_rsp: true,
        })
    }

    /// A write request; values longer than any attribute accepts are
    /// refused before they reach the queue.
    pub fn write(
        target: GattTarget,
        handle: u16,
        trans_id: u32,
        need_rsp: bool,
        data: &[u8],
    ) -> Result<Self, AttError> {
        if !target.writable() {
            return Err(AttError::RequestNotSupported);
        }
        let value = Vec::from_slice(data).map_err(|()| AttError::InvalidAttributeValueLength)?;
        Ok(Self {
            target,
            op: GattOp::Write(value),
            handle,
            trans_id,
            need_rsp,
        })
    }
}

/// Hand one request to the service; the result is what the peer gets back.
pub fn route<const N: usize>(
    app: &mut CameraService<N>,
    request: &GattRequest,
    hw: &mut impl Board,
    sink: &mut impl EventSink,
) -> Result<ReadValue, AttError> {
    let result = match &request.op {
        GattOp::Read => app.handle_gatt_read(request.target, hw, sink),
        GattOp::Write(value) => app
            .handle_gatt_write(request.target, value, hw, sink)
            .map(|()| ReadValue::new()),
    };
    if let Err(e) = result {
        debug!("BLE: {:?} on {:?} -> {}", request.op, request.target, e);
    }
    result
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF Bluedroid static state
// ───────────────────────────────────────────────────────────────
//
// Bluedroid callbacks are C function pointers that cannot capture Rust
// closures. These statics bridge the callback context to the adapter.

#[cfg(target_os = "espidf")]
use core::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

#[cfg(target_os = "espidf")]
static BLE_GATTS_IF: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_CONN_ID: AtomicU32 = AtomicU32::new(u32::MAX);
#[cfg(target_os = "espidf")]
static BLE_SVC_HANDLE: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_PLAN_STEP: AtomicU32 = AtomicU32::new(0);
#[cfg(target_os = "espidf")]
static BLE_ATT_MTU: AtomicU32 = AtomicU32::new(DEFAULT_ATT_MTU as u32);
#[cfg(target_os = "espidf")]
static BLE_LL_TX_OCTETS: AtomicU32 = AtomicU32::new(MIN_TX_OCTETS as u32);
#[cfg(target_os = "espidf")]
static BLE_CONFIRMED: AtomicU32 = AtomicU32::new(0);

// GATTS callbacks run in the Bluedroid task (not ISR), so std Mutex is safe.
#[cfg(target_os = "espidf")]
static BLE_HANDLES: std::sync::Mutex<HandleMap> = std::sync::Mutex::new(HandleMap::new());
#[cfg(target_os = "espidf")]
static BLE_REQUESTS: std::sync::Mutex<Deque<GattRequest, REQUEST_QUEUE_CAP>> =
    std::sync::Mutex::new(Deque::new());
#[cfg(target_os = "espidf")]
static BLE_PEER_ADDR: std::sync::Mutex<[u8; 6]> = std::sync::Mutex::new([0; 6]);

#[cfg(target_os = "espidf")]
fn uuid128_to_esp(uuid: u128) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 16;
    t.uuid.uuid128 = uuid.to_le_bytes();
    t
}

#[cfg(target_os = "espidf")]
fn uuid16_to_esp(uuid: u16) -> esp_idf_svc::sys::esp_bt_uuid_t {
    let mut t: esp_idf_svc::sys::esp_bt_uuid_t = unsafe { core::mem::zeroed() };
    t.len = 2;
    t.uuid.uuid16 = uuid;
    t
}

#[cfg(target_os = "espidf")]
fn esp_props(p: u8) -> (u32, u32) {
    use esp_idf_svc::sys::*;
    let mut perm = 0;
    let mut prop = 0;
    if p & props::READ != 0 {
        perm |= ESP_GATT_PERM_READ;
        prop |= ESP_GATT_CHAR_PROP_BIT_READ;
    }
    if p & props::WRITE != 0 {
        perm |= ESP_GATT_PERM_WRITE;
        prop |= ESP_GATT_CHAR_PROP_BIT_WRITE;
    }
    if p & props::NOTIFY != 0 {
        prop |= ESP_GATT_CHAR_PROP_BIT_NOTIFY;
    }
    (perm, prop)
}

#[cfg(target_os = "espidf")]
fn start_advertising() {
    use esp_idf_svc::sys::*;
    unsafe {
        let mut adv_params = esp_ble_adv_params_t {
            // 211.25 ms
            adv_int_min: 338,
            adv_int_max: 338,
            adv_type: esp_ble_adv_type_t_ADV_TYPE_IND,
            own_addr_type: esp_ble_addr_type_t_BLE_ADDR_TYPE_PUBLIC,
            channel_map: esp_ble_adv_channel_t_ADV_CHNL_ALL,
            adv_filter_policy: esp_ble_adv_filter_t_ADV_FILTER_ALLOW_SCAN_ANY_CON_ANY,
            ..core::mem::zeroed()
        };
        esp_ble_gap_start_advertising(&mut adv_params);
    }
}

/// Register the attribute at the current plan step, or start advertising
/// once the plan is exhausted.
#[cfg(target_os = "espidf")]
unsafe fn register_next(gatts_if: esp_idf_svc::sys::esp_gatt_if_t) {
    use esp_idf_svc::sys::*;
    let step = BLE_PLAN_STEP.load(AtomicOrdering::Relaxed) as usize;
    let svc_handle = BLE_SVC_HANDLE.load(AtomicOrdering::Relaxed) as u16;
    let plan = attribute_plan();
    let Some(item) = plan.get(step) else {
        log::info!("BLE GATTS: all {} attributes registered", plan.len());
        start_advertising();
        return;
    };
    match item {
        PlanItem::Service { uuid, handles } => {
            let mut svc_id = esp_gatt_srvc_id_t {
                id: esp_gatt_id_t {
                    uuid: uuid128_to_esp(*uuid),
                    inst_id: 0,
                },
                is_primary: true,
            };
            unsafe { esp_ble_gatts_create_service(gatts_if, &mut svc_id, *handles) };
        }
        PlanItem::Characteristic { uuid, props, .. } => {
            let (perm, prop) = esp_props(*props);
            let mut char_uuid = uuid128_to_esp(*uuid);
            unsafe {
                esp_ble_gatts_add_char(
                    svc_handle,
                    &mut char_uuid,
                    perm as esp_gatt_perm_t,
                    prop as esp_gatt_char_prop_t,
                    core::ptr::null_mut(),
                    core::ptr::null_mut(),
                );
            }
        }
        PlanItem::Descriptor { uuid, target } => {
            let mut perm = ESP_GATT_PERM_READ;
            if target.writable() {
                perm |= ESP_GATT_PERM_WRITE;
            }
            let mut descr_uuid = uuid16_to_esp(*uuid);
            unsafe {
                esp_ble_gatts_add_char_descr(
                    svc_handle,
                    &mut descr_uuid,
                    perm as esp_gatt_perm_t,
                    core::ptr::null_mut(),
                    core::ptr::null_mut(),
                );
            }
        }
        PlanItem::FixedDescriptor { uuid, value } => {
            let mut descr_uuid = uuid16_to_esp(*uuid);
            // The stack copies the value into its attribute database.
            let mut bytes = value.clone();
            let mut attr_value = esp_attr_value_t {
                attr_max_len: bytes.len() as u16,
                attr_len: bytes.len() as u16,
                attr_value: bytes.as_mut_ptr(),
            };
            let mut control = esp_attr_control_t {
                auto_rsp: ESP_GATT_AUTO_RSP as u8,
            };
            unsafe {
                esp_ble_gatts_add_char_descr(
                    svc_handle,
                    &mut descr_uuid,
                    ESP_GATT_PERM_READ as esp_gatt_perm_t,
                    &mut attr_value,
                    &mut control,
                );
            }
        }
    }
}

/// Record the handle of the attribute just added and move on.
#[cfg(target_os = "espidf")]
unsafe fn attribute_added(gatts_if: esp_idf_svc::sys::esp_gatt_if_t, handle: u16) {
    let step = BLE_PLAN_STEP.load(AtomicOrdering::Relaxed) as usize;
    if let Some(item) = attribute_plan().get(step) {
        if let Ok(mut map) = BLE_HANDLES.lock() {
            map.bind(handle, item);
        }
    }
    BLE_PLAN_STEP.store(step as u32 + 1, AtomicOrdering::Relaxed);
    unsafe { register_next(gatts_if) };
}

#[cfg(target_os = "espidf")]
unsafe fn send_status(
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    conn_id: u16,
    trans_id: u32,
    handle: u16,
    result: &Result<ReadValue, AttError>,
) {
    use esp_idf_svc::sys::*;
    let mut rsp: esp_gatt_rsp_t = unsafe { core::mem::zeroed() };
    let status = match result {
        Ok(value) => {
            unsafe {
                rsp.attr_value.handle = handle;
                rsp.attr_value.len = value.len() as u16;
                rsp.attr_value.value[..value.len()].copy_from_slice(value);
            }
            esp_gatt_status_t_ESP_GATT_OK
        }
        Err(e) => e.code() as esp_gatt_status_t,
    };
    unsafe { esp_ble_gatts_send_response(gatts_if, conn_id, trans_id, status, &mut rsp) };
}

/// Wake the run loop from the BLE callback task.
#[cfg(target_os = "espidf")]
fn post(event: crate::events::Event) {
    if !crate::events::EVENTS.push(event) {
        log::warn!("BLE: event queue full, {:?} dropped", event);
    }
}

/// Queue a request for the run loop, or answer right away if it cannot be.
#[cfg(target_os = "espidf")]
unsafe fn enqueue(
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    conn_id: u16,
    trans_id: u32,
    handle: u16,
    request: Result<GattRequest, AttError>,
) {
    let rejected = match request {
        Ok(req) => {
            let need_rsp = req.need_rsp;
            let queued = BLE_REQUESTS
                .lock()
                .map(|mut q| q.push_back(req).is_ok())
                .unwrap_or(false);
            if queued {
                post(crate::events::Event::GattRequestPending);
                return;
            }
            log::warn!("BLE GATTS: request queue full (handle={})", handle);
            if !need_rsp {
                return;
            }
            AttError::Unlikely
        }
        Err(e) => e,
    };
    unsafe { send_status(gatts_if, conn_id, trans_id, handle, &Err(rejected)) };
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gap_event_handler(
    event: esp_idf_svc::sys::esp_gap_ble_cb_event_t,
    param: *mut esp_idf_svc::sys::esp_ble_gap_cb_param_t,
) {
    use esp_idf_svc::sys::*;
    match event {
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_ADV_START_COMPLETE_EVT => {
            log::info!("BLE GAP: advertising started");
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_UPDATE_CONN_PARAMS_EVT => {
            let p = unsafe { &(*param).update_conn_params };
            log::info!(
                "BLE GAP: conn params int={} latency={} timeout={}",
                p.conn_int,
                p.latency,
                p.timeout
            );
        }
        esp_gap_ble_cb_event_t_ESP_GAP_BLE_SET_PKT_LENGTH_COMPLETE_EVT => {
            let p = unsafe { &(*param).pkt_data_length_cmpl };
            log::info!("BLE GAP: data length tx={} rx={}", p.params.tx_len, p.params.rx_len);
            BLE_LL_TX_OCTETS.store(u32::from(p.params.tx_len), AtomicOrdering::Relaxed);
            post(crate::events::Event::PacketSizeChanged);
        }
        _ => {}
    }
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn ble_gatts_event_handler(
    event: esp_idf_svc::sys::esp_gatts_cb_event_t,
    gatts_if: esp_idf_svc::sys::esp_gatt_if_t,
    param: *mut esp_idf_svc::sys::esp_ble_gatts_cb_param_t,
) {
    use crate::events::Event;
    use esp_idf_svc::sys::*;

    BLE_GATTS_IF.store(gatts_if as u32, AtomicOrdering::Relaxed);

    match event {
        esp_gatts_cb_event_t_ESP_GATTS_REG_EVT => {
            log::info!("BLE GATTS: app registered (if={})", gatts_if);
            BLE_PLAN_STEP.store(0, AtomicOrdering::Relaxed);
            if let Ok(mut map) = BLE_HANDLES.lock() {
                map.clear();
            }
            unsafe { register_next(gatts_if) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_CREATE_EVT => {
            let p = unsafe { &(*param).create };
            BLE_SVC_HANDLE.store(u32::from(p.service_handle), AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: service created (handle={})", p.service_handle);
            unsafe {
                esp_ble_gatts_start_service(p.service_handle);
                attribute_added(gatts_if, p.service_handle);
            }
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_EVT => {
            let p = unsafe { &(*param).add_char };
            unsafe { attribute_added(gatts_if, p.attr_handle) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_ADD_CHAR_DESCR_EVT => {
            let p = unsafe { &(*param).add_char_descr };
            unsafe { attribute_added(gatts_if, p.attr_handle) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONNECT_EVT => {
            let p = unsafe { &mut (*param).connect };
            BLE_CONN_ID.store(u32::from(p.conn_id), AtomicOrdering::Relaxed);
            BLE_ATT_MTU.store(u32::from(DEFAULT_ATT_MTU), AtomicOrdering::Relaxed);
            BLE_LL_TX_OCTETS.store(u32::from(MIN_TX_OCTETS), AtomicOrdering::Relaxed);
            BLE_CONFIRMED.store(0, AtomicOrdering::Relaxed);
            if let Ok(mut addr) = BLE_PEER_ADDR.lock() {
                *addr = p.remote_bda;
            }
            log::info!("BLE GATTS: client connected (conn_id={})", p.conn_id);
            unsafe { esp_ble_gap_set_pkt_data_len(p.remote_bda.as_mut_ptr(), MAX_TX_OCTETS) };
            post(Event::BleConnected);
        }
        esp_gatts_cb_event_t_ESP_GATTS_DISCONNECT_EVT => {
            let p = unsafe { &(*param).disconnect };
            BLE_CONN_ID.store(u32::MAX, AtomicOrdering::Relaxed);
            log::info!("BLE GATTS: client disconnected (reason=0x{:02x})", p.reason);
            if let Ok(mut q) = BLE_REQUESTS.lock() {
                q.clear();
            }
            post(Event::BleDisconnected);
            start_advertising();
        }
        esp_gatts_cb_event_t_ESP_GATTS_MTU_EVT => {
            let p = unsafe { &(*param).mtu };
            log::info!("BLE GATTS: MTU {}", p.mtu);
            BLE_ATT_MTU.store(u32::from(p.mtu), AtomicOrdering::Relaxed);
            post(Event::PacketSizeChanged);
        }
        esp_gatts_cb_event_t_ESP_GATTS_CONF_EVT => {
            let p = unsafe { &(*param).conf };
            if p.status != esp_gatt_status_t_ESP_GATT_OK {
                log::warn!("BLE GATTS: notify failed (status={})", p.status);
            }
            BLE_CONFIRMED.fetch_add(1, AtomicOrdering::Release);
            post(Event::NotifyComplete);
        }
        esp_gatts_cb_event_t_ESP_GATTS_READ_EVT => {
            let p = unsafe { &(*param).read };
            let target = BLE_HANDLES.lock().ok().and_then(|m| m.target(p.handle));
            let request = match target {
                Some(t) if p.offset == 0 => GattRequest::read(t, p.handle, p.trans_id),
                Some(_) => Err(AttError::RequestNotSupported),
                None => return,
            };
            unsafe { enqueue(gatts_if, p.conn_id, p.trans_id, p.handle, request) };
        }
        esp_gatts_cb_event_t_ESP_GATTS_WRITE_EVT => {
            let p = unsafe { &(*param).write };
            let data = unsafe { core::slice::from_raw_parts(p.value, p.len as usize) };
            let target = BLE_HANDLES.lock().ok().and_then(|m| m.target(p.handle));
            let request = match target {
                Some(t) if !p.is_prep && p.offset == 0 => {
                    GattRequest::write(t, p.handle, p.trans_id, p.need_rsp, data)
                }
                Some(_) => Err(AttError::RequestNotSupported),
                None => return,
            };
            unsafe { enqueue(gatts_if, p.conn_id, p.trans_id, p.handle, request) };
        }
        _ => {}
    }
}

// ───────────────────────────────────────────────────────────────
// Adapter
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleState {
    Idle,
    Advertising,
    Connected,
    Failed,
}

pub struct BleGattAdapter {
    state: BleState,
    device_name: heapless::String<DEVICE_NAME_CAP>,
    /// Notifications handed to the stack, oldest first.
    in_flight: Deque<(Attribute, u16), NOTIFY_QUEUE_CAP>,
    #[cfg(not(target_os = "espidf"))]
    sim: SimLink,
}

/// Simulation backend: the test drives the peer side by hand.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimLink {
    pub handles: HandleMap,
    pub requests: Deque<GattRequest, REQUEST_QUEUE_CAP>,
    pub responses: std::vec::Vec<(u32, Result<ReadValue, AttError>)>,
    pub sent: std::vec::Vec<(Attribute, std::vec::Vec<u8>)>,
    pub confirmed: u32,
    pub att_mtu: u16,
    pub ll_tx_octets: u16,
    pub disconnect_reason: Option<u8>,
    pub conn_params: Option<ConnParams>,
}

impl BleGattAdapter {
    pub fn new(device_name: heapless::String<DEVICE_NAME_CAP>) -> Self {
        Self {
            state: BleState::Idle,
            device_name,
            in_flight: Deque::new(),
            #[cfg(not(target_os = "espidf"))]
            sim: SimLink {
                att_mtu: DEFAULT_ATT_MTU,
                ll_tx_octets: MIN_TX_OCTETS,
                ..SimLink::default()
            },
        }
    }

    pub fn state(&self) -> BleState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == BleState::Connected
    }

    /// Bring the stack up and start advertising.
    pub fn start(&mut self) {
        info!("BLE: starting GATT server as '{}'", self.device_name);
        self.state = if self.platform_start() {
            BleState::Advertising
        } else {
            BleState::Failed
        };
    }

    pub fn on_connected(&mut self) {
        self.in_flight.clear();
        self.state = BleState::Connected;
    }

    /// Unconfirmed notifications die with the link.
    pub fn on_disconnected(&mut self) {
        if !self.in_flight.is_empty() {
            debug!("BLE: {} notifications lost with the link", self.in_flight.len());
        }
        self.in_flight.clear();
        if self.state != BleState::Failed {
            self.state = BleState::Advertising;
        }
    }

    /// Next completed notification, oldest first.
    pub fn take_completion(&mut self) -> Option<(Attribute, u16)> {
        if self.in_flight.is_empty() || !self.platform_take_confirmed() {
            return None;
        }
        self.in_flight.pop_front()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Link-layer payload usable for notifications right now.
    pub fn packet_size(&self) -> u16 {
        let (ll, mtu) = self.platform_link_sizes();
        effective_tx_octets(ll, mtu)
    }

    pub fn take_request(&mut self) -> Option<GattRequest> {
        self.platform_take_request()
    }

    /// Answer a request that asked for a response.
    pub fn respond(&mut self, request: &GattRequest, result: &Result<ReadValue, AttError>) {
        if request.need_rsp {
            self.platform_respond(request, result);
        }
    }

    // ── Platform-specific ─────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn platform_start(&mut self) -> bool {
        use esp_idf_svc::sys::*;
        unsafe {
            // BLE-only: hand classic BT memory back to the heap.
            esp_bt_controller_mem_release(esp_bt_mode_t_ESP_BT_MODE_CLASSIC_BT);

            let mut bt_cfg = esp_bt_controller_config_t::default();
            let ret = esp_bt_controller_init(&mut bt_cfg);
            if ret != ESP_OK as i32 {
                log::error!("BLE: bt_controller_init failed ({})", ret);
                return false;
            }
            let ret = esp_bt_controller_enable(esp_bt_mode_t_ESP_BT_MODE_BLE);
            if ret != ESP_OK as i32 {
                log::error!("BLE: bt_controller_enable failed ({})", ret);
                return false;
            }
            let ret = esp_bluedroid_init();
            if ret != ESP_OK as i32 {
                log::error!("BLE: bluedroid_init failed ({})", ret);
                return false;
            }
            let ret = esp_bluedroid_enable();
            if ret != ESP_OK as i32 {
                log::error!("BLE: bluedroid_enable failed ({})", ret);
                return false;
            }

            esp_ble_gap_register_callback(Some(ble_gap_event_handler));
            esp_ble_gatts_register_callback(Some(ble_gatts_event_handler));
            esp_ble_gatt_set_local_mtu(517);

            let mut name = [0u8; 25];
            name[..self.device_name.len()].copy_from_slice(self.device_name.as_bytes());
            esp_ble_gap_set_device_name(name.as_ptr() as *const _);

            // Advertising starts once the attribute table is registered.
            esp_ble_gatts_app_register(0);
        }
        info!("BLE(espidf): Bluedroid up, registering attributes");
        true
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_start(&mut self) -> bool {
        self.sim.handles.clear();
        for (i, item) in attribute_plan().iter().enumerate() {
            self.sim.handles.bind(i as u16 + 1, item);
        }
        info!(
            "BLE(sim): advertising '{}' (service {:032x})",
            self.device_name, PICTURE_SERVICE_UUID
        );
        true
    }

    #[cfg(target_os = "espidf")]
    fn platform_take_confirmed(&mut self) -> bool {
        BLE_CONFIRMED
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_take_confirmed(&mut self) -> bool {
        if self.sim.confirmed == 0 {
            return false;
        }
        self.sim.confirmed -= 1;
        true
    }

    #[cfg(target_os = "espidf")]
    fn platform_link_sizes(&self) -> (u16, u16) {
        (
            BLE_LL_TX_OCTETS.load(AtomicOrdering::Relaxed) as u16,
            BLE_ATT_MTU.load(AtomicOrdering::Relaxed) as u16,
        )
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_link_sizes(&self) -> (u16, u16) {
        (self.sim.ll_tx_octets, self.sim.att_mtu)
    }

    #[cfg(target_os = "espidf")]
    fn platform_take_request(&mut self) -> Option<GattRequest> {
        BLE_REQUESTS.lock().ok().and_then(|mut q| q.pop_front())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_take_request(&mut self) -> Option<GattRequest> {
        self.sim.requests.pop_front()
    }

    #[cfg(target_os = "espidf")]
    fn platform_respond(&mut self, request: &GattRequest, result: &Result<ReadValue, AttError>) {
        let conn = BLE_CONN_ID.load(AtomicOrdering::Relaxed);
        if conn == u32::MAX {
            return;
        }
        let gatts_if = BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as esp_idf_svc::sys::esp_gatt_if_t;
        unsafe { send_status(gatts_if, conn as u16, request.trans_id, request.handle, result) };
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_respond(&mut self, request: &GattRequest, result: &Result<ReadValue, AttError>) {
        self.sim.responses.push((request.trans_id, result.clone()));
    }

    #[cfg(target_os = "espidf")]
    fn platform_notify(&mut self, attribute: Attribute, data: &[u8]) -> Result<(), RadioError> {
        use esp_idf_svc::sys::*;
        let handle = BLE_HANDLES
            .lock()
            .ok()
            .and_then(|m| m.notify_handle(attribute))
            .ok_or(RadioError::NotConnected)?;
        let conn = BLE_CONN_ID.load(AtomicOrdering::Relaxed);
        if conn == u32::MAX {
            return Err(RadioError::NotConnected);
        }
        let ret = unsafe {
            esp_ble_gatts_send_indicate(
                BLE_GATTS_IF.load(AtomicOrdering::Relaxed) as esp_gatt_if_t,
                conn as u16,
                handle,
                data.len() as u16,
                data.as_ptr() as *mut u8,
                false,
            )
        };
        if ret != ESP_OK as i32 {
            return Err(RadioError::QueueFull);
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_notify(&mut self, attribute: Attribute, data: &[u8]) -> Result<(), RadioError> {
        self.sim.sent.push((attribute, data.to_vec()));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn platform_disconnect(&mut self, reason: u8) {
        use esp_idf_svc::sys::*;
        let Ok(mut addr) = BLE_PEER_ADDR.lock() else {
            return;
        };
        // Bluedroid always reports 0x16 to the peer.
        debug!("BLE: disconnect requested with reason 0x{:02x}", reason);
        unsafe { esp_ble_gap_disconnect(addr.as_mut_ptr()) };
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_disconnect(&mut self, reason: u8) {
        self.sim.disconnect_reason = Some(reason);
    }

    #[cfg(target_os = "espidf")]
    fn platform_conn_params(&mut self, params: ConnParams) {
        use esp_idf_svc::sys::*;
        let Ok(addr) = BLE_PEER_ADDR.lock() else {
            return;
        };
        let mut update = esp_ble_conn_update_params_t {
            bda: *addr,
            min_int: params.min_interval,
            max_int: params.max_interval,
            latency: params.latency,
            timeout: params.timeout,
        };
        unsafe { esp_ble_gap_update_conn_params(&mut update) };
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_conn_params(&mut self, params: ConnParams) {
        self.sim.conn_params = Some(params);
    }
}

#[cfg(not(target_os = "espidf"))]
impl BleGattAdapter {
    pub fn sim(&mut self) -> &mut SimLink {
        &mut self.sim
    }

    /// Queue a peer request against `handle`, the way the stack callback does.
    pub fn sim_request(&mut self, handle: u16, trans_id: u32, write: Option<&[u8]>) {
        let Some(target) = self.sim.handles.target(handle) else {
            warn!("BLE(sim): no attribute at handle {}", handle);
            return;
        };
        let request = match write {
            Some(data) => GattRequest::write(target, handle, trans_id, true, data),
            None => GattRequest::read(target, handle, trans_id),
        };
        match request {
            Ok(req) => {
                if self.sim.requests.push_back(req).is_err() {
                    self.sim.responses.push((trans_id, Err(AttError::Unlikely)));
                }
            }
            Err(e) => self.sim.responses.push((trans_id, Err(e))),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Port implementations
// ───────────────────────────────────────────────────────────────

impl Radio for BleGattAdapter {
    fn notify(&mut self, attribute: Attribute, tag: u16, data: &[u8]) -> Result<(), RadioError> {
        if self.state != BleState::Connected {
            return Err(RadioError::NotConnected);
        }
        let max = (self.packet_size() as usize).saturating_sub(NOTIFY_OVERHEAD);
        if data.len() > max {
            return Err(RadioError::PayloadTooLarge(data.len()));
        }
        if self.in_flight.is_full() {
            return Err(RadioError::QueueFull);
        }
        self.platform_notify(attribute, data)?;
        // Checked for room above.
        let _ = self.in_flight.push_back((attribute, tag));
        Ok(())
    }
}

impl LinkPort for BleGattAdapter {
    fn disconnect(&mut self, reason: u8) {
        if self.state == BleState::Connected {
            info!("BLE: disconnecting (reason 0x{:02x})", reason);
            self.platform_disconnect(reason);
        }
    }

    fn request_conn_params(&mut self, profile: ConnProfile) {
        if self.state == BleState::Connected {
            debug!("BLE: requesting {:?} connection parameters", profile);
            self.platform_conn_params(conn_params(profile));
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
