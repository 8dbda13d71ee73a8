//! Interrupt-driven event system.
//!
//! Events are produced by:
//! - GPIO edge inputs (PIR output, accelerometer interrupt)
//! - Timer callbacks (environmental sample ready, housekeeping tick)
//! - The ISP driver (an event is waiting to be fetched)
//! - The BLE stack callbacks (link changes, GATT requests, notify completions)
//!
//! Events are consumed by the main run loop, one at a time in FIFO order.
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ GPIO ISR    │────▶│              │     │              │
//! │ Timer ISR   │────▶│  EventQueue  │────▶│  Run loop    │
//! │ ISP driver  │────▶│  (MPMC)      │     │  (consumer)  │
//! │ BLE stack   │────▶│              │     │              │
//! └─────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! Payload-carrying events ([`IspEvent`], [`EnvSample`], GATT requests) are
//! fetched from their drivers once the queue says they are pending.

use heapless::mpmc::MpMcQueue;

/// Maximum number of pending events.
const EVENT_QUEUE_CAP: usize = 32;

/// Run-loop event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // ── Sensors ───────────────────────────────────────────
    /// PIR output went high.
    PirMotionStart = 0,
    /// PIR output went low.
    PirMotionEnd = 1,
    /// Accelerometer motion interrupt.
    AccelMotion = 2,
    /// Temperature / humidity sample ready.
    EnvSampleReady = 3,

    // ── Image path ────────────────────────────────────────
    /// The ISP driver has an event to hand over.
    IspEventPending = 10,

    // ── Housekeeping ──────────────────────────────────────
    /// Periodic tick (deferred trigger retries).
    Tick = 20,

    // ── BLE ───────────────────────────────────────────────
    BleConnected = 40,
    BleDisconnected = 41,
    /// A read or write request is queued in the GATT adapter.
    GattRequestPending = 42,
    /// A notification left the radio.
    NotifyComplete = 43,
    /// The negotiated MTU or link-layer data length changed.
    PacketSizeChanged = 44,
}

// ── Payload events ────────────────────────────────────────────

/// Why the ISP reports ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspReadyReason {
    PowerUp,
    TransferComplete,
}

/// Events handed over by the ISP driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IspEvent<'a> {
    Error { state: u8, code: u8 },
    Ready(IspReadyReason),
    ImageInfo { size: u32, width: u16, height: u16 },
    ImageData { offset: u32, data: &'a [u8] },
}

/// One environmental sample in hundredths of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvSample {
    /// Hundredths of a degree Celsius.
    pub temperature: i32,
    /// Hundredths of a percent relative humidity.
    pub humidity: i32,
}

// ── Lock-free MPMC queue ──────────────────────────────────────
//
// The BLE callback task and the run loop both produce; the run loop
// consumes. Each slot carries a sequence number, so concurrent pushers
// claim distinct slots.

pub struct EventQueue {
    inner: MpMcQueue<Event, EVENT_QUEUE_CAP>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub const fn new() -> Self {
        Self { inner: MpMcQueue::new() }
    }

    /// Push an event. Safe from any task or ISR, with any number of producers.
    /// Returns `false` if the queue is full (event dropped).
    pub fn push(&self, event: Event) -> bool {
        self.inner.enqueue(event).is_ok()
    }

    /// Pop the next event.
    pub fn pop(&self) -> Option<Event> {
        self.inner.dequeue()
    }

    /// Drain all pending events into a callback, FIFO.
    pub fn drain(&self, mut handler: impl FnMut(Event)) {
        while let Some(event) = self.pop() {
            handler(event);
        }
    }
}

/// Queue shared by the ISRs, the BLE callback task and the run loop.
pub static EVENTS: EventQueue = EventQueue::new();
