//! Unified error types for the CamSense firmware.
//!
//! Every subsystem owns a small `Copy` error enum; the top-level [`Error`]
//! wraps them so the run loop can handle any failure uniformly.  Errors that
//! originate from a peer's GATT write additionally map onto a one-byte ATT
//! application error code through [`AttError`].

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Image cache push/pop violated its capacity.
    Buffer(RingBufferError),
    /// Transport packet-size negotiation failed.
    Flow(FlowError),
    /// Image transfer engine rejected an operation.
    Transfer(TransferError),
    /// Sensor trigger engine rejected an operation.
    Trigger(TriggerError),
    /// The radio refused a notification.
    Radio(RadioError),
    /// DFU control write was malformed.
    Dfu(DfuError),
    /// Configuration is invalid or could not be loaded.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(e) => write!(f, "buffer: {e}"),
            Self::Flow(e) => write!(f, "flow: {e}"),
            Self::Transfer(e) => write!(f, "transfer: {e}"),
            Self::Trigger(e) => write!(f, "trigger: {e}"),
            Self::Radio(e) => write!(f, "radio: {e}"),
            Self::Dfu(e) => write!(f, "dfu: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ring buffer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingBufferError {
    /// Push larger than the remaining free space.
    CapacityExceeded { requested: usize, free: usize },
    /// Pop larger than the number of buffered bytes.
    Underflow { requested: usize, used: usize },
}

impl fmt::Display for RingBufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded { requested, free } => {
                write!(f, "capacity exceeded ({requested} requested, {free} free)")
            }
            Self::Underflow { requested, used } => {
                write!(f, "underflow ({requested} requested, {used} buffered)")
            }
        }
    }
}

impl From<RingBufferError> for Error {
    fn from(e: RingBufferError) -> Self {
        Self::Buffer(e)
    }
}

// ---------------------------------------------------------------------------
// Flow control errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// Negotiated packet size outside the link-layer limits.
    OutOfRange(u16),
    /// Packet size changed while an image transfer was in progress.
    /// Fatal for the connection: offset accounting is no longer valid.
    TransferInProgress,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange(octets) => write!(f, "packet size {octets} out of range"),
            Self::TransferInProgress => write!(f, "renegotiation during transfer"),
        }
    }
}

impl From<FlowError> for Error {
    fn from(e: FlowError) -> Self {
        Self::Flow(e)
    }
}

// ---------------------------------------------------------------------------
// Image transfer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Capture requested without an info-notification subscription.
    NotificationsDisabled,
    /// Capture requested while another capture is in progress.
    ProcedureInProgress,
    /// Data transfer requested before image info was provided.
    TransferNotAllowed,
    /// Producer reported an image size of zero.
    InvalidSize,
    /// Operation not allowed in the current state.
    NotPermitted,
    /// Attribute write of the wrong length.
    InvalidLength,
    /// Unknown control-point opcode.
    UnsupportedOpcode(u8),
    /// Subscription descriptor value other than 0 or 1.
    UnsupportedSubscription(u16),
    /// Producer pushed more than the current budget or the remaining image.
    PushTooLarge { requested: usize, allowed: usize },
    /// The radio refused a notification.
    Radio(RadioError),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotificationsDisabled => write!(f, "notifications disabled"),
            Self::ProcedureInProgress => write!(f, "procedure already in progress"),
            Self::TransferNotAllowed => write!(f, "image transfer not allowed"),
            Self::InvalidSize => write!(f, "invalid image size"),
            Self::NotPermitted => write!(f, "not permitted in current state"),
            Self::InvalidLength => write!(f, "invalid attribute length"),
            Self::UnsupportedOpcode(op) => write!(f, "unsupported opcode {op}"),
            Self::UnsupportedSubscription(v) => write!(f, "unsupported subscription 0x{v:04x}"),
            Self::PushTooLarge { requested, allowed } => {
                write!(f, "push of {requested} bytes exceeds {allowed}")
            }
            Self::Radio(e) => write!(f, "radio: {e}"),
        }
    }
}

impl From<TransferError> for Error {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

impl From<RadioError> for TransferError {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

// ---------------------------------------------------------------------------
// Trigger errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerError {
    /// Condition is valid but not in this trigger's supported set.
    UnsupportedCondition,
    /// Condition byte does not name any known condition.
    UnknownCondition(u8),
    /// Setting or descriptor write of the wrong length.
    InvalidLength,
    /// Subscription descriptor value other than 0 or 1.
    UnsupportedSubscription(u16),
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedCondition => write!(f, "trigger condition not supported"),
            Self::UnknownCondition(c) => write!(f, "unknown trigger condition {c}"),
            Self::InvalidLength => write!(f, "invalid setting length"),
            Self::UnsupportedSubscription(v) => write!(f, "unsupported subscription 0x{v:04x}"),
        }
    }
}

impl From<TriggerError> for Error {
    fn from(e: TriggerError) -> Self {
        Self::Trigger(e)
    }
}

// ---------------------------------------------------------------------------
// Radio errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    /// No peer connected.
    NotConnected,
    /// Payload larger than the negotiated packet size.
    PayloadTooLarge(usize),
    /// The stack's notification queue is full.
    QueueFull,
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::PayloadTooLarge(n) => write!(f, "payload of {n} bytes too large"),
            Self::QueueFull => write!(f, "notification queue full"),
        }
    }
}

impl From<RadioError> for Error {
    fn from(e: RadioError) -> Self {
        Self::Radio(e)
    }
}

// ---------------------------------------------------------------------------
// DFU errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuError {
    InvalidLength,
    UnsupportedValue(u8),
}

impl fmt::Display for DfuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength => write!(f, "invalid DFU control length"),
            Self::UnsupportedValue(v) => write!(f, "unsupported DFU control value {v}"),
        }
    }
}

impl From<DfuError> for Error {
    fn from(e: DfuError) -> Self {
        Self::Dfu(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Storage backend read or write failed.
    IoError,
    /// Persisted blob could not be decoded.
    Corrupted,
    /// A field failed range validation.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IoError => write!(f, "storage I/O error"),
            Self::Corrupted => write!(f, "stored config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// ATT application error codes
// ---------------------------------------------------------------------------

/// Error returned to the peer in an ATT error response.
///
/// `NotificationsDisabled` and `TriggerConditionNotSupported` share the
/// first application code (0x80); they live on different services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttError {
    RequestNotSupported,
    InvalidAttributeValueLength,
    NotificationsDisabled,
    ProcedureInProgress,
    TransferNotAllowed,
    TriggerConditionNotSupported,
    /// Failure with no peer-facing meaning (e.g. radio refused a notify).
    Unlikely,
}

impl AttError {
    /// Wire value of the error code.
    pub const fn code(self) -> u8 {
        match self {
            Self::RequestNotSupported => 0x06,
            Self::InvalidAttributeValueLength => 0x0D,
            Self::Unlikely => 0x0E,
            Self::NotificationsDisabled | Self::TriggerConditionNotSupported => 0x80,
            Self::ProcedureInProgress => 0x81,
            Self::TransferNotAllowed => 0x82,
        }
    }
}

impl fmt::Display for AttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, self.code())
    }
}

impl From<TransferError> for AttError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::NotificationsDisabled => Self::NotificationsDisabled,
            TransferError::ProcedureInProgress => Self::ProcedureInProgress,
            TransferError::TransferNotAllowed => Self::TransferNotAllowed,
            TransferError::InvalidLength => Self::InvalidAttributeValueLength,
            TransferError::UnsupportedOpcode(_) | TransferError::UnsupportedSubscription(_) => {
                Self::RequestNotSupported
            }
            TransferError::InvalidSize
            | TransferError::NotPermitted
            | TransferError::PushTooLarge { .. }
            | TransferError::Radio(_) => Self::Unlikely,
        }
    }
}

impl From<TriggerError> for AttError {
    fn from(e: TriggerError) -> Self {
        match e {
            TriggerError::UnsupportedCondition | TriggerError::UnknownCondition(_) => {
                Self::TriggerConditionNotSupported
            }
            TriggerError::InvalidLength => Self::InvalidAttributeValueLength,
            TriggerError::UnsupportedSubscription(_) => Self::RequestNotSupported,
        }
    }
}

impl From<DfuError> for AttError {
    fn from(e: DfuError) -> Self {
        match e {
            DfuError::InvalidLength => Self::InvalidAttributeValueLength,
            DfuError::UnsupportedValue(_) => Self::RequestNotSupported,
        }
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
