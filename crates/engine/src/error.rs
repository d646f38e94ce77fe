//! Engine-level error kinds, per the error handling design: every
//! variant maps onto a USBD status via [`crate::status::UsbdStatus`],
//! and only `NotSupported`/`InvalidRequest` leave the device alive.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Decoding failed, wrong command/seqnum, size mismatch. Fatal
    /// for the affected device; triggers unplug.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Connect, send, receive failure, short transfer. Fatal for the
    /// device; triggers unplug.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Allocation or buffer-mapping failure.
    #[error("resource exhausted: {0}")]
    Resource(String),

    /// URB removed by cancel.
    #[error("request cancelled")]
    Cancelled,

    /// Unsupported URB function / descriptor type.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Malformed input from the OS.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The device has already been unplugged.
    #[error("device not connected")]
    DeviceNotConnected,
}

impl From<usbip_wire::WireError> for EngineError {
    fn from(e: usbip_wire::WireError) -> Self {
        EngineError::Protocol(e.to_string())
    }
}

impl EngineError {
    /// Whether this error kind tears the whole device down, per §7:
    /// only `NotSupported` and `InvalidRequest` are surfaced locally.
    pub fn is_fatal_to_device(&self) -> bool {
        !matches!(self, EngineError::NotSupported(_) | EngineError::InvalidRequest(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
