//! Wire-level decode/encode errors

use thiserror::Error;

/// Errors raised while encoding or decoding USB/IP PDUs.
///
/// These are always non-fatal to the process but fatal to the
/// connection that produced them; callers map them onto the engine's
/// `Protocol` error kind, which unplugs the affected device.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("I/O error while reading/writing a PDU: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown USBIP command code {0:#010x}")]
    UnknownCommand(u32),

    #[error("unknown handshake op code {0:#06x}")]
    UnknownOpCode(u16),

    #[error("unexpected USBIP protocol version {0:#06x} (expected {1:#06x})")]
    VersionMismatch(u16, u16),

    #[error("handshake busid mismatch: requested {requested:?}, got {actual:?}")]
    BusIdMismatch { requested: String, actual: String },

    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("zero seqnum on an inbound PDU")]
    ZeroSeqnum,
}

pub type Result<T> = std::result::Result<T, WireError>;
