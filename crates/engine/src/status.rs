//! Mapping between USB/IP's Linux-errno wire status and Windows USBD
//! status codes, plus the [`EngineError`] → status translation table
//! mentioned in the error handling design.

use crate::error::EngineError;

/// A small, closed subset of `USBD_STATUS_*` values: enough to drive
/// completion and logging without pulling in the full Windows USB
/// header set (which belongs to the out-of-scope bus-driver layer).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbdStatus {
    Success,
    Cancelled,
    EndpointStalled,
    DeviceNotConnected,
    InsufficientResources,
    NotSupported,
    InvalidParameter,
    InvalidUrbFunction,
    BadStartFrame,
    IsochRequestFailed,
    Error,
}

impl UsbdStatus {
    pub fn is_success(self) -> bool {
        matches!(self, UsbdStatus::Success)
    }

    /// A compact numeric code for carrying a per-packet isochronous
    /// status on an OS structure (`IsochHostPacket::status`) that has
    /// no room for this crate's own enum. Not a real `USBD_STATUS_*`
    /// bit pattern — just a closed, stable mapping this crate controls
    /// both ends of.
    pub fn as_isoch_wire_code(self) -> i32 {
        match self {
            UsbdStatus::Success => 0,
            UsbdStatus::Cancelled => -1,
            UsbdStatus::EndpointStalled => -2,
            UsbdStatus::DeviceNotConnected => -3,
            UsbdStatus::InsufficientResources => -4,
            UsbdStatus::NotSupported => -5,
            UsbdStatus::InvalidParameter => -6,
            UsbdStatus::InvalidUrbFunction => -7,
            UsbdStatus::BadStartFrame => -8,
            UsbdStatus::IsochRequestFailed => -9,
            UsbdStatus::Error => -10,
        }
    }
}

impl From<&EngineError> for UsbdStatus {
    fn from(e: &EngineError) -> Self {
        match e {
            EngineError::Protocol(_) => UsbdStatus::Error,
            EngineError::Network(_) => UsbdStatus::DeviceNotConnected,
            EngineError::Resource(_) => UsbdStatus::InsufficientResources,
            EngineError::Cancelled => UsbdStatus::Cancelled,
            EngineError::NotSupported(_) => UsbdStatus::NotSupported,
            EngineError::InvalidRequest(_) => UsbdStatus::InvalidParameter,
            EngineError::DeviceNotConnected => UsbdStatus::DeviceNotConnected,
        }
    }
}

/// `RET_SUBMIT.status`/`RET_UNLINK.status` follow Linux errno
/// convention: 0 is success, negative values are `-errno`.
pub const ECONNRESET: i32 = -104;

/// Translates a wire status (Linux errno, negative or zero) into a
/// `UsbdStatus`. `demote_stall` demotes a stall to success; the caller
/// passes `true` only for `SELECT_CONFIGURATION`/`SELECT_INTERFACE`
/// completion, where the default control pipe can't truly stall.
pub fn usbd_status_from_wire(status: i32, demote_stall: bool) -> UsbdStatus {
    if status == 0 {
        return UsbdStatus::Success;
    }
    let mapped = match -status {
        32 /* EPIPE */ => UsbdStatus::EndpointStalled,
        104 /* ECONNRESET */ => UsbdStatus::Cancelled,
        108 /* ESHUTDOWN */ => UsbdStatus::DeviceNotConnected,
        110 /* ETIMEDOUT */ => UsbdStatus::Error,
        _ => UsbdStatus::Error,
    };
    if mapped == UsbdStatus::EndpointStalled && demote_stall {
        UsbdStatus::Success
    } else {
        mapped
    }
}
