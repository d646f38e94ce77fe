//! Protocol constants for USB/IP version 0x0111.

/// The only protocol version this engine speaks.
pub const USBIP_VERSION: u16 = 0x0111;

/// Sentinel written into `number_of_packets` for non-isochronous
/// transfers. Decoding normalises this back to 0 (see the open
/// question recorded in DESIGN.md about whether 0 itself is ever a
/// valid isochronous packet count on the wire).
pub const NUMBER_OF_PACKETS_NON_ISOCH: u32 = 0xFFFF_FFFF;

/// Hard cap on any single PDU payload we are willing to allocate a
/// buffer for, including drain buffers for unmatched responses.
/// Bulk transfers in practice stay well under this; it exists purely
/// to reject an obviously corrupt `transfer_buffer_length`/
/// `actual_length` before trusting it as an allocation size.
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// `usbip_usb_device.path` field width.
pub const USBIP_DEV_PATH_MAX: usize = 256;
/// `usbip_usb_device.busid` / `op_import_request.busid` field width.
pub const USBIP_BUS_ID_SIZE: usize = 32;

pub mod op {
    //! Handshake op codes (`op_common.code`), per the `OP_REQUEST` /
    //! `OP_REPLY` bit convention: a request ORs in `0x8000`, the
    //! matching reply leaves the high bit clear.
    pub const OP_REQUEST: u16 = 0x8000;
    pub const OP_REPLY: u16 = 0x0000;

    pub const OP_IMPORT: u16 = 0x03;
    pub const OP_DEVLIST: u16 = 0x05;

    pub const OP_REQ_IMPORT: u16 = OP_REQUEST | OP_IMPORT;
    pub const OP_REP_IMPORT: u16 = OP_REPLY | OP_IMPORT;
    pub const OP_REQ_DEVLIST: u16 = OP_REQUEST | OP_DEVLIST;
    pub const OP_REP_DEVLIST: u16 = OP_REPLY | OP_DEVLIST;
}

/// `op_common.status` values (`op_status_t`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    Ok,
    Na,
    DevBusy,
    DevErr,
    NoDev,
    Error,
    Unknown(u32),
}

impl OpStatus {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => OpStatus::Ok,
            1 => OpStatus::Na,
            2 => OpStatus::DevBusy,
            3 => OpStatus::DevErr,
            4 => OpStatus::NoDev,
            5 => OpStatus::Error,
            other => OpStatus::Unknown(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            OpStatus::Ok => 0,
            OpStatus::Na => 1,
            OpStatus::DevBusy => 2,
            OpStatus::DevErr => 3,
            OpStatus::NoDev => 4,
            OpStatus::Error => 5,
            OpStatus::Unknown(v) => v,
        }
    }

    pub fn is_ok(self) -> bool {
        matches!(self, OpStatus::Ok)
    }
}

/// USB/IP transfer direction as carried in `usbip_header_basic.direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out = 0,
    In = 1,
}

impl Direction {
    pub fn from_u32(v: u32) -> Self {
        if v == 0 { Direction::Out } else { Direction::In }
    }

    pub fn to_u32(self) -> u32 {
        self as u32
    }
}
