//! The OS-facing request shape: a generalised USB Request Block.
//!
//! Everything in this module is plain data. The actual OS bus-driver
//! plumbing that allocates and owns these (IRPs, MDLs, device
//! objects) is out of scope; this crate only needs a stable shape to
//! translate to and from PDUs.

use usbip_wire::Direction;

/// Opaque per-endpoint identifier, as handed out by the OS USB stack.
/// The default control pipe is represented by `PipeHandle(0)`.
pub type PipeHandle = u32;

pub const DEFAULT_CONTROL_PIPE: PipeHandle = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub pipe_handle: PipeHandle,
    /// `bEndpointAddress`, bit 7 set for IN.
    pub address: u8,
    pub transfer_type: EndpointType,
    pub interval: u8,
}

impl EndpointInfo {
    /// A zero-initialised endpoint descriptor representing the
    /// default control pipe (§3: "Endpoint constants").
    pub fn default_control() -> Self {
        Self {
            pipe_handle: DEFAULT_CONTROL_PIPE,
            address: 0,
            transfer_type: EndpointType::Control,
            interval: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    pub fn endpoint_number(&self) -> u8 {
        self.address & 0x0F
    }
}

/// Who the standard/class/vendor request targets (`bmRequestType`
/// recipient bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// `bmRequestType` type bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
}

/// The 8-byte USB setup packet, copied verbatim onto the wire
/// (little-endian per the USB spec — never byte-swapped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SetupPacket {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPacket {
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0] = self.bm_request_type;
        buf[1] = self.b_request;
        buf[2..4].copy_from_slice(&self.w_value.to_le_bytes());
        buf[4..6].copy_from_slice(&self.w_index.to_le_bytes());
        buf[6..8].copy_from_slice(&self.w_length.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: [u8; 8]) -> Self {
        Self {
            bm_request_type: buf[0],
            b_request: buf[1],
            w_value: u16::from_le_bytes([buf[2], buf[3]]),
            w_index: u16::from_le_bytes([buf[4], buf[5]]),
            w_length: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }

    /// Direction is bit 7 of `bmRequestType`.
    pub fn direction_in(&self) -> bool {
        self.bm_request_type & 0x80 != 0
    }

    pub fn standard(recipient: Recipient, direction_in: bool, b_request: u8, w_value: u16, w_index: u16, w_length: u16) -> Self {
        let mut bm_request_type = recipient_bits(recipient);
        if direction_in {
            bm_request_type |= 0x80;
        }
        Self { bm_request_type, b_request, w_value, w_index, w_length }
    }
}

fn recipient_bits(r: Recipient) -> u8 {
    match r {
        Recipient::Device => 0,
        Recipient::Interface => 1,
        Recipient::Endpoint => 2,
        Recipient::Other => 3,
    }
}

/// One isochronous packet as the OS URB represents it: an offset into
/// the host's contiguous buffer (which may have gaps) and its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsochHostPacket {
    pub offset: u32,
    pub length: u32,
    pub actual_length: u32,
    pub status: i32,
}

bitflags::bitflags! {
    /// Mirrors the `USBD_*` transfer-flag bits this engine cares
    /// about; everything else is out of scope.
    pub struct TransferFlags: u32 {
        const DIRECTION_IN = 0x0000_0001;
        const SHORT_TRANSFER_OK = 0x0000_0002;
        /// `USBD_START_ISO_TRANSFER_ASAP`: frame-number queries aren't
        /// supported, so every isochronous submission starts as soon
        /// as the server can schedule it.
        const ASAP = 0x0002_0000;
    }
}

impl Default for TransferFlags {
    fn default() -> Self {
        TransferFlags::empty()
    }
}

/// Standard USB descriptor type codes used by `GET_DESCRIPTOR`.
pub mod descriptor_type {
    pub const DEVICE: u8 = 1;
    pub const CONFIGURATION: u8 = 2;
    pub const STRING: u8 = 3;
    pub const INTERFACE: u8 = 4;
    pub const ENDPOINT: u8 = 5;
}

/// The URB function, a tagged variant covering every dispatch-table
/// row from the translator's contract. Unknown/reserved codes are an
/// explicit variant, never a null case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrbFunction {
    SelectConfiguration { configuration_value: Option<u8> },
    SelectInterface { interface_number: u8, alternate_setting: u8 },
    ControlTransfer { setup: SetupPacket },
    BulkOrInterruptTransfer,
    IsochTransfer { packets: Vec<IsochHostPacket>, start_frame: u32, asap: bool },
    GetDescriptor { recipient: Recipient, descriptor_type: u8, index: u8, language_id: u16 },
    SetDescriptor { recipient: Recipient, descriptor_type: u8, index: u8, language_id: u16 },
    VendorOrClassRequest { kind: RequestKind, recipient: Recipient, request: u8, value: u16, index: u16 },
    SetFeature { recipient: Recipient, feature: u16 },
    ClearFeature { recipient: Recipient, feature: u16 },
    GetStatus { recipient: Recipient },
    GetConfiguration,
    SetConfiguration,
    GetInterface,
    SetInterface,
    AbortPipe,
    SyncResetPipeAndClearStall,
    SyncResetPipe,
    SyncClearStall,
    GetCurrentFrameNumber,
    GetIsochPipeTransferPathDelays,
    TakeFrameLengthControl,
    ReleaseFrameLengthControl,
    GetFrameLength,
    SetFrameLength,
    /// Reserved or unrecognised function code; always completes
    /// `STATUS_INVALID_PARAMETER`.
    Unsupported(u32),
}

/// A generalised USB Request Block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Urb {
    pub function: UrbFunction,
    pub pipe: EndpointInfo,
    pub transfer_flags: TransferFlags,
    pub transfer_buffer_length: u32,
    /// For OUT transfers: the data to send. For IN transfers: a
    /// pre-sized (usually zeroed) buffer the completor fills.
    pub buffer: Vec<u8>,
}

impl Urb {
    pub fn new(function: UrbFunction, pipe: EndpointInfo) -> Self {
        Self {
            function,
            pipe,
            transfer_flags: TransferFlags::empty(),
            transfer_buffer_length: 0,
            buffer: Vec::new(),
        }
    }

    pub fn is_isochronous(&self) -> bool {
        matches!(self.function, UrbFunction::IsochTransfer { .. })
    }
}
