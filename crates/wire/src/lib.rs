//! On-wire types for USB/IP version 0x0111.
//!
//! This crate owns only the byte-level contract: PDU headers, the
//! isochronous descriptor array, the import handshake, and the error
//! type for malformed input. It knows nothing about URBs, request
//! tables, or sockets — those live in `usbip-engine`.
//!
//! # Example
//!
//! ```
//! use usbip_wire::{Pdu, CmdSubmit, HeaderBasic, Command, Direction};
//!
//! let pdu = Pdu::CmdSubmit(CmdSubmit {
//!     base: HeaderBasic { command: Command::CmdSubmit, seqnum: 1, devid: 1, direction: Direction::Out, ep: 0 },
//!     transfer_flags: 0,
//!     transfer_buffer_length: 0,
//!     start_frame: 0,
//!     number_of_packets: 0xFFFF_FFFF,
//!     interval: 0,
//!     setup: [0x80, 0x00, 0, 0, 0, 0, 0, 2],
//! });
//!
//! let mut bytes = Vec::new();
//! pdu.write_to(&mut bytes).unwrap();
//! assert_eq!(bytes.len(), usbip_wire::HEADER_WIRE_SIZE);
//! ```

pub mod constants;
pub mod error;
pub mod handshake;
pub mod header;
pub mod iso;
pub mod pdu;

pub use constants::{
    op, Direction, OpStatus, MAX_PAYLOAD_SIZE, NUMBER_OF_PACKETS_NON_ISOCH, USBIP_BUS_ID_SIZE,
    USBIP_DEV_PATH_MAX, USBIP_VERSION,
};
pub use error::{Result, WireError};
pub use handshake::{decode_import_reply, encode_import_request, OpCommon, OpImportReply, OpImportRequest, UsbIpUsbDevice};
pub use header::{Command, HeaderBasic};
pub use iso::{read_descriptors, write_descriptors, IsoPacketDescriptor};
pub use pdu::{CmdSubmit, CmdUnlink, Pdu, RetSubmit, RetUnlink, HEADER_WIRE_SIZE};
