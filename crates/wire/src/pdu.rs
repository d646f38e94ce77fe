//! Full 48-byte PDU headers: `usbip_header_basic` plus the
//! command-specific variant, padded to a fixed 28-byte variant region
//! so every PDU header is exactly 48 bytes on the wire.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::constants::{Direction, NUMBER_OF_PACKETS_NON_ISOCH};
use crate::error::Result;
use crate::header::{Command, HeaderBasic};
use crate::iso::IsoPacketDescriptor;

/// Total size of a PDU header (basic header + variant region), before
/// any payload or isochronous descriptor array.
pub const HEADER_WIRE_SIZE: usize = 48;
const VARIANT_WIRE_SIZE: usize = HEADER_WIRE_SIZE - HeaderBasic::WIRE_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdSubmit {
    pub base: HeaderBasic,
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub interval: u32,
    pub setup: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetSubmit {
    pub base: HeaderBasic,
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    pub error_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdUnlink {
    pub base: HeaderBasic,
    pub unlink_seqnum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetUnlink {
    pub base: HeaderBasic,
    pub status: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    CmdSubmit(CmdSubmit),
    CmdUnlink(CmdUnlink),
    RetSubmit(RetSubmit),
    RetUnlink(RetUnlink),
}

impl Pdu {
    pub fn base(&self) -> &HeaderBasic {
        match self {
            Pdu::CmdSubmit(p) => &p.base,
            Pdu::CmdUnlink(p) => &p.base,
            Pdu::RetSubmit(p) => &p.base,
            Pdu::RetUnlink(p) => &p.base,
        }
    }

    /// Encode host → net: byte-swap is implicit in the big-endian
    /// writes below. The 8-byte USB setup packet is copied verbatim
    /// (it is little-endian by USB spec and must not be swapped).
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        match self {
            Pdu::CmdSubmit(p) => {
                p.base.write_to(w)?;
                w.write_u32::<BigEndian>(p.transfer_flags)?;
                w.write_u32::<BigEndian>(p.transfer_buffer_length)?;
                w.write_u32::<BigEndian>(p.start_frame)?;
                w.write_u32::<BigEndian>(p.number_of_packets)?;
                w.write_u32::<BigEndian>(p.interval)?;
                w.write_all(&p.setup)?;
            }
            Pdu::RetSubmit(p) => {
                p.base.write_to(w)?;
                w.write_i32::<BigEndian>(p.status)?;
                w.write_u32::<BigEndian>(p.actual_length)?;
                w.write_u32::<BigEndian>(p.start_frame)?;
                w.write_u32::<BigEndian>(p.number_of_packets)?;
                w.write_u32::<BigEndian>(p.error_count)?;
                w.write_all(&[0u8; VARIANT_WIRE_SIZE - 20])?;
            }
            Pdu::CmdUnlink(p) => {
                p.base.write_to(w)?;
                w.write_u32::<BigEndian>(p.unlink_seqnum)?;
                w.write_all(&[0u8; VARIANT_WIRE_SIZE - 4])?;
            }
            Pdu::RetUnlink(p) => {
                p.base.write_to(w)?;
                w.write_i32::<BigEndian>(p.status)?;
                w.write_all(&[0u8; VARIANT_WIRE_SIZE - 4])?;
            }
        }
        Ok(())
    }

    /// Decode net → host. After decoding a `RET_SUBMIT`, the
    /// `number_of_packets` sentinel (`0xFFFFFFFF`, "not isochronous")
    /// is normalised to 0.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let base = HeaderBasic::read_from(r)?;
        let pdu = match base.command {
            Command::CmdSubmit => {
                let transfer_flags = r.read_u32::<BigEndian>()?;
                let transfer_buffer_length = r.read_u32::<BigEndian>()?;
                let start_frame = r.read_u32::<BigEndian>()?;
                let number_of_packets = r.read_u32::<BigEndian>()?;
                let interval = r.read_u32::<BigEndian>()?;
                let mut setup = [0u8; 8];
                r.read_exact(&mut setup)?;
                Pdu::CmdSubmit(CmdSubmit {
                    base,
                    transfer_flags,
                    transfer_buffer_length,
                    start_frame,
                    number_of_packets,
                    interval,
                    setup,
                })
            }
            Command::RetSubmit => {
                let status = r.read_i32::<BigEndian>()?;
                let actual_length = r.read_u32::<BigEndian>()?;
                let start_frame = r.read_u32::<BigEndian>()?;
                let mut number_of_packets = r.read_u32::<BigEndian>()?;
                let error_count = r.read_u32::<BigEndian>()?;
                let mut pad = [0u8; VARIANT_WIRE_SIZE - 20];
                r.read_exact(&mut pad)?;
                if number_of_packets == NUMBER_OF_PACKETS_NON_ISOCH {
                    number_of_packets = 0;
                }
                Pdu::RetSubmit(RetSubmit {
                    base,
                    status,
                    actual_length,
                    start_frame,
                    number_of_packets,
                    error_count,
                })
            }
            Command::CmdUnlink => {
                let unlink_seqnum = r.read_u32::<BigEndian>()?;
                let mut pad = [0u8; VARIANT_WIRE_SIZE - 4];
                r.read_exact(&mut pad)?;
                Pdu::CmdUnlink(CmdUnlink { base, unlink_seqnum })
            }
            Command::RetUnlink => {
                let status = r.read_i32::<BigEndian>()?;
                let mut pad = [0u8; VARIANT_WIRE_SIZE - 4];
                r.read_exact(&mut pad)?;
                Pdu::RetUnlink(RetUnlink { base, status })
            }
        };
        Ok(pdu)
    }

    /// Expected additional bytes after this header, not counting the
    /// header itself. `direction` must be the *original submit*
    /// direction for `RET_SUBMIT`/`RET_UNLINK`, since those PDUs carry
    /// `direction = 0` on the wire (see the forwarder-mode seqnum
    /// convention in the engine crate).
    pub fn payload_size(&self, direction: Direction) -> u32 {
        match self {
            Pdu::CmdSubmit(p) => {
                let data = if direction == Direction::Out {
                    p.transfer_buffer_length
                } else {
                    0
                };
                let iso = if p.number_of_packets != 0 && p.number_of_packets != NUMBER_OF_PACKETS_NON_ISOCH {
                    p.number_of_packets * IsoPacketDescriptor::WIRE_SIZE as u32
                } else {
                    0
                };
                data + iso
            }
            Pdu::RetSubmit(p) => {
                let data = if direction == Direction::In {
                    p.actual_length
                } else {
                    0
                };
                let iso = p.number_of_packets * IsoPacketDescriptor::WIRE_SIZE as u32;
                data + iso
            }
            Pdu::CmdUnlink(_) | Pdu::RetUnlink(_) => 0,
        }
    }
}
