//! The 20-byte `usbip_header_basic` shared by all four PDU kinds, plus
//! the command discriminant.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::constants::Direction;
use crate::error::{Result, WireError};

/// The four USBIP message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CmdSubmit,
    CmdUnlink,
    RetSubmit,
    RetUnlink,
}

impl Command {
    pub const CMD_SUBMIT: u32 = 0x0000_0001;
    pub const CMD_UNLINK: u32 = 0x0000_0002;
    pub const RET_SUBMIT: u32 = 0x0000_0003;
    pub const RET_UNLINK: u32 = 0x0000_0004;

    pub fn from_u32(v: u32) -> Result<Self> {
        match v {
            Self::CMD_SUBMIT => Ok(Command::CmdSubmit),
            Self::CMD_UNLINK => Ok(Command::CmdUnlink),
            Self::RET_SUBMIT => Ok(Command::RetSubmit),
            Self::RET_UNLINK => Ok(Command::RetUnlink),
            other => Err(WireError::UnknownCommand(other)),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Command::CmdSubmit => Self::CMD_SUBMIT,
            Command::CmdUnlink => Self::CMD_UNLINK,
            Command::RetSubmit => Self::RET_SUBMIT,
            Command::RetUnlink => Self::RET_UNLINK,
        }
    }

    /// Whether this is a reply the connection's receive loop should
    /// ever see. `CMD_SUBMIT`/`CMD_UNLINK` only flow client → server.
    pub fn is_inbound(self) -> bool {
        matches!(self, Command::RetSubmit | Command::RetUnlink)
    }
}

/// `usbip_header_basic`: 20 bytes, all fields big-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBasic {
    pub command: Command,
    pub seqnum: u32,
    pub devid: u32,
    pub direction: Direction,
    pub ep: u32,
}

impl HeaderBasic {
    pub const WIRE_SIZE: usize = 20;

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(self.command.to_u32())?;
        w.write_u32::<BigEndian>(self.seqnum)?;
        w.write_u32::<BigEndian>(self.devid)?;
        w.write_u32::<BigEndian>(self.direction.to_u32())?;
        w.write_u32::<BigEndian>(self.ep)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let command = Command::from_u32(r.read_u32::<BigEndian>()?)?;
        let seqnum = r.read_u32::<BigEndian>()?;
        let devid = r.read_u32::<BigEndian>()?;
        let direction = Direction::from_u32(r.read_u32::<BigEndian>()?);
        let ep = r.read_u32::<BigEndian>()?;
        Ok(Self {
            command,
            seqnum,
            devid,
            direction,
            ep,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_basic_roundtrip() {
        let h = HeaderBasic {
            command: Command::CmdSubmit,
            seqnum: 7,
            devid: (1 << 16) | 2,
            direction: Direction::In,
            ep: 0x81,
        };
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HeaderBasic::WIRE_SIZE);

        let decoded = HeaderBasic::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(0xDEAD_BEEF).unwrap();
        buf.write_u32::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(1).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();
        buf.write_u32::<BigEndian>(0).unwrap();

        let err = HeaderBasic::read_from(&mut Cursor::new(&buf)).unwrap_err();
        assert!(matches!(err, WireError::UnknownCommand(0xDEAD_BEEF)));
    }
}
