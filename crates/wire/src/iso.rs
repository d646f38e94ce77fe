//! On-wire isochronous packet descriptors.
//!
//! The host-side transform that turns these into/from offset-preserving
//! `Length`/`Offset` pairs lives in the engine crate (it needs the host
//! URB's packet array); this module only knows the wire shape.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::error::Result;

/// `usbip_iso_packet_descriptor`: 16 bytes, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IsoPacketDescriptor {
    pub offset: u32,
    pub length: u32,
    pub actual_length: u32,
    pub status: i32,
}

impl IsoPacketDescriptor {
    pub const WIRE_SIZE: usize = 16;

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u32::<BigEndian>(self.offset)?;
        w.write_u32::<BigEndian>(self.length)?;
        w.write_u32::<BigEndian>(self.actual_length)?;
        w.write_i32::<BigEndian>(self.status)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            offset: r.read_u32::<BigEndian>()?,
            length: r.read_u32::<BigEndian>()?,
            actual_length: r.read_u32::<BigEndian>()?,
            status: r.read_i32::<BigEndian>()?,
        })
    }
}

pub fn write_descriptors<W: Write>(w: &mut W, descriptors: &[IsoPacketDescriptor]) -> Result<()> {
    for d in descriptors {
        d.write_to(w)?;
    }
    Ok(())
}

pub fn read_descriptors<R: Read>(r: &mut R, count: u32) -> Result<Vec<IsoPacketDescriptor>> {
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(IsoPacketDescriptor::read_from(r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn descriptor_roundtrip() {
        let d = IsoPacketDescriptor {
            offset: 384,
            length: 192,
            actual_length: 50,
            status: -32,
        };
        let mut buf = Vec::new();
        d.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), IsoPacketDescriptor::WIRE_SIZE);
        assert_eq!(IsoPacketDescriptor::read_from(&mut Cursor::new(&buf)).unwrap(), d);
    }

    #[test]
    fn descriptor_array_roundtrip() {
        let descriptors = vec![
            IsoPacketDescriptor { offset: 0, length: 192, actual_length: 100, status: 0 },
            IsoPacketDescriptor { offset: 192, length: 192, actual_length: 0, status: 0 },
            IsoPacketDescriptor { offset: 384, length: 192, actual_length: 50, status: 0 },
        ];
        let mut buf = Vec::new();
        write_descriptors(&mut buf, &descriptors).unwrap();
        let decoded = read_descriptors(&mut Cursor::new(&buf), 3).unwrap();
        assert_eq!(decoded, descriptors);
    }
}
