//! `OP_REQ_IMPORT` / `OP_REP_IMPORT`: the one-shot handshake that
//! precedes the `CMD_SUBMIT`/`RET_SUBMIT` message loop.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::constants::{op, OpStatus, USBIP_BUS_ID_SIZE, USBIP_DEV_PATH_MAX, USBIP_VERSION};
use crate::error::{Result, WireError};

/// `op_common`: 8 bytes, big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpCommon {
    pub version: u16,
    pub code: u16,
    pub status: u32,
}

impl OpCommon {
    pub const WIRE_SIZE: usize = 8;

    pub fn request(code: u16) -> Self {
        Self {
            version: USBIP_VERSION,
            code,
            status: 0,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u16::<BigEndian>(self.version)?;
        w.write_u16::<BigEndian>(self.code)?;
        w.write_u32::<BigEndian>(self.status)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let version = r.read_u16::<BigEndian>()?;
        let code = r.read_u16::<BigEndian>()?;
        let status = r.read_u32::<BigEndian>()?;
        if version != USBIP_VERSION {
            return Err(WireError::VersionMismatch(version, USBIP_VERSION));
        }
        Ok(Self { version, code, status })
    }
}

/// `op_import_request`: 32-byte null-padded busid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpImportRequest {
    pub busid: [u8; USBIP_BUS_ID_SIZE],
}

impl OpImportRequest {
    pub fn new(busid: &str) -> Self {
        let mut buf = [0u8; USBIP_BUS_ID_SIZE];
        let bytes = busid.as_bytes();
        let n = bytes.len().min(USBIP_BUS_ID_SIZE - 1);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self { busid: buf }
    }

    pub fn busid_str(&self) -> String {
        let end = self.busid.iter().position(|&b| b == 0).unwrap_or(self.busid.len());
        String::from_utf8_lossy(&self.busid[..end]).into_owned()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.busid)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut busid = [0u8; USBIP_BUS_ID_SIZE];
        r.read_exact(&mut busid)?;
        Ok(Self { busid })
    }
}

/// `usbip_usb_device`, as carried in `op_import_reply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIpUsbDevice {
    pub path: [u8; USBIP_DEV_PATH_MAX],
    pub busid: [u8; USBIP_BUS_ID_SIZE],
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_configuration_value: u8,
    pub b_num_configurations: u8,
    pub b_num_interfaces: u8,
}

impl UsbIpUsbDevice {
    pub const WIRE_SIZE: usize = USBIP_DEV_PATH_MAX + USBIP_BUS_ID_SIZE + 4 + 4 + 4 + 2 + 2 + 2 + 1 + 1 + 1 + 1 + 1 + 1;

    pub fn busid_str(&self) -> String {
        let end = self.busid.iter().position(|&b| b == 0).unwrap_or(self.busid.len());
        String::from_utf8_lossy(&self.busid[..end]).into_owned()
    }

    /// `devid = (busnum << 16) | devnum`, used on every later PDU.
    pub fn devid(&self) -> u32 {
        (self.busnum << 16) | self.devnum
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.path)?;
        w.write_all(&self.busid)?;
        w.write_u32::<BigEndian>(self.busnum)?;
        w.write_u32::<BigEndian>(self.devnum)?;
        w.write_u32::<BigEndian>(self.speed)?;
        w.write_u16::<BigEndian>(self.id_vendor)?;
        w.write_u16::<BigEndian>(self.id_product)?;
        w.write_u16::<BigEndian>(self.bcd_device)?;
        w.write_u8(self.b_device_class)?;
        w.write_u8(self.b_device_sub_class)?;
        w.write_u8(self.b_device_protocol)?;
        w.write_u8(self.b_configuration_value)?;
        w.write_u8(self.b_num_configurations)?;
        w.write_u8(self.b_num_interfaces)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let mut path = [0u8; USBIP_DEV_PATH_MAX];
        r.read_exact(&mut path)?;
        let mut busid = [0u8; USBIP_BUS_ID_SIZE];
        r.read_exact(&mut busid)?;
        Ok(Self {
            path,
            busid,
            busnum: r.read_u32::<BigEndian>()?,
            devnum: r.read_u32::<BigEndian>()?,
            speed: r.read_u32::<BigEndian>()?,
            id_vendor: r.read_u16::<BigEndian>()?,
            id_product: r.read_u16::<BigEndian>()?,
            bcd_device: r.read_u16::<BigEndian>()?,
            b_device_class: r.read_u8()?,
            b_device_sub_class: r.read_u8()?,
            b_device_protocol: r.read_u8()?,
            b_configuration_value: r.read_u8()?,
            b_num_configurations: r.read_u8()?,
            b_num_interfaces: r.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpImportReply {
    pub device: UsbIpUsbDevice,
}

impl OpImportReply {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.device.write_to(w)
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            device: UsbIpUsbDevice::read_from(r)?,
        })
    }
}

/// Builds the bytes for the client's half of the handshake:
/// `op_common{OP_REQ_IMPORT}` followed by `op_import_request{busid}`.
pub fn encode_import_request<W: Write>(w: &mut W, busid: &str) -> Result<()> {
    OpCommon::request(op::OP_REQ_IMPORT).write_to(w)?;
    OpImportRequest::new(busid).write_to(w)
}

/// Parses the server's `op_common` and, if `status == OK`, the
/// following `op_import_reply`. Verifies `udev.busid == requested`.
pub fn decode_import_reply<R: Read>(r: &mut R, requested_busid: &str) -> Result<UsbIpUsbDevice> {
    let common = OpCommon::read_from(r)?;
    if common.code != op::OP_REP_IMPORT {
        return Err(WireError::UnknownOpCode(common.code));
    }
    let status = OpStatus::from_u32(common.status);
    if !status.is_ok() {
        return Err(WireError::BusIdMismatch {
            requested: requested_busid.to_string(),
            actual: format!("server returned status {:?}", status),
        });
    }
    let reply = OpImportReply::read_from(r)?;
    if reply.device.busid_str() != requested_busid {
        return Err(WireError::BusIdMismatch {
            requested: requested_busid.to_string(),
            actual: reply.device.busid_str(),
        });
    }
    Ok(reply.device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn op_common_roundtrip() {
        let c = OpCommon::request(op::OP_REQ_IMPORT);
        let mut buf = Vec::new();
        c.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), OpCommon::WIRE_SIZE);
        assert_eq!(OpCommon::read_from(&mut Cursor::new(&buf)).unwrap(), c);
    }

    #[test]
    fn import_request_busid_roundtrip() {
        let req = OpImportRequest::new("1-1");
        assert_eq!(req.busid_str(), "1-1");
        let mut buf = Vec::new();
        req.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), USBIP_BUS_ID_SIZE);
        let decoded = OpImportRequest::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.busid_str(), "1-1");
    }

    fn sample_device(busid: &str) -> UsbIpUsbDevice {
        let mut busid_bytes = [0u8; USBIP_BUS_ID_SIZE];
        let b = busid.as_bytes();
        busid_bytes[..b.len()].copy_from_slice(b);
        UsbIpUsbDevice {
            path: [0u8; USBIP_DEV_PATH_MAX],
            busid: busid_bytes,
            busnum: 1,
            devnum: 2,
            speed: 3,
            id_vendor: 0x1234,
            id_product: 0x5678,
            bcd_device: 0x0100,
            b_device_class: 0,
            b_device_sub_class: 0,
            b_device_protocol: 0,
            b_configuration_value: 1,
            b_num_configurations: 1,
            b_num_interfaces: 1,
        }
    }

    #[test]
    fn devid_combines_busnum_and_devnum() {
        let dev = sample_device("1-2");
        assert_eq!(dev.devid(), (1u32 << 16) | 2);
    }

    #[test]
    fn decode_import_reply_accepts_matching_busid() {
        let dev = sample_device("1-2");
        let mut buf = Vec::new();
        OpCommon { version: USBIP_VERSION, code: op::OP_REP_IMPORT, status: 0 }
            .write_to(&mut buf)
            .unwrap();
        dev.write_to(&mut buf).unwrap();

        let decoded = decode_import_reply(&mut Cursor::new(&buf), "1-2").unwrap();
        assert_eq!(decoded.devid(), dev.devid());
    }

    #[test]
    fn decode_import_reply_rejects_busid_mismatch() {
        let dev = sample_device("1-2");
        let mut buf = Vec::new();
        OpCommon { version: USBIP_VERSION, code: op::OP_REP_IMPORT, status: 0 }
            .write_to(&mut buf)
            .unwrap();
        dev.write_to(&mut buf).unwrap();

        let err = decode_import_reply(&mut Cursor::new(&buf), "9-9").unwrap_err();
        assert!(matches!(err, WireError::BusIdMismatch { .. }));
    }

    #[test]
    fn decode_import_reply_propagates_error_status() {
        let mut buf = Vec::new();
        OpCommon { version: USBIP_VERSION, code: op::OP_REP_IMPORT, status: 1 }
            .write_to(&mut buf)
            .unwrap();

        let err = decode_import_reply(&mut Cursor::new(&buf), "1-2").unwrap_err();
        assert!(matches!(err, WireError::BusIdMismatch { .. }));
    }
}
