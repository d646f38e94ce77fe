//! §6 preamble: `OP_REQ_IMPORT`/`OP_REP_IMPORT` over a fresh TCP
//! connection, followed by synchronously fetching the device and
//! configuration descriptors before the device is handed to its
//! caller as `Plugged`.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use usbip_wire::{decode_import_reply, encode_import_request, UsbIpUsbDevice};

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::descriptor_cache::config_total_length;
use crate::device::VirtualDevice;
use crate::error::{EngineError, Result};
use crate::urb::{descriptor_type, EndpointInfo, Recipient, Urb, UrbFunction};

/// The outcome of a successful import: the running device plus the
/// `udev` record the server reported, kept around for diagnostics
/// (bus/dev numbers, reported speed).
pub struct ImportedDevice {
    pub device: Arc<VirtualDevice>,
    pub udev: UsbIpUsbDevice,
}

/// Connects to `addr`, imports `busid`, and brings the resulting
/// device all the way up to `Plugged`: descriptors are fetched over
/// the freshly-opened connection before any OS-originated URB is
/// accepted.
pub async fn import_device(addr: SocketAddr, busid: &str, config: &ConnectionConfig) -> Result<ImportedDevice> {
    let mut preamble = Connection::connect(addr, config).await?;
    let udev = negotiate_import(&mut preamble, busid).await?;
    let devid = udev.devid();

    let device = VirtualDevice::new(preamble, devid);
    populate_descriptor_cache(&device, &udev).await?;
    device.mark_plugged();

    info!(busid, devid, vendor = udev.id_vendor, product = udev.id_product, "handshake: device imported and plugged");
    Ok(ImportedDevice { device, udev })
}

async fn negotiate_import(connection: &mut Connection, busid: &str) -> Result<UsbIpUsbDevice> {
    let mut request = Vec::new();
    encode_import_request(&mut request, busid).map_err(EngineError::from)?;
    connection.send.send_raw(&request).await?;

    let reply_bytes = connection.recv.recv_import_reply().await?;
    let udev = decode_import_reply(&mut std::io::Cursor::new(&reply_bytes[..]), busid).map_err(EngineError::from)?;
    debug!(busid, devid = udev.devid(), "handshake: OP_REP_IMPORT accepted");
    Ok(udev)
}

/// Fetches the device descriptor, then the configuration descriptor
/// named by `udev.b_configuration_value` (header first to learn
/// `wTotalLength`, then the full chain), and seeds the cache with
/// both. A configuration value of 0 ("unconfigured") leaves the
/// configuration cache empty.
async fn populate_descriptor_cache(device: &Arc<VirtualDevice>, udev: &UsbIpUsbDevice) -> Result<()> {
    let device_descriptor = fetch_descriptor(device, descriptor_type::DEVICE, 0, 18).await?;
    device.descriptor_cache().lock().unwrap().set_device_descriptor(device_descriptor)?;

    if udev.b_configuration_value == 0 {
        return Ok(());
    }
    let config_index = udev.b_configuration_value.wrapping_sub(1);
    let header = fetch_descriptor(device, descriptor_type::CONFIGURATION, config_index, 9).await?;
    let total_len = config_total_length(&header)?;
    let full = fetch_descriptor(device, descriptor_type::CONFIGURATION, config_index, total_len).await?;
    device
        .descriptor_cache()
        .lock()
        .unwrap()
        .set_configuration(udev.b_configuration_value, full);
    Ok(())
}

async fn fetch_descriptor(device: &Arc<VirtualDevice>, descriptor_type: u8, index: u8, length: u16) -> Result<Vec<u8>> {
    let mut urb = Urb::new(
        UrbFunction::GetDescriptor { recipient: Recipient::Device, descriptor_type, index, language_id: 0 },
        EndpointInfo::default_control(),
    );
    urb.transfer_buffer_length = length as u32;
    urb.buffer = vec![0u8; length as usize];

    let outcome = device.submit(urb).await?;
    if !outcome.completion.status.is_success() {
        return Err(EngineError::Protocol(format!(
            "descriptor fetch (type {descriptor_type}, index {index}) failed: {:?}",
            outcome.completion.status
        )));
    }
    Ok(outcome.urb.buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn import_device_populates_caches_and_plugs() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ConnectionConfig::default();

        let server_task = tokio::spawn(async move {
            let (mut server, _) = listener.accept().await.unwrap();

            // OP_REQ_IMPORT / OP_REP_IMPORT
            let mut op_common = [0u8; 8];
            server.read_exact(&mut op_common).await.unwrap();
            let mut busid = [0u8; 32];
            server.read_exact(&mut busid).await.unwrap();

            let mut reply = Vec::new();
            usbip_wire::OpCommon { version: 0x0111, code: usbip_wire::op::OP_REP_IMPORT, status: 0 }
                .write_to(&mut reply)
                .unwrap();
            let udev = usbip_wire::UsbIpUsbDevice {
                path: [0u8; 256],
                busid: { let mut b = [0u8; 32]; b[..3].copy_from_slice(b"1-1"); b },
                busnum: 1,
                devnum: 1,
                speed: 2,
                id_vendor: 0x0123,
                id_product: 0x4567,
                bcd_device: 0x0100,
                b_device_class: 0,
                b_device_sub_class: 0,
                b_device_protocol: 0,
                b_configuration_value: 1,
                b_num_configurations: 1,
                b_num_interfaces: 1,
            };
            udev.write_to(&mut reply).unwrap();
            server.write_all(&reply).await.unwrap();
            server.flush().await.unwrap();

            // device descriptor fetch (18 bytes)
            let mut header_buf = [0u8; usbip_wire::HEADER_WIRE_SIZE];
            server.read_exact(&mut header_buf).await.unwrap();
            let device_descriptor = {
                let mut d = vec![0u8; 18];
                d[0] = 18;
                d[1] = 1;
                d
            };
            respond_get_descriptor(&mut server, &header_buf, &device_descriptor).await;

            // configuration header fetch (9 bytes)
            let mut header_buf = [0u8; usbip_wire::HEADER_WIRE_SIZE];
            server.read_exact(&mut header_buf).await.unwrap();
            let mut config_full = vec![0u8; 9];
            config_full[0] = 9;
            config_full[1] = 2;
            let total_len = (config_full.len() as u16).to_le_bytes();
            config_full[2] = total_len[0];
            config_full[3] = total_len[1];
            respond_get_descriptor(&mut server, &header_buf, &config_full[..9]).await;

            // full configuration fetch (9 bytes again, same chain)
            let mut header_buf = [0u8; usbip_wire::HEADER_WIRE_SIZE];
            server.read_exact(&mut header_buf).await.unwrap();
            respond_get_descriptor(&mut server, &header_buf, &config_full).await;
        });

        async fn respond_get_descriptor(server: &mut tokio::net::TcpStream, header_buf: &[u8], data: &[u8]) {
            let cmd = match usbip_wire::Pdu::read_from(&mut std::io::Cursor::new(header_buf)).unwrap() {
                usbip_wire::Pdu::CmdSubmit(c) => c,
                _ => panic!("expected CmdSubmit"),
            };
            let ret = usbip_wire::RetSubmit {
                base: usbip_wire::HeaderBasic {
                    command: usbip_wire::Command::RetSubmit,
                    seqnum: cmd.base.seqnum,
                    devid: cmd.base.devid,
                    direction: usbip_wire::Direction::Out,
                    ep: 0,
                },
                status: 0,
                actual_length: data.len() as u32,
                start_frame: 0,
                number_of_packets: 0,
                error_count: 0,
            };
            let mut reply = Vec::new();
            usbip_wire::Pdu::RetSubmit(ret).write_to(&mut reply).unwrap();
            reply.extend_from_slice(data);
            server.write_all(&reply).await.unwrap();
            server.flush().await.unwrap();
        }

        let imported = import_device(addr, "1-1", &config).await.unwrap();
        assert_eq!(imported.device.state(), crate::device::DeviceState::Plugged);
        assert_eq!(imported.udev.id_vendor, 0x0123);
        assert!(imported.device.descriptor_cache().lock().unwrap().device_descriptor().is_some());

        server_task.await.unwrap();
    }
}
