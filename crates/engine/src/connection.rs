//! Connection I/O Loop (§4.5): one TCP connection per virtual device,
//! split into owned halves the same way the existing socket bridge
//! splits its stream, with the send side serialised behind a
//! `tokio::sync::Mutex` and keepalive/nodelay applied via `socket2`.

use socket2::SockRef;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{trace, warn};

use usbip_wire::{CmdSubmit, CmdUnlink, Command, HeaderBasic, OpCommon, Pdu, RetSubmit, RetUnlink, UsbIpUsbDevice, HEADER_WIRE_SIZE};

use crate::config::ConnectionConfig;
use crate::error::{EngineError, Result};

/// A fully-decoded inbound PDU, still carrying its raw trailing bytes:
/// the caller (device layer) knows the original submit direction and
/// therefore how many of those bytes are payload versus isochronous
/// descriptors, which `Connection` itself cannot determine for
/// `RET_SUBMIT` (its wire `direction` field is always zero).
pub enum Received {
    RetSubmit(RetSubmit),
    RetUnlink(RetUnlink),
}

/// Applies the configured tuning to an already-connected socket via
/// `socket2::SockRef`, then reads the values back so callers can log
/// what the kernel actually accepted.
fn tune_socket(stream: &TcpStream, config: &ConnectionConfig) -> Result<()> {
    let sock = SockRef::from(stream);
    if config.tcp_nodelay {
        sock.set_nodelay(true)?;
    }
    sock.set_tcp_keepalive(
        &socket2::TcpKeepalive::new()
            .with_time(config.keepalive.idle())
            .with_interval(config.keepalive.interval())
            .with_retries(config.keepalive.probes),
    )?;
    trace!(
        nodelay = sock.nodelay().unwrap_or(false),
        "connection: socket tuning applied"
    );
    Ok(())
}

pub struct SendHalf {
    write_half: Mutex<OwnedWriteHalf>,
}

impl SendHalf {
    /// Writes one PDU, its payload, and (for isochronous transfers)
    /// its descriptor array as a single logical frame. Held for the
    /// whole call so two concurrent sends never interleave their
    /// bytes.
    pub async fn send(&self, pdu: &Pdu, payload: &[u8], iso_descriptors: &[usbip_wire::IsoPacketDescriptor]) -> Result<()> {
        let mut frame = Vec::with_capacity(HEADER_WIRE_SIZE + payload.len() + iso_descriptors.len() * usbip_wire::IsoPacketDescriptor::WIRE_SIZE);
        pdu.write_to(&mut frame).map_err(EngineError::from)?;
        frame.extend_from_slice(payload);
        usbip_wire::write_descriptors(&mut frame, iso_descriptors).map_err(EngineError::from)?;

        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&frame).await?;
        write_half.flush().await?;
        Ok(())
    }

    pub async fn send_cmd_submit(&self, cmd: &CmdSubmit, payload: &[u8], iso_descriptors: &[usbip_wire::IsoPacketDescriptor]) -> Result<()> {
        self.send(&Pdu::CmdSubmit(cmd.clone()), payload, iso_descriptors).await
    }

    pub async fn send_cmd_unlink(&self, cmd: &CmdUnlink) -> Result<()> {
        self.send(&Pdu::CmdUnlink(*cmd), &[], &[]).await
    }

    /// Writes an already-encoded byte string verbatim. Used only for
    /// the `OP_REQ_IMPORT` handshake, which predates the `CMD_SUBMIT`/
    /// `RET_SUBMIT` framing this type otherwise speaks.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut write_half = self.write_half.lock().await;
        write_half.write_all(bytes).await?;
        write_half.flush().await?;
        Ok(())
    }

    /// Half-closes the write side. Called by the Lifetime Coordinator
    /// once every in-flight send/receive has settled.
    pub async fn shutdown(&self) -> Result<()> {
        self.write_half.lock().await.shutdown().await?;
        Ok(())
    }
}

pub struct RecvHalf {
    read_half: OwnedReadHalf,
}

/// Generous ceiling for a drain buffer (an undeliverable `RET_SUBMIT`
/// payload with nowhere to go); guards against a corrupt/hostile
/// header claiming gigabytes of trailing data.
const MAX_DRAIN_BYTES: usize = 16 * 1024 * 1024;

impl RecvHalf {
    /// Reads one 48-byte header and decodes it. Returning before the
    /// payload read lets the device layer consult the request table
    /// (to learn the original submit direction, hence the expected
    /// payload length) without the connection needing to know about
    /// requests at all.
    pub async fn recv_header(&mut self) -> Result<Received> {
        let mut buf = [0u8; HEADER_WIRE_SIZE];
        self.read_half.read_exact(&mut buf).await?;
        let pdu = Pdu::read_from(&mut std::io::Cursor::new(&buf[..])).map_err(EngineError::from)?;
        match pdu {
            Pdu::RetSubmit(ret) => {
                if ret.base.seqnum == 0 {
                    return Err(EngineError::Protocol("RET_SUBMIT with seqnum 0".into()));
                }
                Ok(Received::RetSubmit(ret))
            }
            Pdu::RetUnlink(ret) => {
                if ret.base.seqnum == 0 {
                    return Err(EngineError::Protocol("RET_UNLINK with seqnum 0".into()));
                }
                Ok(Received::RetUnlink(ret))
            }
            Pdu::CmdSubmit(_) | Pdu::CmdUnlink(_) => Err(EngineError::Protocol(
                "received a CMD_* PDU on the client side of the connection".into(),
            )),
        }
    }

    /// Reads exactly `len` bytes following a header just returned by
    /// [`Self::recv_header`]. `len` is computed by the caller via
    /// [`usbip_wire::Pdu::payload_size`].
    pub async fn recv_payload(&mut self, len: u32) -> Result<Vec<u8>> {
        let len = len as usize;
        if len > MAX_DRAIN_BYTES {
            return Err(EngineError::Protocol(format!("payload size {len} exceeds sane maximum")));
        }
        let mut buf = vec![0u8; len];
        self.read_half.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Reads and discards `len` bytes: used when a `RET_SUBMIT`
    /// arrives for a seqnum no longer in the request table (already
    /// cancelled or otherwise gone). Logged at `warn` since it
    /// indicates a race the caller should be aware of, not an error.
    pub async fn drain_payload(&mut self, len: u32, seqnum: u32) -> Result<()> {
        let discarded = self.recv_payload(len).await?;
        warn!(seqnum, bytes = discarded.len(), "connection: draining unmatched RET_SUBMIT payload");
        Ok(())
    }

    /// Reads one `op_common` + (if its status is OK) the trailing
    /// `op_import_reply`, returning the raw concatenated bytes for
    /// [`usbip_wire::decode_import_reply`] to parse and validate.
    /// Used only during the handshake preamble.
    pub async fn recv_import_reply(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; OpCommon::WIRE_SIZE];
        self.read_half.read_exact(&mut buf).await?;
        let common = OpCommon::read_from(&mut std::io::Cursor::new(&buf[..])).map_err(EngineError::from)?;
        if common.status == 0 {
            let mut device_buf = vec![0u8; UsbIpUsbDevice::WIRE_SIZE];
            self.read_half.read_exact(&mut device_buf).await?;
            buf.extend_from_slice(&device_buf);
        }
        Ok(buf)
    }
}

pub struct Connection {
    pub send: SendHalf,
    pub recv: RecvHalf,
}

impl Connection {
    /// Connects to `addr`, applies the configured socket tuning, and
    /// splits the stream into owned halves.
    pub async fn connect(addr: std::net::SocketAddr, config: &ConnectionConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        tune_socket(&stream, config)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            send: SendHalf { write_half: Mutex::new(write_half) },
            recv: RecvHalf { read_half },
        })
    }

    /// Wraps an already-connected stream (e.g. one accepted locally
    /// for a forwarder-mode bridge), applying the same tuning.
    pub fn from_stream(stream: TcpStream, config: &ConnectionConfig) -> Result<Self> {
        tune_socket(&stream, config)?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            send: SendHalf { write_half: Mutex::new(write_half) },
            recv: RecvHalf { read_half },
        })
    }
}

/// Builds the basic header for a `CMD_UNLINK` carrying `unlink_seqnum`.
pub fn build_cmd_unlink(seqnum: u32, devid: u32, unlink_seqnum: u32) -> CmdUnlink {
    CmdUnlink {
        base: HeaderBasic {
            command: Command::CmdUnlink,
            seqnum,
            devid,
            direction: usbip_wire::Direction::Out,
            ep: 0,
        },
        unlink_seqnum,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    async fn connected_pair() -> (Connection, Connection) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ConnectionConfig::default();
        let (client, (server, _)) = tokio::join!(Connection::connect(addr, &config), async {
            listener.accept().await.unwrap()
        });
        let client = client.unwrap();
        let server = Connection::from_stream(server, &config).unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn round_trips_a_ret_submit_header_and_payload() {
        let (mut a, mut b) = connected_pair().await;

        let ret = RetSubmit {
            base: HeaderBasic {
                command: Command::RetSubmit,
                seqnum: 42,
                devid: (1 << 16) | 1,
                direction: usbip_wire::Direction::Out,
                ep: 0,
            },
            status: 0,
            actual_length: 2,
            start_frame: 0,
            number_of_packets: 0xFFFF_FFFF,
            error_count: 0,
        };
        b.send.send(&Pdu::RetSubmit(ret.clone()), &[0x01, 0x00], &[]).await.unwrap();

        match a.recv.recv_header().await.unwrap() {
            Received::RetSubmit(decoded) => {
                assert_eq!(decoded.base.seqnum, 42);
                assert_eq!(decoded.number_of_packets, 0);
                let payload = a.recv.recv_payload(decoded.actual_length).await.unwrap();
                assert_eq!(payload, vec![0x01, 0x00]);
            }
            _ => panic!("expected RetSubmit"),
        }
    }

    #[tokio::test]
    async fn zero_seqnum_ret_submit_is_rejected() {
        let (mut a, mut b) = connected_pair().await;
        let ret = RetSubmit {
            base: HeaderBasic { command: Command::RetSubmit, seqnum: 0, devid: 1, direction: usbip_wire::Direction::Out, ep: 0 },
            status: 0,
            actual_length: 0,
            start_frame: 0,
            number_of_packets: 0,
            error_count: 0,
        };
        b.send.send(&Pdu::RetSubmit(ret), &[], &[]).await.unwrap();
        assert!(a.recv.recv_header().await.is_err());
    }

    #[tokio::test]
    async fn cmd_unlink_round_trips() {
        let (mut a, mut b) = connected_pair().await;
        let cmd = build_cmd_unlink(9, (1 << 16) | 1, 7);
        a.send.send_cmd_unlink(&cmd).await.unwrap();

        // The server side of this pair only ever sends RET_* in real
        // usage, but the raw decode path is direction-agnostic enough
        // to prove the write side framing is correct.
        let mut buf = [0u8; HEADER_WIRE_SIZE];
        b.recv.read_half.read_exact(&mut buf).await.unwrap();
        let decoded = Pdu::read_from(&mut std::io::Cursor::new(&buf[..])).unwrap();
        match decoded {
            Pdu::CmdUnlink(u) => assert_eq!(u.unlink_seqnum, 7),
            _ => panic!("expected CmdUnlink"),
        }
    }
}
