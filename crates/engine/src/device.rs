//! `VirtualDevice` and the Lifetime Coordinator (§3, §4.8): the object
//! that owns one imported device's connection, request table, and
//! descriptor cache, and sequences unplug/close so no other task ever
//! touches a URB or socket after it has gone away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use usbip_wire::{Direction, Pdu};

use crate::completor::{complete_isoch_ret_submit, complete_ret_submit, complete_ret_unlink, Completion, CompletionEffect};
use crate::connection::{build_cmd_unlink, Connection, Received};
use crate::descriptor_cache::DescriptorCache;
use crate::error::{EngineError, Result};
use crate::request::Request;
use crate::request_table::RequestTable;
use crate::status::UsbdStatus;
use crate::translator::{translate, TranslatedRequest};
use crate::urb::{PipeHandle, Urb};

/// Device lifecycle, per §3. `Connecting` covers the window between
/// the TCP handshake and the descriptor cache being fully populated;
/// only `Plugged` devices accept new URBs from the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Connecting,
    Plugged,
    Unplugging,
    Removed,
}

/// What a submitted URB becomes once its terminal event (response,
/// cancel, or unplug) has happened: the URB, filled in place by the
/// completor, plus the resolved status/effect.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub urb: Urb,
    pub completion: Completion,
}

pub struct VirtualDevice {
    pub devid: u32,
    connection: Connection,
    request_table: RequestTable,
    completions: StdMutex<HashMap<u32, oneshot::Sender<SubmitOutcome>>>,
    descriptor_cache: StdMutex<DescriptorCache>,
    next_seqnum: AtomicU32,
    current_frame_number: AtomicU32,
    state: StdMutex<DeviceState>,
    unplugged: AtomicBool,
    pending_sends: AtomicUsize,
    pending_receives: AtomicUsize,
}

impl VirtualDevice {
    /// Wraps an already-connected, already-handshaken connection and
    /// spawns its receive loop. The device starts in `Connecting`;
    /// the caller (handshake.rs) transitions it to `Plugged` once the
    /// descriptor cache has been populated.
    pub fn new(connection: Connection, devid: u32) -> Arc<Self> {
        let device = Arc::new(Self {
            devid,
            connection,
            request_table: RequestTable::new(),
            completions: StdMutex::new(HashMap::new()),
            descriptor_cache: StdMutex::new(DescriptorCache::new()),
            next_seqnum: AtomicU32::new(1),
            current_frame_number: AtomicU32::new(0),
            state: StdMutex::new(DeviceState::Connecting),
            unplugged: AtomicBool::new(false),
            pending_sends: AtomicUsize::new(0),
            pending_receives: AtomicUsize::new(0),
        });
        let receiver = device.clone();
        tokio::spawn(async move {
            receiver.run_receive_loop().await;
        });
        device
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    pub fn mark_plugged(&self) {
        *self.state.lock().unwrap() = DeviceState::Plugged;
    }

    pub fn is_unplugged(&self) -> bool {
        self.unplugged.load(Ordering::Acquire)
    }

    pub fn descriptor_cache(&self) -> &StdMutex<DescriptorCache> {
        &self.descriptor_cache
    }

    fn next_seqnum(&self) -> u32 {
        // Seqnum 0 is reserved (never a valid request/reply); the top
        // bit is reserved for the forwarder-mode direction stash and
        // is never set here.
        loop {
            let n = self.next_seqnum.fetch_add(1, Ordering::Relaxed) & 0x7FFF_FFFF;
            if n != 0 {
                return n;
            }
        }
    }

    /// Read-only access to the descriptor cache, for OS ioctls served
    /// locally (§4.7) without ever touching the wire.
    pub fn lookup_cached_descriptor(&self, descriptor_type: u8, index: u8) -> Result<Vec<u8>> {
        self.descriptor_cache
            .lock()
            .unwrap()
            .lookup(descriptor_type, index)
            .map(|bytes| bytes.to_vec())
    }

    /// Submits a URB and waits for its terminal completion. `Local`
    /// resolutions (e.g. `GET_CURRENT_FRAME_NUMBER`) and `ABORT_PIPE`
    /// never touch the wire and return immediately.
    pub async fn submit(self: &Arc<Self>, mut urb: Urb) -> Result<SubmitOutcome> {
        if self.is_unplugged() {
            return Err(EngineError::DeviceNotConnected);
        }

        let seqnum = self.next_seqnum();
        let frame = self.current_frame_number.load(Ordering::Relaxed);
        let pipe_handle = urb.pipe.pipe_handle;

        match translate(&urb, seqnum, self.devid, frame)? {
            TranslatedRequest::Local { status, output } => {
                if !output.is_empty() {
                    urb.buffer = output;
                    urb.transfer_buffer_length = urb.buffer.len() as u32;
                }
                Ok(SubmitOutcome { urb, completion: Completion { status, effect: CompletionEffect::None } })
            }
            TranslatedRequest::AbortPipe => {
                self.abort_pipe(pipe_handle).await;
                Ok(SubmitOutcome { urb, completion: Completion { status: UsbdStatus::Success, effect: CompletionEffect::None } })
            }
            TranslatedRequest::Submit { pdu, payload, iso_descriptors } => {
                self.submit_and_wait(seqnum, urb, pdu, payload, iso_descriptors).await
            }
        }
    }

    async fn submit_and_wait(
        self: &Arc<Self>,
        seqnum: u32,
        urb: Urb,
        pdu: usbip_wire::CmdSubmit,
        payload: Vec<u8>,
        iso_descriptors: Vec<usbip_wire::IsoPacketDescriptor>,
    ) -> Result<SubmitOutcome> {
        let mut request = Request::new(seqnum, urb);
        request.direction_in = pdu.base.direction == Direction::In;

        let (tx, rx) = oneshot::channel();
        self.completions.lock().unwrap().insert(seqnum, tx);
        self.request_table.enqueue(request);

        self.pending_sends.fetch_add(1, Ordering::AcqRel);
        let send_result = self.connection.send.send_cmd_submit(&pdu, &payload, &iso_descriptors).await;
        self.pending_sends.fetch_sub(1, Ordering::AcqRel);

        if let Err(e) = send_result {
            self.request_table.dequeue_by_seqnum(seqnum);
            self.completions.lock().unwrap().remove(&seqnum);
            self.unplug("send failure").await;
            return Err(e);
        }
        self.request_table.mark_in_flight(seqnum);

        rx.await.map_err(|_| EngineError::DeviceNotConnected)
    }

    /// `ABORT_PIPE`: cancel every request still pending on `pipe_handle`
    /// through the single-URB cancel path, oldest first.
    async fn abort_pipe(self: &Arc<Self>, pipe_handle: PipeHandle) {
        for seqnum in self.request_table.peek_by_pipe(pipe_handle) {
            self.cancel(seqnum).await;
        }
    }

    /// Host-initiated cancel of one outstanding URB (§4.8): removes it
    /// from the table, sends `CMD_UNLINK`, and completes it with
    /// `STATUS_CANCELLED` synchronously. A no-op if the request
    /// already completed (race sub-case (a)).
    pub async fn cancel(self: &Arc<Self>, seqnum: u32) {
        let Some(request) = self.request_table.on_cancel(seqnum) else {
            return;
        };

        if let Some(tx) = self.completions.lock().unwrap().remove(&seqnum) {
            let outcome = SubmitOutcome {
                urb: request.urb,
                completion: Completion { status: UsbdStatus::Cancelled, effect: CompletionEffect::None },
            };
            let _ = tx.send(outcome);
        }

        let unlink_seqnum = self.next_seqnum();
        let cmd = build_cmd_unlink(unlink_seqnum, self.devid, seqnum);
        self.pending_sends.fetch_add(1, Ordering::AcqRel);
        let result = self.connection.send.send_cmd_unlink(&cmd).await;
        self.pending_sends.fetch_sub(1, Ordering::AcqRel);
        if let Err(e) = result {
            warn!(devid = self.devid, seqnum, error = %e, "device: failed to send CMD_UNLINK");
            self.unplug("send failure during cancel").await;
        }
    }

    /// Idempotent unplug (§4.8): flips the `unplugged` flag exactly
    /// once, completes every queued request with
    /// `STATUS_DEVICE_NOT_CONNECTED`, waits for in-flight sends/
    /// receives to settle, then half-closes the socket.
    pub async fn unplug(self: &Arc<Self>, reason: &str) {
        if self.unplugged.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock().unwrap() = DeviceState::Unplugging;
        warn!(devid = self.devid, reason, "device: unplugging");

        for request in self.request_table.drain_all() {
            if let Some(tx) = self.completions.lock().unwrap().remove(&request.seqnum) {
                let outcome = SubmitOutcome {
                    urb: request.urb,
                    completion: Completion { status: UsbdStatus::DeviceNotConnected, effect: CompletionEffect::None },
                };
                let _ = tx.send(outcome);
            }
        }

        while self.pending_sends.load(Ordering::Acquire) > 0 || self.pending_receives.load(Ordering::Acquire) > 0 {
            tokio::task::yield_now().await;
        }

        if let Err(e) = self.connection.send.shutdown().await {
            debug!(devid = self.devid, error = %e, "device: socket shutdown during unplug produced an error (already closed?)");
        }
        *self.state.lock().unwrap() = DeviceState::Removed;
    }

    /// Applies a completion's side effect (§4.3) against this device's
    /// own descriptor cache / state; the completor itself has no
    /// access to either. `ConfigurationSelected` to a real value just
    /// invalidates the stale cached configuration descriptor -- the
    /// caller is expected to re-fetch it over the wire next.
    fn apply_effect(self: &Arc<Self>, effect: &CompletionEffect) -> Option<&'static str> {
        match effect {
            CompletionEffect::None => None,
            CompletionEffect::ConfigurationSelected { .. } => {
                // The cached configuration descriptor is now stale either
                // way (a new one, or none at all); the next GET_DESCRIPTOR
                // re-fetches it over the wire and repopulates the cache.
                self.descriptor_cache.lock().unwrap().clear_configuration();
                None
            }
            CompletionEffect::DeviceDescriptorMismatch => Some("device descriptor mismatch during enumeration"),
        }
    }

    /// The receive state machine (§4.5): one task, one connection,
    /// running until a protocol violation or I/O error unplugs the
    /// device.
    async fn run_receive_loop(self: Arc<Self>) {
        loop {
            if self.is_unplugged() {
                return;
            }
            self.pending_receives.fetch_add(1, Ordering::AcqRel);
            let header = self.connection.recv.recv_header().await;
            self.pending_receives.fetch_sub(1, Ordering::AcqRel);

            match header {
                Ok(Received::RetSubmit(ret)) => {
                    if let Err(e) = self.handle_ret_submit(ret).await {
                        warn!(devid = self.devid, error = %e, "device: protocol violation handling RET_SUBMIT");
                        self.unplug("protocol violation").await;
                        return;
                    }
                }
                Ok(Received::RetUnlink(ret)) => {
                    let status = complete_ret_unlink(&ret);
                    trace!(devid = self.devid, seqnum = ret.base.seqnum, ?status, "device: RET_UNLINK acknowledged");
                }
                Err(e) => {
                    if self.is_unplugged() {
                        return;
                    }
                    warn!(devid = self.devid, error = %e, "device: connection read failed");
                    self.unplug("connection read failure").await;
                    return;
                }
            }
        }
    }

    async fn handle_ret_submit(self: &Arc<Self>, ret: usbip_wire::RetSubmit) -> Result<()> {
        let seqnum = ret.base.seqnum;

        match self.request_table.dequeue_by_seqnum(seqnum) {
            Some(request) => {
                let payload = self.read_ret_submit_payload(&ret, request.direction_in).await?;
                let outcome = self.complete_request(request, &ret, &payload);
                if let Some(effect_reason) = self.apply_effect(&outcome.completion.effect) {
                    let device = self.clone();
                    tokio::spawn(async move { device.unplug(effect_reason).await });
                }
                if let Some(tx) = self.completions.lock().unwrap().remove(&seqnum) {
                    let _ = tx.send(outcome);
                }
                Ok(())
            }
            None => {
                let info = self
                    .request_table
                    .take_awaiting(seqnum)
                    .ok_or_else(|| EngineError::Protocol(format!("RET_SUBMIT for unknown seqnum {seqnum}")))?;
                let discarded = self.read_ret_submit_payload(&ret, info.direction_in).await?;
                trace!(devid = self.devid, seqnum, bytes = discarded.len(), "device: discarded RET_SUBMIT for cancelled request");
                Ok(())
            }
        }
    }

    async fn read_ret_submit_payload(&self, ret: &usbip_wire::RetSubmit, direction_in: bool) -> Result<Vec<u8>> {
        let direction = if direction_in { Direction::In } else { Direction::Out };
        let total_len = Pdu::RetSubmit(ret.clone()).payload_size(direction);
        self.connection.recv.recv_payload(total_len).await
    }

    fn complete_request(self: &Arc<Self>, mut request: Request, ret: &usbip_wire::RetSubmit, blob: &[u8]) -> SubmitOutcome {
        let data_len = if request.direction_in { ret.actual_length as usize } else { 0 };
        let data = blob.get(..data_len).unwrap_or(&[]);
        let descriptor_bytes = blob.get(data_len..).unwrap_or(&[]);

        let completion = if request.urb.is_isochronous() {
            self.current_frame_number.store(ret.start_frame, Ordering::Relaxed);
            match usbip_wire::read_descriptors(&mut std::io::Cursor::new(descriptor_bytes), ret.number_of_packets) {
                Ok(descriptors) => complete_isoch_ret_submit(&mut request.urb, ret, data, &descriptors),
                Err(e) => {
                    warn!(devid = self.devid, seqnum = request.seqnum, error = %e, "device: failed to decode isoch descriptor array");
                    Completion { status: UsbdStatus::Error, effect: CompletionEffect::None }
                }
            }
        } else {
            let cached_device_descriptor = self.descriptor_cache.lock().unwrap().device_descriptor().map(<[u8]>::to_vec);
            complete_ret_submit(&mut request.urb, ret, data, cached_device_descriptor.as_deref())
        };

        SubmitOutcome { urb: request.urb, completion }
    }
}
