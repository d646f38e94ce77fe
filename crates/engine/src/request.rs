//! A single outstanding URB tracked by a [`crate::request_table::RequestTable`].

use crate::urb::{PipeHandle, Urb};

/// Lifecycle of a tracked request (§3 "Request").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// In the table, `CMD_SUBMIT` not yet written to the socket.
    Pending,
    /// Sent; awaiting `RET_SUBMIT`/`RET_UNLINK`.
    InFlight,
    /// Header received and matched; reading the payload.
    AwaitingPayload,
    /// Terminal: either completed or cancelled.
    Completing,
}

/// One outstanding URB. `seqnum`'s top bit is never set by the
/// translator; it is reserved for the forwarder-mode direction stash
/// (see [`crate::connection`]) and is always 0 on anything the table
/// itself hands out.
#[derive(Debug)]
pub struct Request {
    pub seqnum: u32,
    pub pipe_handle: PipeHandle,
    pub urb: Urb,
    pub state: RequestState,
    /// The direction actually placed on the wire for this request's
    /// `CMD_SUBMIT` (resolved by the translator, which may differ from
    /// `urb.pipe.direction()` on the default control pipe). Needed to
    /// size the matching `RET_SUBMIT`'s payload; defaults to the
    /// pipe's own direction until the caller overrides it with the
    /// resolved value.
    pub direction_in: bool,
}

impl Request {
    pub fn new(seqnum: u32, urb: Urb) -> Self {
        let direction_in = urb.pipe.direction() == usbip_wire::Direction::In;
        Self {
            seqnum,
            pipe_handle: urb.pipe.pipe_handle,
            urb,
            state: RequestState::Pending,
            direction_in,
        }
    }
}
