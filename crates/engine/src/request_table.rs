//! The per-device cancel-safe request table (§4.4), grounded on the
//! real driver's `csq.cpp` pending-IRP queue: a short critical section
//! guards insert/remove/peek, and is never held across socket I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::request::{Request, RequestState};
use crate::urb::PipeHandle;

/// What's left of a request once it has been cancelled but the server
/// hasn't yet replied: enough to size and discard the eventual
/// `RET_SUBMIT` payload without the URB itself.
#[derive(Debug, Clone, Copy)]
pub struct DrainInfo {
    pub direction_in: bool,
    pub is_isochronous: bool,
}

#[derive(Default)]
struct Inner {
    requests: HashMap<u32, Request>,
    awaiting: HashMap<u32, DrainInfo>,
}

/// Cancel-safe pending-request map keyed by seqnum, one per
/// `VirtualDevice`.
pub struct RequestTable {
    inner: Mutex<Inner>,
}

impl Default for RequestTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// O(1) append. The request starts life as `Pending`.
    pub fn enqueue(&self, request: Request) {
        let mut inner = self.inner.lock().unwrap();
        trace!(seqnum = request.seqnum, "request table: enqueue");
        inner.requests.insert(request.seqnum, request);
    }

    /// Transition a still-present entry from `Pending` to `InFlight`
    /// once its `CMD_SUBMIT` has actually been written to the socket.
    pub fn mark_in_flight(&self, seqnum: u32) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(req) = inner.requests.get_mut(&seqnum) {
            req.state = RequestState::InFlight;
        }
    }

    /// Pops the request for `seqnum` if still present. A successful
    /// pop conveys exclusive ownership of the URB to the caller; no
    /// other path may touch it afterwards.
    pub fn dequeue_by_seqnum(&self, seqnum: u32) -> Option<Request> {
        let mut inner = self.inner.lock().unwrap();
        let req = inner.requests.remove(&seqnum);
        if req.is_some() {
            trace!(seqnum, "request table: dequeue (found)");
        } else {
            debug!(seqnum, "request table: dequeue (not present, ignored)");
        }
        req
    }

    /// Seqnums of every pending/in-flight request on `pipe_handle`,
    /// oldest first. Used by `ABORT_PIPE`; the caller cancels each one
    /// through [`Self::on_cancel`] so every entry goes through the
    /// same single cancel path.
    pub fn peek_by_pipe(&self, pipe_handle: PipeHandle) -> Vec<u32> {
        let inner = self.inner.lock().unwrap();
        let mut seqnums: Vec<u32> = inner
            .requests
            .values()
            .filter(|r| r.pipe_handle == pipe_handle)
            .map(|r| r.seqnum)
            .collect();
        seqnums.sort_unstable();
        seqnums
    }

    /// Called when the OS cancels a request. If the entry is still in
    /// the table it is removed, a `DrainInfo` is left behind in the
    /// "awaiting unlink response" list so a later `RET_SUBMIT` for the
    /// same seqnum can still be drained correctly, and the request is
    /// returned so the caller can emit a `CMD_UNLINK` and complete the
    /// URB with `STATUS_CANCELLED`. Returns `None` for sub-cases
    /// (b)/(c) of the cancel/response race — the response already
    /// consumed the entry — which is observed-not-present, not an
    /// error.
    pub fn on_cancel(&self, seqnum: u32) -> Option<Request> {
        let mut inner = self.inner.lock().unwrap();
        let req = inner.requests.remove(&seqnum);
        match &req {
            Some(r) => {
                inner.awaiting.insert(
                    seqnum,
                    DrainInfo { direction_in: r.direction_in, is_isochronous: r.urb.is_isochronous() },
                );
                trace!(seqnum, "request table: cancelled, awaiting unlink/response");
            }
            None => debug!(seqnum, "request table: cancel observed not-present"),
        }
        req
    }

    /// Consumes the drain hint left by [`Self::on_cancel`], if any.
    /// Called by the receive loop when a `RET_SUBMIT`/`RET_UNLINK`
    /// arrives for a seqnum no longer in the main table.
    pub fn take_awaiting(&self, seqnum: u32) -> Option<DrainInfo> {
        self.inner.lock().unwrap().awaiting.remove(&seqnum)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every outstanding request, for unplug (§4.8): each one
    /// is handed back to the caller to complete with
    /// `STATUS_DEVICE_NOT_CONNECTED` / `STATUS_CANCELLED`.
    pub fn drain_all(&self) -> Vec<Request> {
        let mut inner = self.inner.lock().unwrap();
        inner.awaiting.clear();
        inner.requests.drain().map(|(_, r)| r).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urb::{EndpointInfo, Urb, UrbFunction};

    fn dummy_request(seqnum: u32, pipe_handle: PipeHandle) -> Request {
        let mut pipe = EndpointInfo::default_control();
        pipe.pipe_handle = pipe_handle;
        Request::new(seqnum, Urb::new(UrbFunction::GetCurrentFrameNumber, pipe))
    }

    #[test]
    fn enqueue_then_dequeue_returns_request() {
        let table = RequestTable::new();
        table.enqueue(dummy_request(1, 0));
        assert_eq!(table.len(), 1);
        let req = table.dequeue_by_seqnum(1).expect("present");
        assert_eq!(req.seqnum, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn dequeue_missing_seqnum_is_none_not_error() {
        let table = RequestTable::new();
        assert!(table.dequeue_by_seqnum(42).is_none());
    }

    #[test]
    fn cancel_race_response_first_is_a_noop() {
        // (a): response first -> normal completion, cancel is a no-op.
        let table = RequestTable::new();
        table.enqueue(dummy_request(7, 1));
        let completed = table.dequeue_by_seqnum(7);
        assert!(completed.is_some());
        assert!(table.on_cancel(7).is_none());
    }

    #[test]
    fn cancel_race_cancel_first_is_observed_not_present() {
        // (b)/(c): cancel removes the entry; a later RET_SUBMIT lookup
        // for the same seqnum must see "not present", not an error.
        let table = RequestTable::new();
        table.enqueue(dummy_request(7, 1));
        let cancelled = table.on_cancel(7);
        assert!(cancelled.is_some());
        assert!(table.dequeue_by_seqnum(7).is_none());
    }

    #[test]
    fn peek_by_pipe_finds_only_matching_entries() {
        let table = RequestTable::new();
        table.enqueue(dummy_request(1, 5));
        table.enqueue(dummy_request(2, 5));
        table.enqueue(dummy_request(3, 9));
        let mut matched = table.peek_by_pipe(5);
        matched.sort_unstable();
        assert_eq!(matched, vec![1, 2]);
    }

    #[test]
    fn cancel_leaves_a_drain_hint_for_the_later_response() {
        let table = RequestTable::new();
        table.enqueue(dummy_request(7, 1));
        let cancelled = table.on_cancel(7).expect("present");
        assert!(!cancelled.urb.is_isochronous());
        let hint = table.take_awaiting(7).expect("drain hint left behind");
        assert_eq!(hint.direction_in, cancelled.direction_in);
        assert!(table.take_awaiting(7).is_none());
    }

    #[test]
    fn drain_all_empties_the_table() {
        let table = RequestTable::new();
        table.enqueue(dummy_request(1, 0));
        table.enqueue(dummy_request(2, 0));
        let drained = table.drain_all();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
