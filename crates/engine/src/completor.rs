//! PDU → URB Completor (§4.3): applies a `RET_SUBMIT`/`RET_UNLINK` to
//! its pending URB, copies payload data back, and resolves the USBD
//! status.

use usbip_wire::{IsoPacketDescriptor, RetSubmit, RetUnlink};

use crate::isoch::{all_packets_failed, unpack_wire_packets_into_host};
use crate::status::usbd_status_from_wire;
use crate::status::UsbdStatus;
use crate::urb::{descriptor_type, Recipient, Urb, UrbFunction, DEFAULT_CONTROL_PIPE};

/// A side effect the device layer must apply after completion; kept
/// separate from the URB itself since the completor has no access to
/// the per-device descriptor cache or configuration state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionEffect {
    None,
    /// `SELECT_CONFIGURATION` succeeded: replace the cached active
    /// configuration and reset `current_intf_num`/`current_intf_alt`
    /// to 0. `None` means the device became unconfigured.
    ConfigurationSelected { configuration_value: Option<u8> },
    /// A full `GET_DESCRIPTOR_FROM_DEVICE` response didn't match the
    /// descriptor cached at import time; the device must be unplugged.
    DeviceDescriptorMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: UsbdStatus,
    pub effect: CompletionEffect,
}

impl Completion {
    fn simple(status: UsbdStatus) -> Self {
        Self { status, effect: CompletionEffect::None }
    }
}

fn is_direction_in(urb: &Urb) -> bool {
    match &urb.function {
        UrbFunction::ControlTransfer { setup } => setup.direction_in(),
        UrbFunction::GetDescriptor { .. }
        | UrbFunction::GetStatus { .. }
        | UrbFunction::GetConfiguration
        | UrbFunction::GetInterface => true,
        UrbFunction::SetDescriptor { .. }
        | UrbFunction::SetConfiguration
        | UrbFunction::SetInterface
        | UrbFunction::SelectConfiguration { .. }
        | UrbFunction::SelectInterface { .. }
        | UrbFunction::SetFeature { .. }
        | UrbFunction::ClearFeature { .. } => false,
        UrbFunction::VendorOrClassRequest { .. } => {
            urb.transfer_flags.contains(crate::urb::TransferFlags::DIRECTION_IN)
        }
        _ => urb.pipe.direction() == usbip_wire::Direction::In,
    }
}

/// Applies a non-isochronous `RET_SUBMIT` to `urb`. `payload` is the
/// data that followed the header on the wire (empty unless DIR_IN).
pub fn complete_ret_submit(urb: &mut Urb, ret: &RetSubmit, payload: &[u8], cached_device_descriptor: Option<&[u8]>) -> Completion {
    if urb.is_isochronous() {
        return Completion::simple(UsbdStatus::Error);
    }

    // The default control pipe can't truly stall, but that demotion only
    // applies to SELECT_CONFIGURATION/SELECT_INTERFACE completion; every
    // other control transfer reports a stall as a stall.
    let demote_stall = matches!(urb.function, UrbFunction::SelectConfiguration { .. } | UrbFunction::SelectInterface { .. });
    let mut status = usbd_status_from_wire(ret.status, demote_stall);

    if ret.actual_length > urb.transfer_buffer_length {
        urb.transfer_buffer_length = 0;
        return Completion::simple(UsbdStatus::InvalidParameter);
    }

    if is_direction_in(urb) && ret.actual_length > 0 {
        let n = ret.actual_length as usize;
        if urb.buffer.len() < n {
            urb.buffer.resize(n, 0);
        }
        if payload.len() >= n {
            urb.buffer[..n].copy_from_slice(&payload[..n]);
        }
        urb.transfer_buffer_length = ret.actual_length;
    }

    let effect = match &urb.function {
        UrbFunction::SelectConfiguration { configuration_value } if status.is_success() => {
            CompletionEffect::ConfigurationSelected { configuration_value: *configuration_value }
        }
        UrbFunction::GetDescriptor { recipient: Recipient::Device, descriptor_type: dt, .. }
            if status.is_success() && *dt == descriptor_type::DEVICE =>
        {
            match cached_device_descriptor {
                Some(cached) if ret.actual_length as usize == cached.len() && payload.len() >= cached.len() => {
                    if &payload[..cached.len()] != cached {
                        status = UsbdStatus::Error;
                        CompletionEffect::DeviceDescriptorMismatch
                    } else {
                        CompletionEffect::None
                    }
                }
                _ => CompletionEffect::None,
            }
        }
        _ => CompletionEffect::None,
    };

    Completion { status, effect }
}

/// Applies a `RET_UNLINK` status (always `-ECONNRESET` on a
/// successful cancel, occasionally 0 if the unlink raced a completed
/// submit and the table had already removed the entry).
pub fn complete_ret_unlink(ret: &RetUnlink) -> UsbdStatus {
    usbd_status_from_wire(ret.status, false)
}

/// Applies an isochronous `RET_SUBMIT`: unpacks the wire descriptor
/// array into the URB's host-side packet list (§4.6) and derives the
/// overall status.
pub fn complete_isoch_ret_submit(urb: &mut Urb, ret: &RetSubmit, payload: &[u8], descriptors: &[IsoPacketDescriptor]) -> Completion {
    let asap = matches!(&urb.function, UrbFunction::IsochTransfer { asap: true, .. });
    let mut buffer = std::mem::take(&mut urb.buffer);
    let buffer_len = buffer.len().max(urb.transfer_buffer_length as usize);
    if buffer.len() < buffer_len {
        buffer.resize(buffer_len, 0);
    }

    let result = if let UrbFunction::IsochTransfer { packets, start_frame, .. } = &mut urb.function {
        if asap {
            *start_frame = ret.start_frame;
        }
        unpack_wire_packets_into_host(descriptors, packets, payload, &mut buffer)
    } else {
        Ok(0)
    };

    urb.buffer = buffer;

    let status = match result {
        Err(_) => UsbdStatus::Error,
        Ok(_) if all_packets_failed(ret.error_count, ret.number_of_packets) => UsbdStatus::IsochRequestFailed,
        Ok(_) => usbd_status_from_wire(ret.status, false),
    };

    Completion::simple(status)
}
