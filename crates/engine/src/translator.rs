//! URB → PDU Translator (§4.2): maps each URB function to a
//! `CMD_SUBMIT`, reconciling direction and building the setup packet.

use usbip_wire::{CmdSubmit, Command, Direction, HeaderBasic, IsoPacketDescriptor, NUMBER_OF_PACKETS_NON_ISOCH};

use crate::error::{EngineError, Result};
use crate::isoch::pack_host_packets_for_submit;
use crate::status::UsbdStatus;
use crate::urb::{
    EndpointType, Recipient, RequestKind, SetupPacket, TransferFlags, Urb, UrbFunction, DEFAULT_CONTROL_PIPE,
};

mod std_request {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    #[allow(dead_code)]
    pub const _SET_ADDRESS_UNUSED: u8 = SET_ADDRESS;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_DESCRIPTOR: u8 = 7;
    pub const GET_CONFIGURATION: u8 = 8;
    pub const SET_CONFIGURATION: u8 = 9;
    pub const GET_INTERFACE: u8 = 10;
    pub const SET_INTERFACE: u8 = 11;
}

const ENDPOINT_HALT: u16 = 0;

/// What the caller should do with a translated URB.
pub enum TranslatedRequest {
    /// Send this `CMD_SUBMIT`; `payload` is the data that follows the
    /// header (empty for DIR_IN), `iso_descriptors` is appended after
    /// `payload` for isochronous transfers (both directions).
    Submit {
        pdu: CmdSubmit,
        payload: Vec<u8>,
        iso_descriptors: Vec<IsoPacketDescriptor>,
    },
    /// Resolved without any wire traffic.
    Local { status: UsbdStatus, output: Vec<u8> },
    /// `ABORT_PIPE`: the caller drains every table entry for this pipe
    /// through the normal single-URB cancel path (§4.4).
    AbortPipe,
}

fn resolve_direction_in(urb: &Urb, setup_dir_in: Option<bool>) -> bool {
    if urb.pipe.pipe_handle == DEFAULT_CONTROL_PIPE {
        setup_dir_in.unwrap_or_else(|| urb.transfer_flags.contains(TransferFlags::DIRECTION_IN))
    } else {
        urb.pipe.direction() == Direction::In
    }
}

fn recipient_value(r: Recipient) -> u8 {
    match r {
        Recipient::Device => 0,
        Recipient::Interface => 1,
        Recipient::Endpoint => 2,
        Recipient::Other => 3,
    }
}

fn request_kind_bits(k: RequestKind) -> u8 {
    match k {
        RequestKind::Standard => 0x00,
        RequestKind::Class => 0x20,
        RequestKind::Vendor => 0x40,
    }
}

fn build_submit(
    urb: &Urb,
    seqnum: u32,
    devid: u32,
    setup: SetupPacket,
    dir_in: bool,
    payload: Vec<u8>,
) -> TranslatedRequest {
    let mut flags = urb.transfer_flags;
    flags.set(TransferFlags::DIRECTION_IN, dir_in);

    let base = HeaderBasic {
        command: Command::CmdSubmit,
        seqnum,
        devid,
        direction: if dir_in { Direction::In } else { Direction::Out },
        ep: urb.pipe.endpoint_number() as u32,
    };

    TranslatedRequest::Submit {
        pdu: CmdSubmit {
            base,
            transfer_flags: flags.bits(),
            transfer_buffer_length: urb.transfer_buffer_length,
            start_frame: 0,
            number_of_packets: NUMBER_OF_PACKETS_NON_ISOCH,
            interval: urb.pipe.interval as u32,
            setup: setup.to_bytes(),
        },
        payload,
        iso_descriptors: Vec::new(),
    }
}

fn control_submit(
    urb: &Urb,
    seqnum: u32,
    devid: u32,
    recipient: Recipient,
    kind: RequestKind,
    dir_in: bool,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    w_length: u16,
) -> TranslatedRequest {
    let mut bm_request_type = recipient_value(recipient) | request_kind_bits(kind);
    if dir_in {
        bm_request_type |= 0x80;
    }
    let setup = SetupPacket {
        bm_request_type,
        b_request,
        w_value,
        w_index,
        w_length,
    };
    let payload = if dir_in { Vec::new() } else { urb.buffer.clone() };
    build_submit(urb, seqnum, devid, setup, dir_in, payload)
}

/// Translate a single URB into the action the Connection I/O Loop (or
/// the device layer, for `AbortPipe`) should take.
pub fn translate(urb: &Urb, seqnum: u32, devid: u32, current_frame_number: u32) -> Result<TranslatedRequest> {
    match &urb.function {
        UrbFunction::SelectConfiguration { configuration_value } => Ok(control_submit(
            urb,
            seqnum,
            devid,
            Recipient::Device,
            RequestKind::Standard,
            false,
            std_request::SET_CONFIGURATION,
            configuration_value.unwrap_or(0) as u16,
            0,
            0,
        )),

        UrbFunction::SelectInterface { interface_number, alternate_setting } => Ok(control_submit(
            urb,
            seqnum,
            devid,
            Recipient::Interface,
            RequestKind::Standard,
            false,
            std_request::SET_INTERFACE,
            *alternate_setting as u16,
            *interface_number as u16,
            0,
        )),

        UrbFunction::ControlTransfer { setup } => {
            let dir_in = resolve_direction_in(urb, Some(setup.direction_in()));
            let payload = if dir_in { Vec::new() } else { urb.buffer.clone() };
            Ok(build_submit(urb, seqnum, devid, *setup, dir_in, payload))
        }

        UrbFunction::BulkOrInterruptTransfer => {
            if !matches!(urb.pipe.transfer_type, EndpointType::Bulk | EndpointType::Interrupt) {
                return Err(EngineError::InvalidRequest(
                    "BULK_OR_INTERRUPT_TRANSFER on a non-bulk, non-interrupt pipe".into(),
                ));
            }
            let dir_in = resolve_direction_in(urb, None);
            let payload = if dir_in { Vec::new() } else { urb.buffer.clone() };
            Ok(build_submit(urb, seqnum, devid, SetupPacket::default(), dir_in, payload))
        }

        UrbFunction::IsochTransfer { packets, start_frame, asap } => {
            if urb.pipe.transfer_type != EndpointType::Isochronous {
                return Err(EngineError::InvalidRequest("ISOCH_TRANSFER on a non-isochronous pipe".into()));
            }
            let dir_in = resolve_direction_in(urb, None);
            let iso_descriptors = pack_host_packets_for_submit(packets, urb.transfer_buffer_length)?;
            let payload = if dir_in { Vec::new() } else { urb.buffer.clone() };

            let mut flags = urb.transfer_flags;
            flags.set(TransferFlags::DIRECTION_IN, dir_in);
            // Frame-number queries aren't supported, so every isochronous
            // submission is started ASAP regardless of what the caller asked.
            flags.insert(TransferFlags::ASAP);
            let base = HeaderBasic {
                command: Command::CmdSubmit,
                seqnum,
                devid,
                direction: if dir_in { Direction::In } else { Direction::Out },
                ep: urb.pipe.endpoint_number() as u32,
            };
            Ok(TranslatedRequest::Submit {
                pdu: CmdSubmit {
                    base,
                    transfer_flags: flags.bits(),
                    transfer_buffer_length: urb.transfer_buffer_length,
                    start_frame: if *asap { 0 } else { *start_frame },
                    number_of_packets: iso_descriptors.len() as u32,
                    interval: urb.pipe.interval as u32,
                    setup: [0u8; 8],
                },
                payload,
                iso_descriptors,
            })
        }

        UrbFunction::GetDescriptor { recipient, descriptor_type, index, language_id } => Ok(control_submit(
            urb,
            seqnum,
            devid,
            *recipient,
            RequestKind::Standard,
            true,
            std_request::GET_DESCRIPTOR,
            (u16::from(*descriptor_type) << 8) | u16::from(*index),
            *language_id,
            urb.transfer_buffer_length as u16,
        )),

        UrbFunction::SetDescriptor { recipient, descriptor_type, index, language_id } => Ok(control_submit(
            urb,
            seqnum,
            devid,
            *recipient,
            RequestKind::Standard,
            false,
            std_request::SET_DESCRIPTOR,
            (u16::from(*descriptor_type) << 8) | u16::from(*index),
            *language_id,
            urb.transfer_buffer_length as u16,
        )),

        UrbFunction::VendorOrClassRequest { kind, recipient, request, value, index } => {
            let dir_in = resolve_direction_in(urb, None);
            Ok(control_submit(
                urb,
                seqnum,
                devid,
                *recipient,
                *kind,
                dir_in,
                *request,
                *value,
                *index,
                urb.transfer_buffer_length as u16,
            ))
        }

        UrbFunction::SetFeature { recipient, feature } => Ok(control_submit(
            urb,
            seqnum,
            devid,
            *recipient,
            RequestKind::Standard,
            false,
            std_request::SET_FEATURE,
            *feature,
            0,
            0,
        )),

        UrbFunction::ClearFeature { recipient, feature } => Ok(control_submit(
            urb,
            seqnum,
            devid,
            *recipient,
            RequestKind::Standard,
            false,
            std_request::CLEAR_FEATURE,
            *feature,
            0,
            0,
        )),

        UrbFunction::GetStatus { recipient } => Ok(control_submit(
            urb,
            seqnum,
            devid,
            *recipient,
            RequestKind::Standard,
            true,
            std_request::GET_STATUS,
            0,
            0,
            2,
        )),

        UrbFunction::GetConfiguration => Ok(control_submit(
            urb,
            seqnum,
            devid,
            Recipient::Device,
            RequestKind::Standard,
            true,
            std_request::GET_CONFIGURATION,
            0,
            0,
            1,
        )),

        UrbFunction::SetConfiguration => {
            let value = urb.buffer.first().copied().unwrap_or(0) as u16;
            Ok(control_submit(
                urb,
                seqnum,
                devid,
                Recipient::Device,
                RequestKind::Standard,
                false,
                std_request::SET_CONFIGURATION,
                value,
                0,
                0,
            ))
        }

        UrbFunction::GetInterface => Ok(control_submit(
            urb,
            seqnum,
            devid,
            Recipient::Interface,
            RequestKind::Standard,
            true,
            std_request::GET_INTERFACE,
            0,
            0,
            1,
        )),

        UrbFunction::SetInterface => Ok(control_submit(
            urb,
            seqnum,
            devid,
            Recipient::Interface,
            RequestKind::Standard,
            false,
            std_request::SET_INTERFACE,
            0,
            0,
            0,
        )),

        UrbFunction::AbortPipe => Ok(TranslatedRequest::AbortPipe),

        UrbFunction::SyncResetPipeAndClearStall => Ok(control_submit(
            urb,
            seqnum,
            devid,
            Recipient::Endpoint,
            RequestKind::Standard,
            false,
            std_request::CLEAR_FEATURE,
            ENDPOINT_HALT,
            urb.pipe.address as u16,
            0,
        )),

        UrbFunction::SyncResetPipe | UrbFunction::SyncClearStall => Err(EngineError::NotSupported(
            "SYNC_RESET_PIPE/SYNC_CLEAR_STALL are not supported separately from SYNC_RESET_PIPE_AND_CLEAR_STALL".into(),
        )),

        UrbFunction::GetCurrentFrameNumber => Ok(TranslatedRequest::Local {
            status: UsbdStatus::Success,
            // No isoch transfer has completed yet to seed this from; 100
            // is the documented fallback frame number.
            output: (if current_frame_number == 0 { 100 } else { current_frame_number }).to_le_bytes().to_vec(),
        }),

        UrbFunction::GetIsochPipeTransferPathDelays => {
            Err(EngineError::NotSupported("GET_ISOCH_PIPE_TRANSFER_PATH_DELAYS is not supported".into()))
        }

        UrbFunction::TakeFrameLengthControl
        | UrbFunction::ReleaseFrameLengthControl
        | UrbFunction::GetFrameLength
        | UrbFunction::SetFrameLength => {
            Err(EngineError::NotSupported("frame length control functions are deprecated".into()))
        }

        UrbFunction::Unsupported(code) => Err(EngineError::InvalidRequest(format!("unrecognised URB function code {code:#x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urb::{EndpointInfo, IsochHostPacket, Urb};

    fn control_urb(function: UrbFunction) -> Urb {
        Urb::new(function, EndpointInfo::default_control())
    }

    #[test]
    fn select_configuration_builds_set_configuration_setup() {
        let mut urb = control_urb(UrbFunction::SelectConfiguration { configuration_value: Some(1) });
        urb.transfer_buffer_length = 0;
        match translate(&urb, 1, (1 << 16) | 1, 0).unwrap() {
            TranslatedRequest::Submit { pdu, payload, .. } => {
                assert_eq!(pdu.setup, [0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
                assert!(payload.is_empty());
                assert_eq!(pdu.base.direction, Direction::Out);
            }
            _ => panic!("expected Submit"),
        }
    }

    #[test]
    fn control_transfer_in_has_no_outbound_payload() {
        let setup = SetupPacket::standard(Recipient::Device, true, std_request::GET_STATUS, 0, 0, 2);
        let mut urb = control_urb(UrbFunction::ControlTransfer { setup });
        urb.transfer_buffer_length = 2;
        urb.buffer = vec![0u8; 2];
        match translate(&urb, 1, 1, 0).unwrap() {
            TranslatedRequest::Submit { pdu, payload, .. } => {
                assert!(payload.is_empty());
                assert_eq!(pdu.base.direction, Direction::In);
                assert_eq!(pdu.transfer_buffer_length, 2);
            }
            _ => panic!("expected Submit"),
        }
    }

    #[test]
    fn bulk_out_on_wrong_endpoint_type_is_rejected() {
        let mut pipe = EndpointInfo::default_control();
        pipe.transfer_type = EndpointType::Control;
        let urb = Urb::new(UrbFunction::BulkOrInterruptTransfer, pipe);
        assert!(translate(&urb, 1, 1, 0).is_err());
    }

    #[test]
    fn isoch_transfer_computes_descriptor_array() {
        let mut pipe = EndpointInfo::default_control();
        pipe.transfer_type = EndpointType::Isochronous;
        pipe.address = 0x81;
        let packets = vec![
            IsochHostPacket { offset: 0, length: 0, actual_length: 0, status: 0 },
            IsochHostPacket { offset: 192, length: 0, actual_length: 0, status: 0 },
            IsochHostPacket { offset: 384, length: 0, actual_length: 0, status: 0 },
        ];
        let mut urb = Urb::new(UrbFunction::IsochTransfer { packets, start_frame: 0, asap: true }, pipe);
        urb.transfer_buffer_length = 576;
        match translate(&urb, 1, 1, 0).unwrap() {
            TranslatedRequest::Submit { pdu, iso_descriptors, .. } => {
                assert_eq!(pdu.number_of_packets, 3);
                assert_eq!(iso_descriptors.len(), 3);
                assert_eq!(pdu.start_frame, 0);
                assert!(TransferFlags::from_bits_truncate(pdu.transfer_flags).contains(TransferFlags::ASAP));
            }
            _ => panic!("expected Submit"),
        }
    }

    #[test]
    fn isoch_transfer_sets_asap_flag_even_when_not_asap() {
        let mut pipe = EndpointInfo::default_control();
        pipe.transfer_type = EndpointType::Isochronous;
        pipe.address = 0x81;
        let packets = vec![IsochHostPacket { offset: 0, length: 0, actual_length: 0, status: 0 }];
        let mut urb = Urb::new(UrbFunction::IsochTransfer { packets, start_frame: 5, asap: false }, pipe);
        urb.transfer_buffer_length = 192;
        match translate(&urb, 1, 1, 0).unwrap() {
            TranslatedRequest::Submit { pdu, .. } => {
                assert_eq!(pdu.start_frame, 5);
                assert!(TransferFlags::from_bits_truncate(pdu.transfer_flags).contains(TransferFlags::ASAP));
            }
            _ => panic!("expected Submit"),
        }
    }

    #[test]
    fn abort_pipe_is_local_only() {
        let urb = control_urb(UrbFunction::AbortPipe);
        assert!(matches!(translate(&urb, 1, 1, 0).unwrap(), TranslatedRequest::AbortPipe));
    }

    #[test]
    fn get_current_frame_number_is_local() {
        let urb = control_urb(UrbFunction::GetCurrentFrameNumber);
        match translate(&urb, 1, 1, 42).unwrap() {
            TranslatedRequest::Local { status, output } => {
                assert!(status.is_success());
                assert_eq!(u32::from_le_bytes(output.try_into().unwrap()), 42);
            }
            _ => panic!("expected Local"),
        }
    }

    #[test]
    fn get_current_frame_number_falls_back_to_100_when_unset() {
        let urb = control_urb(UrbFunction::GetCurrentFrameNumber);
        match translate(&urb, 1, 1, 0).unwrap() {
            TranslatedRequest::Local { output, .. } => {
                assert_eq!(u32::from_le_bytes(output.try_into().unwrap()), 100);
            }
            _ => panic!("expected Local"),
        }
    }

    #[test]
    fn sync_clear_stall_alone_is_not_supported() {
        let urb = control_urb(UrbFunction::SyncClearStall);
        assert!(matches!(translate(&urb, 1, 1, 0), Err(EngineError::NotSupported(_))));
    }

    #[test]
    fn unsupported_function_code_is_invalid_request() {
        let urb = control_urb(UrbFunction::Unsupported(0xDEAD));
        assert!(matches!(translate(&urb, 1, 1, 0), Err(EngineError::InvalidRequest(_))));
    }
}
