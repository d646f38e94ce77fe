//! Isochronous Packet Engine (§4.6): gap-free on-wire layout ↔
//! offset-preserving host layout.

use usbip_wire::IsoPacketDescriptor;

use crate::error::EngineError;
use crate::status::usbd_status_from_wire;
use crate::urb::IsochHostPacket;

/// Translates one descriptor's wire status (Linux errno, negative or
/// zero) into the numeric code `IsochHostPacket::status` carries.
/// Unlike the overall completion status, a per-packet stall is never
/// demoted.
fn translate_packet_status(wire_status: i32) -> i32 {
    usbd_status_from_wire(wire_status, false).as_isoch_wire_code()
}

/// `USBD_STATUS_ISOCH_REQUEST_FAILED`-equivalent marker the completor
/// checks for after filling in per-packet statuses.
pub fn all_packets_failed(error_count: u32, number_of_packets: u32) -> bool {
    number_of_packets != 0 && error_count == number_of_packets
}

/// Host → Wire (DIR_OUT `CMD_SUBMIT`). Builds the gap-free descriptor
/// array from the host's offset-preserving packet list; the payload
/// bytes themselves are the host buffer unmodified.
pub fn pack_host_packets_for_submit(
    packets: &[IsochHostPacket],
    transfer_buffer_length: u32,
) -> Result<Vec<IsoPacketDescriptor>, EngineError> {
    let mut descriptors = Vec::with_capacity(packets.len());
    for (i, packet) in packets.iter().enumerate() {
        let length = if i + 1 < packets.len() {
            packets[i + 1]
                .offset
                .checked_sub(packet.offset)
                .ok_or_else(|| EngineError::InvalidRequest("isoch packet offsets out of order".into()))?
        } else {
            transfer_buffer_length
                .checked_sub(packet.offset)
                .ok_or_else(|| EngineError::InvalidRequest("isoch packet offset exceeds buffer length".into()))?
        };
        descriptors.push(IsoPacketDescriptor {
            offset: packet.offset,
            length,
            actual_length: 0,
            status: 0,
        });
    }
    let total: u32 = descriptors.iter().map(|d| d.length).sum();
    if total != transfer_buffer_length {
        return Err(EngineError::InvalidRequest(format!(
            "isoch OUT descriptor lengths sum to {total}, expected {transfer_buffer_length}"
        )));
    }
    Ok(descriptors)
}

/// Wire → Host (DIR_IN `RET_SUBMIT`). Validates each descriptor against
/// the host's recorded packet list and copies `actual_length` bytes
/// from the packed wire payload to the host buffer at the preserved
/// offset, updating each host packet's `Length`/`Status`. Iterates
/// from the last packet downward so an implementation that reuses one
/// buffer for both wire and host storage never overwrites unread
/// source bytes.
///
/// Returns the total bytes copied, which the caller cross-checks
/// against the header's `actual_length`.
pub fn unpack_wire_packets_into_host(
    descriptors: &[IsoPacketDescriptor],
    host_packets: &mut [IsochHostPacket],
    wire_payload: &[u8],
    host_buf: &mut [u8],
) -> Result<u32, EngineError> {
    if descriptors.len() != host_packets.len() {
        return Err(EngineError::Protocol(format!(
            "isoch descriptor count {} does not match host packet count {}",
            descriptors.len(),
            host_packets.len()
        )));
    }

    let mut src_offsets = Vec::with_capacity(descriptors.len());
    let mut running = 0u32;
    for d in descriptors {
        src_offsets.push(running);
        running += d.actual_length;
    }

    for i in (0..descriptors.len()).rev() {
        let d = &descriptors[i];
        if d.actual_length > d.length {
            return Err(EngineError::Protocol(format!(
                "isoch packet {i}: actual_length {} exceeds length {}",
                d.actual_length, d.length
            )));
        }
        if d.offset != host_packets[i].offset {
            return Err(EngineError::Protocol(format!(
                "isoch packet {i}: wire offset {} does not match host offset {}",
                d.offset, host_packets[i].offset
            )));
        }

        let src_start = src_offsets[i] as usize;
        let src_end = src_start + d.actual_length as usize;
        let dst_start = host_packets[i].offset as usize;
        let dst_end = dst_start + d.actual_length as usize;

        let src = wire_payload
            .get(src_start..src_end)
            .ok_or_else(|| EngineError::Protocol("isoch wire payload shorter than descriptors claim".into()))?;
        let dst = host_buf
            .get_mut(dst_start..dst_end)
            .ok_or_else(|| EngineError::Resource("isoch host buffer too small for descriptor offset".into()))?;
        dst.copy_from_slice(src);

        host_packets[i].actual_length = d.actual_length;
        host_packets[i].status = translate_packet_status(d.status);
    }

    Ok(running)
}
