//! Descriptor Cache (§4.7): device/configuration/string descriptors
//! fetched once at import time, served locally thereafter so that
//! `IOCTL_USB_GET_DESCRIPTOR_FROM_NODE_CONNECTION` never races with
//! in-flight transfers on the same device.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::urb::descriptor_type;

const DEVICE_DESCRIPTOR_LEN: usize = 18;
/// Microsoft OS string descriptor index, recognised by its fixed
/// `qwSignature` ("MSFT100") rather than by content inspection beyond
/// that signature.
pub const MS_OS_STRING_INDEX: u8 = 0xEE;
const MS_OS_SIGNATURE: &[u8; 7] = b"MSFT100";

/// Parses `wTotalLength` (offset 2, little-endian) out of the first 9
/// bytes of a configuration descriptor, per the two-step
/// `GET_DESCRIPTOR` fetch (header first, then the full chain).
pub fn config_total_length(header: &[u8]) -> Result<u16, EngineError> {
    if header.len() < 4 {
        return Err(EngineError::Protocol("configuration descriptor header shorter than 4 bytes".into()));
    }
    Ok(u16::from_le_bytes([header[2], header[3]]))
}

pub fn is_ms_os_string_index(index: u8) -> bool {
    index == MS_OS_STRING_INDEX
}

/// Extracts the vendor code trailing a Microsoft OS string descriptor
/// response, validating the leading `MSFT100` signature.
pub fn parse_ms_os_vendor_code(bytes: &[u8]) -> Result<u8, EngineError> {
    // bLength, bDescriptorType, qwSignature[14 utf16 chars -> 7 ascii-ish], bMS_VendorCode, bPad
    if bytes.len() < 2 + 14 + 1 {
        return Err(EngineError::Protocol("MS OS string descriptor too short".into()));
    }
    let sig_utf16le = &bytes[2..16];
    let sig_bytes: Vec<u8> = sig_utf16le.iter().step_by(2).copied().collect();
    if sig_bytes != MS_OS_SIGNATURE {
        return Err(EngineError::Protocol("MS OS string descriptor signature mismatch".into()));
    }
    Ok(bytes[16])
}

/// Walks a chain of `{bLength, bDescriptorType, ...}` descriptors,
/// returning `(descriptor_type, byte_range)` pairs so callers can
/// slice the original buffer without an extra allocation per entry.
fn walk_chain(config: &[u8]) -> Vec<(u8, std::ops::Range<usize>)> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos + 2 <= config.len() {
        let len = config[pos] as usize;
        if len < 2 || pos + len > config.len() {
            break;
        }
        entries.push((config[pos + 1], pos..pos + len));
        pos += len;
    }
    entries
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassTriple {
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
}

#[derive(Default)]
pub struct DescriptorCache {
    device_descriptor: Option<Vec<u8>>,
    configuration_descriptor: Option<Vec<u8>>,
    configuration_value: Option<u8>,
    strings: HashMap<u8, Vec<u8>>,
    ms_os_vendor_code: Option<u8>,
    class_triple: ClassTriple,
}

impl DescriptorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_device_descriptor(&mut self, bytes: Vec<u8>) -> Result<(), EngineError> {
        if bytes.len() != DEVICE_DESCRIPTOR_LEN {
            return Err(EngineError::Protocol(format!(
                "device descriptor is {} bytes, expected {DEVICE_DESCRIPTOR_LEN}",
                bytes.len()
            )));
        }
        self.class_triple = ClassTriple {
            class: bytes[4],
            sub_class: bytes[5],
            protocol: bytes[6],
        };
        self.device_descriptor = Some(bytes);
        self.apply_class_triple_copy_up();
        Ok(())
    }

    pub fn device_descriptor(&self) -> Option<&[u8]> {
        self.device_descriptor.as_deref()
    }

    pub fn set_configuration(&mut self, configuration_value: u8, bytes: Vec<u8>) {
        self.configuration_value = Some(configuration_value);
        self.configuration_descriptor = Some(bytes);
        self.apply_class_triple_copy_up();
    }

    /// `SELECT_CONFIGURATION` with a null configuration descriptor:
    /// the device becomes unconfigured.
    pub fn clear_configuration(&mut self) {
        self.configuration_value = None;
        self.configuration_descriptor = None;
    }

    pub fn set_string(&mut self, index: u8, bytes: Vec<u8>) {
        self.strings.insert(index, bytes);
    }

    pub fn set_ms_os_vendor_code(&mut self, code: u8) {
        self.ms_os_vendor_code = Some(code);
    }

    pub fn ms_os_vendor_code(&self) -> Option<u8> {
        self.ms_os_vendor_code
    }

    pub fn class_triple(&self) -> ClassTriple {
        self.class_triple
    }

    /// If the device descriptor reports an all-zero class triple and
    /// the active configuration has exactly one interface, that
    /// interface's class triple is copied up so the OS can build a
    /// correct compatible-ID string.
    fn apply_class_triple_copy_up(&mut self) {
        if self.class_triple != ClassTriple::default() {
            return;
        }
        let Some(config) = &self.configuration_descriptor else { return };
        let entries = walk_chain(config);
        let interfaces: Vec<&std::ops::Range<usize>> = entries
            .iter()
            .filter(|(dt, _)| *dt == descriptor_type::INTERFACE)
            .map(|(_, range)| range)
            .collect();
        if interfaces.len() == 1 && interfaces[0].len() >= 8 {
            let iface = &config[interfaces[0].clone()];
            self.class_triple = ClassTriple {
                class: iface[5],
                sub_class: iface[6],
                protocol: iface[7],
            };
        }
    }

    /// Serves a `GET_DESCRIPTOR` lookup locally. Never forwarded to
    /// the server on failure — the caller completes with
    /// `STATUS_INSUFFICIENT_RESOURCES` instead.
    pub fn lookup(&self, dt: u8, index: u8) -> Result<&[u8], EngineError> {
        let not_cached = || EngineError::Resource(format!("descriptor type {dt} index {index} not in cache"));
        match dt {
            t if t == descriptor_type::DEVICE => self.device_descriptor.as_deref().ok_or_else(not_cached),
            t if t == descriptor_type::CONFIGURATION => {
                let want = self.configuration_value.map(|v| v.wrapping_sub(1));
                if want == Some(index) {
                    self.configuration_descriptor.as_deref().ok_or_else(not_cached)
                } else {
                    Err(not_cached())
                }
            }
            t if t == descriptor_type::STRING => self.strings.get(&index).map(Vec::as_slice).ok_or_else(not_cached),
            t if t == descriptor_type::INTERFACE || t == descriptor_type::ENDPOINT => {
                let config = self.configuration_descriptor.as_deref().ok_or_else(not_cached)?;
                walk_chain(config)
                    .into_iter()
                    .filter(|(entry_type, _)| *entry_type == dt)
                    .nth(index as usize)
                    .map(|(_, range)| &config[range])
                    .ok_or_else(not_cached)
            }
            _ => Err(not_cached()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device_descriptor(class: u8) -> Vec<u8> {
        let mut d = vec![0u8; 18];
        d[0] = 18;
        d[1] = descriptor_type::DEVICE;
        d[4] = class;
        d
    }

    fn sample_config_with_one_interface(iface_class: u8) -> Vec<u8> {
        let mut config = vec![0u8; 9];
        config[0] = 9;
        config[1] = descriptor_type::CONFIGURATION;
        let mut iface = vec![0u8; 9];
        iface[0] = 9;
        iface[1] = descriptor_type::INTERFACE;
        iface[5] = iface_class;
        iface[6] = 0x01;
        iface[7] = 0x02;
        config.extend_from_slice(&iface);
        let total_len = config.len() as u16;
        config[2] = total_len.to_le_bytes()[0];
        config[3] = total_len.to_le_bytes()[1];
        config
    }

    #[test]
    fn device_lookup_returns_cached_bytes() {
        let mut cache = DescriptorCache::new();
        cache.set_device_descriptor(sample_device_descriptor(9)).unwrap();
        assert_eq!(cache.lookup(descriptor_type::DEVICE, 0).unwrap().len(), 18);
    }

    #[test]
    fn configuration_lookup_matches_on_value_minus_one() {
        let mut cache = DescriptorCache::new();
        cache.set_configuration(1, sample_config_with_one_interface(8));
        assert!(cache.lookup(descriptor_type::CONFIGURATION, 0).is_ok());
        assert!(cache.lookup(descriptor_type::CONFIGURATION, 1).is_err());
    }

    #[test]
    fn missing_string_is_insufficient_resources() {
        let cache = DescriptorCache::new();
        assert!(cache.lookup(descriptor_type::STRING, 3).is_err());
    }

    #[test]
    fn class_triple_copies_up_from_sole_interface_when_device_reports_zero() {
        let mut cache = DescriptorCache::new();
        cache.set_device_descriptor(sample_device_descriptor(0)).unwrap();
        cache.set_configuration(1, sample_config_with_one_interface(8));
        assert_eq!(cache.class_triple().class, 8);
    }

    #[test]
    fn class_triple_is_not_overridden_when_device_reports_nonzero() {
        let mut cache = DescriptorCache::new();
        cache.set_device_descriptor(sample_device_descriptor(9)).unwrap();
        cache.set_configuration(1, sample_config_with_one_interface(8));
        assert_eq!(cache.class_triple().class, 9);
    }

    #[test]
    fn config_total_length_reads_little_endian_u16() {
        let header = [9u8, 2, 0x20, 0x00];
        assert_eq!(config_total_length(&header).unwrap(), 0x0020);
    }

    #[test]
    fn ms_os_string_index_is_recognised() {
        assert!(is_ms_os_string_index(0xEE));
        assert!(!is_ms_os_string_index(0x01));
    }
}
