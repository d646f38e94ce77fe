//! Client-side USB/IP protocol engine: translates Windows-shaped URBs
//! to and from USB/IP PDUs, tracks in-flight requests across the
//! cancel/response race, and owns each imported device's connection
//! for its whole lifetime.
//!
//! This crate stops at the wire/URB boundary: it has no notion of an
//! IRP, a device object, or a vhci port. Those belong to the bus
//! driver that calls into it.

pub mod completor;
pub mod config;
pub mod connection;
pub mod descriptor_cache;
pub mod device;
pub mod error;
pub mod handshake;
pub mod isoch;
pub mod logging;
pub mod request;
pub mod request_table;
pub mod status;
pub mod translator;
pub mod urb;

pub use completor::{Completion, CompletionEffect};
pub use config::ConnectionConfig;
pub use connection::Connection;
pub use descriptor_cache::DescriptorCache;
pub use device::{DeviceState, SubmitOutcome, VirtualDevice};
pub use error::{EngineError, Result};
pub use handshake::{import_device, ImportedDevice};
pub use request::Request;
pub use request_table::RequestTable;
pub use status::UsbdStatus;
pub use translator::TranslatedRequest;
pub use urb::{Urb, UrbFunction};
