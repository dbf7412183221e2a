//! Raw HID device lifecycle service
//!
//! This crate discovers `hidraw` device nodes, extracts their identity from
//! udev properties, gates access behind an asynchronous (and on some
//! platforms broker-backed) permission check, parses each device's binary
//! report descriptor into a structured capability model, and hands out
//! connection handles for report I/O:
//!
//! - [`HidService`] — orchestrator owning the device registry
//! - [`DeviceMonitor`] / [`UdevMonitor`](monitor::UdevMonitor) — hot-plug
//!   event source
//! - [`PermissionGate`] — per-device access authorization
//! - [`descriptor::parse`] — report-descriptor decoder
//! - [`HidConnection`] — one open device, ready for caller-side I/O
//!
//! Report read/write framing over an open node is deliberately out of scope;
//! the service stops at producing the connection handle.

pub mod connection;
pub mod descriptor;
pub mod device_info;
pub mod error;
pub mod monitor;
pub mod node;
pub mod permission;
pub mod service;
pub mod types;

pub use connection::HidConnection;
pub use descriptor::{ParseError, ParsedDescriptor};
pub use device_info::{extract_identity, HIDRAW_SUBSYSTEM};
pub use error::HidError;
pub use monitor::{DeviceMonitor, EVENT_CHANNEL_CAPACITY};
pub use node::{DeviceNodeIo, NodeHandle, MAX_DESCRIPTOR_SIZE};
pub use permission::{default_gate, platform_requires_broker, OpenGate, PermissionGate};
pub use service::HidService;
pub use types::{DeviceIdentity, MonitorEvent, RawDeviceSnapshot, ReportCollection, ReportTypes};

#[cfg(all(target_os = "linux", feature = "hotplug"))]
pub use monitor::UdevMonitor;

#[cfg(all(target_os = "linux", feature = "broker"))]
pub use permission::BrokerGate;

#[cfg(target_os = "linux")]
pub use node::HidrawNode;
