//! Common types for the HID service

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which report types a collection defines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTypes {
    /// Device-to-host reports.
    pub input: bool,
    /// Host-to-device reports.
    pub output: bool,
    /// Bidirectional configuration reports.
    pub feature: bool,
}

/// One node of the parsed report-descriptor tree.
///
/// Collections scope a functional sub-unit of the device (one control, one
/// logical sub-device) and nest arbitrarily deep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCollection {
    /// HID usage page identifying the functional class (e.g. 0x01 for
    /// Generic Desktop).
    pub usage_page: u32,
    /// Usage within the page (e.g. 0x06 Keyboard).
    pub usage: u32,
    /// Report types declared within this collection's top-level scope.
    pub report_types: ReportTypes,
    /// Nested child collections, in declaration order.
    pub children: Vec<ReportCollection>,
}

/// Identity and capability record for one registered device node.
///
/// Created empty on a device-add event, populated from udev properties and
/// the parsed report descriptor, and handed out to callers as a read-only
/// snapshot once registration completes. Callers never observe a
/// half-populated record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Stable opaque key: the device's sysfs path.
    pub device_id: String,
    /// USB/Bluetooth vendor ID; 0 when the udev identity string did not
    /// carry a parsable vendor field.
    pub vendor_id: u16,
    /// Product ID; 0 on parse failure, like `vendor_id`.
    pub product_id: u16,
    /// Serial number, empty when the OS does not expose one.
    pub serial_number: String,
    /// Human-readable product name, empty when not exposed.
    pub product_name: String,
    /// Top-level collections from the report descriptor.
    pub collections: Vec<ReportCollection>,
    /// True if any report is prefixed by a report-ID byte.
    pub has_report_id: bool,
    /// Largest input report in bytes, including the report-ID byte when
    /// present; 0 if the device defines no input reports.
    pub max_input_report_size: u32,
    /// Largest output report in bytes.
    pub max_output_report_size: u32,
    /// Largest feature report in bytes.
    pub max_feature_report_size: u32,
}

/// Plain-data capture of one raw udev device at event time.
///
/// Monitor backends snapshot everything the pipeline needs up front so
/// events can cross channels as `Send` data with no live handles attached.
#[derive(Debug, Clone)]
pub struct RawDeviceSnapshot {
    /// sysfs path, the primary device key.
    pub syspath: String,
    /// Subsystem the node was reported under (only `hidraw` is accepted).
    pub subsystem: String,
    /// Resolvable device node (`/dev/hidrawN`), if the node has one.
    pub devnode: Option<PathBuf>,
    /// Property map of the parent HID device; `None` when the node has no
    /// parent at all.
    pub parent_properties: Option<HashMap<String, String>>,
}

/// Hot-plug events emitted by a [`DeviceMonitor`](crate::DeviceMonitor).
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// A device node appeared (or was already present at enumeration).
    Added(RawDeviceSnapshot),
    /// A device node went away.
    Removed {
        /// sysfs path of the removed node.
        syspath: String,
    },
}
