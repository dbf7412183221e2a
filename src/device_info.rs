//! Identity extraction from raw udev device properties
//!
//! Turns the property snapshot of a `hidraw` node and its parent HID device
//! into a [`DeviceIdentity`]. Anything that is not a well-formed hidraw node
//! is a silent rejection (the add event is dropped), never an error: the
//! monitor forwards every node in the subsystem and this is the filter.

use tracing::{debug, trace};

use crate::types::{DeviceIdentity, RawDeviceSnapshot};

/// Subsystem name for raw HID nodes.
pub const HIDRAW_SUBSYSTEM: &str = "hidraw";

/// Parent property carrying `bus:vendor:product` in hex.
const HID_ID_PROPERTY: &str = "HID_ID";
/// Parent property carrying the product name.
const HID_NAME_PROPERTY: &str = "HID_NAME";
/// Parent property carrying the serial number.
const HID_UNIQUE_PROPERTY: &str = "HID_UNIQ";

/// Extract a device identity from a raw snapshot.
///
/// Returns `None` when the snapshot does not describe a usable hidraw node:
/// wrong subsystem, no parent device, or a parent whose `HID_ID` is not of
/// the exact `bus:vendor:product` shape. Vendor/product fields that fail hex
/// parsing individually fall back to 0 without rejecting the device; missing
/// serial/name properties leave the fields empty.
///
/// The returned identity has no descriptor data yet; collections and report
/// sizes are filled in after the node's descriptor has been read and parsed.
pub fn extract_identity(snapshot: &RawDeviceSnapshot) -> Option<DeviceIdentity> {
    if snapshot.subsystem != HIDRAW_SUBSYSTEM {
        trace!(
            syspath = %snapshot.syspath,
            subsystem = %snapshot.subsystem,
            "ignoring non-hidraw device"
        );
        return None;
    }

    let Some(parent) = snapshot.parent_properties.as_ref() else {
        debug!(syspath = %snapshot.syspath, "hidraw node without parent device");
        return None;
    };

    let Some(hid_id) = parent.get(HID_ID_PROPERTY) else {
        debug!(syspath = %snapshot.syspath, "parent exposes no HID_ID");
        return None;
    };

    let parts: Vec<&str> = hid_id.split(':').collect();
    if parts.len() != 3 {
        debug!(syspath = %snapshot.syspath, %hid_id, "malformed HID_ID");
        return None;
    }

    Some(DeviceIdentity {
        device_id: snapshot.syspath.clone(),
        vendor_id: u16::from_str_radix(parts[1], 16).unwrap_or(0),
        product_id: u16::from_str_radix(parts[2], 16).unwrap_or(0),
        serial_number: parent.get(HID_UNIQUE_PROPERTY).cloned().unwrap_or_default(),
        product_name: parent.get(HID_NAME_PROPERTY).cloned().unwrap_or_default(),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(subsystem: &str, parent: Option<&[(&str, &str)]>) -> RawDeviceSnapshot {
        RawDeviceSnapshot {
            syspath: "/sys/devices/test/hidraw/hidraw0".into(),
            subsystem: subsystem.into(),
            devnode: Some("/dev/hidraw0".into()),
            parent_properties: parent.map(|entries| {
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<HashMap<_, _>>()
            }),
        }
    }

    #[test]
    fn test_extracts_vendor_and_product() {
        let snap = snapshot(
            "hidraw",
            Some(&[
                ("HID_ID", "3:046d:c52b"),
                ("HID_NAME", "Logitech USB Receiver"),
                ("HID_UNIQ", "abc123"),
            ]),
        );
        let identity = extract_identity(&snap).unwrap();
        assert_eq!(identity.device_id, "/sys/devices/test/hidraw/hidraw0");
        assert_eq!(identity.vendor_id, 0x046D);
        assert_eq!(identity.product_id, 0xC52B);
        assert_eq!(identity.product_name, "Logitech USB Receiver");
        assert_eq!(identity.serial_number, "abc123");
        assert!(identity.collections.is_empty());
    }

    #[test]
    fn test_rejects_two_field_hid_id() {
        let snap = snapshot("hidraw", Some(&[("HID_ID", "3:046d")]));
        assert!(extract_identity(&snap).is_none());
    }

    #[test]
    fn test_rejects_wrong_subsystem() {
        let snap = snapshot("input", Some(&[("HID_ID", "3:046d:c52b")]));
        assert!(extract_identity(&snap).is_none());
    }

    #[test]
    fn test_rejects_missing_parent_or_hid_id() {
        assert!(extract_identity(&snapshot("hidraw", None)).is_none());
        assert!(extract_identity(&snapshot("hidraw", Some(&[]))).is_none());
    }

    #[test]
    fn test_bad_hex_falls_back_to_zero() {
        let snap = snapshot(
            "hidraw",
            Some(&[("HID_ID", "3:zzzz:c52b"), ("HID_NAME", "Oddball")]),
        );
        let identity = extract_identity(&snap).unwrap();
        assert_eq!(identity.vendor_id, 0);
        assert_eq!(identity.product_id, 0xC52B);
        // Name extraction is independent of ID parse success.
        assert_eq!(identity.product_name, "Oddball");
    }

    #[test]
    fn test_optional_properties_default_empty() {
        let snap = snapshot("hidraw", Some(&[("HID_ID", "5:1234:abcd")]));
        let identity = extract_identity(&snap).unwrap();
        assert_eq!(identity.serial_number, "");
        assert_eq!(identity.product_name, "");
    }
}
