//! Connection boundary object
//!
//! A [`HidConnection`] is what [`HidService::connect`] hands back: the
//! device's registered identity plus the node path re-resolved at connect
//! time. Report read/write traffic over the node is the transport layer's
//! job, not this crate's.
//!
//! [`HidService::connect`]: crate::service::HidService::connect

use std::path::{Path, PathBuf};

use crate::types::DeviceIdentity;

/// One open HID device, ready for report I/O by the caller.
#[derive(Debug, Clone)]
pub struct HidConnection {
    identity: DeviceIdentity,
    devnode: PathBuf,
}

impl HidConnection {
    pub(crate) fn new(identity: DeviceIdentity, devnode: PathBuf) -> Self {
        Self { identity, devnode }
    }

    /// Read-only snapshot of the device identity as registered.
    pub fn device_info(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Device node path, resolved live at connect time rather than cached
    /// from registration.
    pub fn devnode(&self) -> &Path {
        &self.devnode
    }

    /// Largest report the caller must size its read buffer for.
    pub fn max_report_size(&self) -> u32 {
        self.identity
            .max_input_report_size
            .max(self.identity.max_output_report_size)
            .max(self.identity.max_feature_report_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_report_size_spans_all_types() {
        let connection = HidConnection::new(
            DeviceIdentity {
                max_input_report_size: 8,
                max_output_report_size: 64,
                max_feature_report_size: 2,
                ..Default::default()
            },
            "/dev/hidraw3".into(),
        );
        assert_eq!(connection.max_report_size(), 64);
        assert_eq!(connection.devnode(), Path::new("/dev/hidraw3"));
    }
}
