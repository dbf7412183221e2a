//! Device hot-plug monitoring
//!
//! [`DeviceMonitor`] is the boundary to the OS hot-plug source. The udev
//! implementation snapshots each device's properties eagerly at event time,
//! so downstream consumers only ever see plain `Send` data and never hold a
//! live udev handle across an await point.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::HidError;
use crate::types::{MonitorEvent, RawDeviceSnapshot};

/// Broadcast channel capacity for hot-plug events.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Hot-plug event source and device-node resolver.
#[async_trait]
pub trait DeviceMonitor: Send + Sync {
    /// Snapshot every currently-present device once.
    ///
    /// The service feeds these through the same add pipeline as live events,
    /// so a freshly started service converges to the same registry state as
    /// one that watched the devices appear.
    async fn enumerate(&self) -> Result<Vec<RawDeviceSnapshot>, HidError>;

    /// Subscribe to add/remove events.
    async fn watch(&self) -> Result<broadcast::Receiver<MonitorEvent>, HidError>;

    /// Re-resolve the live device node for a sysfs path.
    ///
    /// Returns `None` when the device no longer exists or currently has no
    /// node. Called at connect time precisely because the node binding can
    /// change between registration and connect.
    fn resolve_node(&self, syspath: &str) -> Option<PathBuf>;
}

#[cfg(all(target_os = "linux", feature = "hotplug"))]
pub use udev::UdevMonitor;

#[cfg(all(target_os = "linux", feature = "hotplug"))]
mod udev {
    use super::*;

    use std::collections::HashMap;
    use std::path::Path;

    use futures::StreamExt;
    use tokio_udev::{AsyncMonitorSocket, Device, Enumerator, EventType, MonitorBuilder};
    use tracing::{debug, warn};

    use crate::device_info::HIDRAW_SUBSYSTEM;

    /// udev-backed monitor for the hidraw subsystem.
    ///
    /// The netlink socket is opened and the reader task spawned in [`new`],
    /// before any enumeration, so devices plugged during startup are seen on
    /// one path or the other.
    ///
    /// [`new`]: UdevMonitor::new
    pub struct UdevMonitor {
        event_tx: broadcast::Sender<MonitorEvent>,
    }

    impl UdevMonitor {
        /// Open the udev netlink socket and start forwarding hidraw events.
        ///
        /// Must run inside a tokio runtime.
        pub fn new() -> Result<Self, HidError> {
            let socket = MonitorBuilder::new()
                .and_then(|b| b.match_subsystem(HIDRAW_SUBSYSTEM))
                .and_then(|b| b.listen())
                .map_err(|e| HidError::Monitor(e.to_string()))?;
            let mut events =
                AsyncMonitorSocket::new(socket).map_err(|e| HidError::Monitor(e.to_string()))?;

            let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
            let tx = event_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let event = match event {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "udev monitor read failed");
                            continue;
                        }
                    };
                    let monitor_event = match event.event_type() {
                        EventType::Add => MonitorEvent::Added(snapshot(&event.device())),
                        EventType::Remove => MonitorEvent::Removed {
                            syspath: event.device().syspath().to_string_lossy().into_owned(),
                        },
                        _ => continue,
                    };
                    // No subscribers is fine; events before the service
                    // attaches are covered by enumeration.
                    let _ = tx.send(monitor_event);
                }
                debug!("udev event stream ended");
            });

            Ok(Self { event_tx })
        }
    }

    #[async_trait]
    impl DeviceMonitor for UdevMonitor {
        async fn enumerate(&self) -> Result<Vec<RawDeviceSnapshot>, HidError> {
            let mut enumerator =
                Enumerator::new().map_err(|e| HidError::Monitor(e.to_string()))?;
            enumerator
                .match_subsystem(HIDRAW_SUBSYSTEM)
                .map_err(|e| HidError::Monitor(e.to_string()))?;
            let devices = enumerator
                .scan_devices()
                .map_err(|e| HidError::Monitor(e.to_string()))?;
            Ok(devices.map(|device| snapshot(&device)).collect())
        }

        async fn watch(&self) -> Result<broadcast::Receiver<MonitorEvent>, HidError> {
            Ok(self.event_tx.subscribe())
        }

        fn resolve_node(&self, syspath: &str) -> Option<PathBuf> {
            let device = Device::from_syspath(Path::new(syspath)).ok()?;
            device.devnode().map(Path::to_path_buf)
        }
    }

    /// Capture everything the pipeline needs from a live udev device.
    fn snapshot(device: &Device) -> RawDeviceSnapshot {
        RawDeviceSnapshot {
            syspath: device.syspath().to_string_lossy().into_owned(),
            subsystem: device
                .subsystem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            devnode: device.devnode().map(Path::to_path_buf),
            parent_properties: device.parent().map(|parent| {
                parent
                    .properties()
                    .map(|entry| {
                        (
                            entry.name().to_string_lossy().into_owned(),
                            entry.value().to_string_lossy().into_owned(),
                        )
                    })
                    .collect::<HashMap<_, _>>()
            }),
        }
    }
}
