//! HID service orchestration
//!
//! [`HidService`] owns the registry of known devices and drives every device
//! through the add pipeline: extract identity → request access → open node →
//! parse descriptor → register.
//!
//! All registry state lives inside one control task. Monitor events, gate
//! resolutions and caller requests arrive as [`ServiceCommand`]s on a single
//! mpsc channel, so the registry has exactly one writer and needs no
//! locking. The only suspension between a device appearing and it being
//! registered is the permission gate, which runs as a detached task holding
//! nothing but a command sender: if the device or the service is gone by the
//! time it resolves, the result lands in an empty pending set or a closed
//! channel and is discarded.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::HidConnection;
use crate::descriptor;
use crate::device_info::extract_identity;
use crate::error::HidError;
use crate::monitor::DeviceMonitor;
use crate::node::DeviceNodeIo;
use crate::permission::PermissionGate;
use crate::types::{DeviceIdentity, MonitorEvent, RawDeviceSnapshot};

/// Everything the control task reacts to.
enum ServiceCommand {
    Monitor(MonitorEvent),
    AccessResolved {
        syspath: String,
        result: Result<bool, HidError>,
    },
    Connect {
        device_id: String,
        reply: oneshot::Sender<Result<HidConnection, HidError>>,
    },
    Enumerate {
        reply: oneshot::Sender<Vec<DeviceIdentity>>,
    },
    Shutdown,
}

/// Add in flight: identity extracted, access requested, resolution pending.
///
/// Removed from the pending set on the first of gate resolution or device
/// removal; whichever loses the race becomes a no-op.
struct PendingAdd {
    identity: DeviceIdentity,
    devnode: PathBuf,
}

/// Handle to a running HID service.
///
/// Cheap to use from any task; every call is serialized onto the service's
/// control context. Dropping the handle without [`shutdown`] leaves the
/// control task running until the runtime itself stops.
///
/// [`shutdown`]: HidService::shutdown
pub struct HidService {
    command_tx: mpsc::UnboundedSender<ServiceCommand>,
    control_task: JoinHandle<()>,
}

impl HidService {
    /// Start the service over the given boundary implementations.
    ///
    /// Subscribes to hot-plug events first, then enumerates currently
    /// present devices through the same add pipeline, so no device is missed
    /// between the two.
    pub async fn start(
        monitor: Arc<dyn DeviceMonitor>,
        gate: Arc<dyn PermissionGate>,
        node_io: Arc<dyn DeviceNodeIo>,
    ) -> Result<Self, HidError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let mut events = monitor.watch().await?;
        let forward_tx = command_tx.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if forward_tx.send(ServiceCommand::Monitor(event)).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "hot-plug events dropped, registry may be stale");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        for snapshot in monitor.enumerate().await? {
            let _ = command_tx.send(ServiceCommand::Monitor(MonitorEvent::Added(snapshot)));
        }

        let control = ControlTask {
            registry: HashMap::new(),
            pending: HashMap::new(),
            command_tx: command_tx.clone(),
            monitor,
            gate,
            node_io,
        };
        let control_task = tokio::spawn(control.run(command_rx));

        Ok(Self {
            command_tx,
            control_task,
        })
    }

    /// Start against the real platform: udev hot-plug, the platform-default
    /// permission gate, and hidraw node I/O.
    #[cfg(all(target_os = "linux", feature = "hotplug"))]
    pub async fn open() -> Result<Self, HidError> {
        let monitor = Arc::new(crate::monitor::UdevMonitor::new()?);
        let gate = crate::permission::default_gate().await?;
        Self::start(monitor, gate, Arc::new(crate::node::HidrawNode)).await
    }

    /// Open a connection to a registered device.
    ///
    /// Fails with [`HidError::NotFound`] for ids the registry does not hold,
    /// and with [`HidError::NodeResolution`] when the device's node can no
    /// longer be resolved at call time.
    pub async fn connect(&self, device_id: &str) -> Result<HidConnection, HidError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(ServiceCommand::Connect {
                device_id: device_id.to_string(),
                reply,
            })
            .map_err(|_| HidError::ServiceStopped)?;
        response.await.map_err(|_| HidError::ServiceStopped)?
    }

    /// Snapshot of every registered device identity.
    pub async fn enumerate(&self) -> Result<Vec<DeviceIdentity>, HidError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(ServiceCommand::Enumerate { reply })
            .map_err(|_| HidError::ServiceStopped)?;
        response.await.map_err(|_| HidError::ServiceStopped)
    }

    /// Stop the control task and wait for it to finish.
    ///
    /// Gate requests still in flight resolve into a closed command channel
    /// and are discarded.
    pub async fn shutdown(self) {
        let _ = self.command_tx.send(ServiceCommand::Shutdown);
        let _ = self.control_task.await;
    }
}

/// State owned exclusively by the control task.
struct ControlTask {
    /// Registered devices, keyed by sysfs path.
    registry: HashMap<String, DeviceIdentity>,
    /// Adds between "access requested" and "access resolved".
    pending: HashMap<String, PendingAdd>,
    /// Sender handed to gate tasks so resolutions come back through the
    /// same serialized queue.
    command_tx: mpsc::UnboundedSender<ServiceCommand>,
    monitor: Arc<dyn DeviceMonitor>,
    gate: Arc<dyn PermissionGate>,
    node_io: Arc<dyn DeviceNodeIo>,
}

impl ControlTask {
    async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ServiceCommand>) {
        while let Some(command) = command_rx.recv().await {
            match command {
                ServiceCommand::Monitor(MonitorEvent::Added(snapshot)) => {
                    self.handle_added(snapshot);
                }
                ServiceCommand::Monitor(MonitorEvent::Removed { syspath }) => {
                    self.handle_removed(&syspath);
                }
                ServiceCommand::AccessResolved { syspath, result } => {
                    self.handle_access_resolved(&syspath, result);
                }
                ServiceCommand::Connect { device_id, reply } => {
                    let _ = reply.send(self.handle_connect(&device_id));
                }
                ServiceCommand::Enumerate { reply } => {
                    let _ = reply.send(self.registry.values().cloned().collect());
                }
                ServiceCommand::Shutdown => break,
            }
        }
        debug!("HID service control task stopped");
    }

    /// Discovered → AccessPending.
    fn handle_added(&mut self, snapshot: RawDeviceSnapshot) {
        let Some(identity) = extract_identity(&snapshot) else {
            return;
        };
        let syspath = identity.device_id.clone();

        if self.registry.contains_key(&syspath) || self.pending.contains_key(&syspath) {
            debug!(%syspath, "duplicate add event coalesced");
            return;
        }
        let Some(devnode) = snapshot.devnode else {
            debug!(%syspath, "hidraw node without a device node");
            return;
        };

        debug!(%syspath, devnode = %devnode.display(), "requesting device access");
        self.pending.insert(
            syspath.clone(),
            PendingAdd {
                identity,
                devnode: devnode.clone(),
            },
        );

        let gate = Arc::clone(&self.gate);
        let command_tx = self.command_tx.clone();
        tokio::spawn(async move {
            let result = gate.request_access(&devnode).await;
            // Send failure means the service is gone; the grant is moot.
            let _ = command_tx.send(ServiceCommand::AccessResolved { syspath, result });
        });
    }

    /// AccessPending → Authorized → Registered, or → Rejected.
    ///
    /// The pending-set membership check is what resolves the
    /// removed-while-pending race: a device that vanished before its grant
    /// arrived is simply no longer here.
    fn handle_access_resolved(&mut self, syspath: &str, result: Result<bool, HidError>) {
        let Some(PendingAdd {
            mut identity,
            devnode,
        }) = self.pending.remove(syspath)
        else {
            debug!(%syspath, "access resolved for a device no longer tracked");
            return;
        };

        match result {
            Ok(true) => {}
            Ok(false) => {
                warn!(%syspath, "device access denied");
                return;
            }
            Err(e) => {
                error!(%syspath, error = %e, "device access request failed");
                return;
            }
        }

        let parsed = match read_descriptor(self.node_io.as_ref(), &devnode) {
            Ok(bytes) => match descriptor::parse(&bytes) {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!(%syspath, error = %e, "rejecting device with malformed descriptor");
                    return;
                }
            },
            Err(e) => {
                error!(%syspath, error = %e, "cannot read report descriptor");
                return;
            }
        };

        identity.collections = parsed.collections;
        identity.has_report_id = parsed.has_report_id;
        identity.max_input_report_size = parsed.max_input_report_size;
        identity.max_output_report_size = parsed.max_output_report_size;
        identity.max_feature_report_size = parsed.max_feature_report_size;

        info!(
            %syspath,
            vendor_id = identity.vendor_id,
            product_id = identity.product_id,
            "device registered"
        );
        self.registry.insert(syspath.to_string(), identity);
    }

    /// Any state → Removed.
    fn handle_removed(&mut self, syspath: &str) {
        if self.pending.remove(syspath).is_some() {
            debug!(%syspath, "device removed while access was pending");
        }
        if self.registry.remove(syspath).is_some() {
            info!(%syspath, "device removed");
        }
    }

    fn handle_connect(&self, device_id: &str) -> Result<HidConnection, HidError> {
        let identity = self
            .registry
            .get(device_id)
            .ok_or_else(|| HidError::NotFound(device_id.to_string()))?;

        // The node binding can change between registration and connect, so
        // resolve it live instead of reusing the registration-time path.
        let devnode = self
            .monitor
            .resolve_node(device_id)
            .ok_or_else(|| HidError::NodeResolution(device_id.to_string()))?;

        Ok(HidConnection::new(identity.clone(), devnode))
    }
}

/// Open a node and pull its full report descriptor.
fn read_descriptor(node_io: &dyn DeviceNodeIo, devnode: &Path) -> Result<Vec<u8>, HidError> {
    let as_hid_error = |source: std::io::Error| HidError::Io {
        path: devnode.display().to_string(),
        source,
    };
    let handle = node_io.open_read_only(devnode).map_err(as_hid_error)?;
    let size = node_io.descriptor_size(&handle).map_err(as_hid_error)?;
    node_io
        .read_descriptor(&handle, size)
        .map_err(as_hid_error)
}
