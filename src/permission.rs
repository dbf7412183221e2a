//! Permission gating for raw device-node access
//!
//! Most platforms let the service open `/dev/hidraw*` directly; locked-down
//! platforms route every open through a privileged broker process on the
//! system bus. The gate variant is picked once at service construction —
//! there is no per-call platform branching.
//!
//! A gate request is the only genuinely asynchronous step of the add
//! pipeline: the service spawns it off the control task and feeds the result
//! back through its command channel, so a request that resolves after the
//! device (or the whole service) is gone lands in a closed channel or an
//! empty pending set and becomes a no-op.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::HidError;

/// Release file consulted to detect a broker-gated platform.
const LSB_RELEASE_PATH: &str = "/etc/lsb-release";
/// Marker key present in the release file on Chrome OS derivatives.
const CHROMEOS_RELEASE_MARKER: &str = "CHROMEOS_RELEASE_NAME";

/// Asynchronous authorization for one device-node path.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Ask whether `path` may be opened for report I/O.
    ///
    /// Resolves exactly once per call. `Ok(false)` is a denial;
    /// `Err(HidError::BrokerUnavailable)` means the platform's broker could
    /// not be reached, which is fatal for the affected device add only.
    async fn request_access(&self, path: &Path) -> Result<bool, HidError>;
}

/// Gate for platforms without a broker requirement: every request is granted
/// immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenGate;

#[async_trait]
impl PermissionGate for OpenGate {
    async fn request_access(&self, _path: &Path) -> Result<bool, HidError> {
        Ok(true)
    }
}

/// Check whether this system routes device access through a permission
/// broker. Reads the OS release file once per call; callers are expected to
/// consult it a single time at construction.
pub fn platform_requires_broker() -> bool {
    release_file_names_broker(Path::new(LSB_RELEASE_PATH))
}

fn release_file_names_broker(release_file: &Path) -> bool {
    match std::fs::read_to_string(release_file) {
        Ok(contents) => contents
            .lines()
            .any(|line| line.trim_start().starts_with(CHROMEOS_RELEASE_MARKER)),
        Err(_) => false,
    }
}

/// Build the gate appropriate for this platform.
///
/// Broker-gated platforms get a [`BrokerGate`] (requires the `broker`
/// feature); everything else gets the immediate [`OpenGate`]. Failure to
/// reach the broker at construction time is surfaced so the caller can treat
/// it as a configuration error instead of silently running ungated.
pub async fn default_gate() -> Result<Arc<dyn PermissionGate>, HidError> {
    #[cfg(all(target_os = "linux", feature = "broker"))]
    if platform_requires_broker() {
        let gate = BrokerGate::connect().await?;
        return Ok(Arc::new(gate));
    }

    debug!("no permission broker required, access is ungated");
    Ok(Arc::new(OpenGate))
}

#[cfg(all(target_os = "linux", feature = "broker"))]
pub use broker::BrokerGate;

#[cfg(all(target_os = "linux", feature = "broker"))]
mod broker {
    use super::*;
    use tracing::warn;

    /// `RequestPathAccess` interface id meaning "all interfaces, no
    /// descriptor-size restriction".
    const UNRESTRICTED_INTERFACE: i32 = -1;

    #[zbus::proxy(
        interface = "org.chromium.PermissionBroker",
        default_service = "org.chromium.PermissionBroker",
        default_path = "/org/chromium/PermissionBroker",
        gen_blocking = false
    )]
    trait PermissionBroker {
        fn request_path_access(&self, path: &str, interface_id: i32) -> zbus::Result<bool>;
    }

    /// Gate backed by the system-bus permission broker.
    pub struct BrokerGate {
        proxy: PermissionBrokerProxy<'static>,
    }

    impl BrokerGate {
        /// Connect to the broker on the system bus.
        pub async fn connect() -> Result<Self, HidError> {
            let connection = zbus::Connection::system()
                .await
                .map_err(|e| HidError::BrokerUnavailable(e.to_string()))?;
            let proxy = PermissionBrokerProxy::new(&connection)
                .await
                .map_err(|e| HidError::BrokerUnavailable(e.to_string()))?;
            Ok(Self { proxy })
        }
    }

    #[async_trait]
    impl PermissionGate for BrokerGate {
        async fn request_access(&self, path: &Path) -> Result<bool, HidError> {
            let path = path.to_string_lossy();
            match self
                .proxy
                .request_path_access(&path, UNRESTRICTED_INTERFACE)
                .await
            {
                Ok(granted) => Ok(granted),
                Err(e) => {
                    warn!(%path, error = %e, "permission broker call failed");
                    Err(HidError::BrokerUnavailable(e.to_string()))
                }
            }
        }
    }
}
