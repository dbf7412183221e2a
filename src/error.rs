//! Service error types

use thiserror::Error;

use crate::descriptor::ParseError;

/// Errors surfaced by the HID service and its boundary adapters.
///
/// Per-device pipeline failures (denied access, unreadable node, malformed
/// descriptor) are logged and isolated inside the service; this enum covers
/// the conditions that reach a caller or abort a single device add.
#[derive(Error, Debug)]
pub enum HidError {
    /// `connect` was asked for a device id the registry has never seen or
    /// no longer tracks.
    #[error("device not found: {0}")]
    NotFound(String),

    /// The registered device's node could not be re-resolved at connect
    /// time; the binding changed or the device vanished.
    #[error("device node unavailable: {0}")]
    NodeResolution(String),

    /// The platform requires a permission broker and it is not reachable.
    /// Fatal for the affected device add only.
    #[error("permission broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The hot-plug monitor could not be set up or queried.
    #[error("device monitor error: {0}")]
    Monitor(String),

    /// Opening a node or reading its report descriptor failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The device's report descriptor is structurally malformed.
    #[error("malformed report descriptor: {0}")]
    Descriptor(#[from] ParseError),

    /// The service control task has shut down.
    #[error("HID service stopped")]
    ServiceStopped,
}
