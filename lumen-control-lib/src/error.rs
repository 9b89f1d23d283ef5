use std::net::Ipv4Addr;
use std::path::PathBuf;

use thiserror::Error;

use crate::util::validate::HardwareId;

/// Errors reported to the operator by the registry, reconciler, and dispatcher.
///
/// Every variant renders a message naming the failing field or device; the CLI
/// maps any of these to a non-zero exit code. Nothing here is retried
/// automatically, transient network failures surface immediately and the
/// operator re-invokes the tool.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid IPv4 address '{0}' (expected dotted-quad, e.g. 192.168.1.50)")]
    InvalidAddress(String),

    #[error("invalid hardware identifier '{0}' (expected six hex octet pairs, e.g. d0:73:d5:01:02:03)")]
    InvalidIdentifier(String),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("device name '{name}' is already taken by {identifier}")]
    NameConflict {
        name: String,
        identifier: HardwareId,
    },

    #[error("no device named '{0}' in the registry")]
    NotFound(String),

    #[error("registry file {path:?} is corrupt: {source}")]
    CorruptRegistry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to persist registry to {path:?}: {source}")]
    PersistenceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("device at {address} is unreachable: {detail}")]
    DeviceUnreachable { address: Ipv4Addr, detail: String },

    #[error("device at {address} did not accept the command: {detail}")]
    DeviceCommandFailed { address: Ipv4Addr, detail: String },
}

pub type Result<T> = std::result::Result<T, ControlError>;
