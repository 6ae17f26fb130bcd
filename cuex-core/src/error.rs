use serde::{Deserialize, Serialize};
use std::fmt;

/// Operator-facing error taxonomy. Driver errors are converted into one of
/// these at the driver boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Device absent or not yet connected; the operator may override.
    DeviceNotReady,
    /// Device failed mid-trial; the trial pauses.
    DeviceFault,
    /// Malformed or unknown control message; dropped.
    ProtocolError,
    /// A manual order references missing images; Start is blocked.
    AssetError,
    /// Control link round-trip above threshold; advisory only.
    LatencyExceeded,
}

impl ErrorKind {
    /// Whether the trial engine must pause on this kind.
    pub fn pauses_trial(&self) -> bool {
        matches!(self, ErrorKind::DeviceFault)
    }

    pub fn blocks_start(&self) -> bool {
        matches!(self, ErrorKind::AssetError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::DeviceNotReady => "DeviceNotReady",
            ErrorKind::DeviceFault => "DeviceFault",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::AssetError => "AssetError",
            ErrorKind::LatencyExceeded => "LatencyExceeded",
        };
        f.write_str(s)
    }
}

/// Implemented by every crate-level error so controllers can route it.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
