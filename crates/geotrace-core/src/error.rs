//! Error types for trace operations.

use std::time::Duration;
use thiserror::Error;

/// Terminal error for a whole trace.
///
/// Any of these ends the trace; the server reports the `Display` text to the
/// client as the single error frame.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to create socket: {0}")]
    SocketCreation(#[source] std::io::Error),

    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("Read failed: {0}")]
    ReadFailed(#[source] std::io::Error),

    #[error("Failed to resolve target {target}: {reason}")]
    TargetResolution { target: String, reason: String },

    #[error("Invalid max TTL {0}: must be between 1 and 255")]
    InvalidMaxTtl(u8),

    #[error("Unsupported target: {0}")]
    Unsupported(String),

    #[error("Probe engine not available on this platform")]
    DriverNotAvailable,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Trace cancelled")]
    Cancelled,
}

/// Per-hop probe failure. A hop carrying one of these is dropped from the
/// output stream; it never ends the trace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("probe failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_short() {
        let err = TraceError::TargetResolution {
            target: "nowhere.invalid".into(),
            reason: "no addresses found".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to resolve target nowhere.invalid: no addresses found"
        );
        assert_eq!(TraceError::Cancelled.to_string(), "Trace cancelled");
    }

    #[test]
    fn test_probe_timeout_display() {
        let err = ProbeError::Timeout(Duration::from_secs(5));
        assert_eq!(err.to_string(), "no reply within 5s");
    }
}
