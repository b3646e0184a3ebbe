//! Custom error types for the pulser driver.
//!
//! This module defines the primary error type, `TellieError`, shared by the
//! codec, the transport session, the device state machine and the RPC layer.
//! Using the `thiserror` crate, it gives every failure a stable kind so the
//! device worker and the RPC front end can decide what to do with it.
//!
//! ## Error Kinds
//!
//! - **Configuration**: a parameter outside its range or not representable on
//!   the wire (pulse number with no exact factorization, fibre delay not on the
//!   0.25 ns grid), or a configuration file that fails to load. Nothing is sent.
//! - **State**: the call is illegal in the current device state (setting while
//!   firing, channel command with no or many channels selected, readout before
//!   a fire, settings missing before a fire). Nothing is sent.
//! - **Protocol**: the box answered with something other than the expected
//!   echo, or produced an unparseable readout. The transport session has
//!   already run its stop/clear recovery by the time this surfaces.
//! - **Link**: the byte stream itself failed, or the device worker / remote
//!   server is unreachable.

use crate::config::ConfigError;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type TellieResult<T> = std::result::Result<T, TellieError>;

/// Coarse classification used for recovery and for RPC fault mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad argument, no wire traffic happened.
    Configuration,
    /// Illegal call for the current state, no wire traffic happened.
    State,
    /// The box and the driver disagree about the byte stream.
    Protocol,
    /// The link, the worker, or the remote end is gone.
    Link,
}

#[derive(Error, Debug)]
pub enum TellieError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration file error: {0}")]
    Config(#[from] ConfigError),

    #[error("State error: {0}")]
    State(String),

    #[error(
        "Protocol desync: expected echo {expected:?}, observed {observed:?}, remainder {remainder:?}"
    )]
    ProtocolDesync {
        /// Bytes read while waiting for the echo.
        observed: Vec<u8>,
        /// Bytes drained from the buffer during recovery.
        remainder: Vec<u8>,
        /// The echo the command should have produced.
        expected: Vec<u8>,
    },

    #[error("Bad readout: {0}")]
    BadReadout(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Link I/O error: {0}")]
    Link(#[from] std::io::Error),

    #[cfg(feature = "instrument_serial")]
    #[error("Serial port error: {0}")]
    SerialPort(#[from] tokio_serial::Error),

    #[error("Serial link not connected")]
    NotConnected,

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Device worker is not running")]
    WorkerGone,

    #[error("Remote call failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("RPC transport error: {0}")]
    RpcTransport(#[from] tonic::transport::Error),
}

impl TellieError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Config(_) | Self::SerialFeatureDisabled => {
                ErrorKind::Configuration
            }
            Self::State(_) => ErrorKind::State,
            Self::ProtocolDesync { .. } | Self::BadReadout(_) | Self::Timeout(_) => {
                ErrorKind::Protocol
            }
            Self::Rpc(status) => match status.code() {
                tonic::Code::InvalidArgument => ErrorKind::Configuration,
                tonic::Code::FailedPrecondition => ErrorKind::State,
                tonic::Code::Aborted => ErrorKind::Protocol,
                _ => ErrorKind::Link,
            },
            _ => ErrorKind::Link,
        }
    }

    /// True for errors that leave the wire untouched.
    pub fn is_rejection(&self) -> bool {
        matches!(self.kind(), ErrorKind::Configuration | ErrorKind::State)
    }

    pub(crate) fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TellieError::State("pulser is firing".to_string());
        assert_eq!(err.to_string(), "State error: pulser is firing");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            TellieError::configuration("bad").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(TellieError::state("busy").kind(), ErrorKind::State);
        let desync = TellieError::ProtocolDesync {
            observed: b"Q".to_vec(),
            remainder: Vec::new(),
            expected: b"LMP".to_vec(),
        };
        assert_eq!(desync.kind(), ErrorKind::Protocol);
        assert!(!desync.is_rejection());
        assert_eq!(TellieError::WorkerGone.kind(), ErrorKind::Link);
    }

    #[test]
    fn test_remote_status_keeps_kind() {
        let err = TellieError::from(tonic::Status::failed_precondition("firing"));
        assert_eq!(err.kind(), ErrorKind::State);
        assert!(err.is_rejection());
    }
}
