use std::fmt;

use serde::Serialize;

use crate::types::OperationKind;

/// Failure of a single remote call to the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// No response before the timeout, connection refused, or the transport broke mid-body.
    #[error("device unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    /// The body did not parse as the structure the endpoint promises.
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    /// Non-2xx status, or a device-reported failure on a plain acknowledgement.
    #[error("device error from {endpoint}: {detail}")]
    ServerError { endpoint: String, detail: String },

    /// `/connect` answered `success: false` (wrong password, AP out of range, ...).
    #[error("device could not join network {ssid:?}")]
    AssociationFailed { ssid: String },
}

impl DeviceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Unreachable { .. } => ErrorKind::Unreachable,
            DeviceError::MalformedResponse { .. } => ErrorKind::MalformedResponse,
            DeviceError::ServerError { .. } => ErrorKind::ServerError,
            DeviceError::AssociationFailed { .. } => ErrorKind::AssociationFailed,
        }
    }

    pub(crate) fn unreachable(endpoint: &str, reason: impl fmt::Display) -> Self {
        DeviceError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(endpoint: &str, reason: impl fmt::Display) -> Self {
        DeviceError::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn server(endpoint: &str, detail: impl fmt::Display) -> Self {
        DeviceError::ServerError {
            endpoint: endpoint.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Payload-free classification of a [`DeviceError`], kept in `ConnectionState::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unreachable,
    MalformedResponse,
    ServerError,
    AssociationFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Unreachable => "unreachable",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::ServerError => "server error",
            ErrorKind::AssociationFailed => "association failed",
        };
        f.write_str(s)
    }
}

/// Bad address or mask handed to the subnet calculator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid IPv4 input {input:?}: {reason}")]
pub struct InvalidInputError {
    pub input: String,
    pub reason: String,
}

/// Result of a user command issued through the refresh coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("a {0} request is already in flight")]
    Busy(OperationKind),

    #[error("not connected to a network")]
    NotConnected,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("refresh interval must be at least 1 second, got {0}")]
    InvalidInterval(u64),

    #[error("coordinator has been shut down")]
    ShutDown,

    #[error(transparent)]
    Device(#[from] DeviceError),
}
