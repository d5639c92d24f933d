//! Error taxonomy for the control channel.
//!
//! Selection and connect errors end a connection attempt and need an
//! explicit restart of the session. Frame errors belong to the decode path.
//! Send failures are retryable: the driver skips delivery for that tick and
//! keeps looping.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("no device was chosen")]
    NoDeviceChosen,
    #[error("no devices were found")]
    NoDevicesFound,
    #[error("more than one device was chosen")]
    MultipleDevicesChosen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("address already in use")]
    AddressInUse,
    #[error("address unavailable")]
    AddressUnavailable,
    #[error("host unreachable")]
    HostUnreachable,
    #[error("unknown connection failure")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame")]
    Malformed,
    #[error("truncated frame")]
    Truncated,
    #[error("payload exceeds maximum frame size")]
    Oversize,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    SendFailed(String),
}

impl TransportError {
    /// Whether a later tick may succeed without restarting the session
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SendFailed(_))
    }
}

/// Why a session ended up in the failed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Discovery,
    Selection(SelectionError),
    Connect(ConnectError),
}

impl From<SelectionError> for FailureReason {
    fn from(value: SelectionError) -> Self {
        Self::Selection(value)
    }
}

impl From<ConnectError> for FailureReason {
    fn from(value: ConnectError) -> Self {
        Self::Connect(value)
    }
}

/// Failure of the discover → select → connect pipeline
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("device discovery failed: {0:#}")]
    Discovery(anyhow::Error),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
}
