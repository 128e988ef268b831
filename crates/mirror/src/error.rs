//! Error types
//!
//! Flat enums, one per concern. Load failures are not errors here: they are
//! recorded in controller state (see `surface::LoadFailure`).

use thiserror::Error;

use crate::cdp::client::CDPError;
use crate::device::DeviceId;

pub type Result<T> = std::result::Result<T, MirrorError>;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Screenshot already in progress for device {device}")]
    CaptureBusy { device: DeviceId },

    #[error("Unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("Device {0} is already open")]
    DeviceExists(DeviceId),

    #[error("Device {0} does not support resizing")]
    NotResizable(DeviceId),

    #[error("Not connected to a browser")]
    NotConnected,

    #[error("Surface error: {0}")]
    Surface(#[from] SurfaceError),

    #[error("CDP error: {0}")]
    Cdp(#[from] CDPError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors raised by a `Surface` implementation
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Operation not supported by this surface: {0}")]
    Unsupported(&'static str),

    #[error("Script failed: {0}")]
    Script(String),

    #[error("Surface closed")]
    Closed,

    #[error("CDP error: {0}")]
    Cdp(#[from] CDPError),

    #[error("Failed to decode surface data: {0}")]
    Decode(String),
}

/// Failure reported by a bus handler.
///
/// The bus logs these and moves on to the next subscriber; publishers never
/// see them.
#[derive(Debug, Error)]
#[error("Bus handler failed: {0}")]
pub struct BusHandlerError(pub String);

impl BusHandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<SurfaceError> for BusHandlerError {
    fn from(err: SurfaceError) -> Self {
        Self(err.to_string())
    }
}

impl From<MirrorError> for BusHandlerError {
    fn from(err: MirrorError) -> Self {
        Self(err.to_string())
    }
}
