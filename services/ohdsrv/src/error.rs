//! Error handling for the overheight detection agent
//!
//! One variant per failure class. Only startup-time failures are fatal; the
//! others are logged by the reactor and processing continues.

use errors::OhdError;
use ohd_protocols::{DioError, FramingError, XmlError};
use thiserror::Error;

/// Agent error type
#[derive(Error, Debug, Clone)]
pub enum OhdSrvError {
    /// Malformed or missing configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Last-event record could not be read or written
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// Framing or XML failure on the CVM connection
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// DI driver failure
    #[error("Hardware error: {0}")]
    HardwareError(String),

    /// Listener bind, log directory or other startup failure
    #[error("Startup error: {0}")]
    StartupError(String),

    /// Other I/O failure
    #[error("IO error: {0}")]
    IoError(String),

    /// Bad administrative command
    #[error("Admin command rejected: {0}")]
    AdminError(String),
}

/// Result type alias for the agent
pub type Result<T> = std::result::Result<T, OhdSrvError>;

impl OhdSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn startup(msg: impl Into<String>) -> Self {
        Self::StartupError(msg.into())
    }

    pub fn admin(msg: impl Into<String>) -> Self {
        Self::AdminError(msg.into())
    }
}

impl From<std::io::Error> for OhdSrvError {
    fn from(err: std::io::Error) -> Self {
        OhdSrvError::IoError(err.to_string())
    }
}

impl From<FramingError> for OhdSrvError {
    fn from(err: FramingError) -> Self {
        OhdSrvError::ProtocolError(err.to_string())
    }
}

impl From<XmlError> for OhdSrvError {
    fn from(err: XmlError) -> Self {
        OhdSrvError::ProtocolError(format!("XML: {err}"))
    }
}

impl From<DioError> for OhdSrvError {
    fn from(err: DioError) -> Self {
        OhdSrvError::HardwareError(err.to_string())
    }
}

impl From<figment::Error> for OhdSrvError {
    fn from(err: figment::Error) -> Self {
        OhdSrvError::ConfigError(format!("Settings: {err}"))
    }
}

impl From<OhdSrvError> for OhdError {
    fn from(err: OhdSrvError) -> Self {
        match err {
            OhdSrvError::ConfigError(msg) => OhdError::Configuration(msg),
            OhdSrvError::PersistenceError(msg) => OhdError::Persistence(msg),
            OhdSrvError::ProtocolError(msg) => OhdError::Protocol(msg),
            OhdSrvError::HardwareError(msg) => OhdError::Hardware(msg),
            OhdSrvError::StartupError(msg) => OhdError::StartupFailed(msg),
            OhdSrvError::IoError(msg) | OhdSrvError::AdminError(msg) => OhdError::Internal(msg),
        }
    }
}
