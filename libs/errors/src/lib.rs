//! Unified error handling for the overheight detection services
//!
//! Service crates keep their own detailed error enums and convert into
//! `OhdError` at the binary boundary, so `main` can return `OhdResult<()>`.

use thiserror::Error;

/// Main error type for the overheight detection services
#[derive(Debug, Error)]
pub enum OhdError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ======================================
    // Protocol & Hardware Errors
    // ======================================
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Hardware error: {0}")]
    Hardware(String),

    // ======================================
    // Persistence Errors
    // ======================================
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ======================================
    // Lifecycle Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias
pub type OhdResult<T> = Result<T, OhdError>;

// Helper macro for startup failures
#[macro_export]
macro_rules! startup_error {
    ($msg:expr) => {
        $crate::OhdError::StartupFailed($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::OhdError::StartupFailed(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_macro() {
        let err = startup_error!("Home directory {} does not exist", "/srv/ohd");
        assert!(matches!(err, OhdError::StartupFailed(_)));
        assert_eq!(
            err.to_string(),
            "Service startup failed: Home directory /srv/ohd does not exist"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: OhdError = io.into();
        assert!(matches!(err, OhdError::Io(_)));
        assert_eq!(err.to_string(), "IO error: gone");
    }
}
