//! Shared building blocks for the overheight detection services
//!
//! - logging bootstrap with a size-capped daily log directory
//! - graceful shutdown signal handling
//! - configuration fallback helpers

pub mod config_loader;
pub mod logging;
pub mod shutdown;

pub use logging::{init_logging, LogConfig, LogGuard, LogLimit};
pub use shutdown::wait_for_shutdown;
