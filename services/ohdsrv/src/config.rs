//! Configuration
//!
//! Two independent inputs:
//! - [`ServiceSettings`]: deployment knobs (bind host, I/O timeout, DI
//!   driver, control socket), loaded with figment from defaults, an optional
//!   TOML file and `OHD_*` environment variables
//! - the device configuration file read by [`DeviceConfigFile`], which
//!   drives the registry loader

pub mod device_file;
pub mod settings;

pub use device_file::{ConfigSource, DeviceConfigFile};
pub use settings::{DriverKind, ServiceSettings};
