//! Service settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{OhdSrvError, Result};

/// Which DI driver to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// No hardware; every read is all-zero
    #[default]
    Null,
    /// Linux sysfs GPIO
    Sysfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Listen address; the port comes from the device configuration
    pub bind_host: String,
    /// Bound on one frame read or write; 0 waits forever
    pub io_timeout_ms: u64,
    /// DI module slot to poll
    pub di_slot: u8,
    pub driver: DriverKind,
    pub gpio_base_path: PathBuf,
    /// GPIO number of channel 0 on slot 0
    pub gpio_base: u32,
    /// Unix socket for admin commands; disabled when unset
    pub control_socket: Option<PathBuf>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            io_timeout_ms: 5000,
            di_slot: 0,
            driver: DriverKind::Null,
            gpio_base_path: PathBuf::from("/sys/class/gpio"),
            gpio_base: 0,
            control_socket: None,
        }
    }
}

impl ServiceSettings {
    /// Defaults, then the TOML file if given, then `OHD_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            if !path.exists() {
                return Err(OhdSrvError::config(format!(
                    "Settings file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("OHD_"));

        let settings: Self = figment.extract()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.bind_host.trim().is_empty() {
            return Err(OhdSrvError::config("bind_host cannot be empty"));
        }
        Ok(())
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        (self.io_timeout_ms > 0).then(|| Duration::from_millis(self.io_timeout_ms))
    }
}
