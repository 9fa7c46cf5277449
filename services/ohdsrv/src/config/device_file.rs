//! Device configuration file
//!
//! Line oriented, one assignment per line:
//!
//! ```text
//! # global values and device defaults
//! PortName      3080
//! icdVersion    1.0
//! providerName  = ACME
//!
//! # device scoped
//! north.EventChannel  0
//! north.FaultChannel  1
//! ```
//!
//! Lines that do not start with a letter are ignored. The key runs up to the
//! first character outside `[A-Za-z0-9._-]`; an optional `=` or `:` may
//! separate it from the value. `device.key` scopes the key to a device.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{OhdSrvError, Result};
use crate::registry::{Generation, RegistryLoader};

/// Where a registry generation comes from
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<Generation>;

    /// For logs
    fn describe(&self) -> String;
}

/// One parsed assignment line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment<'a> {
    pub device: Option<&'a str>,
    pub key: &'a str,
    pub value: &'a str,
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Split a line into an assignment; `None` for comments, blanks and lines
/// with no value
pub fn split_line(line: &str) -> Option<Assignment<'_>> {
    let line = line.trim_start();
    if !line.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    let key_end = line.find(|c: char| !is_key_char(c)).unwrap_or(line.len());
    let (key, rest) = line.split_at(key_end);

    let rest = rest.trim_start();
    let rest = rest.strip_prefix(|c: char| c == '=' || c == ':').unwrap_or(rest);
    let value = rest.trim();
    if value.is_empty() {
        return None;
    }

    let (device, key) = match key.split_once('.') {
        Some((device, key)) => (Some(device), key),
        None => (None, key),
    };
    Some(Assignment { device, key, value })
}

/// Device configuration read from disk on every load
#[derive(Debug, Clone)]
pub struct DeviceConfigFile {
    path: PathBuf,
    home: PathBuf,
}

impl DeviceConfigFile {
    /// `home` anchors relative event file names
    pub fn new(path: impl Into<PathBuf>, home: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            home: home.into(),
        }
    }

    /// Build a generation from configuration text. Bad lines are logged and
    /// skipped.
    pub fn parse_str(&self, text: &str) -> Generation {
        let mut loader = RegistryLoader::new(&self.home);
        loader.begin_load();

        for (number, line) in text.lines().enumerate() {
            let Some(assignment) = split_line(line) else {
                continue;
            };
            if let Err(e) = loader.define_field(assignment.device, assignment.key, assignment.value) {
                warn!(
                    file = %self.path.display(),
                    line = number + 1,
                    "{}",
                    e
                );
            }
        }

        loader.finalize()
    }
}

impl ConfigSource for DeviceConfigFile {
    fn load(&self) -> Result<Generation> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| {
            OhdSrvError::config(format!(
                "Cannot read device configuration {}: {}",
                self.path.display(),
                e
            ))
        })?;
        debug!(file = %self.path.display(), bytes = text.len(), "Reading device configuration");
        Ok(self.parse_str(&text))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
