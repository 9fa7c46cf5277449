//! Digital Input (DI) - Low-level Implementation
//!
//! The poller only needs two operations from the hardware: put every channel
//! of a module slot into input mode, and read the slot's input word. Both are
//! synchronous and expected to return quickly.
//!
//! # Drivers
//!
//! - `NullDiDriver`: no hardware, every read returns an all-zero word
//! - `SysfsDiDriver`: Linux sysfs GPIO, one `value` file per channel

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::DioError;
use crate::timestamp::Timestamp;

/// Channels per DI module slot
pub const MAX_CHANNELS: usize = 8;

/// One sample of a slot's input word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiReading {
    /// Bit N is the level of channel N
    pub bits: u32,
    pub timestamp: Timestamp,
}

/// DI driver trait for abstraction
pub trait DiDriver: Send + Sync {
    /// Put every channel of `slot` into input mode
    fn set_all_inputs(&self, slot: u8) -> Result<(), DioError>;

    /// Read the current input word of `slot`
    fn read_bits(&self, slot: u8) -> Result<DiReading, DioError>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Driver used when no DI hardware is present
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiDriver;

impl DiDriver for NullDiDriver {
    fn set_all_inputs(&self, _slot: u8) -> Result<(), DioError> {
        Ok(())
    }

    fn read_bits(&self, _slot: u8) -> Result<DiReading, DioError> {
        Ok(DiReading {
            bits: 0,
            timestamp: Timestamp::now_local(),
        })
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Sysfs GPIO driver for Linux
///
/// Channel `c` of slot `s` is GPIO `gpio_base + s * 8 + c`.
#[derive(Debug, Clone)]
pub struct SysfsDiDriver {
    base_path: PathBuf,
    gpio_base: u32,
}

impl SysfsDiDriver {
    pub fn new(base_path: impl Into<PathBuf>, gpio_base: u32) -> Self {
        Self {
            base_path: base_path.into(),
            gpio_base,
        }
    }

    pub fn is_available(&self) -> bool {
        self.base_path.exists()
    }

    fn gpio_number(&self, slot: u8, channel: usize) -> u32 {
        self.gpio_base + u32::from(slot) * MAX_CHANNELS as u32 + channel as u32
    }

    fn gpio_dir(&self, gpio: u32) -> PathBuf {
        self.base_path.join(format!("gpio{gpio}"))
    }
}

impl Default for SysfsDiDriver {
    fn default() -> Self {
        Self::new("/sys/class/gpio", 0)
    }
}

fn os_code(err: &std::io::Error) -> i32 {
    err.raw_os_error().unwrap_or(-1)
}

impl DiDriver for SysfsDiDriver {
    fn set_all_inputs(&self, slot: u8) -> Result<(), DioError> {
        let export_path = self.base_path.join("export");
        for channel in 0..MAX_CHANNELS {
            let gpio = self.gpio_number(slot, channel);
            let gpio_dir = self.gpio_dir(gpio);

            if !gpio_dir.exists() {
                if let Err(e) = std::fs::write(&export_path, gpio.to_string()) {
                    // Already exported by someone else
                    if !e.to_string().contains("Device or resource busy") {
                        warn!(gpio, "Failed to export GPIO: {}", e);
                    }
                }
            }

            std::fs::write(gpio_dir.join("direction"), "in").map_err(|e| {
                warn!(gpio, "Failed to set GPIO direction: {}", e);
                DioError::ModeSet {
                    slot,
                    code: os_code(&e),
                }
            })?;
        }
        debug!(slot, "DI channels set to input");
        Ok(())
    }

    fn read_bits(&self, slot: u8) -> Result<DiReading, DioError> {
        let mut bits = 0u32;
        for channel in 0..MAX_CHANNELS {
            let path = self.gpio_dir(self.gpio_number(slot, channel)).join("value");
            let content = std::fs::read_to_string(&path).map_err(|e| DioError::Read {
                slot,
                code: os_code(&e),
            })?;
            if content.trim() == "1" {
                bits |= 1 << channel;
            }
        }
        Ok(DiReading {
            bits,
            timestamp: Timestamp::now_local(),
        })
    }

    fn name(&self) -> &str {
        "sysfs"
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Lay out a fake sysfs tree with `count` GPIOs starting at `base`
    fn fake_sysfs(base: u32, count: u32) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("export"), "").unwrap();
        for gpio in base..base + count {
            let gpio_dir = dir.path().join(format!("gpio{gpio}"));
            std::fs::create_dir(&gpio_dir).unwrap();
            std::fs::write(gpio_dir.join("value"), "0\n").unwrap();
            std::fs::write(gpio_dir.join("direction"), "out").unwrap();
        }
        dir
    }

    fn set(dir: &TempDir, gpio: u32, level: &str) {
        std::fs::write(dir.path().join(format!("gpio{gpio}/value")), level).unwrap();
    }

    #[test]
    fn test_null_driver_reads_zero() {
        let driver = NullDiDriver;
        assert!(driver.set_all_inputs(0).is_ok());
        assert_eq!(driver.read_bits(0).unwrap().bits, 0);
        assert_eq!(driver.name(), "null");
    }

    #[test]
    fn test_sysfs_read_bits() {
        let dir = fake_sysfs(496, 8);
        let driver = SysfsDiDriver::new(dir.path(), 496);
        assert!(driver.is_available());

        assert_eq!(driver.read_bits(0).unwrap().bits, 0);

        set(&dir, 496, "1\n");
        set(&dir, 499, "1");
        set(&dir, 503, "1");
        assert_eq!(driver.read_bits(0).unwrap().bits, 0b1000_1001);
    }

    #[test]
    fn test_sysfs_slot_offset() {
        let dir = fake_sysfs(8, 8);
        set(&dir, 9, "1");
        let driver = SysfsDiDriver::new(dir.path(), 0);
        assert_eq!(driver.read_bits(1).unwrap().bits, 0b10);
    }

    #[test]
    fn test_sysfs_set_all_inputs() {
        let dir = fake_sysfs(0, 8);
        let driver = SysfsDiDriver::new(dir.path(), 0);
        driver.set_all_inputs(0).unwrap();
        for gpio in 0..8 {
            let direction =
                std::fs::read_to_string(dir.path().join(format!("gpio{gpio}/direction"))).unwrap();
            assert_eq!(direction, "in");
        }
    }

    #[test]
    fn test_sysfs_missing_gpio_is_error() {
        let dir = fake_sysfs(0, 4);
        let driver = SysfsDiDriver::new(dir.path(), 0);
        assert!(matches!(
            driver.read_bits(0),
            Err(DioError::Read { slot: 0, .. })
        ));
        assert!(matches!(
            driver.set_all_inputs(0),
            Err(DioError::ModeSet { slot: 0, .. })
        ));
    }
}
