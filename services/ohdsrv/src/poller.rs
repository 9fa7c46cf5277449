//! DI poller: samples the input word and reports per-channel edges

use ohd_protocols::DiDriver;
use tracing::{debug, error, warn};

/// One channel whose level differs from the previous sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelChange {
    pub channel: usize,
    /// New level; `true` is asserted
    pub level: bool,
}

/// Changed bits between two samples, lowest channel first
pub fn changed_channels(previous: u32, current: u32) -> Vec<ChannelChange> {
    let mut diff = previous ^ current;
    let mut changes = Vec::with_capacity(diff.count_ones() as usize);
    while diff != 0 {
        let channel = diff.trailing_zeros() as usize;
        changes.push(ChannelChange {
            channel,
            level: current & (1 << channel) != 0,
        });
        diff &= diff - 1;
    }
    changes
}

/// Edge detector over one DI slot
pub struct DiPoller {
    driver: Box<dyn DiDriver>,
    slot: u8,
    previous: u32,
}

impl DiPoller {
    /// The first sample is compared against an all-zero word
    pub fn new(driver: Box<dyn DiDriver>, slot: u8) -> Self {
        Self {
            driver,
            slot,
            previous: 0,
        }
    }

    /// Put the slot into input mode; failure is logged and polling proceeds
    pub fn prepare(&self) {
        match self.driver.set_all_inputs(self.slot) {
            Ok(()) => debug!(driver = self.driver.name(), slot = self.slot, "DI ready"),
            Err(e) => error!(
                driver = self.driver.name(),
                slot = self.slot,
                "DI mode set failed: {}",
                e
            ),
        }
    }

    /// Sample once. A failed read is logged and yields no changes.
    pub fn tick(&mut self) -> Vec<ChannelChange> {
        self.sample().unwrap_or_else(|e| {
            warn!(driver = self.driver.name(), slot = self.slot, "{}", e);
            Vec::new()
        })
    }

    /// Read the slot and diff it against the previous word
    pub fn sample(&mut self) -> crate::error::Result<Vec<ChannelChange>> {
        let reading = self.driver.read_bits(self.slot)?;

        let changes = changed_channels(self.previous, reading.bits);
        if !changes.is_empty() {
            debug!(
                previous = format_args!("{:#010b}", self.previous),
                current = format_args!("{:#010b}", reading.bits),
                at = %reading.timestamp,
                "DI changed"
            );
        }
        self.previous = reading.bits;
        Ok(changes)
    }

    pub fn previous(&self) -> u32 {
        self.previous
    }
}
