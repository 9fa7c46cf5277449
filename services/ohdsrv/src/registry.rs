//! Device & Channel Registry
//!
//! Configuration is applied in three steps through a [`RegistryLoader`]:
//!
//! 1. `begin_load` discards any half-built state
//! 2. `define_field` assigns one field, either on a named device (created on
//!    first reference, at most [`MAX_DEVICES`]) or on the default template
//! 3. `finalize` fills unset device fields from the template and derives the
//!    channel table
//!
//! The result is an immutable-by-construction [`Generation`]. The
//! [`Registry`] owns the active generation and swaps it wholesale on
//! `commit`, so readers see either the old or the new configuration, never a
//! mix. Only device status changes between commits.

use std::path::PathBuf;
use std::time::Duration;

use ohd_protocols::{DeviceReport, Timestamp, MAX_CHANNELS};
use tracing::{debug, info, warn};

use crate::error::{OhdSrvError, Result};
use crate::status::DeviceStatus;

/// Upper bound on configured devices
pub const MAX_DEVICES: usize = 4;

/// Name of the device synthesized when the configuration names none
pub const DEFAULT_DEVICE_NAME: &str = "default device";

/// TCP port used when `PortName` is not configured
pub const DEFAULT_PORT: u16 = 3080;

/// 75 mph vehicle, 10 ft minimum footprint, sampled at twice the needed rate
pub const DEFAULT_POLLING_DELAY: Duration = Duration::from_micros(50_000);

/// `pollingDelay` bounds, microseconds
pub const MIN_POLLING_DELAY_US: u64 = 10;
pub const MAX_POLLING_DELAY_US: u64 = 1_000_000;

/// Default log directory cap, bytes
pub const DEFAULT_LOG_FILE_LIMIT: u64 = 6_000_000;

/// Keys accepted in the device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    ProviderName,
    ResourceType,
    CenterId,
    TriggerHeight,
    EventChannel,
    FaultChannel,
    EventFilename,
    OpStatus,
    PortName,
    MyRefId,
    IcdVersion,
    PollingDelay,
    Id,
    LogFileLimit,
}

const FIELD_KEYS: [(&str, FieldName); 14] = [
    ("providerName", FieldName::ProviderName),
    ("resourceType", FieldName::ResourceType),
    ("centerId", FieldName::CenterId),
    ("triggerHeight", FieldName::TriggerHeight),
    ("EventChannel", FieldName::EventChannel),
    ("FaultChannel", FieldName::FaultChannel),
    ("EventFilename", FieldName::EventFilename),
    ("opStatus", FieldName::OpStatus),
    ("PortName", FieldName::PortName),
    ("myRefId", FieldName::MyRefId),
    ("icdVersion", FieldName::IcdVersion),
    ("pollingDelay", FieldName::PollingDelay),
    ("id", FieldName::Id),
    ("logFileLimit", FieldName::LogFileLimit),
];

impl FieldName {
    /// Case-insensitive key lookup
    pub fn parse(key: &str) -> Option<Self> {
        FIELD_KEYS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(key))
            .map(|(_, field)| *field)
    }

    pub fn key(&self) -> &'static str {
        FIELD_KEYS
            .iter()
            .find(|(_, field)| field == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }

    /// Agent-wide settings; a device prefix on these is ignored
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            FieldName::PortName
                | FieldName::MyRefId
                | FieldName::IcdVersion
                | FieldName::PollingDelay
                | FieldName::LogFileLimit
        )
    }
}

/// Leading integer of `value`, C `atoi` style, but `None` when there are no
/// digits at all
fn leading_int(value: &str) -> Option<i64> {
    let value = value.trim_start();
    let (sign, digits) = match value.as_bytes().first() {
        Some(b'-') => (-1, &value[1..]),
        Some(b'+') => (1, &value[1..]),
        _ => (1, value),
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }
    // Saturate instead of overflowing on absurd inputs
    let magnitude = digits[..end].parse::<i64>().unwrap_or(i64::MAX);
    Some(sign * magnitude)
}

fn invalid(field: FieldName, value: &str, reason: &str) -> OhdSrvError {
    OhdSrvError::config(format!(
        "Invalid {} value {:?}: {}",
        field.key(),
        value,
        reason
    ))
}

/// Channel number, clamped to the hardware range
pub fn decode_channel(value: &str) -> Result<u8> {
    let n = leading_int(value)
        .ok_or_else(|| invalid(FieldName::EventChannel, value, "not a number"))?;
    Ok(n.clamp(0, MAX_CHANNELS as i64 - 1) as u8)
}

/// Polling delay in microseconds
pub fn decode_polling_delay(value: &str) -> Result<Duration> {
    let n = leading_int(value)
        .ok_or_else(|| invalid(FieldName::PollingDelay, value, "not a number"))?;
    if n < MIN_POLLING_DELAY_US as i64 {
        return Err(invalid(
            FieldName::PollingDelay,
            value,
            "below 10 microseconds",
        ));
    }
    Ok(Duration::from_micros(n.min(MAX_POLLING_DELAY_US as i64) as u64))
}

/// File size: `<n>`, `<n>K` or `<n>M`
pub fn decode_file_size(value: &str) -> Result<u64> {
    let value = value.trim();
    let end = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    if end == 0 {
        return Err(invalid(FieldName::LogFileLimit, value, "not a number"));
    }
    let n: u64 = value[..end]
        .parse()
        .map_err(|_| invalid(FieldName::LogFileLimit, value, "out of range"))?;
    let multiplier = match value[end..].chars().next() {
        Some('K' | 'k') => 1024,
        Some('M' | 'm') => 1024 * 1024,
        _ => 1,
    };
    Ok(n.saturating_mul(multiplier))
}

/// Agent-wide values from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSettings {
    /// `PortName`; `None` falls back to env/default at bind time
    pub port: Option<u16>,
    /// `myRefId`: the first push uses `ref_id_base + 1`
    pub ref_id_base: u64,
    pub icd_version: String,
    pub polling_delay: Duration,
    pub log_file_limit: u64,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            port: None,
            ref_id_base: 0,
            icd_version: String::new(),
            polling_delay: DEFAULT_POLLING_DELAY,
            log_file_limit: DEFAULT_LOG_FILE_LIMIT,
        }
    }
}

impl AgentSettings {
    fn apply(&mut self, field: FieldName, value: &str) -> Result<()> {
        match field {
            FieldName::PortName => {
                let port = value
                    .trim()
                    .parse::<u16>()
                    .map_err(|e| invalid(field, value, &e.to_string()))?;
                self.port = Some(port);
            },
            FieldName::MyRefId => {
                let n = leading_int(value).ok_or_else(|| invalid(field, value, "not a number"))?;
                self.ref_id_base = n.max(0) as u64;
            },
            FieldName::IcdVersion => self.icd_version = value.to_string(),
            FieldName::PollingDelay => self.polling_delay = decode_polling_delay(value)?,
            FieldName::LogFileLimit => self.log_file_limit = decode_file_size(value)?,
            _ => {},
        }
        Ok(())
    }
}

/// Device fields as collected during a load; `None` means unset
#[derive(Debug, Clone, Default)]
struct DeviceDraft {
    name: String,
    provider_name: Option<String>,
    resource_type: Option<String>,
    center_id: Option<String>,
    id: Option<String>,
    trigger_height: Option<String>,
    event_channel: Option<u8>,
    fault_channel: Option<u8>,
    event_file: Option<String>,
    /// `Error` counts as unset
    status: DeviceStatus,
}

impl DeviceDraft {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn apply(&mut self, field: FieldName, value: &str) -> Result<()> {
        let text = || Some(value.to_string());
        match field {
            FieldName::ProviderName => self.provider_name = text(),
            FieldName::ResourceType => self.resource_type = text(),
            FieldName::CenterId => self.center_id = text(),
            FieldName::TriggerHeight => self.trigger_height = text(),
            FieldName::Id => self.id = text(),
            FieldName::EventFilename => self.event_file = text(),
            FieldName::EventChannel => self.event_channel = Some(decode_channel(value)?),
            FieldName::FaultChannel => {
                self.fault_channel = Some(decode_channel(value).map_err(|_| {
                    invalid(FieldName::FaultChannel, value, "not a number")
                })?)
            },
            FieldName::OpStatus => self.status = DeviceStatus::decode(value),
            _ => {},
        }
        Ok(())
    }
}

/// Event file name derived from a device name
fn default_event_file(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{stem}.event")
}

/// A configured detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub name: String,
    pub provider_name: String,
    pub resource_type: String,
    pub center_id: String,
    pub id: String,
    pub trigger_height: String,
    pub event_channel: Option<u8>,
    pub fault_channel: Option<u8>,
    /// Where the last event is persisted
    pub event_file: PathBuf,
    pub status: DeviceStatus,
}

impl Device {
    /// Borrowed view for message formatting
    pub fn report(&self, reading: Option<Timestamp>) -> DeviceReport<'_> {
        DeviceReport {
            provider_name: &self.provider_name,
            resource_type: &self.resource_type,
            center_id: &self.center_id,
            id: &self.id,
            trigger_height: &self.trigger_height,
            op_status: self.status.as_str(),
            reading,
        }
    }

    pub fn is_event_channel(&self, channel: usize) -> bool {
        self.event_channel.map(usize::from) == Some(channel)
    }

    pub fn is_fault_channel(&self, channel: usize) -> bool {
        self.fault_channel.map(usize::from) == Some(channel)
    }

    /// Set the status; true if it changed
    pub fn set_status(&mut self, status: DeviceStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        info!("Device {} Status set to {}", self.name, status);
        changed
    }
}

/// Channel number -> owning device index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTable {
    slots: [Option<usize>; MAX_CHANNELS],
}

impl ChannelTable {
    /// Owning device index; `None` for empty slots and out-of-range channels
    pub fn owner(&self, channel: usize) -> Option<usize> {
        self.slots.get(channel).copied().flatten()
    }

    /// Occupied slots in channel order
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(channel, slot)| slot.map(|device| (channel, device)))
    }

    /// Point `channel` at `device`, last writer wins
    fn assign(&mut self, channel: u8, device: usize, devices: &[Device]) {
        let slot = &mut self.slots[usize::from(channel)];
        if let Some(previous) = *slot {
            if previous != device {
                warn!(
                    "both {} and {} use channel {}",
                    devices[previous].name, devices[device].name, channel
                );
            }
        }
        *slot = Some(device);
    }
}

/// One complete configuration: devices, channel table, global settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub devices: Vec<Device>,
    pub channels: ChannelTable,
    pub settings: AgentSettings,
}

/// Builds a [`Generation`] from field assignments
#[derive(Debug)]
pub struct RegistryLoader {
    home: PathBuf,
    template: DeviceDraft,
    drafts: Vec<DeviceDraft>,
    settings: AgentSettings,
}

impl RegistryLoader {
    /// Relative event file names resolve against `home`
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            template: DeviceDraft::named(DEFAULT_DEVICE_NAME),
            drafts: Vec::new(),
            settings: AgentSettings::default(),
        }
    }

    /// Discard any in-progress state
    pub fn begin_load(&mut self) {
        self.template = DeviceDraft::named(DEFAULT_DEVICE_NAME);
        self.drafts.clear();
        self.settings = AgentSettings::default();
    }

    /// Assign one field on `device` (or the default template for `None`).
    /// A rejected assignment leaves the previous value in place.
    pub fn define_field(&mut self, device: Option<&str>, key: &str, value: &str) -> Result<()> {
        let field = FieldName::parse(key)
            .ok_or_else(|| OhdSrvError::config(format!("Unknown configuration key: {key}")))?;
        debug!(device = device.unwrap_or(DEFAULT_DEVICE_NAME), key = field.key(), value, "Config value");

        // Naming a device creates it even when the key is global
        if let Some(name) = device {
            self.device_draft(name)?;
        }

        if field.is_global() {
            return self.settings.apply(field, value);
        }
        match device {
            Some(name) => self.device_draft(name)?.apply(field, value),
            None => self.template.apply(field, value),
        }
    }

    /// Find a device by name (case-insensitive) or create it
    fn device_draft(&mut self, name: &str) -> Result<&mut DeviceDraft> {
        if let Some(index) = self
            .drafts
            .iter()
            .position(|d| d.name.eq_ignore_ascii_case(name))
        {
            return Ok(&mut self.drafts[index]);
        }

        if self.drafts.len() >= MAX_DEVICES {
            let known: Vec<&str> = self.drafts.iter().map(|d| d.name.as_str()).collect();
            return Err(OhdSrvError::config(format!(
                "too many devices, maximum of {MAX_DEVICES}: cannot add {name:?} (have {known:?})"
            )));
        }

        debug!(index = self.drafts.len(), device = name, "New device");
        self.drafts.push(DeviceDraft::named(name));
        let last = self.drafts.len() - 1;
        Ok(&mut self.drafts[last])
    }

    /// Resolve every device and build the channel table
    pub fn finalize(&mut self) -> Generation {
        let mut drafts = std::mem::take(&mut self.drafts);
        if drafts.is_empty() {
            drafts.push(DeviceDraft::named(DEFAULT_DEVICE_NAME));
        }

        let template = &self.template;
        let devices: Vec<Device> = drafts
            .into_iter()
            .map(|d| {
                let pick = |own: Option<String>, fallback: &Option<String>| {
                    own.or_else(|| fallback.clone()).unwrap_or_default()
                };
                let event_file = d
                    .event_file
                    .clone()
                    .or_else(|| template.event_file.clone())
                    .unwrap_or_else(|| default_event_file(&d.name));
                Device {
                    provider_name: pick(d.provider_name, &template.provider_name),
                    resource_type: pick(d.resource_type, &template.resource_type),
                    center_id: pick(d.center_id, &template.center_id),
                    id: pick(d.id, &template.id),
                    trigger_height: pick(d.trigger_height, &template.trigger_height),
                    event_channel: d.event_channel.or(template.event_channel),
                    fault_channel: d.fault_channel.or(template.fault_channel),
                    event_file: self.home.join(event_file),
                    status: if d.status == DeviceStatus::Error {
                        template.status
                    } else {
                        d.status
                    },
                    name: d.name,
                }
            })
            .collect();

        let mut channels = ChannelTable::default();
        for (index, device) in devices.iter().enumerate() {
            match device.event_channel {
                Some(channel) => channels.assign(channel, index, &devices),
                None => warn!(device = %device.name, "No event channel configured"),
            }
            match device.fault_channel {
                Some(channel) => channels.assign(channel, index, &devices),
                None => warn!(device = %device.name, "No fault channel configured"),
            }
        }

        Generation {
            devices,
            channels,
            settings: std::mem::take(&mut self.settings),
        }
    }
}

/// Owner of the active generation
#[derive(Debug)]
pub struct Registry {
    current: Generation,
    generation_id: u64,
}

impl Registry {
    pub fn new(initial: Generation) -> Self {
        Self {
            current: initial,
            generation_id: 1,
        }
    }

    /// Replace the active generation wholesale; returns the retired one
    pub fn commit(&mut self, next: Generation) -> Generation {
        self.generation_id += 1;
        info!(
            generation = self.generation_id,
            devices = next.devices.len(),
            "Configuration committed"
        );
        std::mem::replace(&mut self.current, next)
    }

    pub fn generation_id(&self) -> u64 {
        self.generation_id
    }

    pub fn devices(&self) -> &[Device] {
        &self.current.devices
    }

    pub fn device(&self, index: usize) -> Option<&Device> {
        self.current.devices.get(index)
    }

    pub fn device_mut(&mut self, index: usize) -> Option<&mut Device> {
        self.current.devices.get_mut(index)
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.current.channels
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.current.settings
    }

    /// Log the resolved configuration
    pub fn dump_state(&self) {
        let settings = self.settings();
        info!("Configuration values (generation {})", self.generation_id);
        match settings.port {
            Some(port) => info!("Listen on port {}", port),
            None => info!("Listen port not configured"),
        }
        info!("Our refId starts at {}", settings.ref_id_base);
        info!("Our icdVersion is {:?}", settings.icd_version);
        info!(
            "Polling delay is {} microseconds",
            settings.polling_delay.as_micros()
        );
        info!("Log file limit is {} bytes", settings.log_file_limit);

        for (index, d) in self.devices().iter().enumerate() {
            info!(
                index,
                device = %d.name,
                center_id = %d.center_id,
                provider_name = %d.provider_name,
                resource_type = %d.resource_type,
                id = %d.id,
                trigger_height = %d.trigger_height,
                status = %d.status,
                event_file = %d.event_file.display(),
                event_channel = ?d.event_channel,
                fault_channel = ?d.fault_channel,
                "Detector device"
            );
        }

        for (channel, index) in self.channels().iter() {
            let Some(d) = self.device(index) else { continue };
            let role = if d.is_event_channel(channel) {
                "event"
            } else if d.is_fault_channel(channel) {
                "fault"
            } else {
                "invalid"
            };
            info!("Channel {}: {} ({})", channel, d.name, role);
        }
    }
}
