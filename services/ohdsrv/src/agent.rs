//! Agent core: turns DI edges into status changes and pushes, and answers
//! CVM requests
//!
//! Nothing here touches the network. The reactor feeds in channel changes and
//! request payloads, and gets back [`Push`] records and response documents
//! to deliver.

use std::time::Duration;

use ohd_protocols::{
    overheight_update, retrieve_data_response, DeviceReport, MessageHeader, RetrieveDataRequest,
    Timestamp, XmlElement,
};
use tracing::{debug, info, warn};

use crate::error::{OhdSrvError, Result};
use crate::poller::ChannelChange;
use crate::registry::{Generation, Registry};
use crate::store::EventStore;

/// A notification owed to the CVM for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Push {
    pub device: usize,
    /// Reading carried in the message
    pub reading: Option<Timestamp>,
}

/// Decode one inbound payload into its document tree
pub fn parse_message(payload: &[u8]) -> Result<XmlElement> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| OhdSrvError::ProtocolError(format!("message is not UTF-8: {e}")))?;
    Ok(XmlElement::parse(text)?)
}

pub struct Agent<S: EventStore> {
    registry: Registry,
    store: S,
    /// Last refId used for a push
    ref_id: u64,
    /// Current icdVersion, possibly adopted from the peer
    icd_version: String,
}

impl<S: EventStore> Agent<S> {
    pub fn new(generation: Generation, store: S) -> Self {
        let ref_id = generation.settings.ref_id_base;
        let icd_version = generation.settings.icd_version.clone();
        Self {
            registry: Registry::new(generation),
            store,
            ref_id,
            icd_version,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn icd_version(&self) -> &str {
        &self.icd_version
    }

    pub fn polling_delay(&self) -> Duration {
        self.registry.settings().polling_delay
    }

    pub fn dump_state(&self) {
        self.registry.dump_state();
        info!("Current icdVersion is {:?}, last refId {}", self.icd_version, self.ref_id);
    }

    /// Apply one channel change
    pub fn handle_change(&mut self, change: ChannelChange) -> Vec<Push> {
        let ChannelChange { channel, level } = change;
        let Some(index) = self.registry.channels().owner(channel) else {
            warn!(channel, level, "Got bogus signal on unassigned channel");
            return Vec::new();
        };

        let mut pushes = Vec::new();
        let (is_event, is_fault) = match self.registry.device(index) {
            Some(device) => (
                device.is_event_channel(channel),
                device.is_fault_channel(channel),
            ),
            None => return pushes,
        };

        if is_event {
            if level {
                pushes.push(self.record_event(index));
            } else {
                debug!(channel, "Event line released");
            }
        }

        if is_fault {
            let transition = self.registry.device_mut(index).and_then(|device| {
                let next = device.status.on_fault_level(level);
                match next {
                    Some(status) => {
                        device.set_status(status);
                    },
                    None => {
                        debug!(device = %device.name, status = %device.status, level, "Fault edge ignored")
                    },
                }
                next
            });
            if transition.is_some() {
                pushes.push(Push {
                    device: index,
                    reading: self.last_reading(index),
                });
            }
        }

        pushes
    }

    /// Persist "now" as the device's last event
    fn record_event(&mut self, index: usize) -> Push {
        let now = Timestamp::now_local();
        if let Some(device) = self.registry.device(index) {
            info!(device = %device.name, at = %now, "Overheight event");
            if let Err(e) = self.store.save(&device.event_file, &now) {
                warn!(device = %device.name, "Event not persisted: {}", e);
            }
        }
        Push {
            device: index,
            reading: Some(now),
        }
    }

    /// Stored reading for a device; storage failures read as "no reading"
    fn last_reading(&self, index: usize) -> Option<Timestamp> {
        let device = self.registry.device(index)?;
        match self.store.load(&device.event_file) {
            Ok(reading) => reading,
            Err(e) => {
                warn!(device = %device.name, "Last event unavailable: {}", e);
                None
            },
        }
    }

    /// Format a push, consuming the next refId
    pub fn update_message(&mut self, push: &Push) -> Option<String> {
        let device = self.registry.device(push.device)?;
        self.ref_id += 1;
        let ref_id = self.ref_id.to_string();
        let header = MessageHeader {
            ref_id: &ref_id,
            icd_version: &self.icd_version,
        };
        Some(overheight_update(&header, &device.report(push.reading)))
    }

    /// Answer a request payload. `None` means nothing is sent back.
    pub fn answer(&mut self, payload: &[u8]) -> Option<String> {
        let document = match parse_message(payload) {
            Ok(document) => document,
            Err(e) => {
                warn!(len = payload.len(), "Unable to parse message: {}", e);
                return None;
            },
        };

        let Some(request) = RetrieveDataRequest::from_document(&document) else {
            info!(tag = %document.tag, "Message does not require response");
            return None;
        };

        if let Some(peer_version) = request.icd_version.as_deref() {
            self.negotiate_icd_version(peer_version);
        }

        let readings: Vec<Option<Timestamp>> = (0..self.registry.devices().len())
            .map(|index| self.last_reading(index))
            .collect();
        let reports: Vec<DeviceReport<'_>> = self
            .registry
            .devices()
            .iter()
            .zip(readings)
            .map(|(device, reading)| device.report(reading))
            .collect();
        let header = MessageHeader {
            ref_id: request.ref_id.as_deref().unwrap_or(""),
            icd_version: &self.icd_version,
        };
        debug!(ref_id = header.ref_id, devices = reports.len(), "Answering retrieveDataReq");
        Some(retrieve_data_response(&header, &reports))
    }

    fn negotiate_icd_version(&mut self, peer_version: &str) {
        if peer_version.eq_ignore_ascii_case(&self.icd_version) {
            return;
        }
        info!(
            old = %self.icd_version,
            new = %peer_version,
            "Adopting icdVersion from CVM"
        );
        self.icd_version = peer_version.to_string();
    }

    /// Record an event on `device` as if its event line had fired
    pub fn simulate_event(&mut self, device: usize) -> Result<Push> {
        self.check_index(device)?;
        Ok(self.record_event(device))
    }

    /// Flip a device between Failed and Active
    pub fn toggle_fail(&mut self, index: usize) -> Result<Push> {
        self.check_index(index)?;
        if let Some(device) = self.registry.device_mut(index) {
            let next = device.status.toggled_fail();
            device.set_status(next);
        }
        Ok(Push {
            device: index,
            reading: self.last_reading(index),
        })
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let count = self.registry.devices().len();
        if index >= count {
            return Err(OhdSrvError::admin(format!(
                "no device {index} (have {count})"
            )));
        }
        Ok(())
    }

    /// Swap in a freshly loaded generation.
    ///
    /// The refId counter runs for the life of the process. A configured
    /// icdVersion replaces the negotiated one only if the configured value
    /// itself changed.
    pub fn reload(&mut self, generation: Generation) {
        let old = self.registry.commit(generation);
        let new = self.registry.settings();

        if old.settings.port != new.port {
            warn!(
                old = ?old.settings.port,
                new = ?new.port,
                "PortName changed; restart required to take effect"
            );
        }
        if old.settings.icd_version != new.icd_version {
            info!(
                old = %self.icd_version,
                new = %new.icd_version,
                "icdVersion reconfigured"
            );
            self.icd_version = new.icd_version.clone();
        }
        if old.settings.ref_id_base != new.ref_id_base {
            info!(
                current = self.ref_id,
                "myRefId changed; applies from next start"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::registry::RegistryLoader;
    use crate::status::DeviceStatus;
    use crate::store::MemoryEventStore;
    use tracing_test::traced_test;

    /// Two devices: north (event 0, fault 1) and south (event 2, fault 3)
    fn generation() -> Generation {
        let mut loader = RegistryLoader::new("/tmp/ohd");
        loader.begin_load();
        loader.define_field(None, "myRefId", "100").unwrap();
        loader.define_field(None, "icdVersion", "1.0").unwrap();
        loader.define_field(None, "providerName", "ACME").unwrap();
        loader.define_field(None, "triggerHeight", "162").unwrap();
        loader.define_field(None, "opStatus", "Active").unwrap();
        for (name, event, fault) in [("north", "0", "1"), ("south", "2", "3")] {
            loader.define_field(Some(name), "id", name).unwrap();
            loader.define_field(Some(name), "EventChannel", event).unwrap();
            loader.define_field(Some(name), "FaultChannel", fault).unwrap();
        }
        loader.finalize()
    }

    fn agent() -> Agent<MemoryEventStore> {
        Agent::new(generation(), MemoryEventStore::new())
    }

    fn change(channel: usize, level: bool) -> ChannelChange {
        ChannelChange { channel, level }
    }

    #[test]
    fn test_event_rising_edge_persists_and_pushes() {
        let mut agent = agent();
        let pushes = agent.handle_change(change(2, true));

        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].device, 1);
        let stored = agent
            .store()
            .load(&agent.registry().devices()[1].event_file)
            .unwrap();
        assert_eq!(stored, pushes[0].reading);

        // Falling edge is not an event
        assert!(agent.handle_change(change(2, false)).is_empty());
    }

    #[test]
    fn test_fault_edges_drive_status() {
        let mut agent = agent();
        let pushes = agent.handle_change(change(1, true));
        assert_eq!(pushes, vec![Push { device: 0, reading: None }]);
        assert_eq!(agent.registry().devices()[0].status, DeviceStatus::Failed);

        let pushes = agent.handle_change(change(1, false));
        assert_eq!(pushes.len(), 1);
        assert_eq!(agent.registry().devices()[0].status, DeviceStatus::Active);

        // Already active: no transition, no push
        assert!(agent.handle_change(change(1, false)).is_empty());
    }

    #[test]
    fn test_status_push_carries_stored_reading() {
        let mut agent = agent();
        let event = agent.handle_change(change(0, true));
        let status = agent.handle_change(change(1, true));
        assert_eq!(status[0].reading, event[0].reading);
    }

    #[test]
    fn test_out_of_service_ignores_faults() {
        let mut loader = RegistryLoader::new("/tmp/ohd");
        loader.begin_load();
        loader.define_field(Some("x"), "FaultChannel", "4").unwrap();
        loader.define_field(Some("x"), "opStatus", "OutofService").unwrap();
        let mut agent = Agent::new(loader.finalize(), MemoryEventStore::new());

        assert!(agent.handle_change(change(4, true)).is_empty());
        assert!(agent.handle_change(change(4, false)).is_empty());
        assert_eq!(
            agent.registry().devices()[0].status,
            DeviceStatus::OutOfService
        );
    }

    #[test]
    #[traced_test]
    fn test_stray_bit_is_logged() {
        let mut agent = agent();
        assert!(agent.handle_change(change(6, true)).is_empty());
        assert!(logs_contain("bogus signal"));
    }

    #[test]
    fn test_push_ref_ids_increase() {
        let mut agent = agent();
        let push = agent.simulate_event(0).unwrap();
        let first = agent.update_message(&push).unwrap();
        let second = agent.update_message(&push).unwrap();

        assert!(first.starts_with("<overheightUpdateMsg><refId>101</refId><icdVersion>1.0</icdVersion>"));
        assert!(second.contains("<refId>102</refId>"));
        assert!(first.contains("<opStatus>Active</opStatus>"));
        assert!(first.contains("<triggerHeight units=\"in\">162</triggerHeight>"));
    }

    #[test]
    fn test_answer_echoes_ref_id_and_lists_devices() {
        let mut agent = agent();
        let response = agent
            .answer(b"<retrieveDataReq><refId>5</refId><icdVersion>1.0</icdVersion><overheightData>TRUE</overheightData></retrieveDataReq>")
            .unwrap();

        assert!(response.contains("<refId>5</refId>"));
        assert_eq!(response.matches("<overheightData>").count(), 2);
        assert!(response.contains(">north</id>"));
        assert!(response.contains(">south</id>"));
        // No events yet: no reading block
        assert!(!response.contains("overheightReadingData"));
    }

    #[test]
    #[traced_test]
    fn test_answer_adopts_peer_icd_version() {
        let mut agent = agent();
        let response = agent
            .answer(b"<retrieveDataReq><refId>1</refId><icdVersion>2.0</icdVersion><overheightData>true</overheightData></retrieveDataReq>")
            .unwrap();
        assert!(response.contains("<icdVersion>2.0</icdVersion>"));
        assert_eq!(agent.icd_version(), "2.0");
        assert!(logs_contain("Adopting icdVersion"));

        // Missing icdVersion leaves it alone
        agent
            .answer(b"<retrieveDataReq><overheightData>true</overheightData></retrieveDataReq>")
            .unwrap();
        assert_eq!(agent.icd_version(), "2.0");
    }

    #[test]
    fn test_answer_ignores_other_documents() {
        let mut agent = agent();
        assert!(agent.answer(b"").is_none());
        assert!(agent.answer(b"<retrieveDataReq>").is_none());
        assert!(agent.answer(&[0xff, 0xfe]).is_none());
        assert!(agent
            .answer(b"<retrieveDataReq><overheightData>false</overheightData></retrieveDataReq>")
            .is_none());
        assert!(agent.answer(b"<heartbeat><refId>1</refId></heartbeat>").is_none());
    }

    #[test]
    fn test_toggle_fail_and_bad_index() {
        let mut agent = agent();
        agent.toggle_fail(1).unwrap();
        assert_eq!(agent.registry().devices()[1].status, DeviceStatus::Failed);
        agent.toggle_fail(1).unwrap();
        assert_eq!(agent.registry().devices()[1].status, DeviceStatus::Active);

        assert!(matches!(
            agent.toggle_fail(2),
            Err(OhdSrvError::AdminError(_))
        ));
        assert!(agent.simulate_event(9).is_err());
    }

    #[test]
    fn test_reload_keeps_counter_and_negotiated_version() {
        let mut agent = agent();
        let push = agent.simulate_event(0).unwrap();
        agent.update_message(&push).unwrap();
        agent.answer(b"<retrieveDataReq><icdVersion>3.1</icdVersion><overheightData>true</overheightData></retrieveDataReq>");

        agent.reload(generation());
        assert_eq!(agent.icd_version(), "3.1");
        let message = agent.update_message(&push).unwrap();
        assert!(message.contains("<refId>102</refId>"));
        assert_eq!(agent.registry().generation_id(), 2);
    }

    /// Store whose disk is gone
    struct BrokenStore;

    impl EventStore for BrokenStore {
        fn load(&self, path: &std::path::Path) -> Result<Option<Timestamp>> {
            Err(OhdSrvError::PersistenceError(format!("Cannot read {}", path.display())))
        }

        fn save(&self, path: &std::path::Path, _timestamp: &Timestamp) -> Result<()> {
            Err(OhdSrvError::PersistenceError(format!("Cannot write {}", path.display())))
        }
    }

    #[test]
    #[traced_test]
    fn test_store_failures_read_as_no_reading() {
        let mut agent = Agent::new(generation(), BrokenStore);

        // The event still goes out with the time it happened
        let pushes = agent.handle_change(change(0, true));
        assert_eq!(pushes.len(), 1);
        assert!(pushes[0].reading.is_some());
        assert!(logs_contain("Event not persisted"));

        let pushes = agent.handle_change(change(1, true));
        assert_eq!(pushes, vec![Push { device: 0, reading: None }]);
        assert!(logs_contain("Last event unavailable"));

        let request = b"<retrieveDataReq><refId>3</refId>\
            <overheightData>true</overheightData></retrieveDataReq>";
        let response = agent.answer(request).unwrap();
        assert!(response.contains("<refId>3</refId>"));
        assert!(!response.contains("overheightReadingData"));
    }

    #[test]
    fn test_parse_message_classifies_bad_payloads() {
        assert!(matches!(
            parse_message(&[0xff, 0xfe, b'<']),
            Err(OhdSrvError::ProtocolError(ref m)) if m.contains("UTF-8")
        ));
        assert!(matches!(
            parse_message(b"<retrieveDataReq><refId>"),
            Err(OhdSrvError::ProtocolError(_))
        ));
        assert_eq!(parse_message(b"<a><b>1</b></a>").unwrap().tag, "a");
    }
}
