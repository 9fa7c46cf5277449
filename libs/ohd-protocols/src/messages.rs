//! CVM message shapes
//!
//! Inbound: `retrieveDataReq`. Outbound: `retrieveDataResp` (one
//! `overheightData` block per device) and the unsolicited
//! `overheightUpdateMsg` (one device).
//!
//! Device identity text comes from local configuration and is escaped.
//! `refId`/`icdVersion` received from the peer are echoed in wire form, since
//! the parser never decodes entities.

use std::fmt::Write;

use crate::timestamp::Timestamp;
use crate::xml::XmlElement;

const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// refId / icdVersion pair carried at the top of every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader<'a> {
    pub ref_id: &'a str,
    pub icd_version: &'a str,
}

/// Everything reported about one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceReport<'a> {
    pub provider_name: &'a str,
    pub resource_type: &'a str,
    pub center_id: &'a str,
    pub id: &'a str,
    pub trigger_height: &'a str,
    /// Wire form: Active, Error, Failed or OutofService
    pub op_status: &'a str,
    /// Last persisted event; `None` leaves the reading block empty
    pub reading: Option<Timestamp>,
}

/// A dispatchable `retrieveDataReq`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrieveDataRequest {
    pub ref_id: Option<String>,
    pub icd_version: Option<String>,
}

impl RetrieveDataRequest {
    /// Accept only `<retrieveDataReq>` whose `overheightData` is `true`
    /// (both case-insensitive). Any other document yields `None`.
    pub fn from_document(root: &XmlElement) -> Option<Self> {
        if !root.tag_is("retrieveDataReq") {
            return None;
        }
        let wanted = root.value("overheightData")?;
        if !wanted.eq_ignore_ascii_case("true") {
            return None;
        }
        Some(Self {
            ref_id: root.value("refId").map(str::to_string),
            icd_version: root.value("icdVersion").map(str::to_string),
        })
    }
}

/// Escape the five XML special characters
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn push_header(out: &mut String, header: &MessageHeader<'_>) {
    let _ = write!(
        out,
        "<refId>{}</refId><icdVersion>{}</icdVersion>",
        header.ref_id, header.icd_version
    );
}

/// `<id ...>ID</id><overheight>...</overheight>`
fn push_device_body(out: &mut String, device: &DeviceReport<'_>) {
    let _ = write!(
        out,
        "<id providerName=\"{}\" resourceType=\"{}\" centerId=\"{}\">{}</id><overheight>",
        escape(device.provider_name),
        escape(device.resource_type),
        escape(device.center_id),
        escape(device.id),
    );
    if let Some(reading) = device.reading {
        let _ = write!(
            out,
            "<overheightReadingData><readingTime>{}</readingTime>\
             <readingDate>{}</readingDate>\
             <triggerHeight units=\"in\">{}</triggerHeight></overheightReadingData>",
            reading.reading_time(),
            reading.reading_date(),
            escape(device.trigger_height),
        );
    }
    let _ = write!(
        out,
        "<overheightStatus><opStatus>{}</opStatus></overheightStatus></overheight>",
        device.op_status
    );
}

/// Answer to a `retrieveDataReq`, listing every device in registry order
pub fn retrieve_data_response(header: &MessageHeader<'_>, devices: &[DeviceReport<'_>]) -> String {
    let mut out = String::with_capacity(256 + devices.len() * 512);
    let _ = write!(out, "<retrieveDataResp xmlns:xsi=\"{XSI_NAMESPACE}\">");
    push_header(&mut out, header);
    out.push_str("<data xsi:type=\"retrieveData\">");
    for device in devices {
        out.push_str("<overheightData>");
        push_device_body(&mut out, device);
        out.push_str("</overheightData>");
    }
    out.push_str("</data></retrieveDataResp>");
    out
}

/// Unsolicited status/event notification for one device
pub fn overheight_update(header: &MessageHeader<'_>, device: &DeviceReport<'_>) -> String {
    let mut out = String::with_capacity(512);
    out.push_str("<overheightUpdateMsg>");
    push_header(&mut out, header);
    push_device_body(&mut out, device);
    out.push_str("</overheightUpdateMsg>");
    out
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn report(reading: Option<Timestamp>) -> DeviceReport<'static> {
        DeviceReport {
            provider_name: "ACME",
            resource_type: "ohd",
            center_id: "C1",
            id: "D1",
            trigger_height: "162",
            op_status: "Active",
            reading,
        }
    }

    fn ts() -> Timestamp {
        Timestamp {
            year: 2024,
            month: 6,
            day: 1,
            hour: 14,
            minute: 3,
            second: 9,
        }
    }

    #[test]
    fn test_request_filter() {
        let ok = XmlElement::parse(
            "<RetrieveDataReq><refId>5</refId><icdVersion>1.0</icdVersion>\
             <overheightData>True</overheightData></RetrieveDataReq>",
        )
        .unwrap();
        let req = RetrieveDataRequest::from_document(&ok).unwrap();
        assert_eq!(req.ref_id.as_deref(), Some("5"));
        assert_eq!(req.icd_version.as_deref(), Some("1.0"));

        for doc in [
            "<retrieveDataReq><overheightData>false</overheightData></retrieveDataReq>",
            "<retrieveDataReq><refId>5</refId></retrieveDataReq>",
            "<other><overheightData>TRUE</overheightData></other>",
        ] {
            let root = XmlElement::parse(doc).unwrap();
            assert!(RetrieveDataRequest::from_document(&root).is_none(), "{doc}");
        }
    }

    #[test]
    fn test_response_shape() {
        let header = MessageHeader {
            ref_id: "5",
            icd_version: "1.0",
        };
        let xml = retrieve_data_response(&header, &[report(Some(ts())), report(None)]);

        assert!(xml.starts_with(
            "<retrieveDataResp xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">\
             <refId>5</refId><icdVersion>1.0</icdVersion><data xsi:type=\"retrieveData\">"
        ));
        assert!(xml.ends_with("</data></retrieveDataResp>"));
        assert_eq!(xml.matches("<overheightData>").count(), 2);
        assert_eq!(xml.matches("<overheightReadingData>").count(), 1);
        assert!(xml.contains("<readingTime>14:03:09</readingTime>"));
        assert!(xml.contains("<readingDate>2024-06-01</readingDate>"));
        assert!(xml.contains("<triggerHeight units=\"in\">162</triggerHeight>"));

        // Our own output parses back with the restricted parser
        let root = XmlElement::parse(&xml).unwrap();
        assert_eq!(root.value("refId"), Some("5"));
        let data = root.child("data").unwrap();
        assert_eq!(data.children().len(), 2);
        let first = data.children()[0].child("overheight").unwrap();
        assert_eq!(
            first.child("overheightStatus").and_then(|s| s.value("opStatus")),
            Some("Active")
        );
    }

    #[test]
    fn test_update_shape() {
        let header = MessageHeader {
            ref_id: "42",
            icd_version: "",
        };
        let xml = overheight_update(&header, &report(Some(ts())));
        assert_eq!(
            xml,
            "<overheightUpdateMsg><refId>42</refId><icdVersion></icdVersion>\
             <id providerName=\"ACME\" resourceType=\"ohd\" centerId=\"C1\">D1</id>\
             <overheight><overheightReadingData><readingTime>14:03:09</readingTime>\
             <readingDate>2024-06-01</readingDate>\
             <triggerHeight units=\"in\">162</triggerHeight></overheightReadingData>\
             <overheightStatus><opStatus>Active</opStatus></overheightStatus></overheight>\
             </overheightUpdateMsg>"
        );
    }

    #[test]
    fn test_config_text_is_escaped() {
        let device = DeviceReport {
            provider_name: "A&B \"West\"",
            id: "<x>",
            ..report(None)
        };
        let header = MessageHeader {
            ref_id: "1",
            icd_version: "1",
        };
        let xml = overheight_update(&header, &device);
        assert!(xml.contains("providerName=\"A&amp;B &quot;West&quot;\""));
        assert!(xml.contains(">&lt;x&gt;</id>"));
    }
}
