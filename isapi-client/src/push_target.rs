//! The device's HTTP host notification entries.

use crate::error::IsapiError;
use std::net::IpAddr;
use xmltree::{Element, XMLNode};

/// XML namespace of every ISAPI document.
pub const ISAPI_NAMESPACE: &str = "http://www.hikvision.com/ver20/XMLSchema";

/// Path the device is told to POST alarms to.
pub const DEFAULT_ALARM_PATH: &str = "/alarm";

/// Where the device pushes alarms: one `HttpHostNotification` entry.
///
/// Entries written by this crate always use plain HTTP, `POST`, XML payloads
/// and no HTTP authentication, which is what the listener understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    /// Slot on the device, usually 1
    pub id: u32,
    /// IP address or host name of the listener
    pub address: String,
    pub port: u16,
    pub path: String,
    pub enabled: bool,
}

impl PushTarget {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            id: 1,
            address: address.into(),
            port,
            path: DEFAULT_ALARM_PATH.to_string(),
            enabled: true,
        }
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = id;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// URL the device will POST to.
    pub fn url(&self) -> String {
        match self.address.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("http://[{}]:{}{}", self.address, self.port, self.path),
            _ => format!("http://{}:{}{}", self.address, self.port, self.path),
        }
    }

    /// True when both entries deliver to the same place.
    pub fn same_destination(&self, other: &PushTarget) -> bool {
        self.id == other.id
            && self.enabled == other.enabled
            && self.address.eq_ignore_ascii_case(&other.address)
            && self.port == other.port
            && self.path == other.path
    }

    /// Render the `HttpHostNotification` document sent on PUT.
    pub fn to_xml(&self) -> String {
        let (addressing, address_element) = match self.address.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => ("ipaddress", "ipAddress"),
            Ok(IpAddr::V6(_)) => ("ipaddress", "ipv6Address"),
            Err(_) => ("hostname", "hostName"),
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<HttpHostNotification version="2.0" xmlns="{namespace}">
    <id>{id}</id>
    <enabled>{enabled}</enabled>
    <url>{path}</url>
    <protocolType>HTTP</protocolType>
    <method>POST</method>
    <parameterFormatType>XML</parameterFormatType>
    <addressingFormatType>{addressing}</addressingFormatType>
    <{address_element}>{address}</{address_element}>
    <portNo>{port}</portNo>
    <httpAuthenticationMethod>none</httpAuthenticationMethod>
</HttpHostNotification>"#,
            namespace = ISAPI_NAMESPACE,
            id = self.id,
            enabled = self.enabled,
            path = escape(&self.path),
            addressing = addressing,
            address_element = address_element,
            address = escape(&self.address),
            port = self.port,
        )
    }

    /// Parse an `HttpHostNotificationList` (or a single
    /// `HttpHostNotification`) document.
    ///
    /// Entries without an id, an address or a valid port are skipped; the
    /// device reports unused slots that way.
    pub fn parse_list(xml: &str) -> Result<Vec<PushTarget>, IsapiError> {
        let root = Element::parse(xml.as_bytes()).map_err(|e| IsapiError::Parse(e.to_string()))?;

        if root.name == "HttpHostNotification" {
            return Ok(Self::from_element(&root).into_iter().collect());
        }

        Ok(root
            .children
            .iter()
            .filter_map(XMLNode::as_element)
            .filter(|child| child.name == "HttpHostNotification")
            .filter_map(Self::from_element)
            .collect())
    }

    fn from_element(element: &Element) -> Option<PushTarget> {
        let text = |name: &str| {
            element
                .get_child(name)
                .and_then(|child| child.get_text())
                .map(|text| text.trim().to_string())
                .filter(|text| !text.is_empty())
        };

        let id = text("id")?.parse().ok()?;
        let address = text("ipAddress")
            .or_else(|| text("ipv6Address"))
            .or_else(|| text("hostName"))?;
        let port = text("portNo")?.parse().ok()?;

        Some(PushTarget {
            id,
            address,
            port,
            path: text("url").unwrap_or_else(|| DEFAULT_ALARM_PATH.to_string()),
            // Firmware that omits <enabled> treats the entry as active
            enabled: text("enabled").map_or(true, |value| value == "true"),
        })
    }
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
