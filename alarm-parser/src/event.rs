//! Normalized alarm event model.
//!
//! Every field of [`AlarmEvent`] is a plain string. An empty string means the
//! field was absent from the pushed payload; it is never an error. Values are
//! passed through exactly as the device sent them (timestamps included) so
//! that nothing is lost to reformatting.

use bytes::Bytes;
use serde::Serialize;
use std::net::Ipv4Addr;

/// One alarm notification pushed by the camera.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    pub event_type: String,
    pub event_state: String,
    pub event_description: String,
    /// Vendor formatted timestamp, unparsed
    pub date_time: String,
    pub channel_id: String,
    pub channel_name: String,
    /// `address` or `address:port`, see [`resolve_device_address`]
    pub device_address: String,
    pub mac_address: String,
    /// Transport the device reports for its own push (`HTTP`, `HTTPS`)
    pub protocol: String,
    /// Incremented by the device each time it redelivers the same alarm
    pub active_post_count: String,
    /// Sub-classification, e.g. the audio exception kind
    pub alarm_sub_type: String,
    pub resource_content_type: String,
    pub resource_content: String,
    pub resource_format_type: String,
    pub resource_width: String,
    pub resource_height: String,
    /// The XML text the event was decoded from
    pub raw_payload: String,
}

impl AlarmEvent {
    /// Picture resolution as `(width, height)` when both fields are numeric.
    pub fn picture_resolution(&self) -> Option<(u32, u32)> {
        let width = self.resource_width.trim().parse().ok()?;
        let height = self.resource_height.trim().parse().ok()?;
        Some((width, height))
    }

    /// Redelivery counter as a number, if the device sent one.
    pub fn post_count(&self) -> Option<u32> {
        self.active_post_count.trim().parse().ok()
    }
}

/// A binary file part that arrived alongside the alarm XML (typically a JPEG
/// snapshot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedResource {
    pub file_name: String,
    /// Content type declared on the part, if any
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl AttachedResource {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True for parts that declare an `image/*` type or carry a common image
    /// file extension.
    pub fn is_image(&self) -> bool {
        if let Some(content_type) = &self.content_type {
            if content_type.to_ascii_lowercase().starts_with("image/") {
                return true;
            }
        }
        let name = self.file_name.to_ascii_lowercase();
        [".jpg", ".jpeg", ".png", ".bmp"]
            .iter()
            .any(|ext| name.ends_with(ext))
    }
}

/// Everything decoded from one inbound request.
///
/// `event` is `None` when the payload carried no alarm XML (unknown content
/// type, or a multipart body without an `.xml` file part).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Notification {
    pub event: Option<AlarmEvent>,
    pub resources: Vec<AttachedResource>,
}

impl Notification {
    /// A notification that produced nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.event.is_none() && self.resources.is_empty()
    }
}

/// Combine the address fields of a payload into one `deviceAddress`.
///
/// The first candidate holding an IPv4 literal wins, otherwise the first
/// non-empty one. A non-empty port is appended; IPv6 literals are bracketed
/// when a port follows. No address means no `deviceAddress`, port or not.
pub fn resolve_device_address(candidates: &[&str], port: &str) -> String {
    let candidates: Vec<&str> = candidates
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();

    let address = candidates
        .iter()
        .find(|c| c.parse::<Ipv4Addr>().is_ok())
        .or_else(|| candidates.first())
        .copied()
        .unwrap_or_default();

    let port = port.trim();
    if address.is_empty() || port.is_empty() {
        return address.to_string();
    }

    if address.contains(':') {
        format!("[{address}]:{port}")
    } else {
        format!("{address}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_prefers_ipv4() {
        assert_eq!(
            resolve_device_address(&["fe80::1", "192.168.1.64", ""], "80"),
            "192.168.1.64:80"
        );
        assert_eq!(
            resolve_device_address(&["", "10.0.0.5", "fe80::1"], ""),
            "10.0.0.5"
        );
    }

    #[test]
    fn test_resolve_falls_back_to_ipv6() {
        assert_eq!(resolve_device_address(&["", "", "fe80::1"], "8080"), "[fe80::1]:8080");
        assert_eq!(resolve_device_address(&["fe80::1"], ""), "fe80::1");
    }

    #[test]
    fn test_resolve_without_address() {
        assert_eq!(resolve_device_address(&["", ""], "8080"), "");
        assert_eq!(resolve_device_address(&[], ""), "");
    }

    #[test]
    fn test_picture_resolution() {
        let event = AlarmEvent {
            resource_width: "1920".to_string(),
            resource_height: " 1080 ".to_string(),
            ..Default::default()
        };
        assert_eq!(event.picture_resolution(), Some((1920, 1080)));

        let event = AlarmEvent {
            resource_width: "1920".to_string(),
            ..Default::default()
        };
        assert_eq!(event.picture_resolution(), None);
    }

    #[test]
    fn test_attached_resource_is_image() {
        let jpeg = AttachedResource {
            file_name: "snapshot.JPG".to_string(),
            content_type: None,
            data: Bytes::from_static(b"\xff\xd8\xff"),
        };
        assert!(jpeg.is_image());
        assert_eq!(jpeg.len(), 3);

        let typed = AttachedResource {
            file_name: "blob".to_string(),
            content_type: Some("image/jpeg".to_string()),
            data: Bytes::new(),
        };
        assert!(typed.is_image());
        assert!(typed.is_empty());

        let other = AttachedResource {
            file_name: "trace.bin".to_string(),
            content_type: Some("application/octet-stream".to_string()),
            data: Bytes::from_static(b"x"),
        };
        assert!(!other.is_image());
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let event = AlarmEvent {
            event_type: "videoloss".to_string(),
            channel_id: "1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["eventType"], "videoloss");
        assert_eq!(json["channelId"], "1");
        assert_eq!(json["macAddress"], "");
    }
}
