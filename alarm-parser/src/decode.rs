//! Turns a raw request body into a [`Notification`].
//!
//! Routing is by content type only, using case-insensitive substring checks
//! because firmware sends inconsistent casing and parameters:
//!
//! - contains `multipart/form-data`: split into parts; the last `.xml` file
//!   part becomes the event, every other file part becomes an
//!   [`AttachedResource`]
//! - contains `xml`: the whole body is the alarm XML
//! - anything else: nothing is produced, which is not an error

use crate::error::DecodeResult;
use crate::event::{resolve_device_address, AlarmEvent, AttachedResource, Notification};
use crate::multipart::{read_parts, FormPart};
use crate::xml::AlarmDocument;
use bytes::Bytes;
use tracing::{debug, warn};

/// Field paths consumed from the alarm document.
pub mod fields {
    pub const IP_ADDRESS: &str = "ipAddress";
    pub const IPV4_ADDRESS: &str = "ipV4Address";
    pub const IPV6_ADDRESS: &str = "ipv6Address";
    pub const PORT_NO: &str = "portNo";
    pub const PROTOCOL: &str = "protocol";
    pub const MAC_ADDRESS: &str = "macAddress";
    pub const CHANNEL_ID: &str = "channelID";
    pub const CHANNEL_NAME: &str = "channelName";
    pub const DATE_TIME: &str = "dateTime";
    pub const EVENT_TYPE: &str = "eventType";
    pub const EVENT_STATE: &str = "eventState";
    pub const EVENT_DESCRIPTION: &str = "eventDescription";
    pub const ACTIVE_POST_COUNT: &str = "activePostCount";
    pub const ALARM_TYPE: &str = "AudioExceptionDetection/alarmType";
    pub const RESOURCES_CONTENT_TYPE: &str = "ResourcesName/resourcesContentType";
    pub const RESOURCES_CONTENT: &str = "ResourcesName/resourcesContent";
    pub const RESOURCES_FORMAT_TYPE: &str = "ResourcesName/resourcesFormatType";
    pub const PICTURE_HEIGHT: &str = "ResourcesName/pictureResolution/height";
    pub const PICTURE_WIDTH: &str = "ResourcesName/pictureResolution/width";
}

/// How a request body will be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Multipart,
    Xml,
    Unrecognized,
}

/// Classify a `Content-Type` header value.
pub fn classify(content_type: &str) -> PayloadKind {
    let lowered = content_type.to_ascii_lowercase();
    if lowered.contains("multipart/form-data") {
        PayloadKind::Multipart
    } else if lowered.contains("xml") {
        PayloadKind::Xml
    } else {
        PayloadKind::Unrecognized
    }
}

/// Decode one pushed request body.
pub async fn decode(content_type: &str, body: Bytes) -> DecodeResult<Notification> {
    match classify(content_type) {
        PayloadKind::Multipart => decode_multipart(content_type, body).await,
        PayloadKind::Xml => {
            let text = String::from_utf8_lossy(&body);
            let event = decode_xml(&text)?;
            Ok(Notification {
                event: Some(event),
                resources: Vec::new(),
            })
        }
        PayloadKind::Unrecognized => {
            warn!(content_type, "Unrecognized Content-Type, no alarm decoded");
            Ok(Notification::empty())
        }
    }
}

async fn decode_multipart(content_type: &str, body: Bytes) -> DecodeResult<Notification> {
    let parts = read_parts(content_type, body).await?;

    let mut xml_text = None;
    let mut resources = Vec::new();

    for part in parts {
        let is_xml = part.is_xml_file();
        match part {
            FormPart::File {
                file_name,
                content_type,
                data,
                ..
            } => {
                debug!(file_name = %file_name, size = data.len(), "Received file part");
                if is_xml {
                    // Last XML part wins
                    xml_text = Some(String::from_utf8_lossy(&data).into_owned());
                } else {
                    resources.push(AttachedResource {
                        file_name,
                        content_type,
                        data,
                    });
                }
            }
            FormPart::Field { name, value } => {
                debug!(field = %name, value = %value, "Received form field");
            }
        }
    }

    let event = xml_text.as_deref().map(decode_xml).transpose()?;
    Ok(Notification { event, resources })
}

/// Decode the alarm XML into an [`AlarmEvent`].
///
/// Only unparsable XML fails; every missing field becomes an empty string.
pub fn decode_xml(text: &str) -> DecodeResult<AlarmEvent> {
    let document = AlarmDocument::parse(text)?;
    let field = |path: &str| document.text(path);

    let ip_address = field(fields::IP_ADDRESS);
    let ipv4_address = field(fields::IPV4_ADDRESS);
    let ipv6_address = field(fields::IPV6_ADDRESS);
    let device_address = resolve_device_address(
        &[ip_address.as_str(), ipv4_address.as_str(), ipv6_address.as_str()],
        &field(fields::PORT_NO),
    );

    let event = AlarmEvent {
        event_type: field(fields::EVENT_TYPE),
        event_state: field(fields::EVENT_STATE),
        event_description: field(fields::EVENT_DESCRIPTION),
        date_time: field(fields::DATE_TIME),
        channel_id: field(fields::CHANNEL_ID),
        channel_name: field(fields::CHANNEL_NAME),
        device_address,
        mac_address: field(fields::MAC_ADDRESS),
        protocol: field(fields::PROTOCOL),
        active_post_count: field(fields::ACTIVE_POST_COUNT),
        alarm_sub_type: field(fields::ALARM_TYPE),
        resource_content_type: field(fields::RESOURCES_CONTENT_TYPE),
        resource_content: field(fields::RESOURCES_CONTENT),
        resource_format_type: field(fields::RESOURCES_FORMAT_TYPE),
        resource_width: field(fields::PICTURE_WIDTH),
        resource_height: field(fields::PICTURE_HEIGHT),
        raw_payload: text.to_string(),
    };

    debug!(
        event_type = %event.event_type,
        event_state = %event.event_state,
        channel = %event.channel_id,
        device = %event.device_address,
        post_count = %event.active_post_count,
        "Decoded alarm"
    );

    Ok(event)
}
