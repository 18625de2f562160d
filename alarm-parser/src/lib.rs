//! # alarm-parser
//!
//! Decoding of alarm notifications pushed by Hikvision acoustic imaging
//! cameras over HTTP. The camera posts either a bare XML document or a
//! `multipart/form-data` body bundling the XML with snapshot images; this
//! crate turns both shapes into one [`AlarmEvent`] plus zero or more
//! [`AttachedResource`]s.
//!
//! ## Usage
//!
//! ```rust
//! # #[tokio::main]
//! # async fn main() {
//! use alarm_parser::{decode, Notification};
//! use bytes::Bytes;
//!
//! let body = Bytes::from_static(
//!     br#"<EventNotificationAlert xmlns="http://www.hikvision.com/ver20/XMLSchema"><eventType>audioexception</eventType></EventNotificationAlert>"#,
//! );
//! let notification: Notification = decode("application/xml", body).await.unwrap();
//! assert_eq!(notification.event.unwrap().event_type, "audioexception");
//! # }
//! ```
//!
//! Decoding is permissive: missing fields come back as empty strings and
//! only unparsable XML or a broken multipart body is an error.

pub mod decode;
pub mod error;
pub mod event;
pub mod multipart;
pub mod xml;

pub use decode::{classify, decode, decode_xml, PayloadKind};
pub use error::{DecodeError, DecodeResult};
pub use event::{resolve_device_address, AlarmEvent, AttachedResource, Notification};
pub use multipart::FormPart;
pub use xml::AlarmDocument;
