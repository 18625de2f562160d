//! HTTP listener for alarm pushes from Hikvision acoustic imaging cameras.
//!
//! The camera is configured (see the `isapi-client` crate) to POST each alarm
//! to a local endpoint. This crate owns that endpoint.
//!
//! # Overview
//!
//! - [`AlarmServer`]: binds a [`ListenerConfig`], runs the accept loop and
//!   serves every connection on its own task. `start`/`stop` drive the
//!   [`ListenerState`] machine.
//! - The dispatcher behind it accepts only `POST`, reads the body up to
//!   [`ServerOptions::max_body_bytes`], decodes it with `alarm_parser` and
//!   answers `200 OK` whether or not the payload was understood.
//! - [`EventSink`]: fire-and-forget fan-out of decoded alarms and attached
//!   images to [`AlarmObserver`]s, in the order they were received.
//!
//! # Example
//!
//! ```no_run
//! use alarm_server::{AlarmServer, EventSink, ListenerConfig, ServerOptions, SinkItem};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sink = EventSink::new();
//!     let (_id, mut items) = sink.subscribe().await;
//!
//!     let server = AlarmServer::new(sink, ServerOptions::default());
//!     server.start("http://+:8080/".parse()?).await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(item) = items.recv().await {
//!             match item {
//!                 SinkItem::Alarm(event) => println!("{} on channel {}", event.event_type, event.channel_id),
//!                 SinkItem::Resource(image) => println!("{} ({} bytes)", image.file_name, image.len()),
//!             }
//!         }
//!     });
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
mod dispatch;
pub mod error;
mod server;
pub mod sink;
pub mod stats;

pub use alarm_parser::{AlarmEvent, AttachedResource};
pub use config::{ListenerConfig, ServerOptions, DEFAULT_MAX_BODY_BYTES};
pub use dispatch::{ACK_BODY, ERROR_BODY};
pub use error::{ConfigError, Result, ServerError};
pub use server::{advertised_ip, AlarmServer, ListenerState};
pub use sink::{AlarmObserver, ChannelObserver, EventSink, ObserverId, SinkItem};
pub use stats::{DispatchStats, StatsSnapshot};
