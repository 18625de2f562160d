//! Per-request handling: method check, bounded body read, decode, publish,
//! acknowledge.
//!
//! The device protocol has no negative acknowledgement and answering with an
//! error status makes the camera redeliver aggressively, so every POST is
//! answered `200 OK` whether or not it decoded. `500 ERROR` is reserved for
//! faults inside the dispatcher itself.

use crate::sink::EventSink;
use crate::stats::DispatchStats;
use alarm_parser::Notification;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{FutureExt, Stream, StreamExt};
use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use warp::http::{header, HeaderMap, Method, StatusCode};
use warp::reply::Response;
use warp::{Filter, Reply};

/// Body of every acknowledgement.
pub const ACK_BODY: &str = "OK";
/// Body of the internal-fault response.
pub const ERROR_BODY: &str = "ERROR";

#[derive(Debug)]
enum BodyError {
    Oversized { received: usize },
    Read(warp::Error),
}

/// Shared state for handling requests of one listener.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    sink: EventSink,
    stats: Arc<DispatchStats>,
    max_body_bytes: usize,
}

impl Dispatcher {
    pub(crate) fn new(sink: EventSink, stats: Arc<DispatchStats>, max_body_bytes: usize) -> Self {
        Self {
            sink,
            stats,
            max_body_bytes,
        }
    }

    /// The warp filter serving every path.
    pub(crate) fn routes(
        &self,
    ) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone + Send + Sync + 'static {
        let dispatcher = self.clone();
        warp::method()
            .and(warp::path::full())
            .and(warp::header::headers_cloned())
            .and(warp::body::stream())
            .then(move |method: Method, path: warp::path::FullPath, headers: HeaderMap, body| {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.handle(method, path.as_str(), &headers, body).await }
            })
            .recover(handle_rejection)
    }

    async fn handle<S, B>(&self, method: Method, path: &str, headers: &HeaderMap, body: S) -> Response
    where
        S: Stream<Item = Result<B, warp::Error>> + Send,
        B: Buf,
    {
        self.stats.record_request();

        if method != Method::POST {
            self.stats.record_rejected_method();
            info!(%method, path, "Rejecting non-POST request");
            return reply(StatusCode::METHOD_NOT_ALLOWED, "");
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .unwrap_or_default();
        info!(path, content_type = %content_type, "Received alarm push");

        let declared_len = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<usize>().ok());
        if let Some(declared) = declared_len {
            if declared > self.max_body_bytes {
                warn!(declared, limit = self.max_body_bytes, "Declared body exceeds limit; draining without decoding");
            }
        }

        let body = match read_body(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(BodyError::Oversized { received }) => {
                self.stats.record_oversized();
                warn!(received, limit = self.max_body_bytes, "Alarm body too large, acknowledged without decoding");
                return ack();
            }
            Err(BodyError::Read(e)) => {
                self.stats.record_internal_error();
                error!(error = %e, "Failed to read alarm body");
                return reply(StatusCode::INTERNAL_SERVER_ERROR, ERROR_BODY);
            }
        };
        debug!(size = body.len(), "Alarm body received");

        let decoded = AssertUnwindSafe(alarm_parser::decode(&content_type, body))
            .catch_unwind()
            .await;

        match decoded {
            Ok(Ok(notification)) => self.publish(notification),
            Ok(Err(e)) => {
                self.stats.record_decode_failure();
                warn!(error = %e, content_type = %content_type, "Failed to decode alarm payload");
            }
            Err(_) => {
                self.stats.record_internal_error();
                error!("Alarm decoder panicked");
                return reply(StatusCode::INTERNAL_SERVER_ERROR, ERROR_BODY);
            }
        }

        ack()
    }

    fn publish(&self, notification: Notification) {
        if notification.is_empty() {
            self.stats.record_ignored();
            return;
        }

        if let Some(event) = notification.event {
            info!(
                event_type = %event.event_type,
                event_state = %event.event_state,
                channel = %event.channel_id,
                device = %event.device_address,
                sub_type = %event.alarm_sub_type,
                "Alarm received"
            );
            self.stats.record_event();
            self.sink.publish_event(event);
        }

        self.stats.record_resources(notification.resources.len());
        for resource in notification.resources {
            info!(file_name = %resource.file_name, size = resource.len(), "Attachment received");
            self.sink.publish_resource(resource);
        }
    }
}

/// Buffer the body up to `limit` bytes. Past the limit the rest is read and
/// discarded so the client still gets its acknowledgement.
async fn read_body<S, B>(body: S, limit: usize) -> Result<Bytes, BodyError>
where
    S: Stream<Item = Result<B, warp::Error>>,
    B: Buf,
{
    futures::pin_mut!(body);

    let mut buffer = BytesMut::new();
    let mut received = 0usize;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(BodyError::Read)?;
        received += chunk.remaining();
        if received <= limit {
            buffer.put(chunk);
        }
    }

    if received > limit {
        return Err(BodyError::Oversized { received });
    }
    Ok(buffer.freeze())
}

fn reply(status: StatusCode, body: &'static str) -> Response {
    warp::reply::with_status(body, status).into_response()
}

fn ack() -> Response {
    reply(StatusCode::OK, ACK_BODY)
}

/// Any rejection reaching this point is a dispatcher defect.
async fn handle_rejection(err: warp::Rejection) -> Result<Response, Infallible> {
    error!(rejection = ?err, "Unhandled rejection in alarm dispatcher");
    Ok(reply(StatusCode::INTERNAL_SERVER_ERROR, ERROR_BODY))
}
