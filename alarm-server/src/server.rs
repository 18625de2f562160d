//! Listener lifecycle: bind, accept loop, orderly stop.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use hyper::server::conn::Http;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ListenerConfig, ServerOptions};
use crate::dispatch::Dispatcher;
use crate::error::{Result, ServerError};
use crate::sink::EventSink;
use crate::stats::{DispatchStats, StatsSnapshot};

/// Pause after a failed `accept()` before trying again, e.g. when the process
/// is out of file descriptors.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Where a listener is in its lifecycle.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`. A failed bind goes
/// from `Starting` straight back to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct RunningListener {
    local_addr: SocketAddr,
    config: ListenerConfig,
    shutdown_tx: mpsc::Sender<()>,
    accept_handle: JoinHandle<()>,
}

/// HTTP listener receiving alarm pushes.
///
/// Every accepted connection is served on its own task, so a slow or faulty
/// request never holds up the accept loop or other requests. Decoded alarms go
/// to the [`EventSink`] the server was created with.
///
/// # Example
///
/// ```no_run
/// use alarm_server::{AlarmServer, EventSink, ListenerConfig, ServerOptions};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let sink = EventSink::new();
///     let (_id, mut alarms) = sink.subscribe().await;
///
///     let server = AlarmServer::new(sink, ServerOptions::default());
///     let addr = server.start(ListenerConfig::all_interfaces(8080)).await?;
///     println!("Listening on {addr}");
///
///     while let Some(item) = alarms.recv().await {
///         println!("{item:?}");
///     }
///
///     server.stop().await;
///     Ok(())
/// }
/// ```
pub struct AlarmServer {
    sink: EventSink,
    options: ServerOptions,
    stats: Arc<DispatchStats>,
    state_tx: watch::Sender<ListenerState>,
    running: Mutex<Option<RunningListener>>,
}

impl AlarmServer {
    pub fn new(sink: EventSink, options: ServerOptions) -> Self {
        let (state_tx, _) = watch::channel(ListenerState::Stopped);
        Self {
            sink,
            options,
            stats: Arc::new(DispatchStats::new()),
            state_tx,
            running: Mutex::new(None),
        }
    }

    /// Bind `config` and start accepting connections.
    ///
    /// Returns the bound address, which carries the real port when `config`
    /// asked for port 0. The accept loop runs on its own task; this call
    /// returns as soon as the socket is bound.
    ///
    /// # Errors
    ///
    /// * [`ServerError::AlreadyRunning`] if the listener is running. Its state
    ///   is left untouched.
    /// * [`ServerError::Bind`] if the address is in use or not permitted. The
    ///   listener stays `Stopped`.
    pub async fn start(&self, config: ListenerConfig) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        let current = self.state();
        if current != ListenerState::Stopped {
            return Err(ServerError::InvalidState(current));
        }

        let starting = StartGuard::arm(&self.state_tx);
        let bind_addr = config.to_string();
        debug!(addr = %bind_addr, "Binding alarm listener");

        let bound = match TcpListener::bind(bind_addr.as_str()).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                drop(starting);
                error!(addr = %bind_addr, error = %source, "Failed to bind alarm listener");
                return Err(ServerError::Bind {
                    addr: bind_addr,
                    source,
                });
            }
        };

        let dispatcher = Dispatcher::new(
            self.sink.clone(),
            self.stats.clone(),
            self.options.max_body_bytes,
        );
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let accept_handle = tokio::spawn(accept_loop(listener, dispatcher, shutdown_rx));

        *running = Some(RunningListener {
            local_addr,
            config,
            shutdown_tx,
            accept_handle,
        });
        starting.disarm();
        self.state_tx.send_replace(ListenerState::Running);
        info!(%local_addr, "Alarm listener running");

        Ok(local_addr)
    }

    /// Stop accepting connections and release the socket.
    ///
    /// Returns once the accept loop has exited. Requests already being served
    /// run to completion on their own. Calling this on a stopped listener does
    /// nothing.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(listener) = running.take() else {
            return;
        };

        self.state_tx.send_replace(ListenerState::Stopping);
        info!(local_addr = %listener.local_addr, "Stopping alarm listener");

        // The loop may already have exited if its task panicked
        let _ = listener.shutdown_tx.send(()).await;
        if let Err(e) = listener.accept_handle.await {
            error!(error = %e, "Alarm accept loop ended abnormally");
        }

        self.state_tx.send_replace(ListenerState::Stopped);
        info!(config = %listener.config, "Alarm listener stopped");
    }

    pub fn state(&self) -> ListenerState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ListenerState> {
        self.state_tx.subscribe()
    }

    /// The bound address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|listener| listener.local_addr)
    }

    /// Dispatch counters accumulated over the life of this server, across
    /// restarts.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn sink(&self) -> &EventSink {
        &self.sink
    }
}

/// Holds the state at `Starting` for one start attempt. Unless disarmed, the
/// state returns to `Stopped` when the guard is dropped, including when the
/// `start` future is dropped mid-bind.
struct StartGuard<'a> {
    state_tx: &'a watch::Sender<ListenerState>,
    armed: bool,
}

impl<'a> StartGuard<'a> {
    fn arm(state_tx: &'a watch::Sender<ListenerState>) -> Self {
        state_tx.send_replace(ListenerState::Starting);
        Self {
            state_tx,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state_tx.send_replace(ListenerState::Stopped);
        }
    }
}

impl Drop for AlarmServer {
    fn drop(&mut self) {
        if let Some(listener) = self.running.get_mut().take() {
            listener.accept_handle.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, dispatcher: Dispatcher, mut shutdown_rx: mpsc::Receiver<()>) {
    let routes = dispatcher.routes();

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.recv() => {
                debug!("Alarm accept loop received shutdown signal");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "Accepted alarm connection");
                    let service = warp::service(routes.clone());
                    tokio::spawn(async move {
                        // The device opens a fresh connection per push
                        let served = Http::new()
                            .http1_keep_alive(false)
                            .serve_connection(stream, service)
                            .await;
                        if let Err(e) = served {
                            debug!(%peer, error = %e, "Alarm connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept alarm connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
    // Dropping the listener here releases the port before stop() returns
}

/// Detect the local address other hosts on the network would reach us at.
///
/// Uses a connected UDP socket to find the interface the OS would route
/// outbound traffic through. No packet is sent.
pub fn advertised_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let local_addr = socket.local_addr().ok()?;
    Some(local_addr.ip())
}
