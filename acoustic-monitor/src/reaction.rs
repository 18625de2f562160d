//! Re-arms acoustic detection after every alarm.
//!
//! A cycle stops sound source location, writes the next filter time from the
//! rotation, and starts sound source location again. Cycles run one at a time
//! on a dedicated task. Alarms arriving while a cycle is already queued are
//! folded into it, since the device repeats an active alarm on every post.

use alarm_server::{AlarmEvent, AlarmObserver};
use async_trait::async_trait;
use isapi_client::{AcousticParams, IsapiClient, IsapiError, DEFAULT_ANALYSIS_TIME};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Device operations a cycle needs
#[async_trait]
pub trait DetectionControl: Send + Sync {
    async fn set_sound_source_location(&self, enabled: bool) -> Result<(), IsapiError>;

    async fn set_acoustic_params(&self, params: &AcousticParams) -> Result<(), IsapiError>;
}

#[async_trait]
impl DetectionControl for IsapiClient {
    async fn set_sound_source_location(&self, enabled: bool) -> Result<(), IsapiError> {
        IsapiClient::set_sound_source_location(self, enabled).await
    }

    async fn set_acoustic_params(&self, params: &AcousticParams) -> Result<(), IsapiError> {
        IsapiClient::set_acoustic_params(self, params).await.map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionConfig {
    /// Filter times (seconds) applied in turn, one per cycle
    pub filter_times: Vec<u32>,
    pub analysis_time: u32,
}

impl Default for ReactionConfig {
    fn default() -> Self {
        Self {
            filter_times: vec![60, 120],
            analysis_time: DEFAULT_ANALYSIS_TIME,
        }
    }
}

/// Cycles through the configured filter times
#[derive(Debug, Clone)]
struct FilterRotation {
    values: Vec<u32>,
    next: usize,
}

impl FilterRotation {
    fn new(values: Vec<u32>) -> Self {
        Self { values, next: 0 }
    }

    fn advance(&mut self) -> Option<u32> {
        let value = *self.values.get(self.next)?;
        self.next = (self.next + 1) % self.values.len();
        Some(value)
    }
}

/// Observer feeding alarms to the reaction worker
pub struct ReactionPipeline {
    trigger: mpsc::Sender<AlarmEvent>,
}

impl ReactionPipeline {
    /// Spawn the worker. It runs until the returned pipeline is dropped.
    pub fn spawn(control: Arc<dyn DetectionControl>, config: ReactionConfig) -> (Self, JoinHandle<()>) {
        // One pending cycle; further alarms fold into it
        let (trigger, receiver) = mpsc::channel(1);
        let handle = tokio::spawn(run_worker(control, config, receiver));
        (Self { trigger }, handle)
    }
}

#[async_trait]
impl AlarmObserver for ReactionPipeline {
    async fn on_alarm(&self, event: &AlarmEvent) {
        match self.trigger.try_send(event.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(event_type = %event.event_type, "Reaction cycle already pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Reaction worker has stopped; alarm not handled");
            }
        }
    }
}

async fn run_worker(
    control: Arc<dyn DetectionControl>,
    config: ReactionConfig,
    mut receiver: mpsc::Receiver<AlarmEvent>,
) {
    let mut rotation = FilterRotation::new(config.filter_times);

    while let Some(event) = receiver.recv().await {
        let Some(filter_time) = rotation.advance() else {
            warn!("No filter times configured; skipping reaction");
            continue;
        };

        info!(
            event_type = %event.event_type,
            filter_time,
            analysis_time = config.analysis_time,
            "Re-arming acoustic detection"
        );
        match run_cycle(control.as_ref(), filter_time, config.analysis_time).await {
            Ok(()) => info!(filter_time, "Reaction cycle complete"),
            Err(e) => warn!(error = %e, "Reaction cycle failed"),
        }
    }
    debug!("Reaction worker finished");
}

async fn run_cycle(
    control: &dyn DetectionControl,
    filter_time: u32,
    analysis_time: u32,
) -> Result<(), IsapiError> {
    // A failed stop does not block the rest of the cycle
    let stopped = control.set_sound_source_location(false).await;
    if let Err(e) = &stopped {
        warn!(error = %e, "Failed to stop sound source location");
    }

    let updated = control
        .set_acoustic_params(&AcousticParams::new(filter_time, analysis_time))
        .await;

    // Detection was stopped above, so restart it even if the update failed
    let restarted = control.set_sound_source_location(true).await;
    stopped.and(updated).and(restarted)
}
