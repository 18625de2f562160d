//! Logs every alarm and keeps per-type counts for the shutdown summary.

use alarm_server::{AlarmEvent, AlarmObserver, AttachedResource};
use async_trait::async_trait;
use chrono::Local;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Counts of received items
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AlarmStats {
    pub total_alarms: u64,
    pub attachments: u64,
    /// Keyed by `eventType`, then `alarmType` when present
    pub by_type: BTreeMap<String, u64>,
}

impl AlarmStats {
    pub fn update(&mut self, event: &AlarmEvent) {
        self.total_alarms += 1;
        *self.by_type.entry(type_key(event)).or_default() += 1;
    }

    pub fn summary(&self) -> String {
        let breakdown = self
            .by_type
            .iter()
            .map(|(kind, count)| format!("{kind}: {count}"))
            .collect::<Vec<_>>()
            .join(", ");
        if breakdown.is_empty() {
            format!("Alarms: {} total, {} attachments", self.total_alarms, self.attachments)
        } else {
            format!(
                "Alarms: {} total, {} attachments ({breakdown})",
                self.total_alarms, self.attachments
            )
        }
    }
}

fn type_key(event: &AlarmEvent) -> String {
    let event_type = if event.event_type.is_empty() {
        "unknown"
    } else {
        event.event_type.as_str()
    };
    if event.alarm_sub_type.is_empty() {
        event_type.to_string()
    } else {
        format!("{event_type}/{}", event.alarm_sub_type)
    }
}

/// One line describing an alarm, skipping fields the device left empty
pub fn format_alarm(event: &AlarmEvent) -> String {
    let mut line = format!("{} [{}]", type_key(event), or_dash(&event.event_state));

    let details = [
        ("description", &event.event_description),
        ("time", &event.date_time),
        ("device", &event.device_address),
        ("channel", &event.channel_id),
        ("posts", &event.active_post_count),
    ];
    for (label, value) in details {
        if !value.is_empty() {
            line.push_str(&format!(" {label}={value}"));
        }
    }
    line
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// Observer writing alarms to the log
pub struct AlarmLogger {
    show_raw_data: bool,
    stats: Mutex<AlarmStats>,
}

impl AlarmLogger {
    pub fn new(show_raw_data: bool) -> Self {
        Self {
            show_raw_data,
            stats: Mutex::new(AlarmStats::default()),
        }
    }

    pub fn stats(&self) -> AlarmStats {
        match self.stats.lock() {
            Ok(stats) => stats.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with_stats(&self, update: impl FnOnce(&mut AlarmStats)) {
        match self.stats.lock() {
            Ok(mut stats) => update(&mut stats),
            Err(poisoned) => update(&mut poisoned.into_inner()),
        }
    }
}

#[async_trait]
impl AlarmObserver for AlarmLogger {
    async fn on_alarm(&self, event: &AlarmEvent) {
        let received = Local::now().format("%Y-%m-%d %H:%M:%S");
        warn!(received = %received, "Alarm: {}", format_alarm(event));

        if let Some((width, height)) = event.picture_resolution() {
            info!(width, height, format = %event.resource_format_type, "Alarm carries a picture");
        }
        if self.show_raw_data {
            match serde_json::to_string(event) {
                Ok(json) => info!(event = %json, "Decoded alarm"),
                Err(e) => debug!(error = %e, "Could not serialize alarm"),
            }
        }

        self.with_stats(|stats| stats.update(event));
    }

    async fn on_resource(&self, resource: &AttachedResource) {
        info!(
            file_name = %resource.file_name,
            content_type = resource.content_type.as_deref().unwrap_or("-"),
            size = resource.len(),
            "Alarm attachment"
        );
        self.with_stats(|stats| stats.attachments += 1);
    }
}
