//! Acoustic leak detection parameters.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default analysis window used when the device does not report one.
pub const DEFAULT_ANALYSIS_TIME: u32 = 10;

/// `AlarmAnalysisParam` of one audio input.
///
/// Only the two timings are interpreted; everything else the device sends is
/// kept in `extra` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcousticParams {
    /// Seconds an alarm condition must persist before it is reported
    #[serde(default)]
    pub filter_time: u32,
    /// Seconds of audio analysed per decision
    #[serde(default = "default_analysis_time")]
    pub analysis_time: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_analysis_time() -> u32 {
    DEFAULT_ANALYSIS_TIME
}

impl AcousticParams {
    pub fn new(filter_time: u32, analysis_time: u32) -> Self {
        Self {
            filter_time,
            analysis_time,
            extra: Map::new(),
        }
    }

    /// Same parameters with a different filter time.
    pub fn with_filter_time(&self, filter_time: u32) -> Self {
        Self {
            filter_time,
            ..self.clone()
        }
    }

    /// Read parameters from a device answer, which some firmware wraps in an
    /// `AlarmAnalysisParam` object.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let inner = match value {
            Value::Object(mut object) if object.contains_key("AlarmAnalysisParam") => object
                .remove("AlarmAnalysisParam")
                .unwrap_or(Value::Object(Map::new())),
            other => other,
        };
        serde_json::from_value(inner)
    }
}
