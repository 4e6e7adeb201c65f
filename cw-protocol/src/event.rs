use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DeviceStatus;

/// One event on the worker's data stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
    /// Status snapshot taken when the event was produced
    pub device_status: DeviceStatus,
}

impl EventEnvelope {
    pub fn new(payload: EventPayload, device_status: DeviceStatus) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            device_status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    StatusUpdate(StatusUpdate),
    Calm(MetricReading),
    Focus(MetricReading),
    Brainwaves(BandSummaries),
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::StatusUpdate(_) => "status_update",
            EventPayload::Calm(_) => "calm",
            EventPayload::Focus(_) => "focus",
            EventPayload::Brainwaves(_) => "brainwaves",
        }
    }

    /// Calm, focus and brainwaves count as live data; status updates do not
    pub fn is_data(&self) -> bool {
        !matches!(self, EventPayload::StatusUpdate(_))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    pub connected: bool,
    pub monitoring: bool,
    pub device_online: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricReading {
    pub probability: f64,
    pub percentage: f64,
}

impl MetricReading {
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            percentage: probability * 100.0,
        }
    }
}

/// Summary statistics for one frequency band
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BandStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    pub samples: usize,
}

impl BandStats {
    /// Population statistics; empty input gives an all-zero summary
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            min,
            max,
            std: var.sqrt(),
            samples: values.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct BandSummaries {
    pub delta: BandStats,
    pub theta: BandStats,
    pub alpha: BandStats,
    pub beta: BandStats,
    pub gamma: BandStats,
}

impl BandSummaries {
    pub fn bands(&self) -> [(&'static str, &BandStats); 5] {
        [
            ("delta", &self.delta),
            ("theta", &self.theta),
            ("alpha", &self.alpha),
            ("beta", &self.beta),
            ("gamma", &self.gamma),
        ]
    }
}
