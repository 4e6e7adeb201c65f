/*
 * This file is part of Crownwatch.
 *
 * Copyright (C) 2025 Crownwatch contributors
 *
 * Crownwatch is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Crownwatch is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Crownwatch. If not, see <https://www.gnu.org/licenses/>.
 */

//! Rolling statistics over the live metric stream
//!
//! Calm and focus are tracked as percentages, brainwave bands by their
//! per-event mean. Each series keeps the last `window` values.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use cw_core::constants::host::{METRICS_WINDOW, TREND_THRESHOLD};
use cw_protocol::{BandStats, BandSummaries, EventPayload, MetricReading};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Ascending,
    Descending,
    Stable,
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Ascending => write!(f, "ascending"),
            Trend::Descending => write!(f, "descending"),
            Trend::Stable => write!(f, "stable"),
        }
    }
}

/// Slope over the last three values, per step
pub fn trend(values: &VecDeque<f64>) -> Trend {
    let recent: Vec<f64> = values.iter().rev().take(3).rev().copied().collect();
    if recent.len() < 2 {
        return Trend::Stable;
    }
    let slope = (recent[recent.len() - 1] - recent[0]) / recent.len() as f64;
    if slope > TREND_THRESHOLD {
        Trend::Ascending
    } else if slope < -TREND_THRESHOLD {
        Trend::Descending
    } else {
        Trend::Stable
    }
}

fn summarize(values: &VecDeque<f64>) -> BandStats {
    let values: Vec<f64> = values.iter().copied().collect();
    BandStats::from_values(&values)
}

fn average(values: &VecDeque<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub value: f64,
    pub average: f64,
    pub trend: Trend,
}

/// What one data event did to the rolling statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "metric", rename_all = "snake_case")]
pub enum MetricSnapshot {
    Calm(SeriesPoint),
    Focus(SeriesPoint),
    Brainwaves { bands: BTreeMap<String, SeriesPoint> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, BandStats>,
    pub brainwaves: BTreeMap<String, BandStats>,
}

impl SessionSummary {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty() && self.brainwaves.is_empty()
    }
}

#[derive(Debug)]
pub struct MetricsProcessor {
    window: usize,
    calm: VecDeque<f64>,
    focus: VecDeque<f64>,
    bands: BTreeMap<&'static str, VecDeque<f64>>,
}

impl Default for MetricsProcessor {
    fn default() -> Self {
        Self::new(METRICS_WINDOW)
    }
}

impl MetricsProcessor {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            calm: VecDeque::with_capacity(window),
            focus: VecDeque::with_capacity(window),
            bands: BTreeMap::new(),
        }
    }

    fn push(window: usize, series: &mut VecDeque<f64>, value: f64) -> SeriesPoint {
        series.push_back(value);
        while series.len() > window {
            series.pop_front();
        }
        SeriesPoint {
            value,
            average: average(series),
            trend: trend(series),
        }
    }

    /// Feed one event. Status updates produce nothing.
    pub fn process(&mut self, payload: &EventPayload) -> Option<MetricSnapshot> {
        match payload {
            EventPayload::Calm(MetricReading { percentage, .. }) => {
                Some(MetricSnapshot::Calm(Self::push(self.window, &mut self.calm, *percentage)))
            }
            EventPayload::Focus(MetricReading { percentage, .. }) => {
                Some(MetricSnapshot::Focus(Self::push(self.window, &mut self.focus, *percentage)))
            }
            EventPayload::Brainwaves(summaries) => Some(self.process_bands(summaries)),
            EventPayload::StatusUpdate(_) => None,
        }
    }

    fn process_bands(&mut self, summaries: &BandSummaries) -> MetricSnapshot {
        let mut bands = BTreeMap::new();
        for (name, stats) in summaries.bands() {
            // Bands absent from the reading leave their history alone.
            if stats.samples == 0 {
                continue;
            }
            let series = self.bands.entry(name).or_default();
            bands.insert(name.to_string(), Self::push(self.window, series, stats.mean));
        }
        MetricSnapshot::Brainwaves { bands }
    }

    /// Statistics over the values currently in the window
    pub fn session_summary(&self) -> SessionSummary {
        let mut metrics = BTreeMap::new();
        for (name, series) in [("calm", &self.calm), ("focus", &self.focus)] {
            if !series.is_empty() {
                metrics.insert(name.to_string(), summarize(series));
            }
        }

        let brainwaves = self
            .bands
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(name, series)| (name.to_string(), summarize(series)))
            .collect();

        SessionSummary {
            timestamp: Utc::now(),
            metrics,
            brainwaves,
        }
    }
}
