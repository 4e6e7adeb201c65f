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

//! Session recording
//!
//! One JSON object per line, appended as data events are drained.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use cw_core::constants::paths::SESSION_PREFIX;
use cw_error::{CrownwatchError, Result};
use cw_protocol::EventEnvelope;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EXTENSION: &str = "jsonl";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub session_id: Uuid,
    pub path: PathBuf,
    pub records: usize,
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
}

#[cfg_attr(test, mockall::automock)]
pub trait Recorder: Send {
    /// Append one calm, focus or brainwaves event
    fn record(&mut self, event: &EventEnvelope) -> Result<()>;

    /// Flush and close. Further records are rejected.
    fn finish(&mut self) -> Result<RecordingSummary>;
}

/// Default session file name for the given local time
pub fn default_session_name(now: DateTime<Local>) -> String {
    format!("{}{}", SESSION_PREFIX, now.format("%Y%m%d_%H%M%S"))
}

fn session_file_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(CrownwatchError::invalid_config(
            "session name",
            format!("'{}' is not a file name", name),
        ));
    }
    if Path::new(name).extension().is_some_and(|ext| ext == EXTENSION) {
        Ok(name.to_string())
    } else {
        Ok(format!("{}.{}", name, EXTENSION))
    }
}

pub struct JsonlRecorder {
    session_id: Uuid,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    records: usize,
    started_at: DateTime<Utc>,
}

impl JsonlRecorder {
    /// Create `dir` if needed and open a new session file in it
    pub fn create(dir: &Path, name: Option<&str>) -> Result<Self> {
        let file_name = match name {
            Some(name) => session_file_name(name)?,
            None => session_file_name(&default_session_name(Local::now()))?,
        };
        fs::create_dir_all(dir).map_err(|e| CrownwatchError::FileWrite {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CrownwatchError::FileWrite {
                path: path.clone(),
                source: e,
            })?;

        let session_id = Uuid::new_v4();
        info!("Recording session {} to {}", session_id, path.display());
        Ok(Self {
            session_id,
            path,
            writer: Some(BufWriter::new(file)),
            records: 0,
            started_at: Utc::now(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn write_err(&self, e: std::io::Error) -> CrownwatchError {
        CrownwatchError::FileWrite {
            path: self.path.clone(),
            source: e,
        }
    }
}

impl Recorder for JsonlRecorder {
    fn record(&mut self, event: &EventEnvelope) -> Result<()> {
        if !event.payload.is_data() {
            debug!("Not recording {} event", event.payload.type_name());
            return Ok(());
        }

        let now = Utc::now();
        let elapsed_ms = (now - self.started_at).num_milliseconds();
        let line = json!({
            "ts_ms": now.timestamp_millis(),
            "session_id": self.session_id,
            "session_duration": elapsed_ms as f64 / 1000.0,
            "event": event.payload.type_name(),
            "data": &event.payload,
            "timestamp": event.timestamp,
        });

        let mut buf = serde_json::to_vec(&line)?;
        buf.push(b'\n');

        let Some(writer) = self.writer.as_mut() else {
            return Err(CrownwatchError::generic("Recording already finished"));
        };
        if let Err(e) = writer.write_all(&buf).and_then(|_| writer.flush()) {
            return Err(self.write_err(e));
        }
        self.records += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<RecordingSummary> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| self.write_err(e))?;
        } else {
            warn!("Recording {} finished twice", self.session_id);
        }

        let summary = RecordingSummary {
            session_id: self.session_id,
            path: self.path.clone(),
            records: self.records,
            started_at: self.started_at,
            duration_secs: (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0,
        };
        info!("Recording finished: {} records in {}", summary.records, summary.path.display());
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use cw_protocol::{
        BandStats, BandSummaries, DeviceStatus, EventPayload, MetricReading, StatusUpdate,
    };
    use tempfile::TempDir;

    fn event(payload: EventPayload) -> EventEnvelope {
        EventEnvelope::new(payload, DeviceStatus::disconnected())
    }

    #[test]
    fn test_default_session_name() {
        let at = Local.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(default_session_name(at), "crownwatch_session_20250309_140507");
    }

    #[test]
    fn test_session_file_name() {
        assert_eq!(session_file_name("morning").unwrap(), "morning.jsonl");
        assert_eq!(session_file_name("morning.jsonl").unwrap(), "morning.jsonl");
        assert!(session_file_name("../escape").is_err());
        assert!(session_file_name("  ").is_err());
    }

    #[test]
    fn test_records_data_events_only() {
        let dir = TempDir::new().unwrap();
        let mut recorder =
            JsonlRecorder::create(&dir.path().join("sessions"), Some("run")).unwrap();
        assert!(recorder.path().ends_with("sessions/run.jsonl"));

        recorder.record(&event(EventPayload::Calm(MetricReading::new(0.5)))).unwrap();
        recorder
            .record(&event(EventPayload::StatusUpdate(StatusUpdate {
                connected: true,
                monitoring: true,
                device_online: true,
            })))
            .unwrap();
        recorder
            .record(&event(EventPayload::Brainwaves(BandSummaries {
                alpha: BandStats::from_values(&[0.5]),
                ..BandSummaries::default()
            })))
            .unwrap();

        let summary = recorder.finish().unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.session_id, recorder.session_id());

        let text = std::fs::read_to_string(recorder.path()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "calm");
        assert_eq!(lines[0]["data"]["type"], "calm");
        assert_eq!(lines[0]["data"]["data"]["percentage"], 50.0);
        assert_eq!(lines[1]["event"], "brainwaves");
        assert_eq!(lines[0]["session_id"], summary.session_id.to_string());
    }

    #[test]
    fn test_record_after_finish_fails() {
        let dir = TempDir::new().unwrap();
        let mut recorder = JsonlRecorder::create(dir.path(), None).unwrap();
        let name = recorder.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("crownwatch_session_"));
        assert!(name.ends_with(".jsonl"));

        recorder.finish().unwrap();
        assert!(recorder.record(&event(EventPayload::Focus(MetricReading::new(0.1)))).is_err());
    }
}
