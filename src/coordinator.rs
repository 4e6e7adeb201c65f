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

//! Session coordinator
//!
//! Issues commands to the worker one at a time, drains its event stream in
//! bounded batches and feeds the health monitor, the metric statistics, the
//! recorder and the observer relays.
//!
//! Transport failures never escape as errors: `send_command` always returns
//! a [`Response`], synthesizing an error response when the worker is slow,
//! gone or talking nonsense.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::Duration;

use cw_core::constants::worker::SHUTDOWN_GRACE;
use cw_core::settings::{HostSettings, RecordingSettings};
use cw_core::Settings;
use cw_error::{CrownwatchError, Result};
use cw_protocol::{
    Command, CommandEnvelope, DeviceStatus, EventEnvelope, EventPayload, Response, UNSOLICITED_SEQ,
};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

use crate::health::{HealthMonitor, HealthState, HealthTransition};
use crate::metrics::{MetricsProcessor, SessionSummary};
use crate::recorder::{JsonlRecorder, Recorder, RecordingSummary};
use crate::relay::{EventRelay, Notice, NoticeKind, RelayMessage};
use crate::transport::WorkerLink;

/// The host's copy of the session. Always a value snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionView {
    pub connected: bool,
    pub monitoring: bool,
    pub status: DeviceStatus,
}

/// Check that a success response carries what its command promises
fn verify_response_type(command: Command, response: &Response) -> Result<()> {
    let data = match response {
        Response::Error { .. } => return Ok(()),
        Response::Ok(data) => data,
    };
    let valid = match command {
        Command::Connect | Command::Disconnect => data.connected.is_some(),
        Command::StartMonitoring | Command::StopMonitoring => data.monitoring.is_some(),
        Command::CheckStatus => {
            data.connected.is_some() && data.monitoring.is_some() && data.device_status.is_some()
        }
        Command::Quit => false,
    };
    if !valid {
        return Err(CrownwatchError::IpcProtocol(format!(
            "Response type mismatch: got {:?} for command {}",
            data,
            command.type_name()
        )));
    }
    Ok(())
}

pub struct SessionCoordinator {
    link: WorkerLink,
    next_seq: u64,
    host: HostSettings,
    recording: RecordingSettings,
    view: SessionView,
    health: HealthMonitor,
    metrics: MetricsProcessor,
    relays: Vec<Box<dyn EventRelay>>,
    recorder: Option<Box<dyn Recorder>>,
    events_closed: bool,
}

impl SessionCoordinator {
    pub fn new(link: WorkerLink, settings: &Settings) -> Self {
        Self {
            link,
            next_seq: 1,
            host: settings.host.clone(),
            recording: settings.recording.clone(),
            view: SessionView::default(),
            health: HealthMonitor::new(settings.health.stale_after()),
            metrics: MetricsProcessor::default(),
            relays: Vec::new(),
            recorder: None,
            events_closed: false,
        }
    }

    pub fn add_relay(&mut self, relay: Box<dyn EventRelay>) {
        self.relays.push(relay);
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn health(&self) -> HealthState {
        self.health.state()
    }

    pub fn session_summary(&self) -> SessionSummary {
        self.metrics.session_summary()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Send one command and wait up to `limit` for its response.
    ///
    /// A timed-out command is not retracted; its late response is recognised
    /// by its sequence number and dropped on a later call.
    pub async fn send_command(&mut self, command: Command, limit: Duration) -> Response {
        let seq = self.next_seq;
        self.next_seq += 1;

        debug!("Command #{}: {}", seq, command.type_name());
        if let Err(e) = self.link.send(CommandEnvelope::new(seq, command)) {
            warn!("Cannot send {}: {}", command.type_name(), e);
            return Response::error(e.to_string());
        }
        if !command.expects_response() {
            self.apply(command, &Response::ok());
            return Response::ok();
        }

        let deadline = Instant::now() + limit;
        let response = loop {
            let envelope = match timeout_at(deadline, self.link.recv_response()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    error!("Worker closed the response channel");
                    return Response::error(CrownwatchError::WorkerUnavailable.to_string());
                }
                Err(_) => {
                    warn!(
                        "No response to {} #{} within {}s",
                        command.type_name(),
                        seq,
                        limit.as_secs()
                    );
                    let what = format!("{} after {}s", command.type_name(), limit.as_secs());
                    return Response::error(CrownwatchError::Timeout(what).to_string());
                }
            };

            match envelope.seq.cmp(&seq) {
                Ordering::Equal => break envelope.response,
                _ if envelope.seq == UNSOLICITED_SEQ => {
                    warn!(
                        "Worker reported: {}",
                        envelope.response.message().unwrap_or("(no message)")
                    );
                    return match envelope.response {
                        error @ Response::Error { .. } => error,
                        Response::Ok(_) => Response::error(
                            CrownwatchError::IpcProtocol("unsolicited success response".to_string())
                                .to_string(),
                        ),
                    };
                }
                Ordering::Less => {
                    warn!("Discarding stale response #{} while waiting for #{}", envelope.seq, seq);
                }
                Ordering::Greater => {
                    error!("Response #{} is ahead of command #{}", envelope.seq, seq);
                    return Response::error(
                        CrownwatchError::IpcProtocol(format!(
                            "Response ID mismatch: expected {}, got {}",
                            seq, envelope.seq
                        ))
                        .to_string(),
                    );
                }
            }
        };

        if let Err(e) = verify_response_type(command, &response) {
            error!("{}", e);
            return Response::error(e.to_string());
        }
        self.apply(command, &response);
        response
    }

    fn apply(&mut self, command: Command, response: &Response) {
        let now = Instant::now();
        let data = match response {
            Response::Ok(data) => data,
            Response::Error { device_status, .. } => {
                if command == Command::Connect {
                    // The worker has reset itself to disconnected.
                    self.view.connected = false;
                    self.view.monitoring = false;
                    if let Some(status) = device_status {
                        self.view.status = status.clone();
                    }
                    self.health.stop();
                }
                return;
            }
        };

        if let Some(status) = &data.device_status {
            self.view.status = status.clone();
        }
        match command {
            Command::Connect => {
                self.view.connected = data.connected.unwrap_or(false);
            }
            Command::StartMonitoring => {
                self.view.monitoring = true;
                if !self.health.is_active() {
                    self.health.start(now);
                }
            }
            Command::StopMonitoring => {
                self.view.monitoring = false;
                self.health.stop();
            }
            Command::CheckStatus => {
                self.view.connected = data.connected.unwrap_or(self.view.connected);
                self.view.monitoring = data.monitoring.unwrap_or(self.view.monitoring);
                if !self.view.monitoring {
                    self.health.stop();
                }
            }
            Command::Disconnect | Command::Quit => {
                self.view = SessionView::default();
                self.health.stop();
                self.finish_recording();
            }
        }
    }

    pub async fn connect(&mut self) -> Response {
        let limit = self.host.connect_timeout();
        self.send_command(Command::Connect, limit).await
    }

    pub async fn start_monitoring(&mut self) -> Response {
        let limit = self.host.command_timeout();
        self.send_command(Command::StartMonitoring, limit).await
    }

    pub async fn stop_monitoring(&mut self) -> Response {
        let limit = self.host.command_timeout();
        self.send_command(Command::StopMonitoring, limit).await
    }

    pub async fn check_status(&mut self) -> Response {
        let limit = self.host.status_timeout();
        self.send_command(Command::CheckStatus, limit).await
    }

    pub async fn disconnect(&mut self) -> Response {
        let limit = self.host.command_timeout();
        self.send_command(Command::Disconnect, limit).await
    }

    /// Ask the worker to quit and wait for it, killing it after the grace period
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down worker");
        self.finish_recording();
        let response = self.send_command(Command::Quit, Duration::ZERO).await;
        if !response.is_ok() {
            debug!("Quit not delivered: {:?}", response.message());
        }
        self.link.close();
        self.link.wait_or_kill(SHUTDOWN_GRACE).await
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Dispatch at most `max_batch` pending events without waiting.
    /// Returns how many were handled.
    pub fn drain_events(&mut self, max_batch: usize) -> usize {
        let mut handled = 0;
        while handled < max_batch {
            let event = match self.link.try_recv_event() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.events_closed {
                        warn!("Worker event stream closed");
                        self.events_closed = true;
                    }
                    break;
                }
            };
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, event: EventEnvelope) {
        let now = Instant::now();
        match &event.payload {
            EventPayload::StatusUpdate(update) => {
                self.view.connected = update.connected;
                self.view.monitoring = update.monitoring;
                self.view.status = event.device_status.clone();
                if update.monitoring && !self.health.is_active() {
                    self.health.start(now);
                } else if !update.monitoring {
                    self.health.stop();
                }
            }
            payload => {
                if self.view.monitoring {
                    self.health.record_data(now);
                }
                if let Some(snapshot) = self.metrics.process(payload) {
                    self.relay(&RelayMessage::Metrics(snapshot));
                }
                if let Some(recorder) = self.recorder.as_mut() {
                    if let Err(e) = recorder.record(&event) {
                        warn!("Failed to record {} event: {}", payload.type_name(), e);
                    }
                }
            }
        }
        self.relay(&RelayMessage::Event(event));
    }

    fn relay(&self, message: &RelayMessage) {
        for relay in &self.relays {
            relay.relay(message);
        }
    }

    /// One host loop iteration: a bounded drain, then the health check
    pub fn tick(&mut self) -> usize {
        let handled = self.drain_events(self.host.drain_batch);
        match self.health.check(Instant::now()) {
            Some(HealthTransition::Degraded { silent_for }) => {
                let notice = Notice::new(
                    NoticeKind::ConnectionWarning,
                    format!("No data for {}s, check the headset", silent_for.as_secs()),
                );
                self.relay(&RelayMessage::Notice(notice));
            }
            Some(HealthTransition::Restored) => {
                let notice = Notice::new(NoticeKind::ConnectionRestored, "Data flow restored");
                self.relay(&RelayMessage::Notice(notice));
            }
            None => {}
        }
        handled
    }

    // ========================================================================
    // Recording
    // ========================================================================

    /// Start a JSON-lines recording in the configured directory
    pub fn start_recording(&mut self, name: Option<&str>) -> Result<PathBuf> {
        if !self.view.connected {
            return Err(CrownwatchError::NotConnected);
        }
        let dir = self.recording.resolve_directory()?;
        let recorder = JsonlRecorder::create(&dir, name)?;
        let path = recorder.path().to_path_buf();
        self.start_recording_with(Box::new(recorder))?;
        Ok(path)
    }

    /// Start recording into any [`Recorder`]. A running recording is finished first.
    pub fn start_recording_with(&mut self, recorder: Box<dyn Recorder>) -> Result<()> {
        if !self.view.connected {
            return Err(CrownwatchError::NotConnected);
        }
        self.finish_recording();
        self.recorder = Some(recorder);
        Ok(())
    }

    pub fn stop_recording(&mut self) -> Result<Option<RecordingSummary>> {
        match self.recorder.take() {
            Some(mut recorder) => recorder.finish().map(Some),
            None => Ok(None),
        }
    }

    fn finish_recording(&mut self) {
        match self.stop_recording() {
            Ok(Some(summary)) => info!("Recording stopped after {} records", summary.records),
            Ok(None) => {}
            Err(e) => warn!("Failed to finish recording: {}", e),
        }
    }
}
