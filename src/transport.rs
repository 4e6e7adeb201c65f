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

//! Host side of the worker channels
//!
//! A [`WorkerLink`] exposes the three logical channels (commands out,
//! responses in, events in) regardless of whether the worker is a child
//! process or a task in this runtime.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use cw_core::constants::worker::BINARY_NAME;
use cw_core::{Credentials, DetectionConfig, SdkFactory, Settings};
use cw_error::{CrownwatchError, Result};
use cw_protocol::{
    decode_line, encode_line, read_line_bounded, CommandEnvelope, EventEnvelope, ResponseEnvelope,
    WorkerFrame,
    MAX_MESSAGE_SIZE,
};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// How to launch the worker binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOptions {
    pub executable: PathBuf,
    pub backend: String,
    /// Settings file forwarded to the worker
    pub config: Option<PathBuf>,
}

impl WorkerOptions {
    pub fn from_settings(settings: &Settings, config: Option<PathBuf>) -> Result<Self> {
        let executable = match &settings.worker.executable {
            Some(path) => path.clone(),
            None => default_executable()?,
        };
        Ok(Self {
            executable,
            backend: settings.worker.backend.clone(),
            config,
        })
    }
}

/// The worker binary installed next to the running executable
pub fn default_executable() -> Result<PathBuf> {
    let current = std::env::current_exe()?;
    let dir = current
        .parent()
        .ok_or_else(|| CrownwatchError::config("Could not determine executable directory"))?;
    Ok(dir.join(BINARY_NAME))
}

enum WorkerProcess {
    Child(Child),
    Task(JoinHandle<()>),
    Exited,
}

pub struct WorkerLink {
    commands: Option<mpsc::UnboundedSender<CommandEnvelope>>,
    responses: mpsc::UnboundedReceiver<ResponseEnvelope>,
    events: mpsc::UnboundedReceiver<EventEnvelope>,
    process: WorkerProcess,
}

impl WorkerLink {
    /// Start the worker binary with piped stdio
    pub fn spawn(options: &WorkerOptions) -> Result<Self> {
        let mut command = Command::new(&options.executable);
        command.arg("--backend").arg(&options.backend);
        if let Some(config) = &options.config {
            command.arg("--config").arg(config);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            CrownwatchError::worker(format!(
                "Failed to start {}: {}",
                options.executable.display(),
                e
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CrownwatchError::worker("Worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CrownwatchError::worker("Worker stdout not captured"))?;
        info!("Started worker {} (pid {:?})", options.executable.display(), child.id());

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_commands(stdin, command_rx));
        tokio::spawn(route_frames(BufReader::new(stdout), response_tx, event_tx));

        Ok(Self {
            commands: Some(command_tx),
            responses: response_rx,
            events: event_rx,
            process: WorkerProcess::Child(child),
        })
    }

    /// Run the worker loop as a task on this runtime, without a process boundary
    pub fn in_process(
        factory: Arc<dyn SdkFactory>,
        credentials: Option<Credentials>,
        detection: DetectionConfig,
    ) -> Self {
        let channels = cw_worker::spawn_in_process(factory, credentials, detection);
        Self {
            commands: Some(channels.commands),
            responses: channels.responses,
            events: channels.events,
            process: WorkerProcess::Task(channels.handle),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_channels(
        commands: mpsc::UnboundedSender<CommandEnvelope>,
        responses: mpsc::UnboundedReceiver<ResponseEnvelope>,
        events: mpsc::UnboundedReceiver<EventEnvelope>,
    ) -> Self {
        Self {
            commands: Some(commands),
            responses,
            events,
            process: WorkerProcess::Exited,
        }
    }

    pub fn send(&self, envelope: CommandEnvelope) -> Result<()> {
        let commands = self.commands.as_ref().ok_or(CrownwatchError::WorkerUnavailable)?;
        commands.send(envelope).map_err(|_| CrownwatchError::WorkerUnavailable)
    }

    /// Next response, or `None` once the worker is gone
    pub async fn recv_response(&mut self) -> Option<ResponseEnvelope> {
        self.responses.recv().await
    }

    pub fn try_recv_event(&mut self) -> std::result::Result<EventEnvelope, TryRecvError> {
        self.events.try_recv()
    }

    /// Close the command channel. The worker sees end of input.
    pub fn close(&mut self) {
        if self.commands.take().is_some() {
            debug!("Command channel closed");
        }
    }

    /// Wait for the worker to exit, killing it after `grace`
    pub async fn wait_or_kill(&mut self, grace: Duration) -> Result<()> {
        match std::mem::replace(&mut self.process, WorkerProcess::Exited) {
            WorkerProcess::Child(mut child) => match timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("Worker exited with {}", status);
                    Ok(())
                }
                Ok(Err(e)) => Err(e.into()),
                Err(_) => {
                    warn!("Worker did not exit within {}s, killing it", grace.as_secs());
                    child.kill().await?;
                    Ok(())
                }
            },
            WorkerProcess::Task(mut handle) => match timeout(grace, &mut handle).await {
                Ok(Ok(())) => {
                    info!("Worker task finished");
                    Ok(())
                }
                Ok(Err(e)) => Err(CrownwatchError::worker(format!("Worker task failed: {}", e))),
                Err(_) => {
                    warn!("Worker task did not finish within {}s, aborting it", grace.as_secs());
                    handle.abort();
                    Ok(())
                }
            },
            WorkerProcess::Exited => Ok(()),
        }
    }
}

async fn forward_commands<W: AsyncWrite + Unpin>(
    mut output: W,
    mut commands: mpsc::UnboundedReceiver<CommandEnvelope>,
) {
    while let Some(envelope) = commands.recv().await {
        let line = match encode_line(&envelope) {
            Ok(line) => line,
            Err(e) => {
                error!("Cannot encode command #{}: {}", envelope.seq, e);
                continue;
            }
        };
        if let Err(e) = output.write_all(&line).await {
            warn!("Worker input closed: {}", e);
            return;
        }
        if let Err(e) = output.flush().await {
            warn!("Worker input closed: {}", e);
            return;
        }
        trace!("Sent command #{}", envelope.seq);
    }
    // Dropping the writer gives the worker end of input.
    debug!("Command forwarder finished");
}

/// Split worker output into the response and event channels
async fn route_frames<R: AsyncBufRead + Unpin>(
    mut input: R,
    responses: mpsc::UnboundedSender<ResponseEnvelope>,
    events: mpsc::UnboundedSender<EventEnvelope>,
) {
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut discarding = false;

    loop {
        match read_line_bounded(&mut input, &mut line, MAX_MESSAGE_SIZE).await {
            Ok(0) => {
                info!("Worker output closed");
                break;
            }
            Ok(_) => {
                if discarding {
                    discarding = !line.ends_with(b"\n");
                    continue;
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match decode_line::<WorkerFrame>(&line) {
                    Ok(WorkerFrame::Response(response)) => {
                        if responses.send(response).is_err() {
                            break;
                        }
                    }
                    Ok(WorkerFrame::Event(event)) => {
                        // Nobody draining events is not a reason to stop routing responses.
                        let _ = events.send(event);
                    }
                    Err(e) => warn!("Undecodable worker frame: {}", e),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                if !discarding {
                    warn!("Worker frame exceeds {} bytes, discarding", MAX_MESSAGE_SIZE);
                }
                discarding = true;
            }
            Err(e) => {
                error!("Read error on worker output: {}", e);
                break;
            }
        }
    }
}
