//! Crownwatch device worker
//!
//! The worker owns the SDK handle, the subscriptions and the device status.
//! It consumes commands one at a time, answers each with exactly one
//! response, and publishes events on a separate stream. The same loop runs
//! behind stdio in the `crownwatch-worker` binary and in-process for tests.

pub mod stdio;

use std::sync::Arc;

use cw_core::constants::worker::COMMAND_POLL;
use cw_core::{Credentials, DetectionConfig, DeviceSession, SdkFactory};
use cw_protocol::{CommandEnvelope, EventEnvelope, ResponseEnvelope};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Command loop. Returns after `quit` or when the command channel closes,
/// with the session cleaned up either way.
pub async fn run_worker(
    mut session: DeviceSession,
    mut commands: mpsc::UnboundedReceiver<CommandEnvelope>,
    responses: mpsc::UnboundedSender<ResponseEnvelope>,
) {
    info!("Worker ready, waiting for commands");

    loop {
        let envelope = match timeout(COMMAND_POLL, commands.recv()).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                info!("Command channel closed");
                break;
            }
            Err(_) => continue,
        };

        debug!("Command #{}: {}", envelope.seq, envelope.command.type_name());
        match session.handle(envelope.command).await {
            Some(response) => {
                if responses.send(ResponseEnvelope::new(envelope.seq, response)).is_err() {
                    warn!("Response channel closed, stopping worker");
                    break;
                }
            }
            None => break,
        }
    }

    session.cleanup();
    info!("Worker stopped");
}

/// Host-side ends of an in-process worker
pub struct WorkerChannels {
    pub commands: mpsc::UnboundedSender<CommandEnvelope>,
    pub responses: mpsc::UnboundedReceiver<ResponseEnvelope>,
    pub events: mpsc::UnboundedReceiver<EventEnvelope>,
    pub handle: JoinHandle<()>,
}

/// Run the worker loop as a task on the current runtime
pub fn spawn_in_process(
    factory: Arc<dyn SdkFactory>,
    credentials: Option<Credentials>,
    detection: DetectionConfig,
) -> WorkerChannels {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let session = DeviceSession::new(factory, credentials, detection, event_tx);
    let handle = tokio::spawn(run_worker(session, command_rx, response_tx));

    WorkerChannels {
        commands: command_tx,
        responses: response_rx,
        events: event_rx,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cw_core::sdk::simulated::{Profile, SimulatedBackend};
    use cw_protocol::{Command, EventPayload, Response};
    use std::time::Duration;

    fn credentials() -> Option<Credentials> {
        Some(Credentials::new("me@example.com", "pw", "crown-test"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_response_per_command_in_order() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let mut worker =
            spawn_in_process(Arc::new(backend), credentials(), DetectionConfig::default());

        worker.commands.send(CommandEnvelope::new(1, Command::CheckStatus)).unwrap();
        worker.commands.send(CommandEnvelope::new(2, Command::StartMonitoring)).unwrap();
        worker.commands.send(CommandEnvelope::new(3, Command::Disconnect)).unwrap();

        let first = worker.responses.recv().await.unwrap();
        let second = worker.responses.recv().await.unwrap();
        let third = worker.responses.recv().await.unwrap();
        assert_eq!((first.seq, second.seq, third.seq), (1, 2, 3));
        assert!(first.response.is_ok());
        assert!(!second.response.is_ok());
        assert!(third.response.is_ok());

        worker.commands.send(CommandEnvelope::new(4, Command::Quit)).unwrap();
        worker.handle.await.unwrap();
        assert!(worker.responses.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_stream() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 42 });
        let probe = backend.probe();
        let mut worker =
            spawn_in_process(Arc::new(backend), credentials(), DetectionConfig::default());

        worker.commands.send(CommandEnvelope::new(1, Command::Connect)).unwrap();
        let connected = worker.responses.recv().await.unwrap();
        assert!(connected.response.is_ok(), "{:?}", connected.response);

        worker.commands.send(CommandEnvelope::new(2, Command::StartMonitoring)).unwrap();
        assert!(worker.responses.recv().await.unwrap().response.is_ok());

        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut saw_calm = false;
        while let Ok(event) = worker.events.try_recv() {
            saw_calm |= matches!(event.payload, EventPayload::Calm(_));
        }
        assert!(saw_calm);

        // Dropping the command sender ends the loop and releases everything.
        drop(worker.commands);
        worker.handle.await.unwrap();
        let state = probe.snapshot();
        assert_eq!(state.active(), 0);
        assert_eq!(state.logouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_worker_keeps_polling() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let mut worker =
            spawn_in_process(Arc::new(backend), credentials(), DetectionConfig::default());

        tokio::time::sleep(Duration::from_secs(5)).await;
        worker.commands.send(CommandEnvelope::new(9, Command::CheckStatus)).unwrap();
        let reply = worker.responses.recv().await.unwrap();
        assert_eq!(reply.seq, 9);
        assert!(matches!(reply.response, Response::Ok(_)));
    }
}
