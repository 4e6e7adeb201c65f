//! Device session state machine
//!
//! One `DeviceSession` lives in each worker. It owns the SDK handle, the
//! production subscriptions and the authoritative [`DeviceStatus`]; commands
//! are applied one at a time through [`DeviceSession::handle`].

use std::fmt;
use std::sync::Arc;

use cw_error::Result;
use cw_protocol::{
    validate_probability, Command, DeviceInfo, DeviceStatus, EventEnvelope, EventPayload,
    MetricReading, Response, ResponseData, StatusUpdate,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::authenticity::Metric;
use crate::brainwaves;
use crate::detection::{run_detection, DetectionConfig};
use crate::sdk::{
    Channel, ChannelData, DataCallback, DeviceSdk, SdkCapabilities, SdkFactory, SubscriptionSet,
};
use crate::settings::Credentials;

/// Remediation hint attached to a failed detection
pub const CONNECT_HELP: &str =
    "1) turn on the headset, 2) wear it correctly, 3) wait for the blue light, 4) retry";

const NOT_DETECTED: &str = "Crown headset not detected. \
    Check that it is switched on, charged and sitting correctly on your head.";
const DETECTED: &str = "Crown headset detected and streaming biological data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Monitoring,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Monitoring => "monitoring",
        };
        f.write_str(name)
    }
}

pub struct DeviceSession {
    factory: Arc<dyn SdkFactory>,
    /// Explicit credentials; resolved from the environment on connect when absent
    credentials: Option<Credentials>,
    detection: DetectionConfig,
    events: mpsc::UnboundedSender<EventEnvelope>,
    status: watch::Sender<DeviceStatus>,
    state: SessionState,
    sdk: Option<Box<dyn DeviceSdk>>,
    logged_in: bool,
    capabilities: Option<SdkCapabilities>,
    subscriptions: SubscriptionSet,
}

impl DeviceSession {
    pub fn new(
        factory: Arc<dyn SdkFactory>,
        credentials: Option<Credentials>,
        detection: DetectionConfig,
        events: mpsc::UnboundedSender<EventEnvelope>,
    ) -> Self {
        let (status, _) = watch::channel(DeviceStatus::disconnected());
        Self {
            factory,
            credentials,
            detection,
            events,
            status,
            state: SessionState::Disconnected,
            sdk: None,
            logged_in: false,
            capabilities: None,
            subscriptions: SubscriptionSet::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Connected and monitoring both count as connected
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected | SessionState::Monitoring)
    }

    pub fn is_monitoring(&self) -> bool {
        self.state == SessionState::Monitoring
    }

    /// Snapshot of the current device status
    pub fn status(&self) -> DeviceStatus {
        self.status.borrow().clone()
    }

    pub fn capabilities(&self) -> Option<SdkCapabilities> {
        self.capabilities
    }

    /// Apply one command. `quit` cleans up and yields no response.
    pub async fn handle(&mut self, command: Command) -> Option<Response> {
        debug!("Handling {} in state {}", command.type_name(), self.state);
        let response = match command {
            Command::Connect => self.connect().await,
            Command::StartMonitoring => self.start_monitoring(),
            Command::StopMonitoring => self.stop_monitoring(),
            Command::CheckStatus => self.check_status(),
            Command::Disconnect => self.disconnect(),
            Command::Quit => {
                info!("Quit requested");
                self.cleanup();
                return None;
            }
        };
        Some(response)
    }

    pub async fn connect(&mut self) -> Response {
        if self.is_connected() {
            info!("Already connected");
            return Response::Ok(
                ResponseData::connected(true)
                    .with_status(self.status())
                    .with_message("already connected"),
            );
        }

        self.state = SessionState::Connecting;
        match self.establish().await {
            Ok(Some(info)) => {
                self.state = SessionState::Connected;
                info!("Connection validated, headset operational");
                self.send_status_update();
                Response::Ok(
                    ResponseData::connected(true)
                        .with_status(self.status())
                        .with_info(info)
                        .with_message(DETECTED),
                )
            }
            Ok(None) => {
                // Keep the detection result for the caller, then reset.
                let detected = self.status();
                warn!("Headset not detected: {}", detected.validation());
                self.cleanup();
                Response::rejected(NOT_DETECTED, CONNECT_HELP, detected)
            }
            Err(e) => {
                error!("Connection failed: {}", e);
                self.cleanup();
                Response::error(e.to_string())
            }
        }
    }

    /// Create the SDK handle, authenticate and run detection.
    /// Returns device info when the headset was accepted.
    async fn establish(&mut self) -> Result<Option<DeviceInfo>> {
        let credentials = match &self.credentials {
            Some(credentials) => credentials.clone(),
            None => Credentials::from_env()?,
        };

        info!("Initializing SDK for device {}", credentials.device_id);
        let sdk = self.factory.create(&credentials.device_id)?;
        let capabilities = sdk.capabilities();
        debug!("SDK capabilities: {:?}", capabilities);
        self.capabilities = Some(capabilities);

        info!("Authenticating as {}", credentials.email);
        sdk.login(&credentials)?;
        self.logged_in = true;
        let sdk = self.sdk.insert(sdk);

        let outcome = run_detection(sdk.as_ref(), &self.detection).await;
        if !outcome.success {
            self.status.send_replace(outcome.status);
            return Ok(None);
        }

        let info = if capabilities.has_device_info {
            sdk.device_info().unwrap_or_else(|e| {
                warn!("Could not read device info: {}", e);
                DeviceInfo::fallback(Some(credentials.device_id.clone()))
            })
        } else {
            DeviceInfo::fallback(Some(credentials.device_id.clone()))
        };
        self.status.send_replace(outcome.status.with_battery(info.battery.clone()));
        Ok(Some(info))
    }

    pub fn start_monitoring(&mut self) -> Response {
        if self.is_monitoring() {
            return Response::Ok(
                ResponseData::monitoring(true).with_message("monitoring already active"),
            );
        }
        let (Some(sdk), true) = (self.sdk.as_ref(), self.is_connected()) else {
            return Response::error("Headset not connected");
        };

        let wave_channel = self.capabilities.and_then(|caps| caps.wave_channel());
        let mut subscriptions = SubscriptionSet::new();
        for metric in Metric::ALL {
            let callback = metric_callback(metric, self.events.clone(), self.status.subscribe());
            match sdk.subscribe(metric.into(), callback) {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => {
                    warn!("Monitoring start failed: {}", e);
                    return Response::error(e.to_string());
                }
            }
        }
        if let Some(channel) = wave_channel {
            let callback = brainwave_callback(self.events.clone(), self.status.subscribe());
            match sdk.subscribe(channel, callback) {
                Ok(sub) => subscriptions.push(sub),
                Err(e) => {
                    warn!("Monitoring start failed: {}", e);
                    return Response::error(e.to_string());
                }
            }
        } else {
            info!("Device exposes no brainwave channel, streaming metrics only");
        }

        info!("Real-time monitoring active on {:?}", subscriptions.channels());
        self.subscriptions = subscriptions;
        self.state = SessionState::Monitoring;
        self.send_status_update();
        Response::Ok(ResponseData::monitoring(true))
    }

    pub fn stop_monitoring(&mut self) -> Response {
        let failures = self.subscriptions.release_all();
        if failures > 0 {
            warn!("{} monitoring subscription(s) failed to release", failures);
        }
        if self.state == SessionState::Monitoring {
            self.state = SessionState::Connected;
        }
        info!("Monitoring stopped");
        self.send_status_update();
        Response::Ok(ResponseData::monitoring(false))
    }

    pub fn check_status(&mut self) -> Response {
        self.send_status_update();
        Response::Ok(
            ResponseData::connected(self.is_connected())
                .with_monitoring(self.is_monitoring())
                .with_status(self.status()),
        )
    }

    pub fn disconnect(&mut self) -> Response {
        info!("Disconnecting");
        self.cleanup();
        self.send_status_update();
        Response::Ok(ResponseData::connected(false))
    }

    /// Release every subscription, log out and reset the status.
    /// Safe to call in any state, any number of times.
    pub fn cleanup(&mut self) {
        let failures = self.subscriptions.release_all();
        if failures > 0 {
            warn!("{} subscription(s) failed to release during cleanup", failures);
        }

        if let Some(sdk) = self.sdk.take() {
            if self.logged_in {
                if let Err(e) = sdk.logout() {
                    warn!("Logout failed: {}", e);
                }
            }
        }

        self.logged_in = false;
        self.capabilities = None;
        self.state = SessionState::Disconnected;
        self.status.send_replace(DeviceStatus::disconnected());
    }

    fn send_status_update(&self) {
        let status = self.status();
        let update = StatusUpdate {
            connected: self.is_connected(),
            monitoring: self.is_monitoring(),
            device_online: status.online(),
        };
        let event = EventEnvelope::new(EventPayload::StatusUpdate(update), status);
        if self.events.send(event).is_err() {
            debug!("Event channel closed, status update dropped");
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn metric_callback(
    metric: Metric,
    events: mpsc::UnboundedSender<EventEnvelope>,
    status: watch::Receiver<DeviceStatus>,
) -> DataCallback {
    Box::new(move |data| match data {
        ChannelData::Probability(sample) => {
            if let Err(e) = validate_probability(sample.probability) {
                warn!("Dropping {} sample: {}", metric, e);
                return;
            }
            let reading = MetricReading::new(sample.probability);
            let payload = match metric {
                Metric::Calm => EventPayload::Calm(reading),
                Metric::Focus => EventPayload::Focus(reading),
            };
            let snapshot = status.borrow().clone();
            if events.send(EventEnvelope::new(payload, snapshot)).is_err() {
                debug!("Event channel closed, {} sample dropped", metric);
            }
        }
        ChannelData::Waves(_) => {
            warn!("Unexpected wave payload on {} channel", Channel::from(metric))
        }
    })
}

fn brainwave_callback(
    events: mpsc::UnboundedSender<EventEnvelope>,
    status: watch::Receiver<DeviceStatus>,
) -> DataCallback {
    Box::new(move |data| match data {
        ChannelData::Waves(raw) => match brainwaves::summarize(&raw) {
            Ok(summaries) => {
                let snapshot = status.borrow().clone();
                if events
                    .send(EventEnvelope::new(EventPayload::Brainwaves(summaries), snapshot))
                    .is_err()
                {
                    debug!("Event channel closed, brainwaves dropped");
                }
            }
            Err(e) => warn!("Dropping brainwave payload: {}", e),
        },
        ChannelData::Probability(_) => warn!("Unexpected probability payload on brainwave channel"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::simulated::{Profile, SimulatedBackend};
    use cw_protocol::SignalQuality;
    use std::time::Duration;

    fn session(
        backend: &SimulatedBackend,
    ) -> (DeviceSession, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = DeviceSession::new(
            Arc::new(backend.clone()),
            Some(Credentials::new("me@example.com", "pw", "crown-test")),
            DetectionConfig::default(),
            tx,
        );
        (session, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<EventEnvelope>) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn data(response: Response) -> ResponseData {
        match response {
            Response::Ok(data) => data,
            Response::Error { message, .. } => panic!("unexpected error response: {}", message),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_live_headset() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 42 });
        let (mut session, mut rx) = session(&backend);

        let reply = data(session.handle(Command::Connect).await.unwrap());
        assert_eq!(reply.connected, Some(true));
        assert!(reply.device_status.as_ref().unwrap().online());
        assert_eq!(reply.device_info.unwrap().model, "Crown");
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.status().battery(), "87%");

        let events = drain(&mut rx);
        assert!(matches!(
            events.last().unwrap().payload,
            EventPayload::StatusUpdate(u) if u.connected && u.device_online
        ));

        // A second connect is answered without touching the SDK again.
        let again = data(session.connect().await);
        assert_eq!(again.message.as_deref(), Some("already connected"));
        assert_eq!(backend.probe().snapshot().logins, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_signal_rolls_back() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let (mut session, _rx) = session(&backend);

        match session.connect().await {
            Response::Error { help, device_status, .. } => {
                assert_eq!(help.as_deref(), Some(CONNECT_HELP));
                let status = device_status.unwrap();
                assert_eq!(status.signal(), SignalQuality::NoBiologicalData);
                assert_eq!(status.validation(), "insufficient data");
            }
            other => panic!("expected rejection, got {:?}", other),
        }

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.status(), DeviceStatus::disconnected());
        let probe = backend.probe().snapshot();
        assert_eq!(probe.logouts, 1);
        assert_eq!(probe.active(), 0);
    }

    #[tokio::test]
    async fn test_login_failure_is_reported() {
        let backend = SimulatedBackend::new(Profile::Offline).fail_login("invalid password");
        let (mut session, _rx) = session(&backend);

        let response = session.connect().await;
        assert!(!response.is_ok());
        assert!(response.message().unwrap().contains("invalid password"));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(backend.probe().snapshot().logouts, 0);
    }

    #[tokio::test]
    async fn test_monitoring_requires_connection() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let (mut session, _rx) = session(&backend);

        let response = session.handle(Command::StartMonitoring).await.unwrap();
        assert_eq!(response.message(), Some("Headset not connected"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_streams_and_stops() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 42 });
        let (mut session, mut rx) = session(&backend);
        assert!(session.connect().await.is_ok());
        drain(&mut rx);

        assert_eq!(data(session.start_monitoring()).monitoring, Some(true));
        assert_eq!(session.state(), SessionState::Monitoring);
        let again = data(session.start_monitoring());
        assert_eq!(again.message.as_deref(), Some("monitoring already active"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        let events = drain(&mut rx);
        let kinds: Vec<&str> = events.iter().map(|e| e.payload.type_name()).collect();
        assert!(kinds.contains(&"calm"));
        assert!(kinds.contains(&"focus"));
        assert!(kinds.contains(&"brainwaves"));
        assert!(events.iter().filter(|e| e.payload.is_data()).all(|e| e.device_status.online()));

        assert_eq!(data(session.stop_monitoring()).monitoring, Some(false));
        assert_eq!(session.state(), SessionState::Connected);
        let probe = backend.probe().snapshot();
        assert_eq!(probe.released(Channel::BrainwavesRaw), 1);
        assert_eq!(probe.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_without_wave_channels() {
        let caps = SdkCapabilities {
            has_device_info: false,
            ..SdkCapabilities::default()
        };
        let backend =
            SimulatedBackend::new(Profile::Biological { seed: 42 }).with_capabilities(caps);
        let (mut session, _rx) = session(&backend);

        let reply = data(session.connect().await);
        assert_eq!(reply.device_info.unwrap().firmware, "unknown");

        assert!(session.start_monitoring().is_ok());
        let probe = backend.probe().snapshot();
        assert_eq!(probe.opened(Channel::BrainwavesRaw), 0);
        assert_eq!(probe.opened(Channel::Brainwaves), 0);
        assert_eq!(probe.active(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_monitoring_start_releases() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 42 })
            .fail_subscribe(Channel::BrainwavesRaw);
        let (mut session, _rx) = session(&backend);
        assert!(session.connect().await.is_ok());

        assert!(!session.start_monitoring().is_ok());
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(backend.probe().snapshot().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status_and_disconnect() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 42 });
        let (mut session, mut rx) = session(&backend);
        assert!(session.connect().await.is_ok());
        assert!(session.start_monitoring().is_ok());
        drain(&mut rx);

        let status = data(session.check_status());
        assert_eq!(status.connected, Some(true));
        assert_eq!(status.monitoring, Some(true));
        assert!(matches!(drain(&mut rx).last().unwrap().payload, EventPayload::StatusUpdate(_)));

        assert_eq!(data(session.disconnect()).connected, Some(false));
        assert_eq!(session.state(), SessionState::Disconnected);
        let probe = backend.probe().snapshot();
        assert_eq!(probe.active(), 0);
        assert_eq!(probe.logouts, 1);

        // Nothing left to release or log out of.
        session.cleanup();
        assert_eq!(backend.probe().snapshot().logouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_survives_failing_release() {
        let backend =
            SimulatedBackend::new(Profile::Biological { seed: 42 }).fail_release(Channel::Calm);
        let (mut session, mut rx) = session(&backend);
        assert!(session.connect().await.is_ok());
        assert!(session.start_monitoring().is_ok());
        tokio::time::sleep(Duration::from_secs(1)).await;
        drain(&mut rx);

        assert_eq!(data(session.disconnect()).connected, Some(false));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.status().online());

        // Detection and monitoring each opened calm and focus once.
        let probe = backend.probe().snapshot();
        assert_eq!(probe.released(Channel::Calm), 2);
        assert_eq!(probe.released(Channel::Focus), 2);
        assert_eq!(probe.released(Channel::BrainwavesRaw), 1);
        assert_eq!(probe.active(), 0);
        assert_eq!(probe.logouts, 1);
        assert!(matches!(
            drain(&mut rx).last().unwrap().payload,
            EventPayload::StatusUpdate(u) if !u.connected && !u.device_online
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_survives_failing_release() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 42 })
            .fail_release(Channel::Focus)
            .fail_release(Channel::BrainwavesRaw);
        let (mut session, _rx) = session(&backend);
        assert!(session.connect().await.is_ok());
        assert!(session.start_monitoring().is_ok());

        session.cleanup();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.status().online());
        let probe = backend.probe().snapshot();
        assert_eq!(probe.released(Channel::Calm), 2);
        assert_eq!(probe.released(Channel::BrainwavesRaw), 1);
        assert_eq!(probe.active(), 0);
        assert_eq!(probe.logouts, 1);
    }

    #[tokio::test]
    async fn test_quit_has_no_response() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let (mut session, _rx) = session(&backend);
        assert!(session.handle(Command::Quit).await.is_none());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
