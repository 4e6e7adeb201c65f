//! Simulated headset backend
//!
//! Stands in for the vendor SDK in the worker (`--backend`) and in tests.
//! Samples are produced by tokio tasks on a fixed cadence, so tests running
//! on a paused clock see deterministic timing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cw_error::{CrownwatchError, Result};
use cw_protocol::DeviceInfo;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{
    Channel, ChannelData, DataCallback, DeviceSdk, RawBrainwaves, Sample, SdkCapabilities,
    SdkFactory, Subscription,
};
use crate::settings::Credentials;

/// Default emission cadence, close to the headset's metric rate
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(250);

const STUCK_VALUE: f64 = 0.5;
const WAVE_SAMPLES: usize = 4;

/// What the simulated headset streams
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Profile {
    /// Independent noisy calm/focus streams, as from a worn headset
    Biological { seed: u64 },
    /// Calm and focus generated from one source, so they move in lockstep
    Mirrored { seed: u64 },
    /// Every channel repeats one value
    Stuck { value: f64 },
    /// Subscriptions succeed but nothing ever arrives
    Offline,
}

impl Profile {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "biological" => Ok(Profile::Biological { seed: rand::random() }),
            "mirrored" => Ok(Profile::Mirrored { seed: rand::random() }),
            "stuck" => Ok(Profile::Stuck { value: STUCK_VALUE }),
            "offline" => Ok(Profile::Offline),
            other => Err(CrownwatchError::invalid_config(
                "backend",
                format!(
                    "unknown backend '{}' (expected biological, mirrored, stuck or offline)",
                    other
                ),
            )),
        }
    }
}

/// Counters describing what the worker did with the simulated SDK
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeState {
    pub logins: usize,
    pub logouts: usize,
    pub opened: HashMap<Channel, usize>,
    pub released: HashMap<Channel, usize>,
}

impl ProbeState {
    pub fn opened(&self, channel: Channel) -> usize {
        self.opened.get(&channel).copied().unwrap_or(0)
    }

    pub fn released(&self, channel: Channel) -> usize {
        self.released.get(&channel).copied().unwrap_or(0)
    }

    /// Subscriptions opened but not yet released
    pub fn active(&self) -> usize {
        let opened: usize = self.opened.values().sum();
        let released: usize = self.released.values().sum();
        opened.saturating_sub(released)
    }
}

#[derive(Debug, Default)]
pub struct SdkProbe {
    state: Mutex<ProbeState>,
}

impl SdkProbe {
    pub fn snapshot(&self) -> ProbeState {
        self.state.lock().clone()
    }

    fn record_login(&self) {
        self.state.lock().logins += 1;
    }

    fn record_logout(&self) {
        self.state.lock().logouts += 1;
    }

    fn record_open(&self, channel: Channel) {
        *self.state.lock().opened.entry(channel).or_default() += 1;
    }

    fn record_release(&self, channel: Channel) {
        *self.state.lock().released.entry(channel).or_default() += 1;
    }
}

/// Factory for simulated SDK handles, with failure injection
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    profile: Profile,
    capabilities: SdkCapabilities,
    login_error: Option<String>,
    failing_subscribes: Vec<Channel>,
    failing_releases: Vec<Channel>,
    probe: Arc<SdkProbe>,
}

impl SimulatedBackend {
    pub fn new(profile: Profile) -> Self {
        Self {
            profile,
            capabilities: SdkCapabilities::full(),
            login_error: None,
            failing_subscribes: Vec::new(),
            failing_releases: Vec::new(),
            probe: Arc::new(SdkProbe::default()),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Profile::from_name(name).map(Self::new)
    }

    pub fn with_capabilities(mut self, capabilities: SdkCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn fail_login(mut self, message: impl Into<String>) -> Self {
        self.login_error = Some(message.into());
        self
    }

    pub fn fail_subscribe(mut self, channel: Channel) -> Self {
        self.failing_subscribes.push(channel);
        self
    }

    pub fn fail_release(mut self, channel: Channel) -> Self {
        self.failing_releases.push(channel);
        self
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    /// Shared counters; stays valid across every handle this backend creates
    pub fn probe(&self) -> Arc<SdkProbe> {
        self.probe.clone()
    }
}

impl SdkFactory for SimulatedBackend {
    fn create(&self, device_id: &str) -> Result<Box<dyn DeviceSdk>> {
        debug!("Creating simulated SDK handle for device {}", device_id);
        Ok(Box::new(SimulatedSdk {
            backend: self.clone(),
            device_id: device_id.to_string(),
            epoch_ms: chrono::Utc::now().timestamp_millis(),
            started: tokio::time::Instant::now(),
        }))
    }
}

struct SimulatedSdk {
    backend: SimulatedBackend,
    device_id: String,
    epoch_ms: i64,
    started: tokio::time::Instant,
}

impl SimulatedSdk {
    fn supports(&self, channel: Channel) -> bool {
        let caps = self.backend.capabilities;
        match channel {
            Channel::Calm | Channel::Focus => true,
            Channel::Attention => caps.has_attention,
            Channel::Brainwaves => caps.has_brainwaves,
            Channel::BrainwavesRaw => caps.has_raw_brainwaves,
        }
    }

    fn source(&self, channel: Channel) -> Option<Source> {
        let (seed, base) = match self.backend.profile {
            Profile::Offline => return None,
            Profile::Stuck { value } => {
                return Some(match channel {
                    Channel::Brainwaves | Channel::BrainwavesRaw => Source::Waves {
                        rng: StdRng::seed_from_u64(0),
                        jitter: 0.0,
                    },
                    _ => Source::Constant(value),
                })
            }
            Profile::Biological { seed } => (seed ^ channel_salt(channel), channel_base(channel)),
            // Same seed and base for every probability channel.
            Profile::Mirrored { seed } => (seed, 0.5),
        };
        let rng = StdRng::seed_from_u64(seed);
        Some(match channel {
            Channel::Brainwaves | Channel::BrainwavesRaw => Source::Waves { rng, jitter: 0.1 },
            _ => Source::Noisy { rng, base, spread: 0.15 },
        })
    }
}

fn channel_salt(channel: Channel) -> u64 {
    let index = match channel {
        Channel::Calm => 1,
        Channel::Focus => 2,
        Channel::Attention => 3,
        Channel::Brainwaves => 4,
        Channel::BrainwavesRaw => 5,
    };
    index * 0x9E37_79B9_7F4A_7C15
}

fn channel_base(channel: Channel) -> f64 {
    match channel {
        Channel::Calm => 0.55,
        Channel::Focus => 0.45,
        _ => 0.5,
    }
}

enum Source {
    Noisy { rng: StdRng, base: f64, spread: f64 },
    Constant(f64),
    Waves { rng: StdRng, jitter: f64 },
}

impl Source {
    fn next(&mut self, timestamp: i64) -> ChannelData {
        match self {
            Source::Noisy { rng, base, spread } => {
                let probability = (*base + rng.gen_range(-*spread..*spread)).clamp(0.0, 1.0);
                ChannelData::Probability(Sample { probability, timestamp })
            }
            Source::Constant(value) => ChannelData::Probability(Sample {
                probability: *value,
                timestamp,
            }),
            Source::Waves { rng, jitter } => {
                let mut band = |level: f64| -> Option<Vec<f64>> {
                    Some(
                        (0..WAVE_SAMPLES)
                            .map(|_| {
                                if *jitter > 0.0 {
                                    level + rng.gen_range(-*jitter..*jitter)
                                } else {
                                    level
                                }
                            })
                            .collect(),
                    )
                };
                ChannelData::Waves(RawBrainwaves {
                    delta: band(0.8),
                    theta: band(0.6),
                    alpha: band(0.5),
                    beta: band(0.3),
                    gamma: band(0.15),
                })
            }
        }
    }
}

impl DeviceSdk for SimulatedSdk {
    fn capabilities(&self) -> SdkCapabilities {
        self.backend.capabilities
    }

    fn login(&self, credentials: &Credentials) -> Result<()> {
        if let Some(message) = &self.backend.login_error {
            return Err(CrownwatchError::sdk(message.clone()));
        }
        if credentials.email.is_empty() || credentials.password().is_empty() {
            return Err(CrownwatchError::sdk("login rejected: email and password are required"));
        }
        info!("Simulated login for {} on device {}", credentials.email, self.device_id);
        self.backend.probe.record_login();
        Ok(())
    }

    fn logout(&self) -> Result<()> {
        self.backend.probe.record_logout();
        Ok(())
    }

    fn subscribe(&self, channel: Channel, callback: DataCallback) -> Result<Subscription> {
        if self.backend.failing_subscribes.contains(&channel) {
            return Err(CrownwatchError::subscription(
                channel.name(),
                "simulated subscribe failure",
            ));
        }
        if !self.supports(channel) {
            return Err(CrownwatchError::subscription(
                channel.name(),
                "not supported by this device",
            ));
        }

        let task: Option<JoinHandle<()>> = match self.source(channel) {
            Some(mut source) => {
                let runtime = tokio::runtime::Handle::try_current()
                    .map_err(|e| CrownwatchError::SdkUnavailable(e.to_string()))?;
                let epoch_ms = self.epoch_ms;
                let started = self.started;
                Some(runtime.spawn(async move {
                    let mut ticker = tokio::time::interval(DEFAULT_INTERVAL);
                    loop {
                        ticker.tick().await;
                        let timestamp = epoch_ms + started.elapsed().as_millis() as i64;
                        callback(source.next(timestamp));
                    }
                }))
            }
            None => None,
        };

        self.backend.probe.record_open(channel);
        let probe = self.backend.probe.clone();
        let fail = self.backend.failing_releases.contains(&channel);
        Ok(Subscription::new(channel, move || {
            if let Some(task) = task {
                task.abort();
            }
            probe.record_release(channel);
            if fail {
                Err(CrownwatchError::sdk(format!("simulated unsubscribe failure on {}", channel)))
            } else {
                Ok(())
            }
        }))
    }

    fn device_info(&self) -> Result<DeviceInfo> {
        if !self.backend.capabilities.has_device_info {
            return Err(CrownwatchError::SdkUnavailable("getInfo not supported".to_string()));
        }
        Ok(DeviceInfo {
            device_id: Some(self.device_id.clone()),
            model: "Crown".to_string(),
            firmware: "simulated".to_string(),
            battery: "87%".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn collector() -> (DataCallback, mpsc::UnboundedReceiver<ChannelData>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Box::new(move |data| { let _ = tx.send(data); }), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_biological_cadence() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 7 });
        let sdk = backend.create("crown-1").unwrap();
        let (callback, mut rx) = collector();
        let sub = sdk.subscribe(Channel::Calm, callback).unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        sub.release().unwrap();

        let mut timestamps = Vec::new();
        while let Ok(ChannelData::Probability(sample)) = rx.try_recv() {
            assert!((0.0..=1.0).contains(&sample.probability));
            timestamps.push(sample.timestamp);
        }
        assert_eq!(timestamps.len(), 5);
        assert!(timestamps.windows(2).all(|w| w[1] - w[0] == 250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_never_emits() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let sdk = backend.create("crown-1").unwrap();
        let (callback, mut rx) = collector();
        let _sub = sdk.subscribe(Channel::Focus, callback).unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_probe_tracks_subscriptions() {
        let backend = SimulatedBackend::new(Profile::Stuck { value: 0.5 });
        let probe = backend.probe();
        let sdk = backend.create("crown-1").unwrap();

        let calm = sdk.subscribe(Channel::Calm, Box::new(|_| {})).unwrap();
        let focus = sdk.subscribe(Channel::Focus, Box::new(|_| {})).unwrap();
        assert_eq!(probe.snapshot().active(), 2);

        calm.release().unwrap();
        drop(focus);
        let state = probe.snapshot();
        assert_eq!(state.released(Channel::Calm), 1);
        assert_eq!(state.released(Channel::Focus), 1);
        assert_eq!(state.active(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let backend = SimulatedBackend::new(Profile::Offline)
            .fail_login("bad password")
            .fail_subscribe(Channel::Focus);
        let sdk = backend.create("crown-1").unwrap();
        let creds = Credentials::new("me@example.com", "secret", "crown-1");

        assert!(sdk.login(&creds).is_err());
        assert!(sdk.subscribe(Channel::Calm, Box::new(|_| {})).is_ok());
        assert!(matches!(
            sdk.subscribe(Channel::Focus, Box::new(|_| {})),
            Err(CrownwatchError::Subscription { .. })
        ));
    }

    #[test]
    fn test_login_requires_password() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let probe = backend.probe();
        let sdk = backend.create("crown-1").unwrap();

        assert!(sdk.login(&Credentials::new("me@example.com", "", "crown-1")).is_err());
        assert_eq!(probe.snapshot().logins, 0);
        sdk.login(&Credentials::new("me@example.com", "secret", "crown-1")).unwrap();
        assert_eq!(probe.snapshot().logins, 1);
    }

    #[test]
    fn test_unsupported_channel_and_info() {
        let backend =
            SimulatedBackend::new(Profile::Offline).with_capabilities(SdkCapabilities::default());
        let sdk = backend.create("crown-1").unwrap();
        assert!(sdk.subscribe(Channel::BrainwavesRaw, Box::new(|_| {})).is_err());
        assert!(sdk.device_info().is_err());
    }

    #[test]
    fn test_profile_names() {
        assert!(matches!(Profile::from_name("stuck"), Ok(Profile::Stuck { .. })));
        assert!(matches!(Profile::from_name("offline"), Ok(Profile::Offline)));
        assert!(Profile::from_name("real").is_err());
    }
}
