//! Headset detection protocol
//!
//! Runs once per `connect`: streams calm and focus into an
//! [`AuthenticityClassifier`] until the signal is accepted or the ceiling is
//! reached. The test subscriptions are released on every exit path.

use std::time::Duration;

use cw_error::Result;
use cw_protocol::{validate_probability, DeviceStatus, Verdict};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::authenticity::{AuthenticityClassifier, Metric};
use crate::constants::{authenticity, detection};
use crate::sdk::{ChannelData, DeviceSdk, Sample, SubscriptionSet};
use crate::settings::DetectionSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionConfig {
    pub ceiling: Duration,
    /// Whole elapsed seconds after which an authentic verdict ends the run
    pub early_accept_after: Duration,
    pub poll_interval: Duration,
    pub min_samples: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            ceiling: detection::CEILING,
            early_accept_after: detection::EARLY_ACCEPT_AFTER,
            poll_interval: detection::POLL_INTERVAL,
            min_samples: authenticity::MIN_SAMPLES,
        }
    }
}

impl From<&DetectionSettings> for DetectionConfig {
    fn from(settings: &DetectionSettings) -> Self {
        Self {
            ceiling: settings.ceiling(),
            early_accept_after: settings.early_accept_after(),
            poll_interval: settings.poll_interval(),
            min_samples: settings.min_samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub success: bool,
    pub verdict: Verdict,
    pub status: DeviceStatus,
    pub elapsed: Duration,
}

/// Run the detection protocol against an authenticated SDK handle
pub async fn run_detection(sdk: &dyn DeviceSdk, config: &DetectionConfig) -> DetectionOutcome {
    let started = Instant::now();
    let (tx, mut rx) = mpsc::unbounded_channel::<(Metric, Sample)>();
    let mut classifier =
        AuthenticityClassifier::with_limits(authenticity::WINDOW_CAPACITY, config.min_samples);
    let mut subscriptions = SubscriptionSet::new();

    info!("Detecting headset signal for up to {:?}", config.ceiling);
    let result = collect(
        sdk,
        config,
        tx,
        &mut rx,
        &mut classifier,
        &mut subscriptions,
        started,
    )
    .await;

    let failures = subscriptions.release_all();
    if failures > 0 {
        warn!("{} detection subscription(s) failed to release", failures);
    }

    let elapsed = started.elapsed();
    match result {
        Ok(early) => {
            let verdict = early.unwrap_or_else(|| {
                while let Ok((metric, sample)) = rx.try_recv() {
                    classifier.add_sample(metric, sample.probability, sample.timestamp);
                }
                classifier.evaluate()
            });
            let data_points = classifier.data_points();
            info!(
                "Detection finished after {:?}: {} ({} data points)",
                elapsed, verdict.reason, data_points
            );
            DetectionOutcome {
                success: verdict.is_authentic,
                status: DeviceStatus::from_verdict(&verdict, data_points),
                verdict,
                elapsed,
            }
        }
        Err(e) => {
            warn!("Detection failed: {}", e);
            DetectionOutcome {
                success: false,
                verdict: Verdict::rejected(format!("error: {}", e)),
                status: DeviceStatus::detection_error(e.to_string()),
                elapsed,
            }
        }
    }
}

/// Subscribe and poll. Returns the verdict when the run concluded early.
async fn collect(
    sdk: &dyn DeviceSdk,
    config: &DetectionConfig,
    tx: mpsc::UnboundedSender<(Metric, Sample)>,
    rx: &mut mpsc::UnboundedReceiver<(Metric, Sample)>,
    classifier: &mut AuthenticityClassifier,
    subscriptions: &mut SubscriptionSet,
    started: Instant,
) -> Result<Option<Verdict>> {
    for metric in Metric::ALL {
        let tx = tx.clone();
        let subscription = sdk.subscribe(
            metric.into(),
            Box::new(move |data| match data {
                ChannelData::Probability(sample) => {
                    if let Err(e) = validate_probability(sample.probability) {
                        warn!("Dropping {} test sample: {}", metric, e);
                        return;
                    }
                    let _ = tx.send((metric, sample));
                }
                ChannelData::Waves(_) => {
                    warn!("Unexpected wave payload on {} test channel", metric)
                }
            }),
        )?;
        subscriptions.push(subscription);
    }

    let early_secs = config.early_accept_after.as_secs();
    loop {
        let elapsed = started.elapsed();
        if elapsed >= config.ceiling {
            return Ok(None);
        }

        while let Ok((metric, sample)) = rx.try_recv() {
            classifier.add_sample(metric, sample.probability, sample.timestamp);
        }
        debug!(
            "{}s/{}s - {} data points",
            elapsed.as_secs(),
            config.ceiling.as_secs(),
            classifier.data_points()
        );

        if elapsed.as_secs() >= early_secs && classifier.data_points() >= config.min_samples {
            let verdict = classifier.evaluate();
            if verdict.is_authentic {
                info!("Early detection succeeded at {}s", elapsed.as_secs());
                return Ok(Some(verdict));
            }
        }

        tokio::time::sleep(config.poll_interval.min(config.ceiling - elapsed)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::simulated::{Profile, SimulatedBackend};
    use crate::sdk::{Channel, SdkFactory};
    use crate::settings::Credentials;
    use cw_protocol::SignalQuality;

    fn connected(backend: &SimulatedBackend) -> Box<dyn DeviceSdk> {
        let sdk = backend.create("crown-test").unwrap();
        sdk.login(&Credentials::new("me@example.com", "pw", "crown-test")).unwrap();
        sdk
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_headset_times_out() {
        let backend = SimulatedBackend::new(Profile::Offline);
        let sdk = connected(&backend);

        let outcome = run_detection(sdk.as_ref(), &DetectionConfig::default()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.verdict.reason, "insufficient data");
        assert_eq!(outcome.status.signal(), SignalQuality::NoBiologicalData);
        assert!(!outcome.status.online());
        assert_eq!(outcome.elapsed, Duration::from_secs(20));
        assert_eq!(backend.probe().snapshot().active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_headset_accepted_early() {
        let backend = SimulatedBackend::new(Profile::Biological { seed: 42 });
        let sdk = connected(&backend);

        let outcome = run_detection(sdk.as_ref(), &DetectionConfig::default()).await;

        assert!(outcome.success, "rejected: {}", outcome.verdict.reason);
        assert!(outcome.status.online());
        assert_eq!(outcome.status.signal(), SignalQuality::Excellent);
        assert_eq!(outcome.status.data_points(), 10);
        assert!(outcome.elapsed >= Duration::from_secs(8));
        assert!(outcome.elapsed < Duration::from_secs(10));

        let probe = backend.probe().snapshot();
        assert_eq!(probe.released(Channel::Calm), 1);
        assert_eq!(probe.released(Channel::Focus), 1);
        assert_eq!(probe.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_releases_opened_channels() {
        let backend =
            SimulatedBackend::new(Profile::Biological { seed: 1 }).fail_subscribe(Channel::Focus);
        let sdk = connected(&backend);

        let outcome = run_detection(sdk.as_ref(), &DetectionConfig::default()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.status.signal(), SignalQuality::DetectionError);
        assert!(outcome.status.validation().starts_with("error:"));
        let probe = backend.probe().snapshot();
        assert_eq!(probe.opened(Channel::Calm), 1);
        assert_eq!(probe.released(Channel::Calm), 1);
        assert_eq!(probe.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_release_does_not_spoil_verdict() {
        let backend =
            SimulatedBackend::new(Profile::Biological { seed: 42 }).fail_release(Channel::Calm);
        let sdk = connected(&backend);

        let outcome = run_detection(sdk.as_ref(), &DetectionConfig::default()).await;

        assert!(outcome.success, "rejected: {}", outcome.verdict.reason);
        assert!(outcome.status.online());
        let probe = backend.probe().snapshot();
        assert_eq!(probe.released(Channel::Calm), 1);
        assert_eq!(probe.released(Channel::Focus), 1);
        assert_eq!(probe.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_streams_rejected() {
        for profile in [Profile::Mirrored { seed: 9 }, Profile::Stuck { value: 0.5 }] {
            let backend = SimulatedBackend::new(profile);
            let sdk = connected(&backend);

            let outcome = run_detection(sdk.as_ref(), &DetectionConfig::default()).await;

            assert!(!outcome.success, "{:?} was accepted", profile);
            assert_eq!(outcome.status.signal(), SignalQuality::NoBiologicalData);
            assert_eq!(outcome.elapsed, Duration::from_secs(20));
            assert_eq!(backend.probe().snapshot().active(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_ceiling_from_settings() {
        let settings = DetectionSettings {
            ceiling_secs: 3,
            early_accept_secs: 1,
            ..DetectionSettings::default()
        };
        let backend = SimulatedBackend::new(Profile::Offline);
        let sdk = connected(&backend);

        let outcome = run_detection(sdk.as_ref(), &DetectionConfig::from(&settings)).await;
        assert_eq!(outcome.elapsed, Duration::from_secs(3));
    }
}
