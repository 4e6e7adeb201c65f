//! Vendor device SDK seam
//!
//! The headset SDK is consumed as an opaque capability: log in, log out,
//! subscribe to a named channel and get back an unsubscribe handle, and
//! receive pushed samples on a callback. Everything the worker knows about
//! the SDK goes through [`DeviceSdk`].

pub mod simulated;

use std::fmt;

use cw_error::Result;
use cw_protocol::DeviceInfo;
use serde::Serialize;
use tracing::{debug, warn};

use crate::authenticity::Metric;
use crate::settings::Credentials;

/// Channels the SDK can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Calm,
    Focus,
    Attention,
    Brainwaves,
    BrainwavesRaw,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Calm => "calm",
            Channel::Focus => "focus",
            Channel::Attention => "attention",
            Channel::Brainwaves => "brainwaves",
            Channel::BrainwavesRaw => "brainwaves_raw",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<Metric> for Channel {
    fn from(metric: Metric) -> Self {
        match metric {
            Metric::Calm => Channel::Calm,
            Metric::Focus => Channel::Focus,
        }
    }
}

/// One probability sample pushed by the SDK
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub probability: f64,
    /// Milliseconds since the Unix epoch, as stamped by the device
    pub timestamp: i64,
}

/// Raw per-band arrays; bands the device did not report are `None`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawBrainwaves {
    pub delta: Option<Vec<f64>>,
    pub theta: Option<Vec<f64>>,
    pub alpha: Option<Vec<f64>>,
    pub beta: Option<Vec<f64>>,
    pub gamma: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Probability(Sample),
    Waves(RawBrainwaves),
}

/// Callback invoked from the SDK's own delivery context
pub type DataCallback = Box<dyn Fn(ChannelData) + Send + Sync>;

/// What the connected SDK supports, resolved once per session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SdkCapabilities {
    pub has_attention: bool,
    pub has_brainwaves: bool,
    pub has_raw_brainwaves: bool,
    pub has_device_info: bool,
}

impl SdkCapabilities {
    pub fn full() -> Self {
        Self {
            has_attention: true,
            has_brainwaves: true,
            has_raw_brainwaves: true,
            has_device_info: true,
        }
    }

    /// Wave channel to stream while monitoring, raw preferred
    pub fn wave_channel(&self) -> Option<Channel> {
        if self.has_raw_brainwaves {
            Some(Channel::BrainwavesRaw)
        } else if self.has_brainwaves {
            Some(Channel::Brainwaves)
        } else {
            None
        }
    }
}

type ReleaseFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Unsubscribe handle for one channel.
///
/// Released at most once: explicitly through [`Subscription::release`], or
/// on drop if never released.
pub struct Subscription {
    channel: Channel,
    release: Option<ReleaseFn>,
}

impl Subscription {
    pub fn new<F>(channel: Channel, release: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            channel,
            release: Some(Box::new(release)),
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn release(mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => release(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("released", &self.release.is_none())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Err(e) = release() {
                warn!("Failed to release {} subscription on drop: {}", self.channel, e);
            }
        }
    }
}

/// Subscriptions held together and torn down best-effort
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.subscriptions.iter().map(Subscription::channel).collect()
    }

    /// Release every handle; a failing release is logged and the rest still run.
    /// Returns the number of failures.
    pub fn release_all(&mut self) -> usize {
        let mut failures = 0;
        for subscription in self.subscriptions.drain(..) {
            let channel = subscription.channel();
            match subscription.release() {
                Ok(()) => debug!("Released {} subscription", channel),
                Err(e) => {
                    warn!("Failed to release {} subscription: {}", channel, e);
                    failures += 1;
                }
            }
        }
        failures
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Authenticated handle to one headset
pub trait DeviceSdk: Send + Sync {
    fn capabilities(&self) -> SdkCapabilities;

    fn login(&self, credentials: &Credentials) -> Result<()>;

    fn logout(&self) -> Result<()>;

    fn subscribe(&self, channel: Channel, callback: DataCallback) -> Result<Subscription>;

    /// Only meaningful when `capabilities().has_device_info`
    fn device_info(&self) -> Result<DeviceInfo>;
}

/// Creates a fresh SDK handle for every connect attempt
pub trait SdkFactory: Send + Sync {
    fn create(&self, device_id: &str) -> Result<Box<dyn DeviceSdk>>;
}
