//! Crownwatch core library
//!
//! Signal authenticity classification, the headset detection protocol, the
//! device session state machine and the SDK seam they run against.

pub mod authenticity;
pub mod brainwaves;
pub mod constants;
pub mod detection;
pub mod sdk;
pub mod session;
pub mod settings;

pub use authenticity::{AuthenticityClassifier, Metric, SampleWindow};
pub use detection::{run_detection, DetectionConfig, DetectionOutcome};
pub use sdk::simulated::{Profile, SimulatedBackend};
pub use sdk::{Channel, DeviceSdk, SdkCapabilities, SdkFactory, Subscription, SubscriptionSet};
pub use session::{DeviceSession, SessionState, CONNECT_HELP};
pub use settings::{Credentials, Settings};

pub use cw_error::{CrownwatchError, Result};
