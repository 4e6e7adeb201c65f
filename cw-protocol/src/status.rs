use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Detection variant reported in every status record
pub const VALIDATION_METHOD: &str = "strict_corrected";

const NOT_TESTED: &str = "not_tested";
const UNKNOWN: &str = "unknown";

/// Authenticity decision plus the reason behind it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_authentic: bool,
    pub reason: String,
}

impl Verdict {
    pub fn authentic() -> Self {
        Self {
            is_authentic: true,
            reason: "authentic".to_string(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            is_authentic: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    Disconnected,
    Excellent,
    NoBiologicalData,
    DetectionError,
}

/// Point-in-time snapshot of the headset's state.
///
/// Fields are private: the only way to obtain an `online` status is
/// [`DeviceStatus::from_verdict`] with an authentic verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    online: bool,
    signal: SignalQuality,
    validation: String,
    data_points: usize,
    validation_method: String,
    battery: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_detection: Option<DateTime<Utc>>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self::disconnected()
    }
}

impl DeviceStatus {
    pub fn disconnected() -> Self {
        Self {
            online: false,
            signal: SignalQuality::Disconnected,
            validation: NOT_TESTED.to_string(),
            data_points: 0,
            validation_method: VALIDATION_METHOD.to_string(),
            battery: UNKNOWN.to_string(),
            last_detection: None,
        }
    }

    /// Status produced by a finished detection run
    pub fn from_verdict(verdict: &Verdict, data_points: usize) -> Self {
        let signal = if verdict.is_authentic {
            SignalQuality::Excellent
        } else {
            SignalQuality::NoBiologicalData
        };
        Self {
            online: verdict.is_authentic,
            signal,
            validation: verdict.reason.clone(),
            data_points,
            validation_method: VALIDATION_METHOD.to_string(),
            battery: UNKNOWN.to_string(),
            last_detection: Some(Utc::now()),
        }
    }

    /// Status for a detection run that failed with an error
    pub fn detection_error(message: impl Into<String>) -> Self {
        Self {
            online: false,
            signal: SignalQuality::DetectionError,
            validation: format!("error: {}", message.into()),
            data_points: 0,
            validation_method: VALIDATION_METHOD.to_string(),
            battery: UNKNOWN.to_string(),
            last_detection: Some(Utc::now()),
        }
    }

    pub fn with_battery(mut self, battery: impl Into<String>) -> Self {
        self.battery = battery.into();
        self
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn signal(&self) -> SignalQuality {
        self.signal
    }

    pub fn validation(&self) -> &str {
        &self.validation
    }

    pub fn data_points(&self) -> usize {
        self.data_points
    }

    pub fn validation_method(&self) -> &str {
        &self.validation_method
    }

    pub fn battery(&self) -> &str {
        &self.battery
    }

    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        self.last_detection
    }
}

/// Hardware description reported after a successful connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub model: String,
    pub firmware: String,
    pub battery: String,
}

impl DeviceInfo {
    /// Used when the SDK cannot describe the device
    pub fn fallback(device_id: Option<String>) -> Self {
        Self {
            device_id,
            model: "Crown".to_string(),
            firmware: UNKNOWN.to_string(),
            battery: UNKNOWN.to_string(),
        }
    }
}
