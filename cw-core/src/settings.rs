//! Application Settings
//!
//! Persistent settings stored as JSON in ~/.config/crownwatch/settings.json.
//! Credentials never live in this file; they come from the environment.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cw_error::{CrownwatchError, Result};
use tracing::debug;

use crate::constants::{detection, env, host, paths, worker};

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub detection: DetectionSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub host: HostSettings,

    #[serde(default)]
    pub worker: WorkerSettings,

    #[serde(default)]
    pub recording: RecordingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSettings {
    /// Hard limit on one detection run (seconds)
    #[serde(default = "default_ceiling_secs")]
    pub ceiling_secs: u64,

    /// Elapsed whole seconds after which an authentic verdict ends detection early
    #[serde(default = "default_early_accept_secs")]
    pub early_accept_secs: u64,

    #[serde(default = "default_detection_poll_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Events handled per tick
    #[serde(default = "default_drain_batch")]
    pub drain_batch: usize,

    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Worker executable; defaults to the binary next to the host executable
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default = "default_backend")]
    pub backend: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Where session recordings go; defaults to the user data directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_ceiling_secs() -> u64 {
    detection::CEILING.as_secs()
}

fn default_early_accept_secs() -> u64 {
    detection::EARLY_ACCEPT_AFTER.as_secs()
}

fn default_detection_poll_ms() -> u64 {
    detection::POLL_INTERVAL.as_millis() as u64
}

fn default_min_samples() -> usize {
    crate::constants::authenticity::MIN_SAMPLES
}

fn default_stale_after_secs() -> u64 {
    host::STALE_AFTER.as_secs()
}

fn default_drain_batch() -> usize {
    host::DRAIN_BATCH
}

fn default_tick_interval_ms() -> u64 {
    host::TICK_INTERVAL.as_millis() as u64
}

fn default_connect_timeout_secs() -> u64 {
    host::CONNECT_TIMEOUT.as_secs()
}

fn default_status_timeout_secs() -> u64 {
    host::STATUS_TIMEOUT.as_secs()
}

fn default_command_timeout_secs() -> u64 {
    host::COMMAND_TIMEOUT.as_secs()
}

fn default_backend() -> String {
    worker::DEFAULT_BACKEND.to_string()
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            ceiling_secs: default_ceiling_secs(),
            early_accept_secs: default_early_accept_secs(),
            poll_interval_ms: default_detection_poll_ms(),
            min_samples: default_min_samples(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            drain_batch: default_drain_batch(),
            tick_interval_ms: default_tick_interval_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            status_timeout_secs: default_status_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            executable: None,
            backend: default_backend(),
        }
    }
}

impl DetectionSettings {
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.ceiling_secs)
    }

    pub fn early_accept_after(&self) -> Duration {
        Duration::from_secs(self.early_accept_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl HealthSettings {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

impl HostSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl RecordingSettings {
    /// Configured directory, or `<data_dir>/crownwatch/sessions`
    pub fn resolve_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.directory {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join(paths::APP_DIR).join(paths::SESSIONS_DIR))
            .ok_or_else(|| CrownwatchError::config("Could not determine data directory"))
    }
}

impl Settings {
    /// Reject combinations the detection protocol and host loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let d = &self.detection;
        if d.ceiling_secs == 0 {
            return Err(CrownwatchError::invalid_config(
                "detection.ceiling_secs",
                "must be greater than zero",
            ));
        }
        if d.early_accept_secs > d.ceiling_secs {
            return Err(CrownwatchError::invalid_config(
                "detection.early_accept_secs",
                format!(
                    "{} exceeds the detection ceiling of {}s",
                    d.early_accept_secs, d.ceiling_secs
                ),
            ));
        }
        if d.poll_interval_ms == 0 {
            return Err(CrownwatchError::invalid_config(
                "detection.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if d.min_samples < 2 {
            return Err(CrownwatchError::invalid_config(
                "detection.min_samples",
                "at least 2 samples are needed",
            ));
        }
        if self.health.stale_after_secs == 0 {
            return Err(CrownwatchError::invalid_config(
                "health.stale_after_secs",
                "must be greater than zero",
            ));
        }
        let h = &self.host;
        if h.drain_batch == 0 {
            return Err(CrownwatchError::invalid_config(
                "host.drain_batch",
                "must be greater than zero",
            ));
        }
        if h.tick_interval_ms == 0 {
            return Err(CrownwatchError::invalid_config(
                "host.tick_interval_ms",
                "must be greater than zero",
            ));
        }
        if h.connect_timeout_secs <= d.ceiling_secs {
            return Err(CrownwatchError::invalid_config(
                "host.connect_timeout_secs",
                "must be longer than the detection ceiling",
            ));
        }
        if self.worker.backend.trim().is_empty() {
            return Err(CrownwatchError::invalid_config("worker.backend", "must not be empty"));
        }
        Ok(())
    }

    /// Load settings from a specific file; a missing file yields defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            CrownwatchError::config(format!("Failed to read settings file: {}", e))
        })?;

        let settings: Settings = serde_json::from_str(&content).map_err(|e| {
            CrownwatchError::config(format!("Failed to parse settings JSON: {}", e))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&get_settings_path()?)
    }
}

/// `<config_dir>/crownwatch/settings.json`
pub fn get_settings_path() -> Result<PathBuf> {
    let dir = dirs::config_dir()
        .map(|d| d.join(paths::APP_DIR))
        .ok_or_else(|| CrownwatchError::config("Could not determine config directory"))?;
    Ok(dir.join(paths::SETTINGS_FILE))
}

/// Account credentials and target device
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    password: String,
    pub device_id: String,
}

impl Credentials {
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            device_id: device_id.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Read credentials from the environment; every missing variable is named
    pub fn from_env() -> Result<Self> {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let email = read(env::EMAIL);
        let password = read(env::PASSWORD);
        let device_id = read(env::DEVICE_ID);

        match (email, password, device_id) {
            (Some(email), Some(password), Some(device_id)) => {
                Ok(Self::new(email, password, device_id))
            }
            (email, password, device_id) => {
                let missing: Vec<&str> = [
                    (email.is_none(), env::EMAIL),
                    (password.is_none(), env::PASSWORD),
                    (device_id.is_none(), env::DEVICE_ID),
                ]
                .into_iter()
                .filter_map(|(absent, name)| absent.then_some(name))
                .collect();
                Err(CrownwatchError::MissingConfig(format!(
                    "environment variables not set: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Load a `.env` file into the process environment.
///
/// Variables already set win. Returns the file that was loaded, if any.
pub fn load_env_file(path: Option<&Path>) -> Option<PathBuf> {
    let loaded = match path {
        Some(p) => dotenvy::from_path(p).map(|_| p.to_path_buf()),
        None => dotenvy::dotenv(),
    };
    match loaded {
        Ok(p) => {
            debug!("Loaded environment from {}", p.display());
            Some(p)
        }
        Err(e) => {
            debug!("No .env file loaded: {}", e);
            None
        }
    }
}
