//! Constants and configuration defaults for Crownwatch
//!
//! Thresholds used by the authenticity classifier are contractual values;
//! timing values are defaults that settings may override.

use std::time::Duration;

/// Authenticity classifier thresholds
pub mod authenticity {
    /// Samples kept per metric window
    pub const WINDOW_CAPACITY: usize = 10;

    /// Samples required per metric before a verdict other than "insufficient data"
    pub const MIN_SAMPLES: usize = 5;

    /// Sample variance below which a metric counts as stuck
    pub const VARIANCE_FLOOR: f64 = 0.001;

    /// Band of plausible probabilities
    pub const RANGE_LOW: f64 = 0.05;
    pub const RANGE_HIGH: f64 = 0.95;

    /// Share of each metric's samples that must fall inside the band
    pub const RANGE_RATIO: f64 = 0.7;

    /// Intervals below this are faster than the headset can produce (ms)
    pub const MIN_INTERVAL_MS: i64 = 5;

    /// Intervals above this mean the stream stalled (ms)
    pub const MAX_INTERVAL_MS: i64 = 120_000;

    pub const TOO_FAST_RATIO: f64 = 0.5;
    pub const TOO_SLOW_RATIO: f64 = 0.3;

    /// |r| at or above this means both metrics come from one source
    pub const CORRELATION_CEILING: f64 = 0.95;

    /// Share of pooled samples that may sit exactly on 0.0 or 1.0
    pub const EXTREME_RATIO: f64 = 0.6;

    /// A metric with more samples than this needs more than `MAX_REPEATED_DISTINCT` values
    pub const REPETITION_MIN_LEN: usize = 5;
    pub const MAX_REPEATED_DISTINCT: usize = 2;

    /// Minimum lengths for pattern checks
    pub const ARITHMETIC_MIN_LEN: usize = 4;
    pub const PERIODIC_MIN_LEN: usize = 6;
}

/// Detection protocol timing
pub mod detection {
    use super::Duration;

    pub const CEILING: Duration = Duration::from_secs(20);
    pub const EARLY_ACCEPT_AFTER: Duration = Duration::from_secs(8);
    pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
}

/// Worker process
pub mod worker {
    use super::Duration;

    /// How long the command loop waits for a command before idling again
    pub const COMMAND_POLL: Duration = Duration::from_secs(1);

    /// Grace period between `quit` and a forced kill
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

    /// Name of the worker executable looked up next to the host binary
    pub const BINARY_NAME: &str = "crownwatch-worker";

    pub const DEFAULT_BACKEND: &str = "biological";
}

/// Host service
pub mod host {
    use super::Duration;

    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(35);
    pub const STATUS_TIMEOUT: Duration = Duration::from_secs(10);
    pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

    /// Events handled per tick
    pub const DRAIN_BATCH: usize = 10;
    pub const TICK_INTERVAL: Duration = Duration::from_millis(50);

    /// Monitoring without data for longer than this degrades health
    pub const STALE_AFTER: Duration = Duration::from_secs(30);

    /// Values kept for rolling metric statistics
    pub const METRICS_WINDOW: usize = 10;

    /// Trend slope threshold in percentage points per sample
    pub const TREND_THRESHOLD: f64 = 0.5;
}

/// Environment variables
pub mod env {
    pub const EMAIL: &str = "NEUROSITY_EMAIL";
    pub const PASSWORD: &str = "NEUROSITY_PASSWORD";
    pub const DEVICE_ID: &str = "NEUROSITY_DEVICE_ID";
    pub const LOG: &str = "CROWNWATCH_LOG";
}

/// File locations
pub mod paths {
    pub const APP_DIR: &str = "crownwatch";
    pub const SETTINGS_FILE: &str = "settings.json";
    pub const SESSIONS_DIR: &str = "sessions";
    pub const SESSION_PREFIX: &str = "crownwatch_session_";
}
