//! Worker protocol for Crownwatch
//!
//! The host service and the device worker exchange JSON lines over the
//! worker's stdio. Three logical channels are carried:
//!
//! - commands (host -> worker), one in flight at a time, numbered by `seq`
//! - responses (worker -> host), exactly one per command, echoing its `seq`
//! - events (worker -> host), an unbounded stream of typed payloads
//!
//! Responses and events share the worker's stdout and are told apart by
//! the [`WorkerFrame`] tag.

use serde::{Deserialize, Serialize};

mod event;
mod framing;
mod status;

pub use event::{BandStats, BandSummaries, EventEnvelope, EventPayload, MetricReading, StatusUpdate};
pub use framing::{decode_line, encode_line, read_line_bounded, WorkerFrame};
pub use status::{DeviceInfo, DeviceStatus, SignalQuality, Verdict, VALIDATION_METHOD};

/// Maximum message size for one protocol line (8KB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024;

/// Sequence number reserved for unsolicited worker reports (fatal init errors,
/// undecodable commands). Real commands start at 1.
pub const UNSOLICITED_SEQ: u64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandEnvelope {
    /// Sequence number assigned by the coordinator
    pub seq: u64,
    #[serde(flatten)]
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(seq: u64, command: Command) -> Self {
        Self { seq, command }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    Connect,
    StartMonitoring,
    StopMonitoring,
    CheckStatus,
    Disconnect,
    Quit,
}

impl Command {
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::Connect => "connect",
            Command::StartMonitoring => "start_monitoring",
            Command::StopMonitoring => "stop_monitoring",
            Command::CheckStatus => "check_status",
            Command::Disconnect => "disconnect",
            Command::Quit => "quit",
        }
    }

    /// Whether the worker answers this command. `quit` ends the loop silently.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Command::Quit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    /// Sequence number of the command this answers
    pub seq: u64,
    #[serde(flatten)]
    pub response: Response,
}

impl ResponseEnvelope {
    pub fn new(seq: u64, response: Response) -> Self {
        Self { seq, response }
    }

    pub fn unsolicited(response: Response) -> Self {
        Self::new(UNSOLICITED_SEQ, response)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status")]
pub enum Response {
    #[serde(rename = "ok")]
    Ok(ResponseData),
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        help: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_status: Option<DeviceStatus>,
    },
}

/// Flat response payload; which fields are set depends on the command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResponseData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_status: Option<DeviceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResponseData {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn connected(connected: bool) -> Self {
        Self {
            connected: Some(connected),
            ..Self::default()
        }
    }

    pub fn monitoring(monitoring: bool) -> Self {
        Self {
            monitoring: Some(monitoring),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.device_status = Some(status);
        self
    }

    pub fn with_info(mut self, info: DeviceInfo) -> Self {
        self.device_info = Some(info);
        self
    }

    pub fn with_monitoring(mut self, monitoring: bool) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(ResponseData::none())
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error {
            message: msg.into(),
            help: None,
            device_status: None,
        }
    }

    /// Failure carrying a remediation hint and the status that caused it
    pub fn rejected(msg: impl Into<String>, help: impl Into<String>, status: DeviceStatus) -> Self {
        Response::Error {
            message: msg.into(),
            help: Some(help.into()),
            device_status: Some(status),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Response::Ok(data) => data.message.as_deref(),
            Response::Error { message, .. } => Some(message),
        }
    }

    pub fn device_status(&self) -> Option<&DeviceStatus> {
        match self {
            Response::Ok(data) => data.device_status.as_ref(),
            Response::Error { device_status, .. } => device_status.as_ref(),
        }
    }
}

/// Validate a metric probability before it enters a window or an event
pub fn validate_probability(probability: f64) -> Result<(), String> {
    if !probability.is_finite() {
        return Err(format!("Probability is not finite: {}", probability));
    }
    if !(0.0..=1.0).contains(&probability) {
        return Err(format!("Probability out of range (0-1): {}", probability));
    }
    Ok(())
}
