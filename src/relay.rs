/*
 * This file is part of Crownwatch.
 *
 * Copyright (C) 2025 Crownwatch contributors
 *
 * Crownwatch is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Crownwatch is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Crownwatch. If not, see <https://www.gnu.org/licenses/>.
 */

//! Observer relays
//!
//! The coordinator hands every drained event, every metric snapshot and
//! every health notice to its relays. Relays must not block.

use chrono::{DateTime, Utc};
use cw_protocol::{EventEnvelope, EventPayload};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::metrics::MetricSnapshot;

/// Default broadcast capacity. Observers that fall further behind lose the oldest messages.
pub const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    ConnectionWarning,
    ConnectionRestored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum RelayMessage {
    Event(EventEnvelope),
    Metrics(MetricSnapshot),
    Notice(Notice),
}

#[cfg_attr(test, mockall::automock)]
pub trait EventRelay: Send {
    fn relay(&self, message: &RelayMessage);
}

/// Fan-out to any number of async observers
#[derive(Debug, Clone)]
pub struct BroadcastRelay {
    sender: broadcast::Sender<RelayMessage>,
}

impl Default for BroadcastRelay {
    fn default() -> Self {
        Self::new(BROADCAST_CAPACITY)
    }
}

impl BroadcastRelay {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayMessage> {
        self.sender.subscribe()
    }

    pub fn observers(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventRelay for BroadcastRelay {
    fn relay(&self, message: &RelayMessage) {
        // No observers is not an error.
        if self.sender.send(message.clone()).is_err() {
            trace!("No observers for relayed message");
        }
    }
}

/// Prints a one-line summary per message to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleRelay {
    /// Also print raw events, not just metric snapshots and notices
    pub verbose: bool,
}

impl ConsoleRelay {
    pub fn format(&self, message: &RelayMessage) -> Option<String> {
        match message {
            RelayMessage::Notice(notice) => Some(format!(
                "[{}] {}",
                notice.timestamp.format("%H:%M:%S"),
                notice.message
            )),
            RelayMessage::Metrics(MetricSnapshot::Calm(point)) => Some(format!(
                "calm   {:5.1}%  avg {:5.1}%  {}",
                point.value, point.average, point.trend
            )),
            RelayMessage::Metrics(MetricSnapshot::Focus(point)) => Some(format!(
                "focus  {:5.1}%  avg {:5.1}%  {}",
                point.value, point.average, point.trend
            )),
            RelayMessage::Metrics(MetricSnapshot::Brainwaves { bands }) => {
                if bands.is_empty() {
                    return None;
                }
                let parts: Vec<String> = bands
                    .iter()
                    .map(|(name, point)| format!("{} {:.3}", name, point.value))
                    .collect();
                Some(format!("waves  {}", parts.join("  ")))
            }
            RelayMessage::Event(event) if self.verbose => Some(describe_event(event)),
            RelayMessage::Event(_) => None,
        }
    }
}

fn describe_event(event: &EventEnvelope) -> String {
    match &event.payload {
        EventPayload::StatusUpdate(update) => format!(
            "status connected={} monitoring={} online={}",
            update.connected, update.monitoring, update.device_online
        ),
        payload => format!("{} at {}", payload.type_name(), event.timestamp.to_rfc3339()),
    }
}

impl EventRelay for ConsoleRelay {
    fn relay(&self, message: &RelayMessage) {
        if let Some(line) = self.format(message) {
            println!("{}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{SeriesPoint, Trend};
    use cw_protocol::{DeviceStatus, MetricReading};

    fn calm_point() -> MetricSnapshot {
        MetricSnapshot::Calm(SeriesPoint {
            value: 62.5,
            average: 55.0,
            trend: Trend::Ascending,
        })
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_observer() {
        let relay = BroadcastRelay::default();
        let mut first = relay.subscribe();
        let mut second = relay.subscribe();
        assert_eq!(relay.observers(), 2);

        let notice = RelayMessage::Notice(Notice::new(NoticeKind::ConnectionWarning, "silent"));
        relay.relay(&notice);

        assert_eq!(first.recv().await.unwrap(), notice);
        assert_eq!(second.recv().await.unwrap(), notice);
    }

    #[test]
    fn test_broadcast_without_observers() {
        let relay = BroadcastRelay::new(4);
        relay.relay(&RelayMessage::Metrics(calm_point()));
        assert_eq!(relay.observers(), 0);
    }

    #[test]
    fn test_console_format() {
        let console = ConsoleRelay::default();
        let line = console.format(&RelayMessage::Metrics(calm_point())).unwrap();
        assert_eq!(line, "calm    62.5%  avg  55.0%  ascending");

        let event = EventEnvelope::new(
            EventPayload::Calm(MetricReading::new(0.6)),
            DeviceStatus::disconnected(),
        );
        assert!(console.format(&RelayMessage::Event(event.clone())).is_none());
        assert!(ConsoleRelay { verbose: true }
            .format(&RelayMessage::Event(event))
            .unwrap()
            .starts_with("calm at "));
    }

    #[test]
    fn test_relay_message_wire_format() {
        let json = serde_json::to_value(RelayMessage::Notice(Notice::new(
            NoticeKind::ConnectionRestored,
            "back",
        )))
        .unwrap();
        assert_eq!(json["kind"], "notice");
        assert_eq!(json["body"]["kind"], "connection_restored");
    }
}
