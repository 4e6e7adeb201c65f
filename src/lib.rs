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

//! Crownwatch - Neurosity Crown signal monitor
//!
//! Host side of the service: the session coordinator that drives the
//! device worker, connection health monitoring, rolling metric statistics,
//! observer relays and session recording.

pub mod cli;
pub mod coordinator;
pub mod health;
pub mod metrics;
pub mod recorder;
pub mod relay;
pub mod transport;

pub use coordinator::{SessionCoordinator, SessionView};
pub use health::{HealthMonitor, HealthState, HealthTransition};
pub use metrics::{MetricSnapshot, MetricsProcessor, SessionSummary, Trend};
pub use recorder::{JsonlRecorder, Recorder, RecordingSummary};
pub use relay::{BroadcastRelay, ConsoleRelay, EventRelay, Notice, NoticeKind, RelayMessage};
pub use transport::{WorkerLink, WorkerOptions};
