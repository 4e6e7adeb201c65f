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

//! Connection health monitoring
//!
//! Tracks when live data last arrived from the worker. The monitor only
//! looks at data arrival; the device status reported by the worker plays
//! no part in it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection health state
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HealthState {
    /// Data is arriving
    Ok,
    /// No data for longer than the stale threshold
    Degraded,
}

/// Emitted once per state change
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HealthTransition {
    Degraded { silent_for: Duration },
    Restored,
}

#[derive(Debug)]
pub struct HealthMonitor {
    stale_after: Duration,
    state: HealthState,
    active: bool,
    last_data: Option<Instant>,
}

impl HealthMonitor {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            state: HealthState::Ok,
            active: false,
            last_data: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Arm the monitor. Monitoring start counts as the first arrival so a
    /// slow first sample is measured from here.
    pub fn start(&mut self, now: Instant) {
        debug!("Health monitor armed");
        self.active = true;
        self.state = HealthState::Ok;
        self.last_data = Some(now);
    }

    pub fn stop(&mut self) {
        if self.active {
            debug!("Health monitor disarmed");
        }
        self.active = false;
        self.state = HealthState::Ok;
    }

    /// Note a calm, focus or brainwaves event. Ignored while inactive.
    pub fn record_data(&mut self, now: Instant) {
        if self.active {
            self.last_data = Some(now);
        }
    }

    /// Called once per tick. Returns a transition only on the tick where the
    /// state actually changes.
    pub fn check(&mut self, now: Instant) -> Option<HealthTransition> {
        if !self.active {
            return None;
        }
        let silent_for = now.saturating_duration_since(self.last_data?);

        match self.state {
            HealthState::Ok if silent_for > self.stale_after => {
                warn!("No data received for {}s", silent_for.as_secs());
                self.state = HealthState::Degraded;
                Some(HealthTransition::Degraded { silent_for })
            }
            HealthState::Degraded if silent_for <= self.stale_after => {
                info!("Data flow restored");
                self.state = HealthState::Ok;
                Some(HealthTransition::Restored)
            }
            _ => None,
        }
    }
}
