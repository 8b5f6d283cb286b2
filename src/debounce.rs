//! Edge-triggered alarm detection with a cooldown window.
//!
//! The `AlertDebouncer` is a two-state machine (`Idle`, `Alarmed`) fed with
//! normalized readings. It fires an `AlertEvent` when a leak is reported and
//! no event has been emitted within the cooldown window. Recovery
//! (`isLeakDetected == false`) returns it to `Idle` silently. The cooldown is
//! measured from the last emitted event and applies even across a recovery,
//! so a detector flapping on and off cannot produce a notification storm.
//!
//! The debouncer takes `&mut self`: it is owned by a single sequencer that
//! handles one reading to completion before the next.

use crate::core::{AlertEvent, SensorStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Cooldown used when none is configured.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Idle,
    Alarmed,
}

pub struct AlertDebouncer {
    cooldown: Duration,
    state: AlarmState,
    last_status: Option<SensorStatus>,
    /// Monotonic and wall time of the last emitted event
    last_emitted: Option<(Instant, DateTime<Utc>)>,
}

impl Default for AlertDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl AlertDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: AlarmState::Idle,
            last_status: None,
            last_emitted: None,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Feeds one reading, timestamped with the current monotonic time.
    pub fn observe(&mut self, status: SensorStatus) -> Option<AlertEvent> {
        self.observe_at(status, Instant::now())
    }

    /// Feeds one reading observed at `now`.
    ///
    /// # Returns
    /// * `Some(AlertEvent)` if the reading starts a new alert wave
    /// * `None` for recoveries, idle readings and suppressed repeats
    pub fn observe_at(&mut self, status: SensorStatus, now: Instant) -> Option<AlertEvent> {
        let previous = self
            .last_status
            .replace(status.clone())
            .unwrap_or_default();

        if !status.is_leak_detected {
            if self.state == AlarmState::Alarmed {
                info!(location = %status.location(), gas_level = status.gas_level, "Leak cleared, alarm returned to idle.");
            }
            self.state = AlarmState::Idle;
            return None;
        }

        let prior_state = self.state;
        self.state = AlarmState::Alarmed;

        let cooled_down = self
            .last_emitted
            .map_or(true, |(at, _)| now.saturating_duration_since(at) >= self.cooldown);

        if !cooled_down {
            metrics::counter!("alerts_suppressed_total").increment(1);
            debug!(
                prior_state = ?prior_state,
                location = %status.location(),
                "Leak reading inside cooldown window, alert suppressed."
            );
            return None;
        }

        let triggered_at = self.triggered_at(now);
        self.last_emitted = Some((now, triggered_at));
        metrics::counter!("alerts_triggered_total").increment(1);
        info!(
            prior_state = ?prior_state,
            location = %status.location(),
            gas_level = status.gas_level,
            "Gas leak detected, triggering alert."
        );

        Some(AlertEvent {
            previous,
            current: status,
            triggered_at,
        })
    }

    /// Wall time of an event observed at `now`.
    ///
    /// After the first event this advances by the monotonic time elapsed, so
    /// two `triggered_at` values are exactly as far apart as the debouncer
    /// measured them.
    fn triggered_at(&self, now: Instant) -> DateTime<Utc> {
        self.last_emitted
            .and_then(|(at, wall)| {
                let elapsed = chrono::Duration::from_std(now.saturating_duration_since(at)).ok()?;
                wall.checked_add_signed(elapsed)
            })
            .unwrap_or_else(Utc::now)
    }
}
