//! Core activity state machine implementation
//!
//! Converts the aggregate camera/microphone signal into transitions between
//! Idle, Active, and Cooldown. The machine owns no timer: callers feed it
//! every activity change plus a periodic tick so cooldown expiry is noticed.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::events::CommandCategory;

/// The three possible activity states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivityState {
    /// No call in progress
    #[default]
    Idle,
    /// Camera or microphone in use
    Active,
    /// Activity stopped, waiting out the idle delay
    Cooldown,
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityState::Idle => write!(f, "Idle"),
            ActivityState::Active => write!(f, "Active"),
            ActivityState::Cooldown => write!(f, "Cooldown"),
        }
    }
}

/// The state machine that debounces the activity signal
#[derive(Debug)]
pub struct StateMachine {
    /// Current state
    state: ActivityState,
    /// Set exactly while in Cooldown
    cooldown_started_at: Option<Instant>,
    /// How long activity must stay off before Idle fires
    idle_delay: Duration,
}

impl StateMachine {
    /// Create a new state machine in Idle
    pub fn new(idle_delay: Duration) -> Self {
        Self {
            state: ActivityState::Idle,
            cooldown_started_at: None,
            idle_delay,
        }
    }

    /// Get the current state
    pub fn state(&self) -> ActivityState {
        self.state
    }

    /// When the current cooldown window opened, if cooling down
    #[cfg(test)]
    pub fn cooldown_started_at(&self) -> Option<Instant> {
        self.cooldown_started_at
    }

    #[cfg(test)]
    pub fn idle_delay(&self) -> Duration {
        self.idle_delay
    }

    /// Feed the current activity value observed at `now`.
    ///
    /// Returns the category whose commands should be sent, if this call
    /// completed a transition that warrants one. At most one category is
    /// emitted per call.
    pub fn update(&mut self, active: bool, now: Instant) -> Option<CommandCategory> {
        match (self.state, active) {
            (ActivityState::Idle, true) => {
                self.transition_to(ActivityState::Active, None);
                Some(CommandCategory::Active)
            }
            (ActivityState::Idle, false) | (ActivityState::Active, true) => None,
            (ActivityState::Active, false) => {
                self.transition_to(ActivityState::Cooldown, Some(now));
                None
            }
            (ActivityState::Cooldown, true) => {
                self.transition_to(ActivityState::Active, None);
                None
            }
            (ActivityState::Cooldown, false) => {
                let started = self.cooldown_started_at?;
                let elapsed = now.saturating_duration_since(started);
                if elapsed >= self.idle_delay {
                    self.transition_to(ActivityState::Idle, None);
                    Some(CommandCategory::Idle)
                } else {
                    debug!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        idle_delay_secs = self.idle_delay.as_secs(),
                        "cooldown pending"
                    );
                    None
                }
            }
        }
    }

    /// Perform a state transition, keeping the cooldown timestamp in step
    fn transition_to(&mut self, new_state: ActivityState, cooldown_started_at: Option<Instant>) {
        info!(from = %self.state, to = %new_state, "activity state transition");
        self.state = new_state;
        self.cooldown_started_at = cooldown_started_at;
    }
}
