//! Commitment gate state machine.
//!
//! Two separate judgements are made over the same inputs:
//!
//! - the **interaction gate** ([`evaluate_gate`]): may the user unlock the
//!   screen right now?
//! - the **outcome** ([`evaluate_outcome`]): has the commitment been met,
//!   failed, or is it still open?
//!
//! Both are pure functions of `(now, current position, commitment, config)`.
//! [`CommitmentGate`] wraps them in a tick-driven state machine; it does not
//! own any timer, the caller invokes `tick()` periodically.
//!
//! ## State Transitions
//!
//! ```text
//! Locked(TimeRestricted) -> Locked(DistanceRestricted) <-> Unlockable
//!                     \__________________________________/
//!                                     |
//!                            conclude() -> Success | Failure (terminal)
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{Commitment, CommitmentStatus, Outcome, DEFAULT_REQUIRED_DISPLACEMENT_M};
use crate::error::ConfigError;
use crate::events::Event;
use crate::geo::{distance, Coordinate};
use crate::location::Fix;

/// Interaction-gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateConfig {
    /// Keep the screen locked until `unlock_window_minutes` before the deadline.
    #[serde(default = "default_true")]
    pub time_gate_enabled: bool,
    /// Keep the screen locked until the user has moved far enough.
    #[serde(default = "default_true")]
    pub distance_gate_enabled: bool,
    #[serde(default = "default_required_displacement")]
    pub required_displacement_meters: f64,
    #[serde(default = "default_unlock_window_minutes")]
    pub unlock_window_minutes: i64,
    /// Period of the lock-screen evaluation tick.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

/// One week.
pub const MAX_UNLOCK_WINDOW_MINUTES: i64 = 7 * 24 * 60;

fn default_true() -> bool {
    true
}
fn default_required_displacement() -> f64 {
    DEFAULT_REQUIRED_DISPLACEMENT_M
}
fn default_unlock_window_minutes() -> i64 {
    30
}
fn default_tick_interval_secs() -> u64 {
    5
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            time_gate_enabled: true,
            distance_gate_enabled: true,
            required_displacement_meters: default_required_displacement(),
            unlock_window_minutes: default_unlock_window_minutes(),
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

impl GateConfig {
    /// `None` when the configured window does not fit in a `Duration`.
    pub fn unlock_window(&self) -> Option<Duration> {
        Duration::try_minutes(self.unlock_window_minutes)
    }

    /// Reject settings the gate cannot honor.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` naming the offending `gate.*` key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0..=MAX_UNLOCK_WINDOW_MINUTES).contains(&self.unlock_window_minutes) {
            return Err(ConfigError::InvalidValue {
                key: "gate.unlock_window_minutes".into(),
                message: format!(
                    "{} is outside 0..={MAX_UNLOCK_WINDOW_MINUTES}",
                    self.unlock_window_minutes
                ),
            });
        }
        if !self.required_displacement_meters.is_finite()
            || self.required_displacement_meters < 0.0
        {
            return Err(ConfigError::InvalidValue {
                key: "gate.required_displacement_meters".into(),
                message: format!("{} is not a distance", self.required_displacement_meters),
            });
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LockReason {
    /// Too early: the unlock window has not opened yet.
    TimeRestricted { eta_to_unlock_ms: i64 },
    /// Not far enough from the start location. `displacement_meters` is
    /// `None` while no position is known.
    DistanceRestricted {
        displacement_meters: Option<f64>,
        shortfall_meters: f64,
    },
}

/// Interaction-gate verdict. Recomputed on every evaluation, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GateDecision {
    Locked(LockReason),
    Unlockable,
}

impl GateDecision {
    pub fn is_locked(&self) -> bool {
        matches!(self, GateDecision::Locked(_))
    }

    /// Same state and sub-reason, ignoring ETA and distance values.
    pub fn same_state(&self, other: &GateDecision) -> bool {
        match (self, other) {
            (GateDecision::Locked(a), GateDecision::Locked(b)) => {
                std::mem::discriminant(a) == std::mem::discriminant(b)
            }
            (GateDecision::Unlockable, GateDecision::Unlockable) => true,
            _ => false,
        }
    }

    /// Human-readable status line for the UI layer.
    pub fn describe(&self) -> String {
        match self {
            GateDecision::Unlockable => "Unlockable".to_string(),
            GateDecision::Locked(LockReason::TimeRestricted { eta_to_unlock_ms }) => {
                format!("Locked: unlocks in {}", format_eta(*eta_to_unlock_ms))
            }
            GateDecision::Locked(LockReason::DistanceRestricted {
                displacement_meters: None,
                ..
            }) => "Locked: waiting for a position fix".to_string(),
            GateDecision::Locked(LockReason::DistanceRestricted {
                displacement_meters: Some(moved),
                shortfall_meters,
            }) => format!(
                "Locked: moved {:.0} m, {:.0} m to go",
                moved, shortfall_meters
            ),
        }
    }
}

fn format_eta(ms: i64) -> String {
    let total_secs = (ms.max(0) + 999) / 1000;
    let (h, m, s) = (total_secs / 3600, (total_secs % 3600) / 60, total_secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Result of an explicit conclusion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Conclusion {
    Resolved(Outcome),
    /// Not far enough yet, but the deadline has not passed. Try again later.
    Open {
        displacement_meters: f64,
        shortfall_meters: f64,
    },
}

/// Interaction gate. The time rule takes precedence over the distance rule.
pub fn evaluate_gate(
    now: DateTime<Utc>,
    current: Option<Coordinate>,
    commitment: &Commitment,
    config: &GateConfig,
) -> GateDecision {
    if config.time_gate_enabled {
        // A window reaching before the representable range is already open.
        let unlock_at = config
            .unlock_window()
            .and_then(|window| commitment.deadline.checked_sub_signed(window));
        if let Some(unlock_at) = unlock_at.filter(|at| now < *at) {
            return GateDecision::Locked(LockReason::TimeRestricted {
                eta_to_unlock_ms: (unlock_at - now).num_milliseconds(),
            });
        }
    }

    if config.distance_gate_enabled {
        let required = config.required_displacement_meters;
        let displacement = current.map(|c| distance(c, commitment.start_location));
        match displacement {
            Some(d) if d >= required => {}
            _ => {
                return GateDecision::Locked(LockReason::DistanceRestricted {
                    displacement_meters: displacement,
                    shortfall_meters: required - displacement.unwrap_or(0.0),
                });
            }
        }
    }

    GateDecision::Unlockable
}

/// Outcome of a conclusion attempt at `now` from `current`.
pub fn evaluate_outcome(
    now: DateTime<Utc>,
    current: Coordinate,
    commitment: &Commitment,
) -> Conclusion {
    let d = distance(current, commitment.start_location);
    if d >= commitment.required_displacement_meters {
        Conclusion::Resolved(Outcome::Success {
            displacement_meters: d,
        })
    } else if now > commitment.deadline {
        Conclusion::Resolved(Outcome::Failure {
            displacement_meters: d,
        })
    } else {
        Conclusion::Open {
            displacement_meters: d,
            shortfall_meters: commitment.required_displacement_meters - d,
        }
    }
}

/// Gate state for one commitment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentGate {
    commitment: Commitment,
    config: GateConfig,
    decision: GateDecision,
    outcome: Option<Outcome>,
}

impl CommitmentGate {
    /// Starts locked: no position is known yet.
    pub fn new(commitment: Commitment, config: GateConfig, now: DateTime<Utc>) -> Self {
        let decision = evaluate_gate(now, None, &commitment, &config);
        let outcome = commitment.outcome();
        Self {
            commitment,
            config,
            decision,
            outcome,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn commitment(&self) -> &Commitment {
        &self.commitment
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn decision(&self) -> GateDecision {
        self.decision
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn is_terminal(&self) -> bool {
        self.commitment.status.is_terminal()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Re-evaluate the interaction gate.
    ///
    /// Returns `Some(Event::GateChanged)` when the state or lock reason
    /// changed. Does nothing once the commitment is terminal.
    pub fn tick(&mut self, now: DateTime<Utc>, latest: Option<&Fix>) -> Option<Event> {
        if self.is_terminal() {
            return None;
        }
        let next = evaluate_gate(
            now,
            latest.map(Fix::coordinate),
            &self.commitment,
            &self.config,
        );
        let changed = !self.decision.same_state(&next);
        self.decision = next;

        if !changed {
            return None;
        }
        info!(
            commitment_id = %self.commitment.id,
            decision = %next.describe(),
            "gate changed"
        );
        Some(Event::GateChanged {
            commitment_id: self.commitment.id.clone(),
            decision: next,
            at: now,
        })
    }

    /// Attempt to conclude the commitment from `fix`.
    ///
    /// Returns `None` if the commitment is already terminal. A resolved
    /// conclusion makes the gate terminal.
    pub fn conclude(&mut self, now: DateTime<Utc>, fix: &Fix) -> Option<Conclusion> {
        if self.is_terminal() {
            return None;
        }
        let conclusion = evaluate_outcome(now, fix.coordinate(), &self.commitment);
        if let Conclusion::Resolved(outcome) = conclusion {
            info!(
                commitment_id = %self.commitment.id,
                success = outcome.is_success(),
                displacement_m = outcome.displacement_meters(),
                "commitment resolved"
            );
            self.commitment.status = outcome.status();
            self.commitment.final_displacement_meters = Some(outcome.displacement_meters());
            self.outcome = Some(outcome);
        }
        Some(conclusion)
    }

    /// Give up on the commitment without an outcome.
    ///
    /// Returns `false` if it was already terminal.
    pub fn abandon(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.commitment.status = CommitmentStatus::Abandoned;
        true
    }
}
