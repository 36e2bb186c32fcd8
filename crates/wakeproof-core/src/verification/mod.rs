//! Verification flows.
//!
//! [`VerificationOrchestrator`] glues the location side (one-shot
//! [`FixAcquirer`], or a [`ContinuousTracker`] through [`LockScreenSession`])
//! to the commitment side ([`evaluate_gate`], [`evaluate_outcome`]) and to
//! the outer world (the [`CommitmentStore`] and the [`PenaltyTrigger`]).
//!
//! A location error never produces an outcome. It is handed back to the
//! caller, who decides whether to retry or abandon.

mod lock_screen;

pub use lock_screen::{LockScreenSession, LockScreenStatus};

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::commitment::{
    evaluate_gate, evaluate_outcome, Commitment, CommitmentGate, Conclusion, GateConfig,
    GateDecision, LockReason, Outcome,
};
use crate::error::{CoreError, DatabaseError, LocationError};
use crate::events::Event;
use crate::geo::Coordinate;
use crate::location::{
    AcquisitionPolicy, ContinuousTracker, Fix, FixAcquirer, LocationSource, TrackingPolicy,
};
use crate::penalty::{PenaltyNotice, PenaltyTrigger};
use crate::storage::{CommitmentStore, Config, Resolution};

/// Everything a one-shot verification learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub commitment_id: String,
    /// Fix the verification was judged from.
    pub fix: Fix,
    pub decision: GateDecision,
    pub conclusion: Conclusion,
    pub verified_at: DateTime<Utc>,
}

/// Result callbacks for [`VerificationOrchestrator::verify`].
///
/// Exactly one method is called per verification.
pub trait VerificationListener {
    fn on_verified(&mut self, report: &VerificationReport);
    fn on_location_error(&mut self, error: &LocationError);
}

/// Writes a terminal outcome and sends its penalty notice.
///
/// Shared by the one-shot and lock-screen flows so both settle the same way.
#[derive(Clone)]
pub(crate) struct Settlement {
    store: Arc<dyn CommitmentStore>,
    penalty: Arc<dyn PenaltyTrigger>,
}

impl Settlement {
    /// Persist `outcome` and emit its notice.
    ///
    /// The store rejects a second resolution, so the notice goes out at most
    /// once. A notice that fails to deliver is logged; the recorded outcome
    /// stands.
    pub(crate) async fn settle(
        &self,
        commitment_id: &str,
        outcome: Outcome,
        final_location: Coordinate,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.store.record_outcome(
            commitment_id,
            &Resolution {
                outcome,
                final_location,
                resolved_at: at,
            },
        )?;
        self.record(
            commitment_id,
            &Event::CommitmentResolved {
                commitment_id: commitment_id.to_string(),
                outcome,
                at,
            },
        );

        let notice = PenaltyNotice::from_outcome(commitment_id, &outcome);
        if let Err(err) = self.penalty.emit(&notice).await {
            error!(
                commitment_id,
                trigger = self.penalty.name(),
                error = %err,
                "penalty notice not delivered"
            );
        }
        Ok(())
    }

    /// Close without an outcome and log it. No notice is sent.
    pub(crate) fn abandon(&self, commitment_id: &str, at: DateTime<Utc>) -> Result<Event, CoreError> {
        self.store.abandon(commitment_id, at)?;
        info!(commitment_id, "commitment abandoned");
        let event = Event::CommitmentAbandoned {
            commitment_id: commitment_id.to_string(),
            at,
        };
        self.record(commitment_id, &event);
        Ok(event)
    }

    /// Append to the audit log. Failures are logged, never propagated.
    pub(crate) fn record(&self, commitment_id: &str, event: &Event) {
        if let Err(err) = self.store.append_event(commitment_id, event) {
            warn!(commitment_id, error = %err, "failed to append commitment event");
        }
    }
}

/// Entry point for "prove you moved" flows.
pub struct VerificationOrchestrator {
    source: Arc<dyn LocationSource>,
    acquirer: FixAcquirer,
    settlement: Settlement,
    acquisition: AcquisitionPolicy,
    tracking: TrackingPolicy,
    gate: GateConfig,
}

impl VerificationOrchestrator {
    pub fn new(
        source: Arc<dyn LocationSource>,
        store: Arc<dyn CommitmentStore>,
        penalty: Arc<dyn PenaltyTrigger>,
    ) -> Self {
        Self {
            acquirer: FixAcquirer::new(source.clone()),
            source,
            settlement: Settlement { store, penalty },
            acquisition: AcquisitionPolicy::default(),
            tracking: TrackingPolicy::default(),
            gate: GateConfig::default(),
        }
    }

    /// Orchestrator using the policies from `config`.
    pub fn from_config(
        source: Arc<dyn LocationSource>,
        store: Arc<dyn CommitmentStore>,
        penalty: Arc<dyn PenaltyTrigger>,
        config: &Config,
    ) -> Self {
        Self::new(source, store, penalty)
            .with_acquisition_policy(config.acquisition.clone())
            .with_tracking_policy(config.tracking.clone())
            .with_gate_config(config.gate.clone())
    }

    pub fn with_acquisition_policy(mut self, policy: AcquisitionPolicy) -> Self {
        self.acquisition = policy;
        self
    }

    pub fn with_tracking_policy(mut self, policy: TrackingPolicy) -> Self {
        self.tracking = policy;
        self
    }

    pub fn with_gate_config(mut self, config: GateConfig) -> Self {
        self.gate = config;
        self
    }

    pub fn gate_config(&self) -> &GateConfig {
        &self.gate
    }

    /// Current interaction gate for `commitment`.
    ///
    /// While the time rule still locks, no position is requested. A closed
    /// commitment is never evaluated.
    ///
    /// # Errors
    ///
    /// `DatabaseError::AlreadyResolved` if the commitment is no longer open,
    /// or the acquisition error when a position was needed and none came.
    pub async fn check_gate(
        &self,
        commitment: &Commitment,
        now: DateTime<Utc>,
    ) -> Result<GateDecision, CoreError> {
        if !commitment.is_open() {
            return Err(DatabaseError::AlreadyResolved(commitment.id.clone()).into());
        }
        let without_fix = evaluate_gate(now, None, commitment, &self.gate);
        if matches!(
            without_fix,
            GateDecision::Locked(LockReason::TimeRestricted { .. })
        ) || !self.gate.distance_gate_enabled
        {
            return Ok(without_fix);
        }

        let fix = self.acquirer.acquire(&self.acquisition).await?;
        Ok(evaluate_gate(
            now,
            Some(fix.coordinate()),
            commitment,
            &self.gate,
        ))
    }

    /// Acquire a fix and try to conclude the commitment from it.
    ///
    /// # Errors
    ///
    /// `CoreError::Location` if no fix could be acquired (the commitment is
    /// left untouched), `DatabaseError::AlreadyResolved` if it is no longer
    /// open, or any storage failure.
    pub async fn conclude(
        &self,
        commitment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Conclusion, CoreError> {
        let commitment = self.load_open(commitment_id)?;
        let fix = match self.acquirer.acquire(&self.acquisition).await {
            Ok(fix) => fix,
            Err(err) => {
                self.settlement
                    .record(commitment_id, &Event::location_failed(&err, now));
                return Err(err.into());
            }
        };
        self.conclude_with_fix(&commitment, &fix, now).await
    }

    /// Conclude from a fix the caller already holds.
    ///
    /// A resolved conclusion is persisted and its penalty notice emitted. An
    /// open one changes nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the commitment is no longer open or storage fails.
    pub async fn conclude_with_fix(
        &self,
        commitment: &Commitment,
        fix: &Fix,
        now: DateTime<Utc>,
    ) -> Result<Conclusion, CoreError> {
        if !commitment.is_open() {
            return Err(DatabaseError::AlreadyResolved(commitment.id.clone()).into());
        }
        let conclusion = evaluate_outcome(now, fix.coordinate(), commitment);
        match conclusion {
            Conclusion::Resolved(outcome) => {
                info!(
                    commitment_id = %commitment.id,
                    success = outcome.is_success(),
                    displacement_m = outcome.displacement_meters(),
                    "commitment concluded"
                );
                self.settlement
                    .settle(&commitment.id, outcome, fix.coordinate(), now)
                    .await?;
            }
            Conclusion::Open {
                shortfall_meters, ..
            } => {
                info!(
                    commitment_id = %commitment.id,
                    shortfall_m = shortfall_meters,
                    "commitment still open"
                );
            }
        }
        Ok(conclusion)
    }

    /// One-shot verification with callbacks.
    ///
    /// Acquires a fix, evaluates gate and outcome, persists a resolution and
    /// then invokes exactly one of the listener's methods.
    ///
    /// # Errors
    ///
    /// Storage failures, including a commitment that is missing or no longer
    /// open. No listener method is called in that case.
    pub async fn verify<L>(
        &self,
        commitment_id: &str,
        now: DateTime<Utc>,
        listener: &mut L,
    ) -> Result<(), CoreError>
    where
        L: VerificationListener + Send + ?Sized,
    {
        let commitment = self.load_open(commitment_id)?;
        let fix = match self.acquirer.acquire(&self.acquisition).await {
            Ok(fix) => fix,
            Err(err) => {
                warn!(commitment_id, error = %err, "verification without a position");
                self.settlement
                    .record(commitment_id, &Event::location_failed(&err, now));
                listener.on_location_error(&err);
                return Ok(());
            }
        };

        let decision = evaluate_gate(now, Some(fix.coordinate()), &commitment, &self.gate);
        let conclusion = self.conclude_with_fix(&commitment, &fix, now).await?;
        listener.on_verified(&VerificationReport {
            commitment_id: commitment.id,
            fix,
            decision,
            conclusion,
            verified_at: now,
        });
        Ok(())
    }

    /// Close the commitment without an outcome. No penalty notice is sent.
    ///
    /// # Errors
    ///
    /// `DatabaseError::AlreadyResolved` if it was already terminal.
    pub fn abandon(&self, commitment_id: &str, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.settlement.abandon(commitment_id, now)?;
        Ok(())
    }

    /// Start a lock-screen session for an open commitment.
    ///
    /// # Errors
    ///
    /// Storage failures, or `DatabaseError::AlreadyResolved` if the
    /// commitment is not open.
    pub fn lock_screen(
        &self,
        commitment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LockScreenSession, CoreError> {
        let commitment = self.load_open(commitment_id)?;
        let gate = CommitmentGate::new(commitment, self.gate.clone(), now);
        let tracker = ContinuousTracker::new(self.source.clone());
        Ok(LockScreenSession::new(
            tracker,
            gate,
            self.tracking.clone(),
            self.settlement.clone(),
        ))
    }

    fn load_open(&self, commitment_id: &str) -> Result<Commitment, CoreError> {
        let commitment = self.settlement.store.load(commitment_id)?;
        if !commitment.is_open() {
            return Err(DatabaseError::AlreadyResolved(commitment.id).into());
        }
        Ok(commitment)
    }
}
