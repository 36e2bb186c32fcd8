//! Continuous lock-screen flow.
//!
//! A [`LockScreenSession`] owns one [`ContinuousTracker`] and one
//! [`CommitmentGate`]. Two independent sources drive it: accepted fixes from
//! the tracker, and a periodic tick (5 s by default) that re-evaluates the
//! gate so the time rule can release without any movement. Every change is
//! published as a [`LockScreenStatus`] on a `watch` channel for the UI.
//!
//! The session can be driven by hand ([`LockScreenSession::next_update`],
//! [`LockScreenSession::apply`], [`LockScreenSession::tick`]) or left to
//! [`LockScreenSession::run`].

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::Settlement;
use crate::commitment::{evaluate_outcome, CommitmentGate, Conclusion, GateDecision, Outcome};
use crate::error::{CoreError, DatabaseError, LocationError};
use crate::events::Event;
use crate::location::{ContinuousTracker, Fix, FixDisposition, TrackerStats, TrackingPolicy};

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What the lock screen shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockScreenStatus {
    pub decision: GateDecision,
    /// Human-readable form of `decision`.
    pub message: String,
    pub stats: TrackerStats,
    pub latest: Option<Fix>,
    pub outcome: Option<Outcome>,
    /// Whether the platform subscription is live.
    pub tracking: bool,
}

fn snapshot(gate: &CommitmentGate, tracker: &ContinuousTracker) -> LockScreenStatus {
    let decision = gate.decision();
    LockScreenStatus {
        decision,
        message: decision.describe(),
        stats: tracker.stats(),
        latest: tracker.latest().cloned(),
        outcome: gate.outcome(),
        tracking: tracker.is_running(),
    }
}

/// Live gate for one commitment.
pub struct LockScreenSession {
    tracker: ContinuousTracker,
    gate: CommitmentGate,
    policy: TrackingPolicy,
    settlement: Settlement,
    status: watch::Sender<LockScreenStatus>,
    events: Option<mpsc::UnboundedSender<Event>>,
    clock: Clock,
}

impl LockScreenSession {
    pub(crate) fn new(
        tracker: ContinuousTracker,
        gate: CommitmentGate,
        policy: TrackingPolicy,
        settlement: Settlement,
    ) -> Self {
        let (status, _) = watch::channel(snapshot(&gate, &tracker));
        Self {
            tracker,
            gate,
            policy,
            settlement,
            status,
            events: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the wall clock [`LockScreenSession::run`] reads.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Receiver of status snapshots. Holds the latest one immediately.
    pub fn subscribe(&self) -> watch::Receiver<LockScreenStatus> {
        self.status.subscribe()
    }

    /// Stream of every event the session produces.
    ///
    /// Call before [`LockScreenSession::start`] to also see errors reported
    /// while subscribing. A second call replaces the first stream.
    pub fn events(&mut self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    pub fn status(&self) -> LockScreenStatus {
        self.status.borrow().clone()
    }

    pub fn decision(&self) -> GateDecision {
        self.gate.decision()
    }

    pub fn gate(&self) -> &CommitmentGate {
        &self.gate
    }

    pub fn tracker(&self) -> &ContinuousTracker {
        &self.tracker
    }

    pub fn is_terminal(&self) -> bool {
        self.gate.is_terminal()
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Open the location subscription and evaluate the gate once.
    ///
    /// Returns `false` if the platform refused; the gate keeps working on
    /// time alone.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        let sink = self.events.clone();
        let clock = self.clock.clone();
        self.tracker.on_error(move |err: &LocationError| {
            if let Some(sink) = &sink {
                let _ = sink.send(Event::location_failed(err, clock()));
            }
        });

        let started = self.tracker.start(self.policy.clone());
        self.tick(now);
        started
    }

    /// Close the location subscription. The gate is left as it was.
    pub fn stop(&mut self) {
        self.tracker.stop();
        self.publish();
    }

    /// Wait for the next tracker update.
    ///
    /// Returns `None` once tracking has ended.
    pub async fn next_update(&mut self) -> Option<FixDisposition> {
        self.tracker.next_update().await
    }

    /// Fold one tracker update into the gate.
    pub fn apply(&mut self, disposition: &FixDisposition, now: DateTime<Utc>) {
        // Errors already went out through the tracker's error listener.
        if !matches!(disposition, FixDisposition::Failed(_)) {
            self.emit(Event::from_disposition(disposition, now));
        }
        self.tick(now);
    }

    /// Re-evaluate the gate at `now` against the latest accepted fix.
    pub fn tick(&mut self, now: DateTime<Utc>) {
        if let Some(event) = self.gate.tick(now, self.tracker.latest()) {
            self.emit(event);
        }
        self.publish();
    }

    /// Conclude from the latest accepted fix.
    ///
    /// A resolution is persisted, its notice sent, and tracking stopped.
    ///
    /// # Errors
    ///
    /// `LocationError::PositionUnavailable` if no fix was accepted yet,
    /// `DatabaseError::AlreadyResolved` once terminal, or a storage failure.
    pub async fn conclude(&mut self, now: DateTime<Utc>) -> Result<Conclusion, CoreError> {
        if self.gate.is_terminal() {
            return Err(DatabaseError::AlreadyResolved(self.gate.commitment().id.clone()).into());
        }
        let fix = self.tracker.latest().cloned().ok_or_else(|| {
            LocationError::PositionUnavailable("no accepted fix yet".into())
        })?;

        let conclusion = evaluate_outcome(now, fix.coordinate(), self.gate.commitment());
        if let Conclusion::Resolved(outcome) = conclusion {
            let id = self.gate.commitment().id.clone();
            self.settlement
                .settle(&id, outcome, fix.coordinate(), now)
                .await?;
            self.gate.conclude(now, &fix);
            self.emit(Event::CommitmentResolved {
                commitment_id: id,
                outcome,
                at: now,
            });
            self.tracker.stop();
        }
        self.publish();
        Ok(conclusion)
    }

    /// Give up on the commitment. No notice is sent.
    ///
    /// # Errors
    ///
    /// `DatabaseError::AlreadyResolved` once terminal, or a storage failure.
    pub fn abandon(&mut self, now: DateTime<Utc>) -> Result<(), CoreError> {
        let id = self.gate.commitment().id.clone();
        let event = self.settlement.abandon(&id, now)?;
        self.gate.abandon();
        self.emit(event);
        self.stop();
        Ok(())
    }

    /// Drive the session until `shutdown` resolves or the commitment is
    /// terminal.
    ///
    /// Starts tracking if it is not running. When the platform ends the
    /// stream the gate keeps ticking on time alone.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if self.gate.is_terminal() {
            return;
        }
        if !self.tracker.is_running() {
            let now = (self.clock)();
            self.start(now);
        }

        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.gate.config().tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.gate.is_terminal() {
            if self.tracker.is_stop_pending() {
                debug!("tracking stop requested");
                self.stop();
            }
            tokio::select! {
                () = &mut shutdown => {
                    debug!("lock screen shut down");
                    break;
                }
                _ = ticker.tick() => {
                    let now = (self.clock)();
                    self.tick(now);
                }
                update = self.tracker.next_update(), if self.tracker.is_running() => {
                    let now = (self.clock)();
                    match update {
                        Some(disposition) => self.apply(&disposition, now),
                        None => {
                            info!("location stream ended; gate continues on time");
                            self.publish();
                        }
                    }
                }
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(sink) = &self.events {
            let _ = sink.send(event);
        }
    }

    fn publish(&self) {
        self.status.send_replace(snapshot(&self.gate, &self.tracker));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::{Commitment, CommitmentStatus, GateConfig, LockReason};
    use crate::geo::Coordinate;
    use crate::location::SimulatedSource;
    use crate::penalty::LogPenaltyTrigger;
    use crate::storage::CommitmentDb;
    use crate::verification::VerificationOrchestrator;
    use chrono::{Duration, TimeZone};

    fn start_point() -> Coordinate {
        Coordinate::new(35.0, 139.0)
    }

    fn deadline() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 17, 6, 0, 0).unwrap()
    }

    fn fix(meters: f64, timestamp_ms: i64) -> Fix {
        Fix::at(start_point().offset(meters, 0.0), 10.0, timestamp_ms)
    }

    struct Setup {
        source: Arc<SimulatedSource>,
        db: Arc<CommitmentDb>,
        orchestrator: VerificationOrchestrator,
        commitment: Commitment,
    }

    fn setup() -> Setup {
        let source = Arc::new(SimulatedSource::new());
        let db = Arc::new(CommitmentDb::open_memory().unwrap());
        let commitment = Commitment::new(
            start_point(),
            deadline() - Duration::hours(8),
            deadline(),
            100.0,
            500,
        )
        .unwrap();
        db.create(&commitment).unwrap();
        let orchestrator =
            VerificationOrchestrator::new(source.clone(), db.clone(), Arc::new(LogPenaltyTrigger));
        Setup {
            source,
            db,
            orchestrator,
            commitment,
        }
    }

    async fn feed(session: &mut LockScreenSession, source: &SimulatedSource, fix: Fix, now: DateTime<Utc>) {
        source.emit_fix(fix);
        let disposition = session.next_update().await.unwrap();
        session.apply(&disposition, now);
    }

    #[tokio::test]
    async fn time_rule_holds_until_unlock_window() {
        let s = setup();
        let early = deadline() - Duration::minutes(40);
        let mut session = s.orchestrator.lock_screen(&s.commitment.id, early).unwrap();
        assert!(session.start(early));

        feed(&mut session, &s.source, fix(500.0, 1_000), early).await;
        assert!(matches!(
            session.decision(),
            GateDecision::Locked(LockReason::TimeRestricted { .. })
        ));

        session.tick(deadline() - Duration::minutes(20));
        assert_eq!(session.decision(), GateDecision::Unlockable);
    }

    #[tokio::test]
    async fn status_channel_follows_movement() {
        let s = setup();
        let now = deadline() - Duration::minutes(20);
        let mut session = s.orchestrator.lock_screen(&s.commitment.id, now).unwrap();
        let status = session.subscribe();
        let mut events = session.events();
        session.start(now);

        feed(&mut session, &s.source, fix(0.0, 1_000), now).await;
        assert!(matches!(
            status.borrow().decision,
            GateDecision::Locked(LockReason::DistanceRestricted { .. })
        ));

        feed(&mut session, &s.source, fix(150.0, 2_000), now).await;
        let current = status.borrow().clone();
        assert_eq!(current.decision, GateDecision::Unlockable);
        assert_eq!(current.message, "Unlockable");
        assert_eq!(current.stats.sample_count, 2);
        assert!(current.tracking);
        assert_eq!(current.latest.map(|f| f.timestamp_ms), Some(2_000));

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event);
        }
        assert!(kinds
            .iter()
            .any(|e| matches!(e, Event::GateChanged { decision: GateDecision::Unlockable, .. })));
        assert_eq!(
            kinds
                .iter()
                .filter(|e| matches!(e, Event::FixAccepted { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn conclude_needs_a_fix() {
        let s = setup();
        let now = deadline() + Duration::minutes(1);
        let mut session = s.orchestrator.lock_screen(&s.commitment.id, now).unwrap();
        session.start(now);

        let err = session.conclude(now).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::Location(LocationError::PositionUnavailable(_))
        ));
        assert!(s.db.get(&s.commitment.id).unwrap().unwrap().is_open());
    }

    #[tokio::test]
    async fn conclude_persists_and_stops_tracking() {
        let s = setup();
        let now = deadline() - Duration::minutes(10);
        let mut session = s.orchestrator.lock_screen(&s.commitment.id, now).unwrap();
        session.start(now);
        feed(&mut session, &s.source, fix(150.0, 1_000), now).await;

        let conclusion = session.conclude(now).await.unwrap();
        assert!(matches!(
            conclusion,
            Conclusion::Resolved(Outcome::Success { .. })
        ));
        assert!(session.is_terminal());
        assert!(!session.status().tracking);
        assert_eq!(s.source.active_subscriptions(), 0);
        assert_eq!(
            s.db.get(&s.commitment.id).unwrap().unwrap().status,
            CommitmentStatus::Succeeded
        );

        assert!(matches!(
            session.conclude(now).await,
            Err(CoreError::Database(DatabaseError::AlreadyResolved(_)))
        ));
    }

    #[tokio::test]
    async fn abandon_closes_without_outcome() {
        let s = setup();
        let now = deadline();
        let mut session = s.orchestrator.lock_screen(&s.commitment.id, now).unwrap();
        session.start(now);
        session.abandon(now).unwrap();

        assert!(session.is_terminal());
        assert_eq!(session.status().outcome, None);
        assert_eq!(
            s.db.get(&s.commitment.id).unwrap().unwrap().status,
            CommitmentStatus::Abandoned
        );
    }

    #[tokio::test]
    async fn unsupported_platform_still_ticks_time_gate() {
        let db = Arc::new(CommitmentDb::open_memory().unwrap());
        let commitment = Commitment::new(
            start_point(),
            deadline() - Duration::hours(8),
            deadline(),
            100.0,
            0,
        )
        .unwrap();
        db.create(&commitment).unwrap();
        let orchestrator = VerificationOrchestrator::new(
            Arc::new(SimulatedSource::unsupported()),
            db,
            Arc::new(LogPenaltyTrigger),
        )
        .with_gate_config(GateConfig {
            distance_gate_enabled: false,
            ..GateConfig::default()
        });

        let early = deadline() - Duration::hours(1);
        let mut session = orchestrator.lock_screen(&commitment.id, early).unwrap();
        let mut events = session.events();
        assert!(!session.start(early));
        assert!(matches!(
            events.try_recv(),
            Ok(Event::LocationFailed { .. })
        ));

        session.tick(deadline() - Duration::minutes(10));
        assert_eq!(session.decision(), GateDecision::Unlockable);
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_and_tracks_until_shutdown() {
        let s = setup();
        let base = deadline() - Duration::minutes(35);
        let origin = tokio::time::Instant::now();
        let mut session = s
            .orchestrator
            .lock_screen(&s.commitment.id, base)
            .unwrap()
            .with_clock(move || {
                base + Duration::from_std(origin.elapsed()).unwrap_or_else(|_| Duration::zero())
            });
        let status = session.subscribe();
        session.start(base);

        let source = s.source.clone();
        let driver = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            source.emit_fix(fix(0.0, 1_000));
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            source.emit_fix(fix(150.0, 2_000));
        });

        // Ten minutes of wall time crosses the unlock window at T-30min.
        session
            .run(tokio::time::sleep(std::time::Duration::from_secs(600)))
            .await;
        driver.await.unwrap();

        assert_eq!(status.borrow().decision, GateDecision::Unlockable);
        assert_eq!(session.tracker().history().len(), 2);
        assert!(!session.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_handle_closes_subscription_while_running() {
        let s = setup();
        let now = deadline() - Duration::minutes(20);
        let mut session = s.orchestrator.lock_screen(&s.commitment.id, now).unwrap();
        session.start(now);
        assert_eq!(s.source.active_subscriptions(), 1);

        let handle = session.tracker().stop_handle();
        let requester = async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            handle.stop();
        };
        tokio::join!(
            session.run(tokio::time::sleep(std::time::Duration::from_secs(30))),
            requester
        );

        assert_eq!(s.source.active_subscriptions(), 0);
        assert!(!session.status().tracking);
        assert!(!session.is_terminal());
    }

    #[tokio::test]
    async fn run_returns_at_once_when_terminal() {
        let s = setup();
        let now = deadline();
        let mut session = s.orchestrator.lock_screen(&s.commitment.id, now).unwrap();
        session.abandon(now).unwrap();
        session.run(std::future::pending::<()>()).await;
        assert_eq!(s.source.active_subscriptions(), 0);
    }
}
