//! Continuous tracking over a live platform subscription.
//!
//! The tracker owns a bounded fix history (ring buffer, oldest evicted first)
//! and is the only writer to it: fixes enter exclusively through the
//! subscription it opened. Callers drive it by awaiting
//! [`ContinuousTracker::next_update`]; listeners registered with
//! [`ContinuousTracker::on_fix`] / [`ContinuousTracker::on_error`] fire from
//! inside that call.
//!
//! Each raw fix is accuracy-gated, then ordering-gated (timestamp must be
//! strictly greater than the last accepted one), then appended and published.
//! No outlier filtering, smoothing or retrying happens here.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::filters::{filter_outliers, smooth, DEFAULT_MAX_SPEED_MPS, DEFAULT_SMOOTHING_WINDOW};
use super::{Fix, LocationError, LocationOptions, LocationSource, Subscription};
use crate::geo::distance;

/// Settings for one tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingPolicy {
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub maximum_age_ms: u64,
    #[serde(default = "default_min_accuracy_meters")]
    pub min_accuracy_meters: f64,
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
    /// Used by [`ContinuousTracker::filtered_history`] only.
    #[serde(default = "default_max_speed_mps")]
    pub max_speed_mps: f64,
    /// Used by [`ContinuousTracker::filtered_history`] only.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
}

fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_min_accuracy_meters() -> f64 {
    50.0
}
fn default_max_history_size() -> usize {
    10
}
fn default_max_speed_mps() -> f64 {
    DEFAULT_MAX_SPEED_MPS
}
fn default_smoothing_window() -> usize {
    DEFAULT_SMOOTHING_WINDOW
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: default_timeout_ms(),
            maximum_age_ms: 0,
            min_accuracy_meters: default_min_accuracy_meters(),
            max_history_size: default_max_history_size(),
            max_speed_mps: default_max_speed_mps(),
            smoothing_window: default_smoothing_window(),
        }
    }
}

impl TrackingPolicy {
    pub fn location_options(&self) -> LocationOptions {
        LocationOptions {
            high_accuracy: self.high_accuracy,
            timeout_ms: self.timeout_ms,
            maximum_age_ms: self.maximum_age_ms,
        }
    }
}

/// Why a raw fix never made it into history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DiscardReason {
    /// Negative or non-finite accuracy.
    InvalidAccuracy {
        accuracy_meters: f64,
    },
    LowAccuracy {
        accuracy_meters: f64,
        limit_meters: f64,
    },
    OutOfOrder {
        timestamp_ms: i64,
        last_timestamp_ms: i64,
    },
}

/// Result of processing one item from the subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FixDisposition {
    Accepted(Fix),
    Discarded(DiscardReason),
    Failed(LocationError),
}

/// Live statistics over the retained history.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackerStats {
    pub sample_count: usize,
    pub average_accuracy_meters: f64,
    pub total_distance_meters: f64,
    pub current_speed_mps: f64,
}

/// Requests a stop from inside a listener or from another task.
///
/// The tracker unsubscribes before it would invoke any further listener.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

type FixListener = Box<dyn FnMut(&Fix) + Send>;
type ErrorListener = Box<dyn FnMut(&LocationError) + Send>;

/// Bounded fix history fed by one platform subscription.
pub struct ContinuousTracker {
    source: Arc<dyn LocationSource>,
    policy: TrackingPolicy,
    subscription: Option<Subscription>,
    history: VecDeque<Fix>,
    stop: StopHandle,
    on_fix: Option<FixListener>,
    on_error: Option<ErrorListener>,
}

impl ContinuousTracker {
    pub fn new(source: Arc<dyn LocationSource>) -> Self {
        Self {
            source,
            policy: TrackingPolicy::default(),
            subscription: None,
            history: VecDeque::new(),
            stop: StopHandle::default(),
            on_fix: None,
            on_error: None,
        }
    }

    /// Listener for every accepted fix.
    pub fn on_fix(&mut self, listener: impl FnMut(&Fix) + Send + 'static) {
        self.on_fix = Some(Box::new(listener));
    }

    /// Listener for subscription failures, including a failed `start`.
    pub fn on_error(&mut self, listener: impl FnMut(&LocationError) + Send + 'static) {
        self.on_error = Some(Box::new(listener));
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn policy(&self) -> &TrackingPolicy {
        &self.policy
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Open the platform subscription.
    ///
    /// Returns `false` and notifies the error listener when the platform
    /// refuses. Calling while already running changes nothing.
    pub fn start(&mut self, policy: TrackingPolicy) -> bool {
        if self.is_running() {
            warn!("tracker already running; start ignored");
            return true;
        }
        // A stop requested but not yet honored still owns a subscription.
        self.stop();

        match self.source.subscribe(&policy.location_options()) {
            Ok(subscription) => {
                debug!(handle = subscription.handle.0, "tracking started");
                self.subscription = Some(subscription);
                self.policy = policy;
                self.history.clear();
                self.stop.reset();
                true
            }
            Err(err) => {
                warn!(error = %err, "tracking could not start");
                if let Some(listener) = self.on_error.as_mut() {
                    listener(&err);
                }
                false
            }
        }
    }

    /// Close the subscription. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(subscription) = self.subscription.take() {
            self.source.unsubscribe(subscription.handle);
            debug!(handle = subscription.handle.0, "tracking stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription.is_some() && !self.stop.is_stop_requested()
    }

    /// A stop was requested through a [`StopHandle`] but the subscription
    /// is still open.
    pub fn is_stop_pending(&self) -> bool {
        self.subscription.is_some() && self.stop.is_stop_requested()
    }

    /// Wait for and process the next platform update.
    ///
    /// Returns `None` once the tracker is stopped or the platform closed the
    /// stream. Fatal errors (`PermissionDenied`, `Unsupported`) end tracking
    /// after being reported.
    pub async fn next_update(&mut self) -> Option<FixDisposition> {
        self.honor_stop_request();
        let update = self.subscription.as_mut()?.updates.recv().await;

        let disposition = match update {
            None => {
                debug!("location stream closed by platform");
                self.stop();
                return None;
            }
            Some(Ok(fix)) => self.ingest(fix),
            Some(Err(err)) => self.fail(err),
        };
        self.honor_stop_request();
        Some(disposition)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn latest(&self) -> Option<&Fix> {
        self.history.back()
    }

    /// Snapshot of the retained history, oldest first.
    pub fn history(&self) -> Vec<Fix> {
        self.history.iter().cloned().collect()
    }

    /// History after outlier rejection and smoothing.
    pub fn filtered_history(&self) -> Vec<Fix> {
        let kept = filter_outliers(&self.history(), self.policy.max_speed_mps);
        smooth(&kept, self.policy.smoothing_window)
    }

    pub fn average_accuracy(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.history.iter().map(|f| f.accuracy_meters).sum();
        sum / self.history.len() as f64
    }

    /// Sum of consecutive distances across the retained, unfiltered history.
    pub fn total_distance(&self) -> f64 {
        self.history
            .iter()
            .zip(self.history.iter().skip(1))
            .map(|(a, b)| distance(a.coordinate(), b.coordinate()))
            .sum()
    }

    /// Speed between the last two retained fixes.
    pub fn current_speed(&self) -> f64 {
        let n = self.history.len();
        if n < 2 {
            return 0.0;
        }
        let (prev, last) = (&self.history[n - 2], &self.history[n - 1]);
        let elapsed_s = (last.timestamp_ms - prev.timestamp_ms) as f64 / 1000.0;
        if elapsed_s <= 0.0 {
            return 0.0;
        }
        distance(prev.coordinate(), last.coordinate()) / elapsed_s
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            sample_count: self.history.len(),
            average_accuracy_meters: self.average_accuracy(),
            total_distance_meters: self.total_distance(),
            current_speed_mps: self.current_speed(),
        }
    }

    // ── Internal ─────────────────────────────────────────────────────

    fn honor_stop_request(&mut self) {
        if self.stop.is_stop_requested() && self.subscription.is_some() {
            self.stop();
        }
    }

    fn ingest(&mut self, fix: Fix) -> FixDisposition {
        if !fix.has_valid_accuracy() {
            debug!(accuracy_m = fix.accuracy_meters, "fix discarded: invalid accuracy");
            return FixDisposition::Discarded(DiscardReason::InvalidAccuracy {
                accuracy_meters: fix.accuracy_meters,
            });
        }
        let accurate_enough = fix.accuracy_meters <= self.policy.min_accuracy_meters;
        if !accurate_enough {
            debug!(
                accuracy_m = fix.accuracy_meters,
                limit_m = self.policy.min_accuracy_meters,
                "fix discarded: low accuracy"
            );
            return FixDisposition::Discarded(DiscardReason::LowAccuracy {
                accuracy_meters: fix.accuracy_meters,
                limit_meters: self.policy.min_accuracy_meters,
            });
        }

        if let Some(last) = self.history.back() {
            if fix.timestamp_ms <= last.timestamp_ms {
                debug!(
                    timestamp_ms = fix.timestamp_ms,
                    last_timestamp_ms = last.timestamp_ms,
                    "fix discarded: out of order"
                );
                return FixDisposition::Discarded(DiscardReason::OutOfOrder {
                    timestamp_ms: fix.timestamp_ms,
                    last_timestamp_ms: last.timestamp_ms,
                });
            }
        }

        let capacity = self.policy.max_history_size.max(1);
        while self.history.len() >= capacity {
            self.history.pop_front();
        }
        self.history.push_back(fix.clone());

        if !self.stop.is_stop_requested() {
            if let Some(listener) = self.on_fix.as_mut() {
                listener(&fix);
            }
        }
        FixDisposition::Accepted(fix)
    }

    fn fail(&mut self, err: LocationError) -> FixDisposition {
        warn!(error = %err, "location stream error");
        if !self.stop.is_stop_requested() {
            if let Some(listener) = self.on_error.as_mut() {
                listener(&err);
            }
        }
        if err.is_fatal() {
            self.stop();
        }
        FixDisposition::Failed(err)
    }
}

impl Drop for ContinuousTracker {
    fn drop(&mut self) {
        self.stop();
    }
}
