//! One-shot fix acquisition.
//!
//! ## Attempt sequence
//!
//! ```text
//! high-accuracy #1 (fresh) -> #2 (cached ok) -> ... -> #retry_attempts
//!     -> one low-accuracy fallback (accepted at any accuracy)
//! ```
//!
//! A fix is accepted from a high-accuracy attempt only when its accuracy is
//! within `min_accuracy_meters`. Each `Timeout` shrinks the next attempt's
//! timeout to `max(5000, previous * 0.8)`. Permission and capability errors
//! end the sequence immediately. When the fallback fails too, the first
//! high-accuracy error is returned.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Fix, LocationError, LocationOptions, LocationSource};

/// Floor for the adaptive per-attempt timeout.
const MIN_ATTEMPT_TIMEOUT_MS: u64 = 5_000;
const TIMEOUT_BACKOFF_FACTOR: f64 = 0.8;

/// Immutable acquisition settings, passed into every [`FixAcquirer::acquire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionPolicy {
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
    /// Timeout of the first high-accuracy attempt.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Cache age accepted from the second attempt on.
    #[serde(default = "default_maximum_age_ms")]
    pub maximum_age_ms: u64,
    #[serde(default = "default_min_accuracy_meters")]
    pub min_accuracy_meters: f64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    15_000
}
fn default_maximum_age_ms() -> u64 {
    60_000
}
fn default_min_accuracy_meters() -> f64 {
    50.0
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_fallback_timeout_ms() -> u64 {
    5_000
}

impl Default for AcquisitionPolicy {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout_ms: default_timeout_ms(),
            maximum_age_ms: default_maximum_age_ms(),
            min_accuracy_meters: default_min_accuracy_meters(),
            retry_attempts: default_retry_attempts(),
            fallback_timeout_ms: default_fallback_timeout_ms(),
        }
    }
}

impl AcquisitionPolicy {
    fn attempt_options(&self, attempt: u32, timeout_ms: u64) -> LocationOptions {
        LocationOptions {
            high_accuracy: self.high_accuracy,
            timeout_ms,
            maximum_age_ms: if attempt == 0 { 0 } else { self.maximum_age_ms },
        }
    }

    fn fallback_options(&self) -> LocationOptions {
        LocationOptions {
            high_accuracy: false,
            timeout_ms: self.fallback_timeout_ms,
            maximum_age_ms: self.maximum_age_ms,
        }
    }
}

/// Timeout for the attempt following a `Timeout` failure.
pub(crate) fn next_timeout_ms(previous_ms: u64) -> u64 {
    let shrunk = (previous_ms as f64 * TIMEOUT_BACKOFF_FACTOR) as u64;
    shrunk.max(MIN_ATTEMPT_TIMEOUT_MS)
}

/// Obtains one trustworthy [`Fix`] from a [`LocationSource`].
///
/// Holds no mutable state; concurrent acquisitions with different policies
/// do not interfere.
#[derive(Clone)]
pub struct FixAcquirer {
    source: Arc<dyn LocationSource>,
}

impl FixAcquirer {
    pub fn new(source: Arc<dyn LocationSource>) -> Self {
        Self { source }
    }

    /// Run the attempt sequence described in the module docs.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` / `Unsupported` as soon as the platform reports
    /// them, otherwise the first high-accuracy error once the fallback has
    /// also failed.
    pub async fn acquire(&self, policy: &AcquisitionPolicy) -> Result<Fix, LocationError> {
        let mut timeout_ms = policy.timeout_ms;
        let mut primary_error: Option<LocationError> = None;

        for attempt in 0..policy.retry_attempts {
            let options = policy.attempt_options(attempt, timeout_ms);
            match self.request(&options).await {
                Ok(fix) if fix.accuracy_meters <= policy.min_accuracy_meters => {
                    debug!(
                        attempt = attempt + 1,
                        accuracy_m = fix.accuracy_meters,
                        "fix accepted"
                    );
                    return Ok(fix);
                }
                Ok(fix) => {
                    debug!(
                        attempt = attempt + 1,
                        accuracy_m = fix.accuracy_meters,
                        limit_m = policy.min_accuracy_meters,
                        "fix rejected: accuracy above limit"
                    );
                }
                Err(err) if err.is_fatal() => {
                    warn!(attempt = attempt + 1, error = %err, "location request failed, not retrying");
                    return Err(err);
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, error = %err, timeout_ms, "location attempt failed");
                    if err == LocationError::Timeout {
                        timeout_ms = next_timeout_ms(timeout_ms);
                    }
                    primary_error.get_or_insert(err);
                }
            }
        }

        warn!(
            attempts = policy.retry_attempts,
            "high-accuracy attempts exhausted, falling back to low accuracy"
        );
        match self.request(&policy.fallback_options()).await {
            Ok(fix) => {
                debug!(accuracy_m = fix.accuracy_meters, "fallback fix accepted");
                Ok(fix)
            }
            Err(fallback_err) => {
                debug!(error = %fallback_err, "fallback attempt failed");
                Err(primary_error.unwrap_or(fallback_err))
            }
        }
    }

    async fn request(&self, options: &LocationOptions) -> Result<Fix, LocationError> {
        let limit = Duration::from_millis(options.timeout_ms);
        let fix = tokio::time::timeout(limit, self.source.request_once(options)).await??;
        if !fix.has_valid_accuracy() {
            return Err(LocationError::PositionUnavailable(format!(
                "invalid accuracy {}",
                fix.accuracy_meters
            )));
        }
        Ok(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::SimulatedSource;

    fn fix(accuracy: f64) -> Fix {
        Fix::new(35.0, 139.0, accuracy, 1_000)
    }

    fn acquirer(source: &Arc<SimulatedSource>) -> FixAcquirer {
        FixAcquirer::new(source.clone())
    }

    #[test]
    fn timeout_shrinks_with_floor() {
        assert_eq!(next_timeout_ms(15_000), 12_000);
        assert_eq!(next_timeout_ms(12_000), 9_600);
        assert_eq!(next_timeout_ms(6_000), 5_000);
        assert_eq!(next_timeout_ms(5_000), 5_000);
    }

    #[tokio::test]
    async fn accurate_first_fix_is_returned() {
        let source = Arc::new(SimulatedSource::new());
        source.push_response(Ok(fix(10.0)));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap().accuracy_meters, 10.0);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn inaccurate_fix_is_rejected_then_retry_succeeds() {
        let source = Arc::new(SimulatedSource::new());
        source.push_response(Ok(fix(200.0)));
        source.push_response(Ok(fix(30.0)));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap().accuracy_meters, 30.0);

        let requests = source.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].maximum_age_ms, 0);
        assert_eq!(requests[1].maximum_age_ms, 60_000);
    }

    #[tokio::test]
    async fn always_timing_out_falls_back_once_and_reports_timeout() {
        let source = Arc::new(SimulatedSource::new());
        source.always(Err(LocationError::Timeout));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap_err(), LocationError::Timeout);

        let requests = source.requests();
        assert_eq!(requests.len(), 4);
        assert!(requests[..3].iter().all(|r| r.high_accuracy));
        assert_eq!(
            requests.iter().map(|r| r.timeout_ms).collect::<Vec<_>>(),
            vec![15_000, 12_000, 9_600, 5_000]
        );
        let fallback = requests[3];
        assert!(!fallback.high_accuracy);
    }

    #[tokio::test]
    async fn negative_accuracy_counts_as_unavailable() {
        let source = Arc::new(SimulatedSource::new());
        let mut bogus = fix(10.0);
        bogus.accuracy_meters = -40.0;
        source.push_response(Ok(bogus));
        source.push_response(Ok(fix(20.0)));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap().accuracy_meters, 20.0);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn fallback_never_returns_invalid_accuracy() {
        let source = Arc::new(SimulatedSource::new());
        let mut bogus = fix(10.0);
        bogus.accuracy_meters = f64::NAN;
        source.always(Ok(bogus));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert!(matches!(
            got.unwrap_err(),
            LocationError::PositionUnavailable(_)
        ));
        assert_eq!(source.requests().len(), 4);
    }

    #[tokio::test]
    async fn fallback_accepts_any_accuracy() {
        let source = Arc::new(SimulatedSource::new());
        for _ in 0..3 {
            source.push_response(Ok(fix(500.0)));
        }
        source.push_response(Ok(fix(900.0)));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap().accuracy_meters, 900.0);
        assert_eq!(source.requests().len(), 4);
    }

    #[tokio::test]
    async fn original_error_wins_over_fallback_error() {
        let source = Arc::new(SimulatedSource::new());
        source.push_response(Err(LocationError::PositionUnavailable("no sky".into())));
        source.push_response(Err(LocationError::Timeout));
        source.push_response(Err(LocationError::Timeout));
        source.push_response(Err(LocationError::Unknown("fallback".into())));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(
            got.unwrap_err(),
            LocationError::PositionUnavailable("no sky".into())
        );
    }

    #[tokio::test]
    async fn permission_denied_is_not_retried() {
        let source = Arc::new(SimulatedSource::new());
        source.always(Err(LocationError::PermissionDenied));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap_err(), LocationError::PermissionDenied);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_platform_fails_immediately() {
        let source = Arc::new(SimulatedSource::unsupported());

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap_err(), LocationError::Unsupported);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn custom_attempt_budget_is_respected() {
        let source = Arc::new(SimulatedSource::new());
        source.always(Err(LocationError::Timeout));
        let policy = AcquisitionPolicy {
            retry_attempts: 1,
            fallback_timeout_ms: 2_000,
            ..AcquisitionPolicy::default()
        };

        let got = acquirer(&source).acquire(&policy).await;
        assert_eq!(got.unwrap_err(), LocationError::Timeout);
        let requests = source.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].timeout_ms, 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_source_is_cut_off_by_attempt_timeout() {
        let source = Arc::new(SimulatedSource::new());
        source.set_latency(Duration::from_secs(3_600));
        source.always(Ok(fix(5.0)));

        let got = acquirer(&source).acquire(&AcquisitionPolicy::default()).await;
        assert_eq!(got.unwrap_err(), LocationError::Timeout);
        assert_eq!(source.requests().len(), 4);
    }
}
