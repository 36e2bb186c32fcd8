//! Position data: fixes, the platform location contract, and the stages
//! that turn a noisy stream of fixes into something trustworthy.
//!
//! ## Components
//!
//! - [`FixAcquirer`]: single-shot acquisition with accuracy gating, adaptive
//!   timeout backoff and one low-accuracy fallback
//! - [`ContinuousTracker`]: bounded fix history over a live subscription
//! - [`filter_outliers`] / [`smooth`]: optional post-processing over a
//!   history snapshot
//! - [`SimulatedSource`]: scripted [`LocationSource`] for tests and replay

mod acquirer;
mod filters;
mod simulated;
mod tracker;

pub use acquirer::{AcquisitionPolicy, FixAcquirer};
pub use filters::{filter_outliers, smooth, DEFAULT_MAX_SPEED_MPS, DEFAULT_SMOOTHING_WINDOW};
pub use simulated::SimulatedSource;
pub use tracker::{
    ContinuousTracker, DiscardReason, FixDisposition, StopHandle, TrackerStats, TrackingPolicy,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use crate::error::LocationError;
use crate::geo::Coordinate;

/// A single reported device position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of the 68% confidence circle. Never negative.
    pub accuracy_meters: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl Fix {
    /// Fix with only the mandatory fields. Negative accuracy is clamped to 0.
    pub fn new(latitude: f64, longitude: f64, accuracy_meters: f64, timestamp_ms: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: accuracy_meters.max(0.0),
            altitude: None,
            heading: None,
            speed_mps: None,
            timestamp_ms,
        }
    }

    pub fn at(coordinate: Coordinate, accuracy_meters: f64, timestamp_ms: i64) -> Self {
        Self::new(
            coordinate.latitude,
            coordinate.longitude,
            accuracy_meters,
            timestamp_ms,
        )
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// False for a negative or non-finite accuracy, which no platform should
    /// report but deserialized input can carry.
    pub fn has_valid_accuracy(&self) -> bool {
        self.accuracy_meters.is_finite() && self.accuracy_meters >= 0.0
    }
}

/// Request options understood by the platform location source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationOptions {
    pub high_accuracy: bool,
    pub timeout_ms: u64,
    /// Oldest cached fix the platform may hand back. 0 forces a fresh fix.
    pub maximum_age_ms: u64,
}

/// Opaque identifier of an active platform subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionHandle(pub u64);

/// One item of a continuous location stream.
pub type LocationUpdate = Result<Fix, LocationError>;

/// A live platform subscription.
///
/// Updates arrive on `updates` in platform delivery order. Dropping the
/// receiver without calling [`LocationSource::unsubscribe`] leaks the
/// platform-side watch, so owners unsubscribe explicitly.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub updates: mpsc::UnboundedReceiver<LocationUpdate>,
}

/// The platform positioning API.
///
/// Implementations normalize whatever the OS reports into [`LocationError`].
#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Request a single fix.
    async fn request_once(&self, options: &LocationOptions) -> Result<Fix, LocationError>;

    /// Begin a continuous stream of fixes.
    fn subscribe(&self, options: &LocationOptions) -> Result<Subscription, LocationError>;

    /// End a stream started with [`LocationSource::subscribe`].
    fn unsubscribe(&self, handle: SubscriptionHandle);
}
