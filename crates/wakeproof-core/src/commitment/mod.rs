//! The wake/move pledge and the gate that judges it.

mod gate;

pub use gate::{
    evaluate_gate, evaluate_outcome, CommitmentGate, Conclusion, GateConfig, GateDecision,
    LockReason,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::geo::Coordinate;

/// Displacement required when the creator does not specify one.
pub const DEFAULT_REQUIRED_DISPLACEMENT_M: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    Open,
    Succeeded,
    Failed,
    /// Given up by the caller, typically after a location error. No penalty.
    Abandoned,
}

impl CommitmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CommitmentStatus::Open => "open",
            CommitmentStatus::Succeeded => "succeeded",
            CommitmentStatus::Failed => "failed",
            CommitmentStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(CommitmentStatus::Open),
            "succeeded" => Some(CommitmentStatus::Succeeded),
            "failed" => Some(CommitmentStatus::Failed),
            "abandoned" => Some(CommitmentStatus::Abandoned),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != CommitmentStatus::Open
    }
}

/// Terminal verdict on a commitment. Computed once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum Outcome {
    Success { displacement_meters: f64 },
    Failure { displacement_meters: f64 },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn displacement_meters(&self) -> f64 {
        match self {
            Outcome::Success {
                displacement_meters,
            }
            | Outcome::Failure {
                displacement_meters,
            } => *displacement_meters,
        }
    }

    pub fn status(&self) -> CommitmentStatus {
        if self.is_success() {
            CommitmentStatus::Succeeded
        } else {
            CommitmentStatus::Failed
        }
    }
}

/// A user's pledge to be `required_displacement_meters` away from
/// `start_location` by `deadline`.
///
/// Immutable after creation except for the move to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: String,
    pub start_location: Coordinate,
    pub start_time: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub required_displacement_meters: f64,
    /// Penalty in minor currency units, charged on failure.
    pub penalty_amount: u64,
    pub status: CommitmentStatus,
    /// Displacement recorded with the terminal outcome.
    #[serde(default)]
    pub final_displacement_meters: Option<f64>,
}

impl Commitment {
    /// Create an open commitment with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the deadline is not after `start_time`,
    /// the start location is out of range, or the displacement is not a
    /// positive finite number.
    pub fn new(
        start_location: Coordinate,
        start_time: DateTime<Utc>,
        deadline: DateTime<Utc>,
        required_displacement_meters: f64,
        penalty_amount: u64,
    ) -> Result<Self, ValidationError> {
        let start_location = Coordinate::checked(start_location.latitude, start_location.longitude)?;
        if deadline <= start_time {
            return Err(ValidationError::InvalidTimeRange {
                start: start_time,
                end: deadline,
            });
        }
        if !(required_displacement_meters.is_finite() && required_displacement_meters > 0.0) {
            return Err(ValidationError::InvalidValue {
                field: "required_displacement_meters".into(),
                message: format!("must be a positive distance, got {required_displacement_meters}"),
            });
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            start_location,
            start_time,
            deadline,
            required_displacement_meters,
            penalty_amount,
            status: CommitmentStatus::Open,
            final_displacement_meters: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.status == CommitmentStatus::Open
    }

    /// The stored terminal outcome, if one was recorded.
    pub fn outcome(&self) -> Option<Outcome> {
        let displacement_meters = self.final_displacement_meters?;
        match self.status {
            CommitmentStatus::Succeeded => Some(Outcome::Success {
                displacement_meters,
            }),
            CommitmentStatus::Failed => Some(Outcome::Failure {
                displacement_meters,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn new_commitment_is_open_with_unique_id() {
        let now = Utc::now();
        let start = Coordinate::new(35.0, 139.0);
        let a = Commitment::new(start, now, now + Duration::hours(8), 100.0, 500).unwrap();
        let b = Commitment::new(start, now, now + Duration::hours(8), 100.0, 500).unwrap();
        assert!(a.is_open());
        assert_ne!(a.id, b.id);
        assert_eq!(a.outcome(), None);
    }

    #[test]
    fn deadline_must_follow_start() {
        let now = Utc::now();
        let err = Commitment::new(Coordinate::new(0.0, 0.0), now, now, 100.0, 0).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidTimeRange { .. }));
    }

    #[test]
    fn displacement_must_be_positive() {
        let now = Utc::now();
        let deadline = now + Duration::hours(1);
        let start = Coordinate::new(0.0, 0.0);
        assert!(Commitment::new(start, now, deadline, 0.0, 0).is_err());
        assert!(Commitment::new(start, now, deadline, f64::NAN, 0).is_err());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            CommitmentStatus::Open,
            CommitmentStatus::Succeeded,
            CommitmentStatus::Failed,
            CommitmentStatus::Abandoned,
        ] {
            assert_eq!(CommitmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CommitmentStatus::parse("pending"), None);
    }
}
