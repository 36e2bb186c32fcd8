use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commitment::{GateDecision, Outcome};
use crate::location::{DiscardReason, Fix, FixDisposition, LocationError};

/// Every state change in the engine produces an Event.
/// The UI layer renders them; the CLI prints them as JSON lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// Interaction gate moved to a different state or lock reason.
    GateChanged {
        commitment_id: String,
        decision: GateDecision,
        at: DateTime<Utc>,
    },
    FixAccepted {
        fix: Fix,
        at: DateTime<Utc>,
    },
    /// A raw fix was filtered out before reaching history. Diagnostic only.
    FixDiscarded {
        reason: DiscardReason,
        at: DateTime<Utc>,
    },
    /// The location source reported an error. Never a commitment failure.
    LocationFailed {
        code: String,
        message: String,
        at: DateTime<Utc>,
    },
    CommitmentResolved {
        commitment_id: String,
        outcome: Outcome,
        at: DateTime<Utc>,
    },
    CommitmentAbandoned {
        commitment_id: String,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn location_failed(err: &LocationError, at: DateTime<Utc>) -> Self {
        Event::LocationFailed {
            code: err.code().to_string(),
            message: err.to_string(),
            at,
        }
    }

    /// Event for one processed tracker update.
    pub fn from_disposition(disposition: &FixDisposition, at: DateTime<Utc>) -> Self {
        match disposition {
            FixDisposition::Accepted(fix) => Event::FixAccepted {
                fix: fix.clone(),
                at,
            },
            FixDisposition::Discarded(reason) => Event::FixDiscarded {
                reason: reason.clone(),
                at,
            },
            FixDisposition::Failed(err) => Event::location_failed(err, at),
        }
    }
}
