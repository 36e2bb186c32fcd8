//! # Wakeproof Core Library
//!
//! This library provides the location-verified commitment engine behind
//! Wakeproof: a user commits to being out of bed and away from home by a
//! deadline, and proves it by physically moving. Failure triggers a penalty
//! notice.
//!
//! ## Architecture
//!
//! - **Location**: acquisition of trustworthy fixes from an unreliable
//!   platform source (retry, backoff, fallback), continuous tracking with a
//!   bounded history, and optional outlier/smoothing post-processing
//! - **Commitment**: a pure gate (time rule, then distance rule) and outcome
//!   evaluation, wrapped in a tick-driven state machine
//! - **Verification**: one-shot and lock-screen flows that join the two and
//!   write the terminal outcome exactly once
//! - **Storage**: SQLite commitment storage and TOML configuration
//!
//! ## Key Components
//!
//! - [`FixAcquirer`]: one trustworthy fix per call
//! - [`ContinuousTracker`]: live fix history
//! - [`CommitmentGate`]: gate state machine
//! - [`VerificationOrchestrator`]: verification flows
//! - [`CommitmentDb`]: commitment persistence
//! - [`Config`]: application configuration management

pub mod commitment;
pub mod error;
pub mod events;
pub mod geo;
pub mod location;
pub mod penalty;
pub mod storage;
pub mod verification;

pub use commitment::{
    evaluate_gate, evaluate_outcome, Commitment, CommitmentGate, CommitmentStatus, Conclusion,
    GateConfig, GateDecision, LockReason, Outcome,
};
pub use error::{
    ConfigError, CoreError, DatabaseError, LocationError, PenaltyError, ValidationError,
};
pub use events::Event;
pub use geo::{distance, Coordinate};
pub use location::{
    AcquisitionPolicy, ContinuousTracker, Fix, FixAcquirer, LocationOptions, LocationSource,
    SimulatedSource, TrackingPolicy,
};
pub use penalty::{PenaltyNotice, PenaltyTrigger};
pub use storage::{CommitmentDb, CommitmentStore, Config};
pub use verification::{
    LockScreenSession, LockScreenStatus, VerificationListener, VerificationOrchestrator,
    VerificationReport,
};
