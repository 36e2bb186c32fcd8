//! Position-based commands: gate, conclude, verify.
//!
//! The CLI has no platform location API. The position given on the command
//! line is served by a scripted source, so it still passes through the
//! configured acquisition policy (accuracy gate, fallback).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;
use serde_json::json;
use wakeproof_core::{
    CommitmentDb, CommitmentStore, Config, Coordinate, Fix, LocationError, SimulatedSource,
    VerificationListener, VerificationReport,
};

use super::{orchestrator, parse_time, print_json, runtime, CliResult};

#[derive(Args)]
pub struct PositionArgs {
    /// Commitment ID
    pub id: String,
    /// Current latitude
    #[arg(long)]
    pub lat: f64,
    /// Current longitude
    #[arg(long)]
    pub lon: f64,
    /// Reported accuracy in meters
    #[arg(long, default_value_t = 10.0)]
    pub accuracy: f64,
    /// Evaluation time (RFC 3339, default: now)
    #[arg(long, value_parser = parse_time)]
    pub at: Option<DateTime<Utc>>,
}

impl PositionArgs {
    fn now(&self) -> DateTime<Utc> {
        self.at.unwrap_or_else(Utc::now)
    }

    fn source(&self) -> CliResult<Arc<SimulatedSource>> {
        let position = Coordinate::checked(self.lat, self.lon)?;
        let source = Arc::new(SimulatedSource::new());
        source.always(Ok(Fix::at(
            position,
            self.accuracy,
            self.now().timestamp_millis(),
        )));
        Ok(source)
    }
}

pub fn gate(args: PositionArgs) -> CliResult {
    let db = Arc::new(CommitmentDb::open()?);
    let config = Config::load_or_default();
    let commitment = db.load(&args.id)?;
    let orchestrator = orchestrator(args.source()?, db, &config)?;

    let decision = runtime()?.block_on(orchestrator.check_gate(&commitment, args.now()))?;
    print_json(&json!({
        "decision": decision,
        "message": decision.describe(),
    }))
}

pub fn conclude(args: PositionArgs) -> CliResult {
    let db = Arc::new(CommitmentDb::open()?);
    let config = Config::load_or_default();
    let orchestrator = orchestrator(args.source()?, db, &config)?;

    let conclusion = runtime()?.block_on(orchestrator.conclude(&args.id, args.now()))?;
    print_json(&conclusion)
}

/// Prints whichever result arrives.
#[derive(Default)]
struct PrintListener {
    failed: Option<LocationError>,
}

impl VerificationListener for PrintListener {
    fn on_verified(&mut self, report: &VerificationReport) {
        match serde_json::to_string_pretty(report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("error: {e}"),
        }
    }

    fn on_location_error(&mut self, error: &LocationError) {
        self.failed = Some(error.clone());
    }
}

pub fn verify(args: PositionArgs) -> CliResult {
    let db = Arc::new(CommitmentDb::open()?);
    let config = Config::load_or_default();
    let orchestrator = orchestrator(args.source()?, db, &config)?;

    let mut listener = PrintListener::default();
    runtime()?.block_on(orchestrator.verify(&args.id, args.now(), &mut listener))?;
    match listener.failed {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}
