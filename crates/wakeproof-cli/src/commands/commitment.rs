//! Commitment management commands for CLI.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde_json::json;
use wakeproof_core::commitment::DEFAULT_REQUIRED_DISPLACEMENT_M;
use wakeproof_core::{
    Commitment, CommitmentDb, CommitmentStatus, Config, Coordinate, DatabaseError,
    SimulatedSource,
};

use super::{orchestrator, parse_time, print_json, CliResult};

#[derive(Subcommand)]
pub enum CommitmentAction {
    /// Create a new commitment starting at the given position
    #[command(allow_negative_numbers = true)]
    Create {
        /// Start latitude
        #[arg(long)]
        lat: f64,
        /// Start longitude
        #[arg(long)]
        lon: f64,
        /// Deadline (RFC 3339)
        #[arg(long, value_parser = parse_time)]
        deadline: DateTime<Utc>,
        /// Required displacement in meters
        #[arg(long, default_value_t = DEFAULT_REQUIRED_DISPLACEMENT_M)]
        displacement: f64,
        /// Penalty in minor currency units
        #[arg(long, default_value_t = 0)]
        penalty: u64,
        /// Start time (RFC 3339, default: now)
        #[arg(long, value_parser = parse_time)]
        start: Option<DateTime<Utc>>,
    },
    /// Show one commitment
    Show {
        /// Commitment ID
        id: String,
    },
    /// List commitments, newest deadline first
    List {
        /// Filter by status: open, succeeded, failed, abandoned
        #[arg(long)]
        status: Option<String>,
    },
    /// Give up on a commitment without a penalty
    Abandon {
        /// Commitment ID
        id: String,
    },
    /// Print the event log of a commitment as JSON lines
    Events {
        /// Commitment ID
        id: String,
    },
}

pub fn run(action: CommitmentAction) -> CliResult {
    let db = Arc::new(CommitmentDb::open()?);

    match action {
        CommitmentAction::Create {
            lat,
            lon,
            deadline,
            displacement,
            penalty,
            start,
        } => {
            let commitment = Commitment::new(
                Coordinate::checked(lat, lon)?,
                start.unwrap_or_else(Utc::now),
                deadline,
                displacement,
                penalty,
            )?;
            db.create(&commitment)?;
            print_json(&commitment)?;
        }
        CommitmentAction::Show { id } => {
            let commitment = db
                .get(&id)?
                .ok_or_else(|| DatabaseError::NotFound(id.clone()))?;
            let final_location = db.final_location(&id)?;
            print_json(&json!({
                "commitment": commitment,
                "finalLocation": final_location,
            }))?;
        }
        CommitmentAction::List { status } => {
            let status = match status.as_deref() {
                Some(s) => Some(
                    CommitmentStatus::parse(s).ok_or_else(|| format!("unknown status: {s}"))?,
                ),
                None => None,
            };
            print_json(&db.list(status)?)?;
        }
        CommitmentAction::Abandon { id } => {
            let config = Config::load_or_default();
            // Abandoning never asks for a position.
            let source = Arc::new(SimulatedSource::unsupported());
            orchestrator(source, db, &config)?.abandon(&id, Utc::now())?;
            println!("abandoned: {id}");
        }
        CommitmentAction::Events { id } => {
            for event in db.events(&id)? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
    }
    Ok(())
}
