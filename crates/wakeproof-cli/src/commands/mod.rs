pub mod commitment;
pub mod config;
pub mod replay;
pub mod verify;

use std::error::Error;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use wakeproof_core::penalty::trigger_from_config;
use wakeproof_core::{
    CommitmentDb, Config, Coordinate, LocationSource, VerificationOrchestrator,
};

pub type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Accepts RFC 3339 timestamps, e.g. `2026-10-17T06:30:00+09:00`.
pub fn parse_time(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

pub fn runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Orchestrator over the on-disk database with the configured penalty trigger.
pub fn orchestrator(
    source: Arc<dyn LocationSource>,
    db: Arc<CommitmentDb>,
    config: &Config,
) -> CliResult<VerificationOrchestrator> {
    let penalty = trigger_from_config(&config.penalty)?;
    Ok(VerificationOrchestrator::from_config(source, db, penalty, config))
}

pub fn distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> CliResult {
    let a = Coordinate::checked(lat1, lon1)?;
    let b = Coordinate::checked(lat2, lon2)?;
    println!("{:.1}", a.distance_to(&b));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_time_normalizes_to_utc() {
        let t = parse_time("2026-10-17T06:30:00+09:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2026-10-16T21:30:00+00:00");
        assert!(parse_time("6:30").is_err());
    }
}
