//! Replay a recorded fix stream through a lock-screen session.
//!
//! Each fix is judged at its own timestamp. Events are printed as JSON
//! lines, followed by the final lock-screen status.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Args;
use tokio::sync::mpsc::UnboundedReceiver;
use wakeproof_core::penalty::{trigger_from_config, LogPenaltyTrigger};
use wakeproof_core::{
    CommitmentDb, CommitmentStore, Config, Event, Fix, PenaltyTrigger, SimulatedSource,
    VerificationOrchestrator,
};

use super::{parse_time, runtime, CliResult};

#[derive(Args)]
pub struct ReplayArgs {
    /// Commitment ID
    pub id: String,
    /// JSON array of fixes, oldest first
    #[arg(long)]
    pub fixes: PathBuf,
    /// Conclude from the last accepted fix at this time (RFC 3339)
    #[arg(long, value_parser = parse_time)]
    pub conclude_at: Option<DateTime<Utc>>,
    /// Write the outcome to the database and send the penalty notice
    #[arg(long)]
    pub persist: bool,
}

fn time_of(fix: &Fix) -> CliResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(fix.timestamp_ms)
        .ok_or_else(|| format!("fix timestamp out of range: {}", fix.timestamp_ms).into())
}

fn flush(events: &mut UnboundedReceiver<Event>) -> CliResult {
    while let Ok(event) = events.try_recv() {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

pub fn run(args: ReplayArgs) -> CliResult {
    let content = std::fs::read_to_string(&args.fixes)?;
    let fixes: Vec<Fix> = serde_json::from_str(&content)?;
    let config = Config::load_or_default();

    let disk = Arc::new(CommitmentDb::open()?);
    let (db, penalty): (Arc<CommitmentDb>, Arc<dyn PenaltyTrigger>) = if args.persist {
        (disk, trigger_from_config(&config.penalty)?)
    } else {
        // Dry run against a scratch copy.
        let commitment = disk.load(&args.id)?;
        let scratch = Arc::new(CommitmentDb::open_memory()?);
        scratch.create(&commitment)?;
        (scratch, Arc::new(LogPenaltyTrigger))
    };

    let source = Arc::new(SimulatedSource::new());
    let orchestrator = VerificationOrchestrator::from_config(source.clone(), db, penalty, &config);

    runtime()?.block_on(async {
        let first_at = match fixes.first() {
            Some(fix) => time_of(fix)?,
            None => Utc::now(),
        };
        let mut session = orchestrator.lock_screen(&args.id, first_at)?;
        let mut events = session.events();
        session.start(first_at);
        flush(&mut events)?;

        for fix in fixes {
            let at = time_of(&fix)?;
            source.emit_fix(fix);
            if let Some(disposition) = session.next_update().await {
                session.apply(&disposition, at);
            }
            flush(&mut events)?;
        }

        if let Some(at) = args.conclude_at {
            let conclusion = session.conclude(at).await?;
            flush(&mut events)?;
            println!("{}", serde_json::to_string(&conclusion)?);
        }

        println!("{}", serde_json::to_string(&session.status())?);
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
