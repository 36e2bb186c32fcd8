mod config;
pub mod database;
pub mod migrations;

pub use config::Config;
pub use database::{CommitmentDb, Resolution};

use std::path::PathBuf;

use crate::commitment::Commitment;
use crate::error::{ConfigError, DatabaseError};
use crate::events::Event;

/// Persistence contract the engine relies on.
///
/// The engine reads a commitment at session start and writes its terminal
/// state exactly once.
pub trait CommitmentStore: Send + Sync {
    fn load(&self, id: &str) -> Result<Commitment, DatabaseError>;

    /// Write the terminal outcome.
    ///
    /// # Errors
    /// `DatabaseError::AlreadyResolved` if a terminal state was already written.
    fn record_outcome(&self, id: &str, resolution: &Resolution) -> Result<(), DatabaseError>;

    /// Close the commitment without an outcome.
    ///
    /// # Errors
    /// `DatabaseError::AlreadyResolved` if a terminal state was already written.
    fn abandon(&self, id: &str, at: chrono::DateTime<chrono::Utc>) -> Result<(), DatabaseError>;

    /// Append to the commitment's audit log. Best effort by default.
    fn append_event(&self, _commitment_id: &str, _event: &Event) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Returns the data directory.
///
/// `WAKEPROOF_DATA_DIR` wins when set; otherwise `~/.config/wakeproof[-dev]/`
/// based on `WAKEPROOF_ENV`. Set WAKEPROOF_ENV=dev to use the development
/// directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    let dir = match std::env::var_os("WAKEPROOF_DATA_DIR") {
        Some(explicit) => PathBuf::from(explicit),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env =
                std::env::var("WAKEPROOF_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("wakeproof-dev")
            } else {
                base_dir.join("wakeproof")
            }
        }
    };

    std::fs::create_dir_all(&dir)
        .map_err(|e| ConfigError::DataDir(format!("{}: {e}", dir.display())))?;
    Ok(dir)
}
