//! SQLite-based commitment storage.
//!
//! Provides persistent storage for:
//! - Commitments and their terminal state
//! - A per-commitment event log

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{data_dir, migrations, CommitmentStore};
use crate::commitment::{Commitment, CommitmentStatus, Outcome};
use crate::error::DatabaseError;
use crate::events::Event;
use crate::geo::Coordinate;

/// Terminal state written once per commitment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub outcome: Outcome,
    /// Position the outcome was judged from.
    pub final_location: Coordinate,
    pub resolved_at: DateTime<Utc>,
}

/// SQLite database for commitment storage.
pub struct CommitmentDb {
    conn: Mutex<Connection>,
}

const SELECT_COMMITMENT: &str = "SELECT id, start_lat, start_lon, start_time, deadline,
        required_displacement_m, penalty_amount, status, final_displacement_m
     FROM commitments";

impl CommitmentDb {
    /// Open the database at `<data_dir>/wakeproof.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self, DatabaseError> {
        let dir = data_dir().map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Self::open_at(&dir.join("wakeproof.db"))
    }

    /// Open (or create) the database at an explicit path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests and replays).
    ///
    /// # Errors
    /// Returns an error if the schema cannot be created.
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::migrate(&conn).map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a newly created commitment.
    ///
    /// # Errors
    /// Returns an error if the insert fails (including a duplicate id).
    pub fn create(&self, commitment: &Commitment) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT INTO commitments
                (id, start_lat, start_lon, start_time, deadline,
                 required_displacement_m, penalty_amount, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                commitment.id,
                commitment.start_location.latitude,
                commitment.start_location.longitude,
                commitment.start_time.to_rfc3339(),
                commitment.deadline.to_rfc3339(),
                commitment.required_displacement_meters,
                commitment.penalty_amount,
                commitment.status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<Commitment>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("{SELECT_COMMITMENT} WHERE id = ?1"))?;
        let found = stmt.query_row(params![id], row_to_commitment).optional()?;
        Ok(found)
    }

    /// All commitments, newest deadline first. `status` narrows the list.
    pub fn list(&self, status: Option<CommitmentStatus>) -> Result<Vec<Commitment>, DatabaseError> {
        let conn = self.conn();
        let rows = match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_COMMITMENT} WHERE status = ?1 ORDER BY deadline DESC"
                ))?;
                let rows = stmt
                    .query_map(params![status.as_str()], row_to_commitment)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_COMMITMENT} ORDER BY deadline DESC"))?;
                let rows = stmt
                    .query_map([], row_to_commitment)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    /// Final coordinates recorded with the outcome, if resolved.
    pub fn final_location(&self, id: &str) -> Result<Option<Coordinate>, DatabaseError> {
        let conn = self.conn();
        let location = conn
            .query_row(
                "SELECT final_lat, final_lon FROM commitments WHERE id = ?1",
                params![id],
                |row| {
                    let lat: Option<f64> = row.get(0)?;
                    let lon: Option<f64> = row.get(1)?;
                    Ok(lat.zip(lon).map(|(lat, lon)| Coordinate::new(lat, lon)))
                },
            )
            .optional()?;
        Ok(location.flatten())
    }

    /// Event log of a commitment, oldest first.
    pub fn events(&self, commitment_id: &str) -> Result<Vec<Event>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT event_json FROM commitment_events WHERE commitment_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![commitment_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| DatabaseError::QueryFailed(e.to_string()))
            })
            .collect()
    }

    /// Moves an open commitment to a terminal status, failing if it was not open.
    fn close(
        &self,
        id: &str,
        status: CommitmentStatus,
        update: impl FnOnce(&Connection) -> rusqlite::Result<usize>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let changed = update(&*conn)?;
        if changed == 1 {
            return Ok(());
        }
        let exists: bool = conn
            .query_row("SELECT 1 FROM commitments WHERE id = ?1", params![id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if exists {
            Err(DatabaseError::AlreadyResolved(id.to_string()))
        } else {
            tracing::debug!(id, status = status.as_str(), "close on missing commitment");
            Err(DatabaseError::NotFound(id.to_string()))
        }
    }
}

impl CommitmentStore for CommitmentDb {
    fn load(&self, id: &str) -> Result<Commitment, DatabaseError> {
        self.get(id)?
            .ok_or_else(|| DatabaseError::NotFound(id.to_string()))
    }

    fn record_outcome(&self, id: &str, resolution: &Resolution) -> Result<(), DatabaseError> {
        let status = resolution.outcome.status();
        self.close(id, status, |conn| {
            conn.execute(
                "UPDATE commitments
                 SET status = ?2, final_displacement_m = ?3, final_lat = ?4, final_lon = ?5,
                     resolved_at = ?6
                 WHERE id = ?1 AND status = 'open'",
                params![
                    id,
                    status.as_str(),
                    resolution.outcome.displacement_meters(),
                    resolution.final_location.latitude,
                    resolution.final_location.longitude,
                    resolution.resolved_at.to_rfc3339(),
                ],
            )
        })
    }

    fn abandon(&self, id: &str, at: DateTime<Utc>) -> Result<(), DatabaseError> {
        self.close(id, CommitmentStatus::Abandoned, |conn| {
            conn.execute(
                "UPDATE commitments SET status = 'abandoned', resolved_at = ?2
                 WHERE id = ?1 AND status = 'open'",
                params![id, at.to_rfc3339()],
            )
        })
    }

    fn append_event(&self, commitment_id: &str, event: &Event) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(event).map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        self.conn().execute(
            "INSERT INTO commitment_events (commitment_id, event_json, recorded_at)
             VALUES (?1, ?2, ?3)",
            params![commitment_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_commitment(row: &Row<'_>) -> rusqlite::Result<Commitment> {
    let status_str: String = row.get(7)?;
    let status = CommitmentStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("unknown commitment status '{status_str}'").into(),
        )
    })?;

    Ok(Commitment {
        id: row.get(0)?,
        start_location: Coordinate::new(row.get(1)?, row.get(2)?),
        start_time: parse_timestamp(3, row.get(3)?)?,
        deadline: parse_timestamp(4, row.get(4)?)?,
        required_displacement_meters: row.get(5)?,
        penalty_amount: row.get(6)?,
        status,
        final_displacement_meters: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample() -> Commitment {
        let now = Utc::now();
        Commitment::new(
            Coordinate::new(35.0, 139.0),
            now,
            now + Duration::hours(8),
            100.0,
            1_500,
        )
        .unwrap()
    }

    fn success_at(meters: f64) -> Resolution {
        Resolution {
            outcome: Outcome::Success {
                displacement_meters: meters,
            },
            final_location: Coordinate::new(35.001, 139.0),
            resolved_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_load() {
        let db = CommitmentDb::open_memory().unwrap();
        let commitment = sample();
        db.create(&commitment).unwrap();

        let loaded = db.load(&commitment.id).unwrap();
        assert_eq!(loaded.id, commitment.id);
        assert_eq!(loaded.status, CommitmentStatus::Open);
        assert_eq!(loaded.penalty_amount, 1_500);
        assert_eq!(
            loaded.deadline.timestamp_millis(),
            commitment.deadline.timestamp_millis()
        );
    }

    #[test]
    fn missing_commitment_is_not_found() {
        let db = CommitmentDb::open_memory().unwrap();
        assert!(matches!(db.load("nope"), Err(DatabaseError::NotFound(_))));
        assert!(matches!(
            db.record_outcome("nope", &success_at(150.0)),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn outcome_is_written_exactly_once() {
        let db = CommitmentDb::open_memory().unwrap();
        let commitment = sample();
        db.create(&commitment).unwrap();

        db.record_outcome(&commitment.id, &success_at(150.0)).unwrap();
        assert!(matches!(
            db.record_outcome(&commitment.id, &success_at(300.0)),
            Err(DatabaseError::AlreadyResolved(_))
        ));
        assert!(matches!(
            db.abandon(&commitment.id, Utc::now()),
            Err(DatabaseError::AlreadyResolved(_))
        ));

        let loaded = db.load(&commitment.id).unwrap();
        assert_eq!(loaded.status, CommitmentStatus::Succeeded);
        assert_eq!(
            loaded.outcome(),
            Some(Outcome::Success {
                displacement_meters: 150.0
            })
        );
        assert_eq!(
            db.final_location(&commitment.id).unwrap(),
            Some(Coordinate::new(35.001, 139.0))
        );
    }

    #[test]
    fn abandon_closes_without_outcome() {
        let db = CommitmentDb::open_memory().unwrap();
        let commitment = sample();
        db.create(&commitment).unwrap();
        db.abandon(&commitment.id, Utc::now()).unwrap();

        let loaded = db.load(&commitment.id).unwrap();
        assert_eq!(loaded.status, CommitmentStatus::Abandoned);
        assert_eq!(loaded.outcome(), None);
        assert_eq!(db.final_location(&commitment.id).unwrap(), None);
    }

    #[test]
    fn list_filters_by_status() {
        let db = CommitmentDb::open_memory().unwrap();
        let a = sample();
        let b = sample();
        db.create(&a).unwrap();
        db.create(&b).unwrap();
        db.abandon(&b.id, Utc::now()).unwrap();

        assert_eq!(db.list(None).unwrap().len(), 2);
        let open = db.list(Some(CommitmentStatus::Open)).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, a.id);
    }

    #[test]
    fn event_log_round_trips() {
        let db = CommitmentDb::open_memory().unwrap();
        let commitment = sample();
        db.create(&commitment).unwrap();

        let event = Event::CommitmentAbandoned {
            commitment_id: commitment.id.clone(),
            at: Utc::now(),
        };
        db.append_event(&commitment.id, &event).unwrap();
        assert_eq!(db.events(&commitment.id).unwrap(), vec![event]);
    }

    #[test]
    fn reopening_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wakeproof.db");
        let commitment = sample();
        {
            let db = CommitmentDb::open_at(&path).unwrap();
            db.create(&commitment).unwrap();
        }
        let db = CommitmentDb::open_at(&path).unwrap();
        assert!(db.get(&commitment.id).unwrap().is_some());
    }
}
