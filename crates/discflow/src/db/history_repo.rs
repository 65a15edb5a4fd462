//! Append-only job history.

use rusqlite::{params, Connection, Row};

use crate::error::ReplayError;
use crate::model::{HistoryEvent, RecordedEvent};

use super::DatabaseError;

/// A stored history row, event still encoded.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub job_id: String,
    pub seq: u64,
    pub event_type: String,
    pub event: String,
    pub recorded_at: String,
}

impl HistoryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let seq: i64 = row.get("seq")?;
        Ok(Self {
            job_id: row.get("job_id")?,
            seq: seq as u64,
            event_type: row.get("event_type")?,
            event: row.get("event")?,
            recorded_at: row.get("recorded_at")?,
        })
    }

    pub fn decode(&self) -> Result<RecordedEvent, ReplayError> {
        let event = serde_json::from_str(&self.event).map_err(|e| ReplayError::Decode {
            job_id: self.job_id.clone(),
            seq: self.seq,
            reason: e.to_string(),
        })?;
        Ok(RecordedEvent {
            seq: self.seq,
            event,
        })
    }
}

/// Appends one event. Fails if `seq` is already taken for this job.
pub fn append(
    conn: &Connection,
    job_id: &str,
    seq: u64,
    event: &HistoryEvent,
    recorded_at: &str,
) -> Result<(), DatabaseError> {
    let encoded = serde_json::to_string(event)?;
    conn.execute(
        "INSERT INTO job_history (job_id, seq, event_type, event, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![job_id, seq as i64, event.name(), encoded, recorded_at],
    )?;
    Ok(())
}

/// Loads the full history of a job in sequence order.
pub fn load(conn: &Connection, job_id: &str) -> Result<Vec<HistoryRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM job_history WHERE job_id = ?1 ORDER BY seq ASC")?;
    let rows = stmt
        .query_map(params![job_id], HistoryRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Number of events recorded for a job.
pub fn count(conn: &Connection, job_id: &str) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM job_history WHERE job_id = ?1",
        params![job_id],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}

/// Decodes stored rows into recorded events.
pub fn decode_all(rows: &[HistoryRow]) -> Result<Vec<RecordedEvent>, ReplayError> {
    rows.iter().map(HistoryRow::decode).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, Database};
    use crate::model::Stage;

    fn db_with_job(id: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            job_repo::insert(
                conn,
                &job_repo::JobRow {
                    id: id.to_string(),
                    source_path: "/in".to_string(),
                    library_path: "/lib".to_string(),
                    preview_base_path: "/prev".to_string(),
                    stage: "created".to_string(),
                    failed: false,
                    error: None,
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                    updated_at: "2026-01-01T00:00:00Z".to_string(),
                },
            )?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_append_and_load_in_order() {
        let db = db_with_job("j1");
        db.with_conn(|conn| {
            append(
                conn,
                "j1",
                0,
                &HistoryEvent::Created {
                    source_path: "/in".to_string(),
                    library_path: "/lib".to_string(),
                    preview_base_path: "/prev".to_string(),
                },
                "2026-01-01T00:00:00Z",
            )?;
            append(
                conn,
                "j1",
                1,
                &HistoryEvent::StageAdvanced {
                    stage: Stage::MovingDirectory,
                },
                "2026-01-01T00:00:01Z",
            )?;
            Ok(())
        })
        .unwrap();

        let rows = db.with_conn(|conn| load(conn, "j1")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].event_type, "stage_advanced");

        let events = decode_all(&rows).unwrap();
        assert_eq!(events[0].seq, 0);
        assert_eq!(
            events[1].event,
            HistoryEvent::StageAdvanced {
                stage: Stage::MovingDirectory
            }
        );
        assert_eq!(db.with_conn(|conn| count(conn, "j1")).unwrap(), 2);
    }

    #[test]
    fn test_duplicate_seq_is_rejected() {
        let db = db_with_job("j1");
        let event = HistoryEvent::StageAdvanced {
            stage: Stage::MovingDirectory,
        };
        db.with_conn(|conn| append(conn, "j1", 1, &event, "t")).unwrap();
        assert!(db.with_conn(|conn| append(conn, "j1", 1, &event, "t")).is_err());
    }

    #[test]
    fn test_corrupt_event_reports_decode_error() {
        let row = HistoryRow {
            job_id: "j1".to_string(),
            seq: 3,
            event_type: "stage_advanced".to_string(),
            event: "{\"event\":\"stage_advanced\",\"stage\":\"nowhere\"}".to_string(),
            recorded_at: "t".to_string(),
        };
        assert!(matches!(
            row.decode(),
            Err(ReplayError::Decode { seq: 3, .. })
        ));
    }
}
