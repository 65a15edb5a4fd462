//! Job repository: the `jobs` projection table.
//!
//! Rows here are a summary kept in step with history inside the same
//! transaction. History stays the source of truth.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw job row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub source_path: String,
    pub library_path: String,
    pub preview_base_path: String,
    pub stage: String,
    pub failed: bool,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_path: row.get("source_path")?,
            library_path: row.get("library_path")?,
            preview_base_path: row.get("preview_base_path")?,
            stage: row.get("stage")?,
            failed: row.get("failed")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a new job row. Returns `false` if a job with that id already exists.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO jobs (id, source_path, library_path, preview_base_path, stage,
         failed, error, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            job.id,
            job.source_path,
            job.library_path,
            job.preview_base_path,
            job.stage,
            job.failed,
            job.error,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(inserted == 1)
}

/// Updates the stage projection of a job.
pub fn update_stage(
    conn: &Connection,
    id: &str,
    stage: &str,
    failed: bool,
    error: Option<&str>,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE jobs SET stage = ?2, failed = ?3, error = ?4, updated_at = ?5 WHERE id = ?1",
        params![id, stage, failed, error, updated_at],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(row)
}

/// Lists every job, oldest first.
pub fn list(conn: &Connection) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY created_at ASC, id ASC")?;
    let rows = stmt
        .query_map([], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Lists jobs that have not failed, oldest first.
pub fn list_not_failed(conn: &Connection) -> Result<Vec<JobRow>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT * FROM jobs WHERE failed = 0 ORDER BY created_at ASC, id ASC")?;
    let rows = stmt
        .query_map([], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            source_path: "/inbox/disc".to_string(),
            library_path: format!("/library/{}", id),
            preview_base_path: format!("/preview/{}", id),
            stage: "created".to_string(),
            failed: false,
            error: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        db.with_conn(|conn| {
            assert!(insert(conn, &sample_job("job-1"))?);
            let found = find_by_id(conn, "job-1")?.unwrap();
            assert_eq!(found.library_path, "/library/job-1");
            assert!(!found.failed);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_insert_duplicate_is_ignored() {
        let db = test_db();
        db.with_conn(|conn| {
            assert!(insert(conn, &sample_job("dup"))?);
            let mut other = sample_job("dup");
            other.source_path = "/elsewhere".to_string();
            assert!(!insert(conn, &other)?);

            let found = find_by_id(conn, "dup")?.unwrap();
            assert_eq!(found.source_path, "/inbox/disc");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_nonexistent() {
        let db = test_db();
        let found = db.with_conn(|conn| find_by_id(conn, "nonexistent")).unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn test_update_stage() {
        let db = test_db();
        db.with_conn(|conn| {
            insert(conn, &sample_job("job-2"))?;
            update_stage(
                conn,
                "job-2",
                "moving_directory",
                true,
                Some("rename failed"),
                "2026-01-01T01:00:00Z",
            )?;
            let found = find_by_id(conn, "job-2")?.unwrap();
            assert_eq!(found.stage, "moving_directory");
            assert!(found.failed);
            assert_eq!(found.error.as_deref(), Some("rename failed"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_list_and_filter_failed() {
        let db = test_db();
        db.with_conn(|conn| {
            for (i, id) in ["a", "b", "c"].iter().enumerate() {
                let mut job = sample_job(id);
                job.created_at = format!("2026-01-0{}T00:00:00Z", i + 1);
                insert(conn, &job)?;
            }
            update_stage(conn, "b", "moving_directory", true, Some("x"), "2026-01-05")?;

            let all: Vec<String> = list(conn)?.into_iter().map(|r| r.id).collect();
            assert_eq!(all, vec!["a", "b", "c"]);
            let live: Vec<String> = list_not_failed(conn)?.into_iter().map(|r| r.id).collect();
            assert_eq!(live, vec!["a", "c"]);
            Ok(())
        })
        .unwrap();
    }
}
