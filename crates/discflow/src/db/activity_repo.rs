//! Pending activity repository: the durable side of the token registry.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw pending activity row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRow {
    pub token: String,
    pub job_id: String,
    pub file_key: String,
    pub kind: String,
    pub status: String,
    pub issued_at: String,
    pub deadline_ms: i64,
    pub progress_percent: Option<f64>,
    pub resolved_at: Option<String>,
}

impl ActivityRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            token: row.get("token")?,
            job_id: row.get("job_id")?,
            file_key: row.get("file_key")?,
            kind: row.get("kind")?,
            status: row.get("status")?,
            issued_at: row.get("issued_at")?,
            deadline_ms: row.get("deadline_ms")?,
            progress_percent: row.get("progress_percent")?,
            resolved_at: row.get("resolved_at")?,
        })
    }
}

pub fn insert(conn: &Connection, row: &ActivityRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO pending_activities (token, job_id, file_key, kind, status, issued_at,
         deadline_ms, progress_percent, resolved_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            row.token,
            row.job_id,
            row.file_key,
            row.kind,
            row.status,
            row.issued_at,
            row.deadline_ms,
            row.progress_percent,
            row.resolved_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_token(conn: &Connection, token: &str) -> Result<Option<ActivityRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM pending_activities WHERE token = ?1",
            params![token],
            ActivityRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Moves a pending activity to `status`. Returns `false` if it was not pending.
pub fn resolve_if_pending(
    conn: &Connection,
    token: &str,
    status: &str,
    resolved_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE pending_activities SET status = ?2, resolved_at = ?3
         WHERE token = ?1 AND status = 'pending'",
        params![token, status, resolved_at],
    )?;
    Ok(changed == 1)
}

/// Pushes out the deadline of a pending activity of the given kind.
pub fn extend_deadline(
    conn: &Connection,
    token: &str,
    kind: &str,
    deadline_ms: i64,
    progress_percent: Option<f64>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE pending_activities
         SET deadline_ms = ?3, progress_percent = COALESCE(?4, progress_percent)
         WHERE token = ?1 AND kind = ?2 AND status = 'pending'",
        params![token, kind, deadline_ms, progress_percent],
    )?;
    Ok(changed == 1)
}

/// Pending activities whose deadline is at or before `now_ms`, earliest first.
pub fn list_expired(conn: &Connection, now_ms: i64) -> Result<Vec<ActivityRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM pending_activities
         WHERE status = 'pending' AND deadline_ms <= ?1
         ORDER BY deadline_ms ASC, token ASC",
    )?;
    let rows = stmt
        .query_map(params![now_ms], ActivityRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_pending_for_job(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<ActivityRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM pending_activities
         WHERE job_id = ?1 AND status = 'pending'
         ORDER BY file_key ASC, kind ASC",
    )?;
    let rows = stmt
        .query_map(params![job_id], ActivityRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
