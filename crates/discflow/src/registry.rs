//! Token registry: the durable record of every outstanding asynchronous activity.
//!
//! Each activity handed to an external service gets a single-use token. The
//! service quotes the token when it calls back, and the registry guarantees a
//! token moves out of `pending` exactly once. The `*_in` functions work on a
//! caller's connection so the engine can fold them into its own transaction.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;

use crate::db::activity_repo::{self, ActivityRow};
use crate::db::{Database, DatabaseError};
use crate::error::RegistryError;
use crate::model::{ActivityKind, ActivityOutcome, ActivityStatus, PendingActivity};

const TOKEN_BYTES: usize = 16;

/// Generates a fresh 128-bit token, hex encoded.
pub fn new_token() -> Result<String, RegistryError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|e| RegistryError::Entropy(format!("Failed to generate random bytes: {}", e)))?;
    Ok(hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

fn to_pending(row: ActivityRow) -> Result<PendingActivity, DatabaseError> {
    let kind = ActivityKind::parse(&row.kind).ok_or(DatabaseError::InvalidColumn {
        column: "kind",
        value: row.kind.clone(),
    })?;
    let status = ActivityStatus::parse(&row.status).ok_or(DatabaseError::InvalidColumn {
        column: "status",
        value: row.status.clone(),
    })?;
    let issued_at = DateTime::parse_from_rfc3339(&row.issued_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidColumn {
            column: "issued_at",
            value: row.issued_at.clone(),
        })?;
    let deadline =
        DateTime::from_timestamp_millis(row.deadline_ms).ok_or(DatabaseError::InvalidColumn {
            column: "deadline_ms",
            value: row.deadline_ms.to_string(),
        })?;

    Ok(PendingActivity {
        token: row.token,
        job_id: row.job_id,
        file_key: row.file_key,
        kind,
        status,
        issued_at,
        deadline,
        progress_percent: row.progress_percent,
    })
}

/// Registers an already generated token as pending.
pub fn register_in(
    conn: &Connection,
    token: &str,
    job_id: &str,
    file_key: &str,
    kind: ActivityKind,
    issued_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
) -> Result<(), RegistryError> {
    activity_repo::insert(
        conn,
        &ActivityRow {
            token: token.to_string(),
            job_id: job_id.to_string(),
            file_key: file_key.to_string(),
            kind: kind.as_str().to_string(),
            status: ActivityStatus::Pending.as_str().to_string(),
            issued_at: issued_at.to_rfc3339(),
            deadline_ms: deadline.timestamp_millis(),
            progress_percent: None,
            resolved_at: None,
        },
    )?;
    Ok(())
}

/// Creates a pending record under a new token and returns the token.
pub fn issue_in(
    conn: &Connection,
    job_id: &str,
    file_key: &str,
    kind: ActivityKind,
    issued_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
) -> Result<String, RegistryError> {
    let token = new_token()?;
    register_in(conn, &token, job_id, file_key, kind, issued_at, deadline)?;
    Ok(token)
}

/// Moves a pending token to the status implied by `outcome`.
///
/// Returns `false` without touching anything if the token is unknown or
/// already resolved.
pub fn resolve_in(
    conn: &Connection,
    token: &str,
    outcome: &ActivityOutcome,
    now: DateTime<Utc>,
) -> Result<bool, RegistryError> {
    let applied = activity_repo::resolve_if_pending(
        conn,
        token,
        outcome.status().as_str(),
        &now.to_rfc3339(),
    )?;
    Ok(applied)
}

/// Pushes a pending transcode's deadline to `now + extension`.
///
/// Returns `false` for unknown or resolved tokens and for metadata tokens.
pub fn heartbeat_in(
    conn: &Connection,
    token: &str,
    progress_percent: Option<f64>,
    now: DateTime<Utc>,
    extension: Duration,
) -> Result<bool, RegistryError> {
    let extended = activity_repo::extend_deadline(
        conn,
        token,
        ActivityKind::PreviewTranscode.as_str(),
        (now + extension).timestamp_millis(),
        progress_percent,
    )?;
    Ok(extended)
}

pub fn get_in(conn: &Connection, token: &str) -> Result<Option<PendingActivity>, RegistryError> {
    match activity_repo::find_by_token(conn, token)? {
        Some(row) => Ok(Some(to_pending(row)?)),
        None => Ok(None),
    }
}

/// Pending records whose deadline is at or before `now`.
pub fn expired_in(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<PendingActivity>, RegistryError> {
    let rows = activity_repo::list_expired(conn, now.timestamp_millis())?;
    rows.into_iter()
        .map(|row| to_pending(row).map_err(RegistryError::from))
        .collect()
}

pub fn pending_for_job_in(
    conn: &Connection,
    job_id: &str,
) -> Result<Vec<PendingActivity>, RegistryError> {
    let rows = activity_repo::list_pending_for_job(conn, job_id)?;
    rows.into_iter()
        .map(|row| to_pending(row).map_err(RegistryError::from))
        .collect()
}

/// Handle over the registry that manages its own connection access.
#[derive(Clone)]
pub struct TokenRegistry {
    db: Database,
    heartbeat_timeout: Duration,
}

impl TokenRegistry {
    pub fn new(db: Database, heartbeat_timeout: Duration) -> Self {
        Self {
            db,
            heartbeat_timeout,
        }
    }

    pub fn issue(
        &self,
        job_id: &str,
        file_key: &str,
        kind: ActivityKind,
        deadline: DateTime<Utc>,
    ) -> Result<String, RegistryError> {
        self.db.transaction(|tx| issue_in(tx, job_id, file_key, kind, Utc::now(), deadline))
    }

    pub fn resolve(&self, token: &str, outcome: &ActivityOutcome) -> Result<bool, RegistryError> {
        self.db.transaction(|tx| resolve_in(tx, token, outcome, Utc::now()))
    }

    pub fn heartbeat(&self, token: &str, progress_percent: Option<f64>) -> Result<bool, RegistryError> {
        self.heartbeat_at(token, progress_percent, Utc::now())
    }

    pub fn heartbeat_at(
        &self,
        token: &str,
        progress_percent: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        self.db
            .transaction(|tx| heartbeat_in(tx, token, progress_percent, now, self.heartbeat_timeout))
    }

    pub fn get(&self, token: &str) -> Result<Option<PendingActivity>, RegistryError> {
        self.db.transaction(|tx| get_in(tx, token))
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Result<Vec<PendingActivity>, RegistryError> {
        self.db.transaction(|tx| expired_in(tx, now))
    }

    pub fn pending_for_job(&self, job_id: &str) -> Result<Vec<PendingActivity>, RegistryError> {
        self.db.transaction(|tx| pending_for_job_in(tx, job_id))
    }
}
