//! Versioned schema migrations.
//!
//! Applied versions are recorded in `_migrations`. Each migration and its
//! ledger row commit together, so a crash mid-upgrade leaves the schema at
//! the previous version.

use std::collections::BTreeSet;

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_jobs",
        sql: include_str!("sql/001_create_jobs.sql"),
    },
    Migration {
        version: 2,
        name: "create_job_history",
        sql: include_str!("sql/002_create_job_history.sql"),
    },
    Migration {
        version: 3,
        name: "create_pending_activities",
        sql: include_str!("sql/003_create_pending_activities.sql"),
    },
];

/// Highest schema version this build knows how to use.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn applied_versions(conn: &Connection) -> Result<BTreeSet<u32>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT version FROM _migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, u32>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(versions)
}

/// Brings the schema up to [`latest_version`].
///
/// Refuses to touch a database written by a newer build.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = applied_versions(conn)?;
    if let Some(&newest) = applied.iter().next_back() {
        if newest > latest_version() {
            return Err(DatabaseError::Migration {
                version: newest,
                reason: format!(
                    "database schema is newer than this build (knows up to v{})",
                    latest_version()
                ),
            });
        }
    }

    for migration in MIGRATIONS.iter().filter(|m| !applied.contains(&m.version)) {
        log::info!("Applying migration v{} ({})", migration.version, migration.name);

        let failed = |e: rusqlite::Error| DatabaseError::Migration {
            version: migration.version,
            reason: e.to_string(),
        };
        let tx = conn.transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;
    }

    Ok(())
}
