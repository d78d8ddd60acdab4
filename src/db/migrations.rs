use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::error::AppResult;
use crate::services::schedule_utils::{format_utc, parse_utc};

type MigrationFn = fn(&Connection) -> AppResult<()>;

/// Ordered schema steps. The position of a step is its version minus one.
const MIGRATIONS: &[(i32, &str, MigrationFn)] = &[
    (1, "Add suggestion sets and suggested slots", migrate_to_v1),
    (2, "Add reservations with active-interval uniqueness", migrate_to_v2),
    (3, "Add suggestion quarantine reason", migrate_to_v3),
    (4, "Add reservation sync claim", migrate_to_v4),
];

#[derive(Debug)]
pub struct MigrationInfo {
    pub version: i32,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

/// Applies every step newer than `PRAGMA user_version`, recording each one.
pub fn run(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS migration_history (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );
        "#,
    )?;

    let current: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (version, description, migrate) in MIGRATIONS.iter().filter(|(v, _, _)| *v > current) {
        info!(target: "app::db", version, description, "applying migration");
        migrate(conn)?;
        conn.pragma_update(None, "user_version", version)?;
        conn.execute(
            "INSERT OR REPLACE INTO migration_history (version, description, applied_at) VALUES (?1, ?2, ?3)",
            (version, description, format_utc(Utc::now())),
        )?;
    }

    Ok(())
}

pub fn get_migration_history(conn: &Connection) -> AppResult<Vec<MigrationInfo>> {
    let mut stmt = conn.prepare(
        "SELECT version, description, applied_at FROM migration_history ORDER BY version",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(version, description, applied_at)| {
            Ok(MigrationInfo {
                version,
                description,
                applied_at: parse_utc(&applied_at)?,
            })
        })
        .collect()
}

fn migrate_to_v1(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS suggestion_sets (
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            organizer_id TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            contact_timezone TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('active', 'expired', 'meeting_scheduled', 'cleared')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(batch_id, contact_id),
            FOREIGN KEY (batch_id) REFERENCES batches(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_suggestion_sets_batch_id ON suggestion_sets(batch_id);
        CREATE INDEX IF NOT EXISTS idx_suggestion_sets_organizer_status
            ON suggestion_sets(organizer_id, status);

        CREATE TABLE IF NOT EXISTS suggestion_slots (
            id TEXT PRIMARY KEY,
            set_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            score REAL NOT NULL,
            score_factors TEXT,
            selected INTEGER NOT NULL DEFAULT 0,
            expires_at TEXT NOT NULL,
            FOREIGN KEY (set_id) REFERENCES suggestion_sets(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_suggestion_slots_set_id ON suggestion_slots(set_id);
        CREATE INDEX IF NOT EXISTS idx_suggestion_slots_expires_at ON suggestion_slots(expires_at);
        "#,
    )?;

    Ok(())
}

fn migrate_to_v2(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS reservations (
            id TEXT PRIMARY KEY,
            organizer_id TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            suggestion_set_id TEXT NOT NULL,
            start_at TEXT NOT NULL,
            end_at TEXT NOT NULL,
            timezone TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'confirmed', 'expired', 'cancelled')),
            synced_to_external_calendar INTEGER NOT NULL DEFAULT 0,
            external_event_ref TEXT,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_reservations_organizer_interval
            ON reservations(organizer_id, start_at, end_at);
        CREATE INDEX IF NOT EXISTS idx_reservations_status ON reservations(status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_reservations_active_interval
            ON reservations(organizer_id, start_at, end_at)
            WHERE status IN ('pending', 'confirmed');
        "#,
    )?;

    Ok(())
}

fn migrate_to_v3(conn: &Connection) -> AppResult<()> {
    if !has_column(conn, "suggestion_sets", "quarantine_reason")? {
        conn.execute_batch("ALTER TABLE suggestion_sets ADD COLUMN quarantine_reason TEXT;")?;
    }
    Ok(())
}

fn migrate_to_v4(conn: &Connection) -> AppResult<()> {
    if !has_column(conn, "reservations", "sync_claimed_at")? {
        conn.execute_batch("ALTER TABLE reservations ADD COLUMN sync_claimed_at TEXT;")?;
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> AppResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name.eq_ignore_ascii_case(column)))
}
