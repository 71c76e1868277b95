pub mod models;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use std::path::Path;

use crate::state::DbPool;

pub const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial",
    include_str!("../../migrations/001_initial.sql"),
)];

/// Per-connection pragmas. `foreign_keys` is connection scoped in SQLite, so
/// every pooled connection has to enable it, not just the first one.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    let pool = Pool::builder().max_size(8).build(manager)?;

    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

/// Single-connection in-memory pool. Each in-memory connection is its own
/// database, so the pool must never hand out a second one.
pub fn memory_pool() -> anyhow::Result<DbPool> {
    let manager =
        SqliteConnectionManager::memory().with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
    let pool = Pool::builder().max_size(1).build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Current time as a fixed-width RFC 3339 string. Fixed width keeps text
/// comparison in SQL consistent with chronological order.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Tables whose rows are ordered by a server-assigned `created_at`.
#[derive(Debug, Clone, Copy)]
pub enum Ordered {
    Posts,
    Comments,
}

impl Ordered {
    fn table(self) -> &'static str {
        match self {
            Ordered::Posts => "posts",
            Ordered::Comments => "comments",
        }
    }
}

/// `created_at` for a row about to be inserted into `table`: the current
/// time, or one microsecond past the newest existing row if the clock lags
/// behind it.
///
/// Call this inside the IMMEDIATE transaction that performs the insert.
/// Writers are then serialized, so timestamp order equals commit order and a
/// new row can never sort behind one a reader has already seen.
pub fn next_created_at(conn: &Connection, table: Ordered) -> rusqlite::Result<String> {
    let latest: Option<String> = conn.query_row(
        &format!("SELECT MAX(created_at) FROM {}", table.table()),
        [],
        |row| row.get(0),
    )?;
    let now = Utc::now();
    let latest = latest
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|at| at.with_timezone(&Utc));

    Ok(match latest {
        Some(latest) if latest >= now => format_timestamp(latest + Duration::microseconds(1)),
        _ => format_timestamp(now),
    })
}
