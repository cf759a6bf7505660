// src/store/schema.rs

//! Site store schema and migrations

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version: Option<i32> = conn.query_row(
        "SELECT MAX(version) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current site store schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying site store migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Ok(()),
    }
}

/// Initial schema
///
/// `pool_name` is the explicit name (nullable); `pool_key` is the effective
/// name for PHP sites and NULL otherwise, so the unique index only covers
/// PHP sites.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE sites (
            domain TEXT PRIMARY KEY,
            runtime TEXT NOT NULL,
            runtime_version TEXT,
            root_path TEXT NOT NULL,
            working_subpath TEXT NOT NULL DEFAULT '',
            listen_port INTEGER,
            pool_name TEXT,
            pool_key TEXT,
            php_settings TEXT NOT NULL DEFAULT '{}',
            tls_desired INTEGER NOT NULL DEFAULT 0,
            tls_status TEXT NOT NULL DEFAULT 'none',
            tls_pending_since TEXT,
            tls_issued_at TEXT,
            tls_expires_at TEXT,
            tls_last_error TEXT,
            proxy_status TEXT NOT NULL DEFAULT 'inactive',
            proxy_last_error TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE UNIQUE INDEX idx_sites_pool ON sites(runtime_version, pool_key);
        CREATE INDEX idx_sites_tls_status ON sites(tls_status);
        ",
    )?;
    Ok(())
}
