// src/store/sqlite.rs

//! SQLite-backed site store
//!
//! Status enums are stored by their lowercase names, timestamps as RFC 3339
//! text and PHP overrides as JSON.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use super::{SiteStore, pool_conflict, pool_key, schema};
use crate::error::{Error, Result};
use crate::site::{Site, SiteUpdate};

const SELECT_COLUMNS: &str = "domain, runtime, runtime_version, root_path, working_subpath, \
     listen_port, pool_name, php_settings, tls_desired, tls_status, tls_pending_since, \
     tls_issued_at, tls_expires_at, tls_last_error, proxy_status, proxy_last_error";

/// Site store in a SQLite database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        schema::migrate(&conn)?;

        info!("Opened site store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn find(conn: &Connection, domain: &str) -> Result<Option<Site>> {
        let sql = format!("SELECT {} FROM sites WHERE domain = ?1", SELECT_COLUMNS);
        Ok(conn.query_row(&sql, [domain], site_from_row).optional()?)
    }

    fn owner_of(conn: &Connection, version: &str, pool: &str) -> Result<Option<String>> {
        Ok(conn
            .query_row(
                "SELECT domain FROM sites WHERE runtime_version = ?1 AND pool_key = ?2",
                [version, pool],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Map a unique-index violation to a domain error
    fn constraint(site: &Site, error: rusqlite::Error, conn: &Connection) -> Error {
        let violated = matches!(
            &error,
            rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
        );
        if !violated {
            return error.into();
        }

        if let Some((version, pool)) = pool_key(site) {
            if let Ok(Some(owner)) = Self::owner_of(conn, &version, &pool) {
                if owner != site.domain {
                    return pool_conflict(&version, &pool, &owner);
                }
            }
        }
        Error::AlreadyExists(site.domain.clone())
    }
}

impl SiteStore for SqliteStore {
    fn get(&self, domain: &str) -> Result<Site> {
        Self::find(&self.conn(), domain)?.ok_or_else(|| Error::NotFound(domain.to_string()))
    }

    fn update(&self, domain: &str, update: &SiteUpdate) -> Result<Site> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let current = Self::find(&tx, domain)?.ok_or_else(|| Error::NotFound(domain.to_string()))?;
        let site = current.with_update(update);
        let pool = pool_key(&site).map(|(_, pool)| pool);

        let result = tx.execute(
            "UPDATE sites SET
                pool_name = ?2, pool_key = ?3, php_settings = ?4, tls_desired = ?5,
                tls_status = ?6, tls_pending_since = ?7, tls_issued_at = ?8,
                tls_expires_at = ?9, tls_last_error = ?10, proxy_status = ?11,
                proxy_last_error = ?12, updated_at = CURRENT_TIMESTAMP
             WHERE domain = ?1",
            params![
                site.domain,
                site.pool_name,
                pool,
                settings_json(&site)?,
                site.tls_desired,
                site.tls_status.as_ref(),
                site.tls_pending_since.map(|t| t.to_rfc3339()),
                site.tls_issued_at.map(|t| t.to_rfc3339()),
                site.tls_expires_at.map(|t| t.to_rfc3339()),
                site.tls_last_error,
                site.proxy_status.as_ref(),
                site.proxy_last_error,
            ],
        );
        if let Err(e) = result {
            return Err(Self::constraint(&site, e, &tx));
        }

        tx.commit()?;
        debug!("Updated site {}", domain);
        Ok(site)
    }

    fn insert(&self, site: &Site) -> Result<()> {
        site.validate()?;
        let conn = self.conn();
        let pool = pool_key(site).map(|(_, pool)| pool);

        let result = conn.execute(
            "INSERT INTO sites (
                domain, runtime, runtime_version, root_path, working_subpath, listen_port,
                pool_name, pool_key, php_settings, tls_desired, tls_status, tls_pending_since,
                tls_issued_at, tls_expires_at, tls_last_error, proxy_status, proxy_last_error
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                site.domain,
                site.runtime.as_ref(),
                site.runtime_version,
                path_text(&site.root_path)?,
                site.working_subpath,
                site.listen_port,
                site.pool_name,
                pool,
                settings_json(site)?,
                site.tls_desired,
                site.tls_status.as_ref(),
                site.tls_pending_since.map(|t| t.to_rfc3339()),
                site.tls_issued_at.map(|t| t.to_rfc3339()),
                site.tls_expires_at.map(|t| t.to_rfc3339()),
                site.tls_last_error,
                site.proxy_status.as_ref(),
                site.proxy_last_error,
            ],
        );

        match result {
            Ok(_) => {
                info!("Registered site {}", site.domain);
                Ok(())
            }
            Err(e) => Err(Self::constraint(site, e, &conn)),
        }
    }

    fn remove(&self, domain: &str) -> Result<()> {
        let deleted = self
            .conn()
            .execute("DELETE FROM sites WHERE domain = ?1", [domain])?;
        if deleted == 0 {
            return Err(Error::NotFound(domain.to_string()));
        }
        info!("Removed site record {}", domain);
        Ok(())
    }

    fn list(&self) -> Result<Vec<Site>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM sites ORDER BY domain", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sites)
    }

    fn pool_owner(&self, version: &str, pool_name: &str) -> Result<Option<String>> {
        Self::owner_of(&self.conn(), version, pool_name)
    }
}

fn settings_json(site: &Site) -> Result<String> {
    serde_json::to_string(&site.php_settings)
        .map_err(|e| Error::InvalidInput(format!("unserializable PHP settings: {}", e)))
}

fn path_text(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| {
        Error::InvalidInput(format!("path is not valid UTF-8: {}", path.display()))
    })
}

fn conversion_error(
    idx: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error))
}

fn parse_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e))
    })
    .transpose()
}

fn site_from_row(row: &Row<'_>) -> rusqlite::Result<Site> {
    let settings: String = row.get(7)?;
    let root: String = row.get(3)?;

    Ok(Site {
        domain: row.get(0)?,
        runtime: parse_enum(row, 1)?,
        runtime_version: row.get(2)?,
        root_path: PathBuf::from(root),
        working_subpath: row.get(4)?,
        listen_port: row.get(5)?,
        pool_name: row.get(6)?,
        php_settings: serde_json::from_str(&settings).map_err(|e| conversion_error(7, e))?,
        tls_desired: row.get(8)?,
        tls_status: parse_enum(row, 9)?,
        tls_pending_since: parse_time(row, 10)?,
        tls_issued_at: parse_time(row, 11)?,
        tls_expires_at: parse_time(row, 12)?,
        tls_last_error: row.get(13)?,
        proxy_status: parse_enum(row, 14)?,
        proxy_last_error: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::{PhpSettings, ProxyStatus, TlsStatus};
    use tempfile::TempDir;

    #[test]
    fn test_insert_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        let site = Site::php("app.example.com", "8.3", "/srv/app")
            .with_working_subpath("public")
            .with_php_settings(PhpSettings::wordpress());

        store.insert(&site).unwrap();
        assert_eq!(store.get("app.example.com").unwrap(), site);
    }

    #[test]
    fn test_update_persists_timestamps() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("sites.db");
        let now = DateTime::parse_from_rfc3339("2026-10-19T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        {
            let store = SqliteStore::open(&db).unwrap();
            store
                .insert(&Site::node("api.example.com", 3000, "/srv/api"))
                .unwrap();
            let update = SiteUpdate {
                tls_status: Some(TlsStatus::Pending),
                tls_pending_since: Some(Some(now)),
                proxy_status: Some(ProxyStatus::Failed),
                proxy_last_error: Some(Some("reload failed".to_string())),
                ..SiteUpdate::default()
            };
            store.update("api.example.com", &update).unwrap();
        }

        let store = SqliteStore::open(&db).unwrap();
        let site = store.get("api.example.com").unwrap();
        assert_eq!(site.tls_status, TlsStatus::Pending);
        assert_eq!(site.tls_pending_since, Some(now));
        assert_eq!(site.proxy_status, ProxyStatus::Failed);
        assert_eq!(site.proxy_last_error.as_deref(), Some("reload failed"));
        assert_eq!(site.listen_port, Some(3000));
    }

    #[test]
    fn test_pool_index_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert(&Site::php("a.example.com", "8.3", "/srv/a").with_pool_name("shared"))
            .unwrap();

        let err = store
            .insert(&Site::php("b.example.com", "8.3", "/srv/b").with_pool_name("shared"))
            .unwrap_err();
        assert!(err.to_string().contains("already used by a.example.com"));

        store
            .insert(&Site::php("b.example.com", "8.3", "/srv/b"))
            .unwrap();
        let err = store
            .update(
                "b.example.com",
                &SiteUpdate {
                    pool_name: Some("shared".to_string()),
                    ..SiteUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
        assert_eq!(
            store.get("b.example.com").unwrap().effective_pool_name(),
            "b_example_com"
        );
    }

    #[test]
    fn test_node_sites_do_not_collide() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert(&Site::node("a.example.com", 3000, "/srv/a"))
            .unwrap();
        store
            .insert(&Site::node("b.example.com", 3001, "/srv/b"))
            .unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn test_remove_unknown() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.remove("x.example.com"), Err(Error::NotFound(_))));
    }
}
