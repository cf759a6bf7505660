// src/store/mod.rs

//! Site store
//!
//! Site records are read whole and changed through [`SiteUpdate`]s, one
//! update per completed operation. Two backends:
//! - [`MemoryStore`]: a map behind a mutex, for tests and embedding
//! - [`SqliteStore`]: the on-disk store used by the binary
//!
//! Both enforce that a pool name is used by at most one site per PHP
//! version.

mod schema;
mod sqlite;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::site::{RuntimeKind, Site, SiteUpdate};

/// Read/update access to site records
pub trait SiteStore: Send + Sync {
    /// Fetch a site; `NotFound` for an unknown domain
    fn get(&self, domain: &str) -> Result<Site>;

    /// Apply `update` to a site and return the stored result
    fn update(&self, domain: &str, update: &SiteUpdate) -> Result<Site>;

    /// Register a new site
    fn insert(&self, site: &Site) -> Result<()>;

    /// Delete a site record
    fn remove(&self, domain: &str) -> Result<()>;

    /// All sites, ordered by domain
    fn list(&self) -> Result<Vec<Site>>;

    /// Domain owning `pool_name` under PHP `version`, if any
    fn pool_owner(&self, version: &str, pool_name: &str) -> Result<Option<String>>;
}

/// (version, pool name) key of a PHP site
pub(crate) fn pool_key(site: &Site) -> Option<(String, String)> {
    match (site.runtime, &site.runtime_version) {
        (RuntimeKind::PhpApp, Some(version)) => {
            Some((version.clone(), site.effective_pool_name()))
        }
        _ => None,
    }
}

pub(crate) fn pool_conflict(version: &str, pool: &str, owner: &str) -> Error {
    Error::AlreadyExists(format!(
        "pool {} for PHP {} is already used by {}",
        pool, version, owner
    ))
}

/// In-memory site store
#[derive(Debug, Default)]
pub struct MemoryStore {
    sites: Mutex<BTreeMap<String, Site>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sites(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Site>> {
        self.sites.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_pool(sites: &BTreeMap<String, Site>, site: &Site) -> Result<()> {
        let Some((version, pool)) = pool_key(site) else {
            return Ok(());
        };
        let key = Some((version.clone(), pool.clone()));
        let owner = sites
            .values()
            .find(|other| other.domain != site.domain && pool_key(other) == key);
        match owner {
            Some(owner) => Err(pool_conflict(&version, &pool, &owner.domain)),
            None => Ok(()),
        }
    }
}

impl SiteStore for MemoryStore {
    fn get(&self, domain: &str) -> Result<Site> {
        self.sites()
            .get(domain)
            .cloned()
            .ok_or_else(|| Error::NotFound(domain.to_string()))
    }

    fn update(&self, domain: &str, update: &SiteUpdate) -> Result<Site> {
        let mut sites = self.sites();
        let current = sites
            .get(domain)
            .ok_or_else(|| Error::NotFound(domain.to_string()))?;

        let updated = current.with_update(update);
        Self::check_pool(&sites, &updated)?;
        sites.insert(domain.to_string(), updated.clone());
        debug!("Updated site {}", domain);
        Ok(updated)
    }

    fn insert(&self, site: &Site) -> Result<()> {
        site.validate()?;
        let mut sites = self.sites();
        if sites.contains_key(&site.domain) {
            return Err(Error::AlreadyExists(site.domain.clone()));
        }
        Self::check_pool(&sites, site)?;
        sites.insert(site.domain.clone(), site.clone());
        Ok(())
    }

    fn remove(&self, domain: &str) -> Result<()> {
        self.sites()
            .remove(domain)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(domain.to_string()))
    }

    fn list(&self) -> Result<Vec<Site>> {
        Ok(self.sites().values().cloned().collect())
    }

    fn pool_owner(&self, version: &str, pool_name: &str) -> Result<Option<String>> {
        let key = Some((version.to_string(), pool_name.to_string()));
        Ok(self
            .sites()
            .values()
            .find(|site| pool_key(site) == key)
            .map(|site| site.domain.clone()))
    }
}
