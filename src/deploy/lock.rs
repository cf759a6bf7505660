// src/deploy/lock.rs

//! Per-domain deployment lock
//!
//! At most one pipeline run per domain: the lock is an exclusive `flock` on
//! `<lock_dir>/<domain>.lock`, held from render to reload. Different domains
//! use different files and never wait on each other. The lock also excludes
//! other sitewarden processes on the same host, since it lives on disk.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Exclusive lock on one domain, released on drop
#[derive(Debug)]
pub struct DomainLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl DomainLock {
    /// Acquire the lock for `domain`, blocking until it is free
    ///
    /// `domain` must already have passed validation; it becomes a file name.
    pub fn acquire(lock_dir: &Path, domain: &str) -> Result<Self> {
        let file = Self::open(lock_dir, domain)?;
        let path = Self::lock_path(lock_dir, domain);

        file.lock_exclusive().map_err(|e| {
            Error::IoError(format!("failed to lock {}: {}", path.display(), e))
        })?;

        debug!("Acquired deploy lock for {}", domain);
        Ok(Self { file, path })
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns `Ok(None)` while another run holds it.
    pub fn try_acquire(lock_dir: &Path, domain: &str) -> Result<Option<Self>> {
        let file = Self::open(lock_dir, domain)?;
        let path = Self::lock_path(lock_dir, domain);

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired deploy lock for {}", domain);
                Ok(Some(Self { file, path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Deploy lock for {} is held", domain);
                Ok(None)
            }
            Err(e) => Err(Error::IoError(format!(
                "failed to try-lock {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn lock_path(lock_dir: &Path, domain: &str) -> PathBuf {
        lock_dir.join(format!("{}.lock", domain))
    }

    fn open(lock_dir: &Path, domain: &str) -> Result<File> {
        fs::create_dir_all(lock_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(Self::lock_path(lock_dir, domain))?;
        Ok(file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DomainLock {
    fn drop(&mut self) {
        // flock is released when the file closes
        debug!("Released deploy lock {}", self.path.display());
    }
}
