// src/deploy/writer.rs

//! Artifact file operations
//!
//! Two modes:
//! - **Direct**: plain filesystem calls, used by the sandbox and by production
//!   adapters rooted away from `/` (or when already running as root)
//! - **Privileged**: content goes to a private temporary file first and is
//!   copied into place with `sudo -n cp`, then normalized with `chmod 644`
//!
//! The temporary file is a [`NamedTempFile`], so it is removed when the write
//! attempt ends on every path.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::executor::{CommandSpec, DEFAULT_TIMEOUT, ProcessExecutor};

/// File mode of every written artifact
const ARTIFACT_MODE: u32 = 0o644;

/// Suffix of a render that failed validation
pub const REJECTED_SUFFIX: &str = "rejected";

/// `<file>.rejected` beside `path`
pub fn rejected_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(REJECTED_SUFFIX);
    PathBuf::from(name)
}

/// Writes, links and removes configuration artifacts
pub struct ArtifactWriter {
    executor: Arc<dyn ProcessExecutor>,
    privileged: bool,
    timeout: Duration,
}

impl ArtifactWriter {
    /// Writer using plain filesystem calls
    pub fn direct(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            executor,
            privileged: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Writer going through `sudo -n`
    pub fn privileged(executor: Arc<dyn ProcessExecutor>) -> Self {
        Self {
            executor,
            privileged: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// Current content of `path`, `None` when absent
    pub fn read(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::IoError(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Replace the content of `path`
    pub fn write(&self, path: &Path, content: &str) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            Error::InvalidInput(format!("{} has no parent directory", path.display()))
        })?;

        if self.privileged {
            let mut temp = NamedTempFile::new()?;
            temp.write_all(content.as_bytes())?;
            temp.flush()?;

            self.sudo(CommandSpec::new("mkdir").arg("-p").arg(path_arg(parent)))?;
            self.sudo(
                CommandSpec::new("cp")
                    .arg(path_arg(temp.path()))
                    .arg(path_arg(path)),
            )?;
            self.sudo(
                CommandSpec::new("chmod")
                    .arg(format!("{:o}", ARTIFACT_MODE))
                    .arg(path_arg(path)),
            )?;
            // temp is removed here
        } else {
            fs::create_dir_all(parent)?;
            let mut temp = NamedTempFile::new_in(parent)?;
            temp.write_all(content.as_bytes())?;
            temp.flush()?;
            // tempfile creates 0600; daemons reading as another user need 0644
            temp.as_file().set_permissions(fs::Permissions::from_mode(ARTIFACT_MODE))?;
            temp.persist(path).map_err(|e| {
                Error::IoError(format!("failed to write {}: {}", path.display(), e.error))
            })?;
        }

        debug!("Wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    }

    /// Move `from` to `to`, replacing `to`
    pub fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        if self.privileged {
            self.sudo(
                CommandSpec::new("mv")
                    .arg("-f")
                    .arg(path_arg(from))
                    .arg(path_arg(to)),
            )?;
        } else {
            fs::rename(from, to)?;
        }
        debug!("Moved {} -> {}", from.display(), to.display());
        Ok(())
    }

    /// Remove a file or symlink; returns false when it was already absent
    pub fn remove(&self, path: &Path) -> Result<bool> {
        if fs::symlink_metadata(path).is_err() {
            return Ok(false);
        }

        if self.privileged {
            self.sudo(CommandSpec::new("rm").arg("-f").arg(path_arg(path)))?;
        } else {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
        info!("Removed {}", path.display());
        Ok(true)
    }

    /// True when `link` is a symlink pointing at `target`
    pub fn is_linked(&self, link: &Path, target: &Path) -> bool {
        fs::read_link(link).is_ok_and(|current| current == target)
    }

    /// Point `link` at `target`, creating or refreshing it
    ///
    /// Linking an already-linked site is a no-op.
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        if self.is_linked(link, target) {
            debug!("{} already points at {}", link.display(), target.display());
            return Ok(());
        }

        if self.privileged {
            self.sudo(
                CommandSpec::new("ln")
                    .arg("-sfn")
                    .arg(path_arg(target))
                    .arg(path_arg(link)),
            )?;
        } else {
            if let Some(parent) = link.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::symlink_metadata(link).is_ok() {
                fs::remove_file(link)?;
            }
            std::os::unix::fs::symlink(target, link)?;
        }

        info!("Linked {} -> {}", link.display(), target.display());
        Ok(())
    }

    fn sudo(&self, spec: CommandSpec) -> Result<()> {
        let spec = spec.timeout(self.timeout).elevated(true);
        let output = self.executor.run(&spec)?;
        if output.success() {
            Ok(())
        } else {
            Err(Error::IoError(output.failure_detail(&spec)))
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
