// src/platform/mod.rs

//! OS family adapters
//!
//! An adapter resolves where a site's artifacts live and which daemons own
//! them on one OS family. Every adapter produces the same logical fields
//! ([`ResolvedPaths`]), so the deployment pipeline never branches on the OS.
//!
//! Variants:
//! - [`SandboxAdapter`]: everything under one working directory, no
//!   privileged commands, service control and syntax checks are no-ops
//! - [`DebianAdapter`]: `/etc/php/<ver>/fpm/pool.d`, `php<ver>-fpm`
//! - [`RhelAdapter`]: Remi SCL layout, version digits concatenated
//!   (`8.4` -> `84`) under `/etc/opt/remi/php84/...`
//!
//! The adapter is chosen once at startup by [`select_adapter`] from the
//! configured environment flag; nothing inspects the host to guess.
//!
//! ## Target Root Support
//!
//! Production adapters accept a target root (default `/`). When it is not
//! the live root, paths are joined under it, writes go straight to disk and
//! syntax checks point the daemons at the configuration under that root.

mod debian;
mod rhel;
mod sandbox;

pub use debian::DebianAdapter;
pub use rhel::RhelAdapter;
pub use sandbox::SandboxAdapter;

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::CommandSpec;
use crate::site::{RuntimeKind, Site};

/// Name of the reverse-proxy daemon's service on every family
pub const PROXY_SERVICE: &str = "nginx";

/// Supported OS families
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OsFamily {
    Sandbox,
    Debian,
    Rhel,
}

/// User and group owning pool processes and sockets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlUser {
    pub user: String,
    pub group: String,
}

impl ControlUser {
    pub fn new(user: &str, group: &str) -> Self {
        Self {
            user: user.to_string(),
            group: group.to_string(),
        }
    }
}

/// Directories used by the reverse proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLayout {
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
    pub log_dir: PathBuf,
    /// Directory holding `<domain>/fullchain.pem` etc.
    pub certificate_root: PathBuf,
}

/// Resolved locations for a site's pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPaths {
    pub name: String,
    pub version: String,
    pub pool_dir: PathBuf,
    pub config_path: PathBuf,
    pub socket_path: PathBuf,
    pub log_dir: PathBuf,
    pub service_name: String,
    pub user: ControlUser,
}

/// Everything the renderer and pipeline need to know about where a site lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub family: OsFamily,
    /// Proxy config file in the "available" directory
    pub proxy_available: PathBuf,
    /// Symlink in the "enabled" directory
    pub proxy_enabled: PathBuf,
    pub proxy_log_dir: PathBuf,
    pub certificate_dir: PathBuf,
    pub proxy_service: String,
    /// Present for PHP sites only
    pub pool: Option<PoolPaths>,
}

impl ResolvedPaths {
    /// Pool paths, or an input error for sites without a pool
    pub fn pool(&self) -> Result<&PoolPaths> {
        self.pool
            .as_ref()
            .ok_or_else(|| Error::InvalidInput("site has no process pool".to_string()))
    }
}

/// Path and service-name conventions for one OS family
pub trait OsFamilyAdapter: Send + Sync + Debug {
    fn family(&self) -> OsFamily;

    /// Target root the paths below are joined under
    fn root(&self) -> &Path;

    /// Directory holding pool configs for a PHP version
    fn pool_dir(&self, version: &str) -> PathBuf;

    /// Listening socket of a named pool
    fn socket_path(&self, version: &str, pool: &str) -> PathBuf;

    /// Pool log directory for a PHP version
    fn log_dir(&self, version: &str) -> PathBuf;

    /// PHP-FPM service name for a PHP version
    fn service_name(&self, version: &str) -> String;

    /// User and group the pools run as
    fn control_user(&self) -> ControlUser;

    fn proxy_layout(&self) -> ProxyLayout;

    fn proxy_service_name(&self) -> String {
        PROXY_SERVICE.to_string()
    }

    /// Syntax check over the whole active proxy configuration
    ///
    /// `None` means the check is skipped (sandbox).
    fn proxy_check_command(&self) -> Option<CommandSpec>;

    /// Syntax check over the whole pool configuration of a PHP version
    fn pool_check_command(&self, version: &str) -> Option<CommandSpec>;

    /// True for the development sandbox
    fn is_sandboxed(&self) -> bool {
        false
    }

    /// Whether writes and daemon commands must go through `sudo`
    fn needs_privilege(&self) -> bool {
        !self.is_sandboxed() && is_live_root(self.root()) && !nix::unistd::geteuid().is_root()
    }

    /// Resolve all artifact locations for `site`
    fn resolve(&self, site: &Site) -> Result<ResolvedPaths> {
        site.validate()?;

        let layout = self.proxy_layout();
        let filename = format!("{}.conf", site.domain);

        let pool = match site.runtime {
            RuntimeKind::PhpApp => {
                let version = site.php_version()?.to_string();
                let name = site.effective_pool_name();
                let pool_dir = self.pool_dir(&version);
                Some(PoolPaths {
                    config_path: pool_dir.join(format!("{}.conf", name)),
                    socket_path: self.socket_path(&version, &name),
                    log_dir: self.log_dir(&version),
                    service_name: self.service_name(&version),
                    user: self.control_user(),
                    pool_dir,
                    name,
                    version,
                })
            }
            RuntimeKind::NodeApp => None,
        };

        Ok(ResolvedPaths {
            family: self.family(),
            proxy_available: layout.sites_available.join(&filename),
            proxy_enabled: layout.sites_enabled.join(&filename),
            proxy_log_dir: layout.log_dir,
            certificate_dir: layout.certificate_root.join(&site.domain),
            proxy_service: self.proxy_service_name(),
            pool,
        })
    }
}

/// True when `root` is the live system root
pub fn is_live_root(root: &Path) -> bool {
    root == Path::new("/")
}

/// Join an absolute path under a target root
pub(crate) fn under_root(root: &Path, path: &str) -> PathBuf {
    if is_live_root(root) {
        PathBuf::from(path)
    } else {
        root.join(path.trim_start_matches('/'))
    }
}

/// Pick the adapter for this process from configuration
pub fn select_adapter(config: &Config) -> Result<Box<dyn OsFamilyAdapter>> {
    if config.environment.is_sandbox() {
        return Ok(Box::new(SandboxAdapter::new(config.sandbox_root()?)));
    }

    match config.os_family {
        OsFamily::Debian => Ok(Box::new(DebianAdapter::new())),
        OsFamily::Rhel => Ok(Box::new(RhelAdapter::new())),
        OsFamily::Sandbox => Err(Error::Config(
            "os_family 'sandbox' requires a local/dev environment".to_string(),
        )),
    }
}
