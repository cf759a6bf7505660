// src/platform/debian.rs

//! Debian / Ubuntu layout (ondrej/php packaging)

use std::path::{Path, PathBuf};

use super::{
    ControlUser, OsFamily, OsFamilyAdapter, ProxyLayout, is_live_root, under_root,
};
use crate::executor::CommandSpec;

/// Debian-family adapter
#[derive(Debug, Clone)]
pub struct DebianAdapter {
    root: PathBuf,
}

impl DebianAdapter {
    /// Adapter for the live system
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }

    /// Adapter writing under a target root
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, path: &str) -> PathBuf {
        under_root(&self.root, path)
    }
}

impl Default for DebianAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OsFamilyAdapter for DebianAdapter {
    fn family(&self) -> OsFamily {
        OsFamily::Debian
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn pool_dir(&self, version: &str) -> PathBuf {
        self.path(&format!("/etc/php/{}/fpm/pool.d", version))
    }

    fn socket_path(&self, version: &str, pool: &str) -> PathBuf {
        self.path(&format!("/var/run/php/php{}-fpm-{}.sock", version, pool))
    }

    fn log_dir(&self, _version: &str) -> PathBuf {
        self.path("/var/log/php")
    }

    fn service_name(&self, version: &str) -> String {
        format!("php{}-fpm", version)
    }

    fn control_user(&self) -> ControlUser {
        ControlUser::new("www-data", "www-data")
    }

    fn proxy_layout(&self) -> ProxyLayout {
        ProxyLayout {
            sites_available: self.path("/etc/nginx/sites-available"),
            sites_enabled: self.path("/etc/nginx/sites-enabled"),
            log_dir: self.path("/var/log/nginx"),
            certificate_root: self.path("/etc/letsencrypt/live"),
        }
    }

    fn proxy_check_command(&self) -> Option<CommandSpec> {
        let cmd = CommandSpec::new("nginx").arg("-t");
        if is_live_root(&self.root) {
            Some(cmd)
        } else {
            Some(cmd.args([
                "-c".to_string(),
                self.path("/etc/nginx/nginx.conf").display().to_string(),
            ]))
        }
    }

    fn pool_check_command(&self, version: &str) -> Option<CommandSpec> {
        let cmd = CommandSpec::new(format!("php-fpm{}", version)).arg("-t");
        if is_live_root(&self.root) {
            Some(cmd)
        } else {
            let conf = self.path(&format!("/etc/php/{}/fpm/php-fpm.conf", version));
            Some(cmd.args(["--fpm-config".to_string(), conf.display().to_string()]))
        }
    }
}
