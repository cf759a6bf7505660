// src/platform/rhel.rs

//! RHEL / Rocky / Alma layout (Remi software collections)
//!
//! Remi installs each PHP version as a separate collection whose name drops
//! the dot from the version: PHP 8.4 lives under `/etc/opt/remi/php84`,
//! `/var/opt/remi/php84` and `/opt/remi/php84/root`, and runs as the
//! `php84-php-fpm` service.

use std::path::{Path, PathBuf};

use super::{
    ControlUser, OsFamily, OsFamilyAdapter, ProxyLayout, is_live_root, under_root,
};
use crate::executor::CommandSpec;

/// Vendor prefix of the software collections
const VENDOR: &str = "remi";

/// RHEL-family adapter
#[derive(Debug, Clone)]
pub struct RhelAdapter {
    root: PathBuf,
}

impl RhelAdapter {
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

impl Default for RhelAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Collection version suffix (`8.4` -> `84`)
pub fn short_version(version: &str) -> String {
    version.chars().filter(char::is_ascii_digit).collect()
}

impl OsFamilyAdapter for RhelAdapter {
    fn family(&self) -> OsFamily {
        OsFamily::Rhel
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn pool_dir(&self, version: &str) -> PathBuf {
        self.path(&format!(
            "/etc/opt/{}/php{}/php-fpm.d",
            VENDOR,
            short_version(version)
        ))
    }

    fn socket_path(&self, version: &str, pool: &str) -> PathBuf {
        self.path(&format!(
            "/var/opt/{}/php{}/run/php-fpm/{}.sock",
            VENDOR,
            short_version(version),
            pool
        ))
    }

    fn log_dir(&self, version: &str) -> PathBuf {
        self.path(&format!(
            "/var/opt/{}/php{}/log/php-fpm",
            VENDOR,
            short_version(version)
        ))
    }

    fn service_name(&self, version: &str) -> String {
        format!("php{}-php-fpm", short_version(version))
    }

    fn control_user(&self) -> ControlUser {
        ControlUser::new("nginx", "nginx")
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
        let short = short_version(version);
        let binary = format!("/opt/{}/php{}/root/usr/sbin/php-fpm", VENDOR, short);
        let cmd = CommandSpec::new(binary).arg("-t");
        if is_live_root(&self.root) {
            Some(cmd)
        } else {
            let conf = self.path(&format!("/etc/opt/{}/php{}/php-fpm.conf", VENDOR, short));
            Some(cmd.args(["--fpm-config".to_string(), conf.display().to_string()]))
        }
    }
}
