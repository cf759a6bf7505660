// src/platform/sandbox.rs

//! Development sandbox
//!
//! All artifacts live under one working directory and nothing requires root:
//! writes are direct, syntax checks are skipped and the matching service
//! control only logs.

use nix::unistd::{Group, User, getegid, geteuid};
use std::path::{Path, PathBuf};

use super::{ControlUser, OsFamily, OsFamilyAdapter, ProxyLayout};
use crate::executor::CommandSpec;

/// Sandbox adapter rooted at a working directory
#[derive(Debug, Clone)]
pub struct SandboxAdapter {
    root: PathBuf,
}

impl SandboxAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl OsFamilyAdapter for SandboxAdapter {
    fn family(&self) -> OsFamily {
        OsFamily::Sandbox
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn pool_dir(&self, version: &str) -> PathBuf {
        self.root.join("php").join(version).join("pool.d")
    }

    fn socket_path(&self, version: &str, pool: &str) -> PathBuf {
        self.root
            .join("php")
            .join(format!("php{}-fpm-{}.sock", version, pool))
    }

    fn log_dir(&self, version: &str) -> PathBuf {
        self.root.join("logs").join(format!("php{}-fpm", version))
    }

    fn service_name(&self, version: &str) -> String {
        format!("php{}-fpm", version)
    }

    /// The user running this process
    fn control_user(&self) -> ControlUser {
        let user = User::from_uid(geteuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .or_else(|| std::env::var("USER").ok())
            .unwrap_or_else(|| "nobody".to_string());
        let group = Group::from_gid(getegid())
            .ok()
            .flatten()
            .map(|g| g.name)
            .unwrap_or_else(|| user.clone());
        ControlUser { user, group }
    }

    fn proxy_layout(&self) -> ProxyLayout {
        ProxyLayout {
            sites_available: self.root.join("nginx").join("sites-available"),
            sites_enabled: self.root.join("nginx").join("sites-enabled"),
            log_dir: self.root.join("logs").join("nginx"),
            certificate_root: self.root.join("letsencrypt").join("live"),
        }
    }

    fn proxy_check_command(&self) -> Option<CommandSpec> {
        None
    }

    fn pool_check_command(&self, _version: &str) -> Option<CommandSpec> {
        None
    }

    fn is_sandboxed(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::Site;

    #[test]
    fn test_sandbox_paths_stay_under_root() {
        let adapter = SandboxAdapter::new("/tmp/sw");
        let site = Site::php("app.example.com", "8.3", "/srv/app");
        let paths = adapter.resolve(&site).unwrap();
        let pool = paths.pool().unwrap();

        for path in [
            &paths.proxy_available,
            &paths.proxy_enabled,
            &paths.proxy_log_dir,
            &paths.certificate_dir,
            &pool.pool_dir,
            &pool.socket_path,
            &pool.log_dir,
        ] {
            assert!(path.starts_with("/tmp/sw"), "{} escapes sandbox", path.display());
        }

        assert_eq!(pool.pool_dir, PathBuf::from("/tmp/sw/php/8.3/pool.d"));
        assert_eq!(
            pool.socket_path,
            PathBuf::from("/tmp/sw/php/php8.3-fpm-app_example_com.sock")
        );
    }

    #[test]
    fn test_sandbox_skips_privileged_work() {
        let adapter = SandboxAdapter::new("/tmp/sw");
        assert!(adapter.is_sandboxed());
        assert!(!adapter.needs_privilege());
        assert!(adapter.proxy_check_command().is_none());
        assert!(adapter.pool_check_command("8.3").is_none());
        assert!(!adapter.control_user().user.is_empty());
    }
}
