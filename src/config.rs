// src/config.rs

//! Process configuration
//!
//! Loaded once at startup from a TOML file. The environment flag decides
//! between the sandbox and a production OS family; `SITEWARDEN_ENV`
//! overrides it so a development checkout never needs a config file.
//!
//! # Example config.toml
//!
//! ```toml
//! environment = "production"
//! os_family = "debian"
//! db_path = "/var/lib/sitewarden/sites.db"
//! contact_email = "ops@example.com"
//! issue_timeout_secs = 300
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::debug;

use crate::error::{Error, Result};
use crate::platform::OsFamily;
use crate::site::validate::validate_email;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sitewarden/config.toml";

/// Environment variable overriding the configured environment
pub const ENV_OVERRIDE: &str = "SITEWARDEN_ENV";

const DEFAULT_DB_PATH: &str = "/var/lib/sitewarden/sites.db";
const DEFAULT_LOCK_DIR: &str = "/run/sitewarden/locks";

/// Deployment environment
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    Local,
    Dev,
    Development,
    #[default]
    Production,
}

impl Environment {
    /// Local and development environments use the sandbox adapter
    pub fn is_sandbox(self) -> bool {
        !matches!(self, Self::Production)
    }
}

/// sitewarden configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: Environment,
    /// OS family used outside the sandbox
    pub os_family: OsFamily,
    /// Sandbox working directory (default: `<data dir>/sitewarden/server`)
    pub sandbox_root: Option<PathBuf>,
    /// SQLite site store
    pub db_path: PathBuf,
    /// Directory for per-domain deploy lock files
    pub lock_dir: PathBuf,
    /// Contact address registered with the certificate authority
    pub contact_email: String,
    /// Ceiling for one certificate issuance attempt
    pub issue_timeout_secs: u64,
    /// Ceiling for syntax checks, copies and reloads
    pub command_timeout_secs: u64,
    /// Issuance attempts per certificate request (1 or 2)
    pub issue_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Production,
            os_family: OsFamily::Debian,
            sandbox_root: None,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            contact_email: "admin@example.com".to_string(),
            issue_timeout_secs: 300,
            command_timeout_secs: 60,
            issue_attempts: 2,
        }
    }
}

impl Config {
    /// Parse a TOML document, apply the environment override and validate
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;
        config.apply_env_override()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_toml(&content)
    }

    /// Load from `path`, falling back to defaults when the file is absent
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            let mut config = Self::default();
            config.apply_env_override()?;
            config.validate()?;
            Ok(config)
        }
    }

    fn apply_env_override(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_OVERRIDE) {
            self.environment = value.parse().map_err(|_| {
                Error::Config(format!("{}={} is not a known environment", ENV_OVERRIDE, value))
            })?;
        }
        Ok(())
    }

    /// Reject settings the rest of the crate cannot honor
    pub fn validate(&self) -> Result<()> {
        if !self.environment.is_sandbox() && self.os_family == OsFamily::Sandbox {
            return Err(Error::Config(
                "os_family 'sandbox' requires a local/dev environment".to_string(),
            ));
        }
        if self.issue_timeout_secs == 0 || self.command_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        if !(1..=2).contains(&self.issue_attempts) {
            return Err(Error::Config(format!(
                "issue_attempts must be 1 or 2, got {}",
                self.issue_attempts
            )));
        }
        if let Some(root) = &self.sandbox_root {
            if !root.is_absolute() {
                return Err(Error::Config(format!(
                    "sandbox_root must be absolute: {}",
                    root.display()
                )));
            }
        }
        validate_email(&self.contact_email).map_err(|e| Error::Config(e.to_string()))?;
        Ok(())
    }

    /// Working directory of the sandbox adapter
    pub fn sandbox_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.sandbox_root {
            return Ok(root.clone());
        }
        dirs::data_local_dir()
            .map(|dir| dir.join("sitewarden").join("server"))
            .ok_or_else(|| {
                Error::Config("no data directory found; set sandbox_root".to_string())
            })
    }

    /// Site store location; the sandbox keeps a default path under its root
    pub fn effective_db_path(&self) -> Result<PathBuf> {
        if self.environment.is_sandbox() && self.db_path == Path::new(DEFAULT_DB_PATH) {
            return Ok(self.sandbox_root()?.join("sites.db"));
        }
        Ok(self.db_path.clone())
    }

    /// Lock directory; the sandbox keeps a default path under its root
    pub fn effective_lock_dir(&self) -> Result<PathBuf> {
        if self.environment.is_sandbox() && self.lock_dir == Path::new(DEFAULT_LOCK_DIR) {
            return Ok(self.sandbox_root()?.join("locks"));
        }
        Ok(self.lock_dir.clone())
    }

    pub fn issue_timeout(&self) -> Duration {
        Duration::from_secs(self.issue_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_os_family(mut self, family: OsFamily) -> Self {
        self.os_family = family;
        self
    }

    pub fn with_sandbox_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.sandbox_root = Some(root.into());
        self
    }

    pub fn with_db_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_lock_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.lock_dir = dir.into();
        self
    }

    pub fn with_contact_email(mut self, email: &str) -> Self {
        self.contact_email = email.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.issue_timeout(), Duration::from_secs(300));
        assert_eq!(config.issue_attempts, 2);
        assert!(!config.environment.is_sandbox());
    }

    #[test]
    fn test_parse_toml() {
        let config: Config = toml::from_str(
            r#"
            environment = "local"
            sandbox_root = "/tmp/sitewarden"
            contact_email = "ops@example.com"
            issue_timeout_secs = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.environment, Environment::Local);
        assert!(config.environment.is_sandbox());
        assert_eq!(config.sandbox_root().unwrap(), PathBuf::from("/tmp/sitewarden"));
        assert_eq!(config.issue_timeout_secs, 600);
        assert_eq!(config.os_family, OsFamily::Debian);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_rhel() {
        let config: Config = toml::from_str("os_family = \"rhel\"").unwrap();
        assert_eq!(config.os_family, OsFamily::Rhel);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            issue_attempts: 5,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config::default().with_contact_email("not an email");
        assert!(config.validate().is_err());

        let config = Config::default().with_sandbox_root("relative/dir");
        assert!(config.validate().is_err());

        let config = Config::default().with_os_family(OsFamily::Sandbox);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sandbox_keeps_state_under_root() {
        let config = Config::default()
            .with_environment(Environment::Local)
            .with_sandbox_root("/tmp/sw");
        assert_eq!(config.effective_db_path().unwrap(), PathBuf::from("/tmp/sw/sites.db"));
        assert_eq!(config.effective_lock_dir().unwrap(), PathBuf::from("/tmp/sw/locks"));

        let config = config.with_db_path("/tmp/other.db");
        assert_eq!(config.effective_db_path().unwrap(), PathBuf::from("/tmp/other.db"));

        let config = Config::default();
        assert_eq!(
            config.effective_lock_dir().unwrap(),
            PathBuf::from("/run/sitewarden/locks")
        );
    }

    #[test]
    fn test_unknown_environment_rejected() {
        assert!(toml::from_str::<Config>("environment = \"staging\"").is_err());
    }
}
