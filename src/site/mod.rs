// src/site/mod.rs

//! Site records
//!
//! A [`Site`] is one hosted domain's declared runtime and deployment intent.
//! Sites are immutable values inside the pipeline: stages never mutate the
//! record they were given, they return a [`SiteUpdate`] describing the fields
//! to change, and the caller writes it back to the store once per completed
//! operation.

pub mod validate;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::{Error, Result};

/// Days before expiry at which a certificate counts as expiring soon
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Runtime behind a site
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuntimeKind {
    /// PHP application served from a document root through a PHP-FPM pool
    PhpApp,
    /// Node application listening on a local port
    NodeApp,
}

/// Certificate status of a site
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
pub enum TlsStatus {
    #[default]
    None,
    Pending,
    Active,
    Failed,
}

/// Outcome of the last proxy deployment for a site
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
pub enum ProxyStatus {
    #[default]
    Inactive,
    Pending,
    Active,
    Failed,
}

/// Shell and process functions disabled in every pool unless re-enabled
pub const DANGEROUS_FUNCTIONS: &[&str] = &[
    "exec",
    "passthru",
    "shell_exec",
    "system",
    "proc_open",
    "popen",
    "curl_exec",
    "curl_multi_exec",
    "parse_ini_file",
    "show_source",
];

/// Per-site PHP runtime overrides
///
/// Unset fields fall back to the hard-coded defaults in
/// [`crate::render::pool`], never to the host's php.ini.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhpSettings {
    pub memory_limit: Option<String>,
    pub max_execution_time: Option<u32>,
    pub upload_max_filesize: Option<String>,
    pub post_max_size: Option<String>,
    pub max_input_vars: Option<u32>,
    pub opcache_memory_consumption: Option<u32>,
    pub opcache_interned_strings_buffer: Option<u32>,
    pub opcache_max_accelerated_files: Option<u32>,
    /// Entries of [`DANGEROUS_FUNCTIONS`] re-enabled for this site
    pub enabled_functions: Vec<String>,
}

impl PhpSettings {
    /// Overrides applied by the WordPress installer
    pub fn wordpress() -> Self {
        Self {
            memory_limit: Some("256M".to_string()),
            max_execution_time: Some(300),
            upload_max_filesize: Some("64M".to_string()),
            post_max_size: Some("64M".to_string()),
            max_input_vars: Some(3000),
            opcache_memory_consumption: Some(256),
            opcache_interned_strings_buffer: Some(16),
            opcache_max_accelerated_files: Some(20000),
            enabled_functions: Vec::new(),
        }
    }

    /// Functions that stay disabled after applying `enabled_functions`
    pub fn disabled_functions(&self) -> Vec<&'static str> {
        DANGEROUS_FUNCTIONS
            .iter()
            .copied()
            .filter(|f| !self.enabled_functions.iter().any(|e| e == f))
            .collect()
    }
}

/// One hosted application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub domain: String,
    pub runtime: RuntimeKind,
    /// PHP version such as "8.3"; required for PHP sites
    pub runtime_version: Option<String>,
    /// Absolute path, immutable after creation
    pub root_path: PathBuf,
    /// Path under `root_path` used as document root; empty means the root
    pub working_subpath: String,
    /// Backend port; required for Node sites
    pub listen_port: Option<u16>,
    /// Explicit pool name; derived from the domain when unset
    pub pool_name: Option<String>,
    pub php_settings: PhpSettings,
    pub tls_desired: bool,
    pub tls_status: TlsStatus,
    pub tls_pending_since: Option<DateTime<Utc>>,
    pub tls_issued_at: Option<DateTime<Utc>>,
    pub tls_expires_at: Option<DateTime<Utc>>,
    pub tls_last_error: Option<String>,
    pub proxy_status: ProxyStatus,
    pub proxy_last_error: Option<String>,
}

impl Site {
    fn new(domain: &str, runtime: RuntimeKind, root_path: impl Into<PathBuf>) -> Self {
        Self {
            domain: domain.to_string(),
            runtime,
            runtime_version: None,
            root_path: root_path.into(),
            working_subpath: String::new(),
            listen_port: None,
            pool_name: None,
            php_settings: PhpSettings::default(),
            tls_desired: false,
            tls_status: TlsStatus::None,
            tls_pending_since: None,
            tls_issued_at: None,
            tls_expires_at: None,
            tls_last_error: None,
            proxy_status: ProxyStatus::Inactive,
            proxy_last_error: None,
        }
    }

    /// Create a PHP site
    pub fn php(domain: &str, version: &str, root_path: impl Into<PathBuf>) -> Self {
        let mut site = Self::new(domain, RuntimeKind::PhpApp, root_path);
        site.runtime_version = Some(version.to_string());
        site
    }

    /// Create a Node site proxied to `port`
    pub fn node(domain: &str, port: u16, root_path: impl Into<PathBuf>) -> Self {
        let mut site = Self::new(domain, RuntimeKind::NodeApp, root_path);
        site.listen_port = Some(port);
        site
    }

    /// Set the working subpath
    pub fn with_working_subpath(mut self, subpath: &str) -> Self {
        self.working_subpath = subpath.to_string();
        self
    }

    /// Set an explicit pool name
    pub fn with_pool_name(mut self, pool_name: &str) -> Self {
        self.pool_name = Some(pool_name.to_string());
        self
    }

    /// Set the PHP overrides
    pub fn with_php_settings(mut self, settings: PhpSettings) -> Self {
        self.php_settings = settings;
        self
    }

    /// Request TLS for this site
    pub fn with_tls_desired(mut self, desired: bool) -> Self {
        self.tls_desired = desired;
        self
    }

    /// Check every field against the allow-lists
    pub fn validate(&self) -> Result<()> {
        validate::validate_site(self)
    }

    /// The working subpath with surrounding slashes removed
    pub fn trimmed_subpath(&self) -> &str {
        self.working_subpath.trim_matches('/')
    }

    /// `root_path` joined with the working subpath
    pub fn document_root(&self) -> PathBuf {
        let subpath = self.trimmed_subpath();
        if subpath.is_empty() {
            self.root_path.clone()
        } else {
            self.root_path.join(subpath)
        }
    }

    /// PHP version, or an input error for sites that lack one
    pub fn php_version(&self) -> Result<&str> {
        match (self.runtime, self.runtime_version.as_deref()) {
            (RuntimeKind::PhpApp, Some(v)) if !v.is_empty() => Ok(v),
            (RuntimeKind::PhpApp, _) => Err(Error::InvalidInput(format!(
                "{}: runtime version is required for PHP sites",
                self.domain
            ))),
            (RuntimeKind::NodeApp, _) => Err(Error::InvalidInput(format!(
                "{}: not a PHP site",
                self.domain
            ))),
        }
    }

    /// Backend port, or an input error for sites that lack one
    pub fn node_port(&self) -> Result<u16> {
        match self.listen_port {
            Some(port) if port > 0 => Ok(port),
            _ => Err(Error::InvalidInput(format!(
                "{}: listen port (1-65535) is required for Node sites",
                self.domain
            ))),
        }
    }

    /// Pool name, derived from the domain when not set explicitly
    pub fn effective_pool_name(&self) -> String {
        match &self.pool_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => derive_pool_name(&self.domain),
        }
    }

    /// True when the rendered proxy config carries a TLS listener
    pub fn tls_enabled(&self) -> bool {
        self.tls_desired && self.tls_status == TlsStatus::Active
    }

    /// Whole days until the certificate expires (negative once expired)
    pub fn tls_days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.tls_expires_at.map(|expires| (expires - now).num_days())
    }

    /// Certificate expires within [`EXPIRY_WARNING_DAYS`] but has not yet
    pub fn tls_expiring_soon(&self, now: DateTime<Utc>) -> bool {
        matches!(self.tls_days_until_expiry(now), Some(d) if d > 0 && d <= EXPIRY_WARNING_DAYS)
    }

    /// Return a copy with `update` applied
    pub fn with_update(&self, update: &SiteUpdate) -> Self {
        let mut site = self.clone();
        update.apply_to(&mut site);
        site
    }
}

/// Derive a pool name from a domain (`app.example.com` -> `app_example_com`)
///
/// Domains cannot contain `_`, so the mapping is injective.
pub fn derive_pool_name(domain: &str) -> String {
    domain.replace('.', "_")
}

/// Fields to change on a site record, written back in one store update
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteUpdate {
    pub pool_name: Option<String>,
    pub php_settings: Option<PhpSettings>,
    pub tls_desired: Option<bool>,
    pub tls_status: Option<TlsStatus>,
    pub tls_pending_since: Option<Option<DateTime<Utc>>>,
    pub tls_issued_at: Option<Option<DateTime<Utc>>>,
    pub tls_expires_at: Option<Option<DateTime<Utc>>>,
    pub tls_last_error: Option<Option<String>>,
    pub proxy_status: Option<ProxyStatus>,
    pub proxy_last_error: Option<Option<String>>,
}

impl SiteUpdate {
    /// An update that changes nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no field would change
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Combine two updates; fields set in `other` win
    pub fn merge(mut self, other: SiteUpdate) -> Self {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            pool_name,
            php_settings,
            tls_desired,
            tls_status,
            tls_pending_since,
            tls_issued_at,
            tls_expires_at,
            tls_last_error,
            proxy_status,
            proxy_last_error
        );
        self
    }

    /// Apply the set fields to `site`
    pub fn apply_to(&self, site: &mut Site) {
        if let Some(v) = &self.pool_name {
            site.pool_name = Some(v.clone());
        }
        if let Some(v) = &self.php_settings {
            site.php_settings = v.clone();
        }
        if let Some(v) = self.tls_desired {
            site.tls_desired = v;
        }
        if let Some(v) = self.tls_status {
            site.tls_status = v;
        }
        if let Some(v) = self.tls_pending_since {
            site.tls_pending_since = v;
        }
        if let Some(v) = self.tls_issued_at {
            site.tls_issued_at = v;
        }
        if let Some(v) = self.tls_expires_at {
            site.tls_expires_at = v;
        }
        if let Some(v) = &self.tls_last_error {
            site.tls_last_error = v.clone();
        }
        if let Some(v) = self.proxy_status {
            site.proxy_status = v;
        }
        if let Some(v) = &self.proxy_last_error {
            site.proxy_last_error = v.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::str::FromStr;

    #[test]
    fn test_document_root_joins_subpath() {
        let site = Site::php("app.example.com", "8.3", "/srv/app").with_working_subpath("public");
        assert_eq!(site.document_root(), PathBuf::from("/srv/app/public"));

        let site = site.with_working_subpath("/public/");
        assert_eq!(site.document_root(), PathBuf::from("/srv/app/public"));
    }

    #[test]
    fn test_empty_subpath_is_root() {
        let site = Site::php("app.example.com", "8.3", "/srv/app");
        assert_eq!(site.document_root(), PathBuf::from("/srv/app"));

        let site = site.with_working_subpath("/");
        assert_eq!(site.document_root(), PathBuf::from("/srv/app"));
    }

    #[test]
    fn test_pool_name_derivation() {
        let site = Site::php("app.example.com", "8.3", "/srv/app");
        assert_eq!(site.effective_pool_name(), "app_example_com");

        let site = site.with_pool_name("shop");
        assert_eq!(site.effective_pool_name(), "shop");
    }

    #[test]
    fn test_tls_enabled_requires_active_status() {
        let mut site = Site::node("api.example.com", 3000, "/srv/api").with_tls_desired(true);
        assert!(!site.tls_enabled());

        site.tls_status = TlsStatus::Active;
        assert!(site.tls_enabled());

        site.tls_desired = false;
        assert!(!site.tls_enabled());
    }

    #[test]
    fn test_disabled_functions_respects_reenabled() {
        let settings = PhpSettings {
            enabled_functions: vec!["exec".to_string(), "popen".to_string()],
            ..PhpSettings::default()
        };
        let disabled = settings.disabled_functions();
        assert!(!disabled.contains(&"exec"));
        assert!(!disabled.contains(&"popen"));
        assert!(disabled.contains(&"shell_exec"));
        assert_eq!(disabled.len(), DANGEROUS_FUNCTIONS.len() - 2);
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(TlsStatus::Pending.to_string(), "pending");
        assert_eq!(ProxyStatus::from_str("active").unwrap(), ProxyStatus::Active);
        assert_eq!(RuntimeKind::PhpApp.as_ref(), "php_app");
        assert_eq!(RuntimeKind::from_str("node_app").unwrap(), RuntimeKind::NodeApp);
    }

    #[test]
    fn test_update_merge_and_apply() {
        let site = Site::php("app.example.com", "8.3", "/srv/app");
        let first = SiteUpdate {
            proxy_status: Some(ProxyStatus::Failed),
            proxy_last_error: Some(Some("boom".to_string())),
            ..SiteUpdate::default()
        };
        let second = SiteUpdate {
            proxy_status: Some(ProxyStatus::Active),
            proxy_last_error: Some(None),
            ..SiteUpdate::default()
        };

        let updated = site.with_update(&first.merge(second));
        assert_eq!(updated.proxy_status, ProxyStatus::Active);
        assert_eq!(updated.proxy_last_error, None);
        assert_eq!(updated.domain, site.domain);
        assert!(SiteUpdate::new().is_empty());
    }

    #[test]
    fn test_expiry_window() {
        let now = Utc::now();
        let mut site = Site::node("api.example.com", 3000, "/srv/api");
        assert!(!site.tls_expiring_soon(now));

        site.tls_expires_at = Some(now + Duration::days(10) + Duration::hours(1));
        assert_eq!(site.tls_days_until_expiry(now), Some(10));
        assert!(site.tls_expiring_soon(now));

        site.tls_expires_at = Some(now - Duration::days(2));
        assert!(!site.tls_expiring_soon(now));
    }
}
