// src/site/validate.rs

//! Allow-list validation for values interpolated into rendered configs
//!
//! Domains, paths, versions, pool names and PHP override values all end up
//! inside nginx or PHP-FPM configuration text. Anything outside these
//! patterns is rejected before rendering.

use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

use super::{DANGEROUS_FUNCTIONS, PhpSettings, RuntimeKind, Site};
use crate::error::{Error, Result};

static DOMAIN_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").unwrap());

static PATH_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]*$").unwrap());

static VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+\.[0-9]+$").unwrap());

static POOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").unwrap());

static SIZE_VALUE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{1,6}[KMG]?$").unwrap());

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)+$").unwrap()
});

/// Validate every field of a site that reaches a rendered artifact
pub fn validate_site(site: &Site) -> Result<()> {
    validate_domain(&site.domain)?;
    validate_root_path(&site.root_path)?;
    validate_subpath(&site.working_subpath)?;

    if let Some(pool) = &site.pool_name {
        validate_pool_name(pool)?;
    }

    match site.runtime {
        RuntimeKind::PhpApp => {
            validate_version(site.php_version()?)?;
            validate_php_settings(&site.php_settings)?;
        }
        RuntimeKind::NodeApp => {
            site.node_port()?;
        }
    }

    Ok(())
}

/// Lowercase DNS name with at least two labels, 253 characters at most
pub fn validate_domain(domain: &str) -> Result<()> {
    let invalid = || Error::InvalidInput(format!("invalid domain: {:?}", domain));

    if domain.is_empty() || domain.len() > 253 {
        return Err(invalid());
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || !labels.iter().all(|l| DOMAIN_LABEL.is_match(l)) {
        return Err(invalid());
    }

    Ok(())
}

/// Absolute path made of safe characters with no `..` components
pub fn validate_root_path(path: &Path) -> Result<()> {
    let text = path.to_str().ok_or_else(|| {
        Error::InvalidInput(format!("root path is not valid UTF-8: {}", path.display()))
    })?;

    if !path.is_absolute() {
        return Err(Error::InvalidInput(format!(
            "root path must be absolute: {}",
            text
        )));
    }

    check_path_text(text, "root path")
}

/// Relative path made of safe characters with no `..` components
pub fn validate_subpath(subpath: &str) -> Result<()> {
    check_path_text(subpath, "working subpath")
}

fn check_path_text(text: &str, what: &str) -> Result<()> {
    if !PATH_CHARS.is_match(text) {
        return Err(Error::InvalidInput(format!(
            "{} contains disallowed characters: {:?}",
            what, text
        )));
    }

    if Path::new(text)
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::InvalidInput(format!(
            "{} must not contain '..': {:?}",
            what, text
        )));
    }

    Ok(())
}

/// PHP version such as `8.3`
pub fn validate_version(version: &str) -> Result<()> {
    if VERSION.is_match(version) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid runtime version: {:?}",
            version
        )))
    }
}

/// Pool name usable as a file name and FPM section header
pub fn validate_pool_name(name: &str) -> Result<()> {
    if POOL_NAME.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("invalid pool name: {:?}", name)))
    }
}

/// Contact address handed to the certificate issuer
pub fn validate_email(email: &str) -> Result<()> {
    if EMAIL.is_match(email) {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid contact email: {:?}",
            email
        )))
    }
}

/// PHP override values and re-enabled function names
pub fn validate_php_settings(settings: &PhpSettings) -> Result<()> {
    let sizes = [
        ("memory_limit", &settings.memory_limit),
        ("upload_max_filesize", &settings.upload_max_filesize),
        ("post_max_size", &settings.post_max_size),
    ];
    for (name, value) in sizes {
        if let Some(value) = value {
            if !SIZE_VALUE.is_match(value) {
                return Err(Error::InvalidInput(format!(
                    "invalid {} value: {:?}",
                    name, value
                )));
            }
        }
    }

    if settings.max_execution_time == Some(0) {
        return Err(Error::InvalidInput(
            "max_execution_time must be greater than zero".to_string(),
        ));
    }

    for func in &settings.enabled_functions {
        if !DANGEROUS_FUNCTIONS.contains(&func.as_str()) {
            return Err(Error::InvalidInput(format!(
                "{:?} is not a function that can be re-enabled",
                func
            )));
        }
    }

    Ok(())
}
