// src/commands.rs

//! Command handlers for the sitewarden CLI

use anyhow::{Context, Result, bail};
use chrono::Utc;
use sitewarden::render::{ArtifactKind, RenderedArtifact};
use sitewarden::{PhpSettings, RuntimeKind, Site, SiteManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cli::ArtifactArg;

/// Register a PHP site
#[allow(clippy::too_many_arguments)]
pub fn cmd_site_add_php(
    manager: &SiteManager,
    domain: &str,
    php_version: &str,
    root: PathBuf,
    subpath: &str,
    pool_name: Option<&str>,
    wordpress: bool,
    enable_functions: Vec<String>,
) -> Result<()> {
    let mut settings = if wordpress {
        PhpSettings::wordpress()
    } else {
        PhpSettings::default()
    };
    settings.enabled_functions = enable_functions;

    let mut site = Site::php(domain, php_version, root)
        .with_working_subpath(subpath)
        .with_php_settings(settings);
    if let Some(pool) = pool_name {
        site = site.with_pool_name(pool);
    }

    manager.add_site(&site)?;
    println!(
        "Added PHP {} site {} (pool {})",
        php_version,
        domain,
        site.effective_pool_name()
    );
    Ok(())
}

/// Register a Node site
pub fn cmd_site_add_node(
    manager: &SiteManager,
    domain: &str,
    port: u16,
    root: PathBuf,
    subpath: &str,
) -> Result<()> {
    let site = Site::node(domain, port, root).with_working_subpath(subpath);
    manager.add_site(&site)?;
    println!("Added Node site {} -> localhost:{}", domain, port);
    Ok(())
}

pub fn cmd_site_list(manager: &SiteManager) -> Result<()> {
    let sites = manager.list_sites()?;
    if sites.is_empty() {
        println!("No sites registered");
        return Ok(());
    }

    println!(
        "{:<32} {:<10} {:<8} {:<10} {:<8}",
        "DOMAIN", "RUNTIME", "VERSION", "PROXY", "TLS"
    );
    for site in sites {
        let version = match site.runtime {
            RuntimeKind::PhpApp => site.runtime_version.clone().unwrap_or_default(),
            RuntimeKind::NodeApp => site
                .listen_port
                .map(|p| format!(":{}", p))
                .unwrap_or_default(),
        };
        println!(
            "{:<32} {:<10} {:<8} {:<10} {:<8}",
            site.domain, site.runtime, version, site.proxy_status, site.tls_status
        );
    }
    Ok(())
}

pub fn cmd_site_show(manager: &SiteManager, domain: &str) -> Result<()> {
    let site = manager.get_site(domain)?;
    let paths = manager.deployer().resolve(&site)?;
    let now = Utc::now();

    println!("Domain:         {}", site.domain);
    println!("Runtime:        {}", site.runtime);
    if let Some(version) = &site.runtime_version {
        println!("PHP version:    {}", version);
    }
    if let Some(port) = site.listen_port {
        println!("Backend:        localhost:{}", port);
    }
    println!("Root:           {}", site.root_path.display());
    println!("Document root:  {}", site.document_root().display());
    println!("Proxy config:   {}", paths.proxy_available.display());
    println!("Proxy status:   {}", site.proxy_status);
    if let Some(error) = &site.proxy_last_error {
        println!("  last error:   {}", error);
    }
    if let Some(pool) = &paths.pool {
        println!("Pool:           {} ({})", pool.name, pool.config_path.display());
        println!("Pool socket:    {}", pool.socket_path.display());
        println!("Pool service:   {}", pool.service_name);
    }

    println!(
        "TLS:            {} (desired: {})",
        site.tls_status,
        if site.tls_desired { "yes" } else { "no" }
    );
    if let Some(expires) = site.tls_expires_at {
        let days = site.tls_days_until_expiry(now).unwrap_or_default();
        let note = if site.tls_expiring_soon(now) {
            " - renew soon"
        } else if days <= 0 {
            " - expired"
        } else {
            ""
        };
        println!(
            "  expires:      {} ({} days{})",
            expires.format("%Y-%m-%d"),
            days,
            note
        );
    }
    if let Some(error) = &site.tls_last_error {
        println!("  last error:   {}", error);
    }
    Ok(())
}

pub fn cmd_site_remove(manager: &SiteManager, domain: &str) -> Result<()> {
    let report = manager.remove_site(domain)?;
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    println!(
        "Removed {} ({} files cleaned up)",
        domain,
        report.removed.len()
    );
    Ok(())
}

pub fn cmd_render(manager: &SiteManager, artifact: ArtifactArg, domain: &str) -> Result<()> {
    let wanted = match artifact {
        ArtifactArg::Proxy => ArtifactKind::Proxy,
        ArtifactArg::Pool => ArtifactKind::Pool,
    };

    let rendered: Vec<RenderedArtifact> = manager.render(domain)?;
    let Some(artifact) = rendered.into_iter().find(|a| a.kind == wanted) else {
        bail!("{} has no {} config", domain, wanted);
    };

    eprintln!("# {}", artifact.path.display());
    print!("{}", artifact.content);
    Ok(())
}

pub fn cmd_deploy(manager: &SiteManager, domain: &str) -> Result<()> {
    let report = manager
        .deploy(domain)
        .with_context(|| format!("deploy of {} failed", domain))?;

    for artifact in &report.artifacts {
        println!(
            "{:<6} {} ({})",
            artifact.kind,
            artifact.path.display(),
            if artifact.changed { "updated" } else { "unchanged" }
        );
    }
    println!(
        "Deployed {}{}",
        report.domain,
        if report.tls { " with TLS" } else { "" }
    );
    Ok(())
}

pub fn cmd_teardown(manager: &SiteManager, domain: &str) -> Result<()> {
    let report = manager.teardown(domain)?;
    for path in &report.removed {
        println!("removed {}", path.display());
    }
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

pub async fn cmd_cert_request(manager: Arc<SiteManager>, domain: &str) -> Result<()> {
    info!("Requesting certificate for {}", domain);
    let outcome = manager
        .spawn_certificate_request(domain)
        .await
        .context("certificate task panicked")??;

    println!(
        "Certificate active for {} until {}",
        domain,
        outcome.certificate.expires_at.format("%Y-%m-%d")
    );
    if let Some(error) = outcome.redeploy_error {
        bail!("certificate issued but the TLS redeploy failed: {}", error);
    }
    Ok(())
}

pub fn cmd_service_status(manager: &SiteManager, service: &str) -> Result<()> {
    let status = manager.deployer().services().status(service)?;
    println!("{}: {}", service, status.state);
    println!("  running: {}", if status.running { "yes" } else { "no" });
    println!("  enabled: {}", if status.enabled { "yes" } else { "no" });
    Ok(())
}

pub fn cmd_service_logs(manager: &SiteManager, service: &str, lines: usize) -> Result<()> {
    let logs = manager.deployer().services().tail_logs(service, lines)?;
    print!("{}", logs);
    Ok(())
}
