// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use sitewarden::{Config, SiteManager};
use std::sync::Arc;
use tracing::debug;

use cli::{CertCommands, Cli, Commands, ServiceCommands, SiteCommands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load_or_default(&cli.config)?;
    debug!("Environment: {}", config.environment);
    let manager = Arc::new(SiteManager::from_config(&config)?);

    match cli.command {
        Commands::Site(command) => match command {
            SiteCommands::AddPhp {
                domain,
                php_version,
                root,
                subpath,
                pool_name,
                wordpress,
                enable_functions,
            } => commands::cmd_site_add_php(
                &manager,
                &domain,
                &php_version,
                root,
                &subpath,
                pool_name.as_deref(),
                wordpress,
                enable_functions,
            ),
            SiteCommands::AddNode {
                domain,
                port,
                root,
                subpath,
            } => commands::cmd_site_add_node(&manager, &domain, port, root, &subpath),
            SiteCommands::List => commands::cmd_site_list(&manager),
            SiteCommands::Show { domain } => commands::cmd_site_show(&manager, &domain),
            SiteCommands::Remove { domain } => commands::cmd_site_remove(&manager, &domain),
        },
        Commands::Render { artifact, domain } => commands::cmd_render(&manager, artifact, &domain),
        Commands::Deploy { domain } => commands::cmd_deploy(&manager, &domain),
        Commands::Teardown { domain } => commands::cmd_teardown(&manager, &domain),
        Commands::Cert(CertCommands::Request { domain }) => {
            commands::cmd_cert_request(manager, &domain).await
        }
        Commands::Service(command) => match command {
            ServiceCommands::Status { service } => {
                commands::cmd_service_status(&manager, &service)
            }
            ServiceCommands::Logs { service, lines } => {
                commands::cmd_service_logs(&manager, &service, lines)
            }
        },
    }
}
