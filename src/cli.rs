// src/cli.rs

//! CLI definitions for sitewarden
//!
//! Argument parsing only; the handlers live in the `commands` module.

use clap::{Parser, Subcommand, ValueEnum};
use sitewarden::config::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sitewarden")]
#[command(author = "Sitewarden Contributors")]
#[command(version)]
#[command(about = "Deploy per-site nginx and PHP-FPM configuration with rollback", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage site records
    #[command(subcommand)]
    Site(SiteCommands),

    /// Print a rendered artifact without deploying it
    Render {
        /// Artifact to render
        #[arg(value_enum)]
        artifact: ArtifactArg,

        /// Site domain
        domain: String,
    },

    /// Write, validate, activate and reload a site's configuration
    Deploy {
        /// Site domain
        domain: String,
    },

    /// Disable and delete a site's configuration files
    Teardown {
        /// Site domain
        domain: String,
    },

    /// Certificate operations
    #[command(subcommand)]
    Cert(CertCommands),

    /// Inspect system services
    #[command(subcommand)]
    Service(ServiceCommands),
}

#[derive(Subcommand)]
pub enum SiteCommands {
    /// Register a PHP site
    AddPhp {
        /// Site domain
        domain: String,

        /// PHP version, e.g. 8.3
        #[arg(long)]
        php_version: String,

        /// Absolute site root
        #[arg(long)]
        root: PathBuf,

        /// Document root below the site root
        #[arg(long, default_value = "")]
        subpath: String,

        /// Pool name (default: derived from the domain)
        #[arg(long)]
        pool_name: Option<String>,

        /// Apply the WordPress PHP overrides
        #[arg(long)]
        wordpress: bool,

        /// Re-enable a normally disabled PHP function (repeatable)
        #[arg(long = "enable-function")]
        enable_functions: Vec<String>,
    },

    /// Register a Node site
    AddNode {
        /// Site domain
        domain: String,

        /// Local port the application listens on
        #[arg(long)]
        port: u16,

        /// Absolute application root
        #[arg(long)]
        root: PathBuf,

        /// Entry directory below the application root
        #[arg(long, default_value = "")]
        subpath: String,
    },

    /// List registered sites
    List,

    /// Show one site in detail
    Show {
        /// Site domain
        domain: String,
    },

    /// Tear down a site and delete its record
    Remove {
        /// Site domain
        domain: String,
    },
}

#[derive(Subcommand)]
pub enum CertCommands {
    /// Request (or renew) a certificate and redeploy with TLS
    Request {
        /// Site domain
        domain: String,
    },
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Show whether a service is running and enabled
    Status {
        /// Service name, e.g. nginx or php8.3-fpm
        service: String,
    },

    /// Show the last journal lines of a service
    Logs {
        /// Service name
        service: String,

        /// Number of lines
        #[arg(short = 'n', long, default_value = "50")]
        lines: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ArtifactArg {
    Proxy,
    Pool,
}
