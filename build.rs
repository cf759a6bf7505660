// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: configuration file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("PATH")
        .default_value("/etc/sitewarden/config.toml")
        .help("Path to the configuration file")
}

fn domain_arg() -> Arg {
    Arg::new("domain").required(true).help("Site domain")
}

fn build_cli() -> Command {
    Command::new("sitewarden")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Sitewarden Contributors")
        .about("Deploy per-site nginx and PHP-FPM configuration with rollback")
        .arg(config_arg())
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::SetTrue)
                .help("Log at debug level"),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("site")
                .about("Manage site records")
                .subcommand(
                    Command::new("add-php")
                        .about("Register a PHP site")
                        .arg(domain_arg())
                        .arg(Arg::new("php_version").long("php-version").required(true).help("PHP version, e.g. 8.3"))
                        .arg(Arg::new("root").long("root").required(true).help("Absolute site root"))
                        .arg(Arg::new("subpath").long("subpath").help("Document root below the site root"))
                        .arg(Arg::new("pool_name").long("pool-name").help("Pool name"))
                        .arg(
                            Arg::new("wordpress")
                                .long("wordpress")
                                .action(clap::ArgAction::SetTrue)
                                .help("Apply the WordPress PHP overrides"),
                        )
                        .arg(
                            Arg::new("enable_function")
                                .long("enable-function")
                                .action(clap::ArgAction::Append)
                                .help("Re-enable a normally disabled PHP function"),
                        ),
                )
                .subcommand(
                    Command::new("add-node")
                        .about("Register a Node site")
                        .arg(domain_arg())
                        .arg(Arg::new("port").long("port").required(true).help("Local application port"))
                        .arg(Arg::new("root").long("root").required(true).help("Absolute application root"))
                        .arg(Arg::new("subpath").long("subpath").help("Entry directory")),
                )
                .subcommand(Command::new("list").about("List registered sites"))
                .subcommand(Command::new("show").about("Show one site").arg(domain_arg()))
                .subcommand(
                    Command::new("remove")
                        .about("Tear down a site and delete its record")
                        .arg(domain_arg()),
                ),
        )
        .subcommand(
            Command::new("render")
                .about("Print a rendered artifact without deploying it")
                .arg(
                    Arg::new("artifact")
                        .required(true)
                        .value_parser(["proxy", "pool"])
                        .help("Artifact to render"),
                )
                .arg(domain_arg()),
        )
        .subcommand(
            Command::new("deploy")
                .about("Write, validate, activate and reload a site's configuration")
                .arg(domain_arg()),
        )
        .subcommand(
            Command::new("teardown")
                .about("Disable and delete a site's configuration files")
                .arg(domain_arg()),
        )
        .subcommand(
            Command::new("cert").about("Certificate operations").subcommand(
                Command::new("request")
                    .about("Request a certificate and redeploy with TLS")
                    .arg(domain_arg()),
            ),
        )
        .subcommand(
            Command::new("service")
                .about("Inspect system services")
                .subcommand(
                    Command::new("status")
                        .about("Show whether a service is running")
                        .arg(Arg::new("service").required(true).help("Service name")),
                )
                .subcommand(
                    Command::new("logs")
                        .about("Show the last journal lines of a service")
                        .arg(Arg::new("service").required(true).help("Service name"))
                        .arg(
                            Arg::new("lines")
                                .short('n')
                                .long("lines")
                                .default_value("50")
                                .help("Number of lines"),
                        ),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("sitewarden.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
