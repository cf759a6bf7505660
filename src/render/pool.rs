// src/render/pool.rs

//! PHP-FPM pool rendering
//!
//! One pool per PHP site, listening on a unix socket owned by the adapter's
//! control user. Unset [`PhpSettings`] fields take the constants below.

use super::ConfigWriter;
use crate::error::Result;
use crate::platform::ResolvedPaths;
use crate::site::{PhpSettings, Site};

pub const DEFAULT_MEMORY_LIMIT: &str = "256M";
pub const DEFAULT_MAX_EXECUTION_TIME: u32 = 300;
pub const DEFAULT_UPLOAD_MAX_FILESIZE: &str = "100M";
pub const DEFAULT_POST_MAX_SIZE: &str = "100M";
pub const DEFAULT_MAX_INPUT_VARS: u32 = 1000;
pub const DEFAULT_OPCACHE_MEMORY: u32 = 128;
pub const DEFAULT_OPCACHE_INTERNED_STRINGS: u32 = 8;
pub const DEFAULT_OPCACHE_MAX_FILES: u32 = 10000;

// Process manager
const PM_MAX_CHILDREN: u32 = 10;
const PM_START_SERVERS: u32 = 2;
const PM_MIN_SPARE: u32 = 1;
const PM_MAX_SPARE: u32 = 3;
const PM_MAX_REQUESTS: u32 = 500;
const SLOWLOG_TIMEOUT_SECS: u32 = 10;

/// Render the pool config for a PHP site
pub fn render_pool_config(site: &Site, paths: &ResolvedPaths) -> Result<String> {
    site.validate()?;
    let pool = paths.pool()?;
    let settings = &site.php_settings;
    let docroot = site.document_root();

    let mut w = ConfigWriter::new();
    w.line(format!(
        "; Managed by sitewarden for {} (PHP {}). Local edits are overwritten on deploy.",
        site.domain, pool.version
    ));
    w.line(format!("[{}]", pool.name));
    w.blank();

    w.line(format!("user = {}", pool.user.user));
    w.line(format!("group = {}", pool.user.group));
    w.blank();

    w.line(format!("listen = {}", pool.socket_path.display()));
    w.line(format!("listen.owner = {}", pool.user.user));
    w.line(format!("listen.group = {}", pool.user.group));
    w.line("listen.mode = 0660");
    w.blank();

    w.line("pm = dynamic");
    w.line(format!("pm.max_children = {}", PM_MAX_CHILDREN));
    w.line(format!("pm.start_servers = {}", PM_START_SERVERS));
    w.line(format!("pm.min_spare_servers = {}", PM_MIN_SPARE));
    w.line(format!("pm.max_spare_servers = {}", PM_MAX_SPARE));
    w.line(format!("pm.max_requests = {}", PM_MAX_REQUESTS));
    w.blank();

    w.line(format!("chdir = {}", docroot.display()));
    w.line(format!(
        "slowlog = {}",
        pool.log_dir.join(format!("{}-slow.log", pool.name)).display()
    ));
    w.line(format!("request_slowlog_timeout = {}s", SLOWLOG_TIMEOUT_SECS));
    w.blank();

    w.line(format!(
        "php_admin_value[error_log] = {}",
        pool.log_dir.join(format!("{}-error.log", pool.name)).display()
    ));
    w.line("php_admin_flag[log_errors] = on");
    w.line(format!(
        "php_admin_value[memory_limit] = {}",
        settings.memory_limit.as_deref().unwrap_or(DEFAULT_MEMORY_LIMIT)
    ));
    w.line(format!(
        "php_admin_value[max_execution_time] = {}",
        settings
            .max_execution_time
            .unwrap_or(DEFAULT_MAX_EXECUTION_TIME)
    ));
    w.line(format!(
        "php_admin_value[upload_max_filesize] = {}",
        settings
            .upload_max_filesize
            .as_deref()
            .unwrap_or(DEFAULT_UPLOAD_MAX_FILESIZE)
    ));
    w.line(format!(
        "php_admin_value[post_max_size] = {}",
        settings.post_max_size.as_deref().unwrap_or(DEFAULT_POST_MAX_SIZE)
    ));
    w.line(format!(
        "php_admin_value[max_input_vars] = {}",
        settings.max_input_vars.unwrap_or(DEFAULT_MAX_INPUT_VARS)
    ));
    w.blank();

    w.line("; Security");
    w.line(format!(
        "php_admin_value[open_basedir] = {}:/tmp",
        site.root_path.display()
    ));
    w.line("php_admin_flag[allow_url_include] = off");
    disable_functions(&mut w, settings);
    w.blank();

    w.line("; OPcache");
    w.line("php_admin_flag[opcache.enable] = on");
    w.line(format!(
        "php_admin_value[opcache.memory_consumption] = {}",
        settings
            .opcache_memory_consumption
            .unwrap_or(DEFAULT_OPCACHE_MEMORY)
    ));
    w.line(format!(
        "php_admin_value[opcache.interned_strings_buffer] = {}",
        settings
            .opcache_interned_strings_buffer
            .unwrap_or(DEFAULT_OPCACHE_INTERNED_STRINGS)
    ));
    w.line(format!(
        "php_admin_value[opcache.max_accelerated_files] = {}",
        settings
            .opcache_max_accelerated_files
            .unwrap_or(DEFAULT_OPCACHE_MAX_FILES)
    ));
    w.line("php_admin_value[opcache.revalidate_freq] = 2");

    Ok(w.finish())
}

fn disable_functions(w: &mut ConfigWriter, settings: &PhpSettings) {
    // always emitted, even empty, so php.ini's list never applies
    w.line(format!(
        "php_admin_value[disable_functions] = {}",
        settings.disabled_functions().join(",")
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DebianAdapter, OsFamilyAdapter, RhelAdapter};
    use crate::site::DANGEROUS_FUNCTIONS;

    fn render(site: &Site) -> String {
        let paths = DebianAdapter::new().resolve(site).unwrap();
        render_pool_config(site, &paths).unwrap()
    }

    #[test]
    fn test_pool_defaults() {
        let site = Site::php("app.example.com", "8.3", "/srv/app").with_working_subpath("public");
        let config = render(&site);

        assert!(config.contains("[app_example_com]\n"));
        assert!(config.contains("user = www-data\n"));
        assert!(config.contains("listen = /var/run/php/php8.3-fpm-app_example_com.sock\n"));
        assert!(config.contains("listen.mode = 0660\n"));
        assert!(config.contains("pm.max_children = 10\n"));
        assert!(config.contains("chdir = /srv/app/public\n"));
        assert!(config.contains("php_admin_value[memory_limit] = 256M\n"));
        assert!(config.contains("php_admin_value[max_execution_time] = 300\n"));
        assert!(config.contains("php_admin_value[upload_max_filesize] = 100M\n"));
        assert!(config.contains("php_admin_value[open_basedir] = /srv/app:/tmp\n"));
        assert!(config.contains("php_admin_value[opcache.memory_consumption] = 128\n"));
        assert!(config.contains(&format!(
            "php_admin_value[disable_functions] = {}\n",
            DANGEROUS_FUNCTIONS.join(",")
        )));
    }

    #[test]
    fn test_pool_overrides() {
        let site = Site::php("wp.example.com", "8.3", "/srv/wp")
            .with_php_settings(PhpSettings::wordpress());
        let config = render(&site);

        assert!(config.contains("php_admin_value[upload_max_filesize] = 64M\n"));
        assert!(config.contains("php_admin_value[max_input_vars] = 3000\n"));
        assert!(config.contains("php_admin_value[opcache.max_accelerated_files] = 20000\n"));
    }

    #[test]
    fn test_reenabled_functions_leave_deny_list() {
        let settings = PhpSettings {
            enabled_functions: vec!["exec".to_string(), "proc_open".to_string()],
            ..PhpSettings::default()
        };
        let site = Site::php("app.example.com", "8.3", "/srv/app").with_php_settings(settings);
        let config = render(&site);

        let line = config
            .lines()
            .find(|l| l.starts_with("php_admin_value[disable_functions]"))
            .unwrap();
        let disabled: Vec<&str> = line.split(" = ").nth(1).unwrap().split(',').collect();
        assert!(!disabled.contains(&"exec"));
        assert!(!disabled.contains(&"proc_open"));
        assert!(disabled.contains(&"shell_exec"));
        assert!(disabled.contains(&"passthru"));
    }

    #[test]
    fn test_all_functions_reenabled() {
        let settings = PhpSettings {
            enabled_functions: DANGEROUS_FUNCTIONS.iter().map(|f| f.to_string()).collect(),
            ..PhpSettings::default()
        };
        let site = Site::php("app.example.com", "8.3", "/srv/app").with_php_settings(settings);
        let config = render(&site);
        assert!(config.contains("php_admin_value[disable_functions] = \n"));
    }

    #[test]
    fn test_rhel_pool_uses_remi_layout() {
        let site = Site::php("app.example.com", "8.4", "/srv/app");
        let paths = RhelAdapter::new().resolve(&site).unwrap();
        let config = render_pool_config(&site, &paths).unwrap();
        assert!(config.contains("user = nginx\n"));
        assert!(config.contains("listen = /var/opt/remi/php84/run/php-fpm/app_example_com.sock\n"));
    }

    #[test]
    fn test_node_site_has_no_pool() {
        let site = Site::node("api.example.com", 3000, "/srv/api");
        let paths = DebianAdapter::new().resolve(&site).unwrap();
        assert!(render_pool_config(&site, &paths).is_err());
    }

    #[test]
    fn test_pool_render_is_deterministic() {
        let site = Site::php("app.example.com", "8.3", "/srv/app");
        assert_eq!(render(&site), render(&site));
    }
}
