// src/render/proxy.rs

//! nginx virtual-host rendering
//!
//! PHP sites get a document root and a FastCGI handler pointed at the
//! site's pool socket. Node sites get no document root at all: every request
//! is proxied to `localhost:<port>`, and static-looking paths fall back to
//! the backend instead of returning 404.
//!
//! When the site wants TLS *and* its certificate is active, the plaintext
//! server only redirects and a single TLS server carries the site.

use super::ConfigWriter;
use crate::error::Result;
use crate::platform::ResolvedPaths;
use crate::site::{RuntimeKind, Site};

/// TLS 1.2 and 1.3 only
const TLS_PROTOCOLS: &str = "TLSv1.2 TLSv1.3";

const TLS_CIPHERS: &str = "ECDHE-ECDSA-AES128-GCM-SHA256:ECDHE-RSA-AES128-GCM-SHA256:\
ECDHE-ECDSA-AES256-GCM-SHA384:ECDHE-RSA-AES256-GCM-SHA384:\
ECDHE-ECDSA-CHACHA20-POLY1305:ECDHE-RSA-CHACHA20-POLY1305:\
DHE-RSA-AES128-GCM-SHA256:DHE-RSA-AES256-GCM-SHA384";

const STATIC_EXTENSIONS: &str = "jpg|jpeg|png|gif|ico|css|js|svg|woff|woff2|ttf|eot";

const SENSITIVE_EXTENSIONS: &str = "env|log|md|sql|sqlite|conf|ini|bak|old|tmp|swp";

const SENSITIVE_PATHS: &str =
    r"(\.(git|svn|hg|bzr)|composer\.(json|lock)|package(-lock)?\.json|Dockerfile|nginx\.conf)$";

/// Render the virtual-host config for `site`
pub fn render_proxy_config(site: &Site, paths: &ResolvedPaths) -> Result<String> {
    site.validate()?;

    let mut w = ConfigWriter::new();
    w.line(format!(
        "# Managed by sitewarden for {}. Local edits are overwritten on deploy.",
        site.domain
    ));
    w.blank();

    if site.tls_enabled() {
        w.open("server");
        w.line("listen 80;");
        w.line("listen [::]:80;");
        w.line(format!("server_name {};", site.domain));
        w.blank();
        w.line("return 301 https://$host$request_uri;");
        w.close();
        w.blank();

        w.open("server");
        w.line("listen 443 ssl http2;");
        w.line("listen [::]:443 ssl http2;");
        w.line(format!("server_name {};", site.domain));
        w.blank();
        tls_directives(&mut w, paths);
    } else {
        w.open("server");
        w.line("listen 80;");
        w.line("listen [::]:80;");
        w.line(format!("server_name {};", site.domain));
    }
    w.blank();

    match site.runtime {
        RuntimeKind::PhpApp => php_body(&mut w, site, paths)?,
        RuntimeKind::NodeApp => node_body(&mut w, site, paths)?,
    }
    w.close();

    Ok(w.finish())
}

fn tls_directives(w: &mut ConfigWriter, paths: &ResolvedPaths) {
    let certs = &paths.certificate_dir;
    w.line("# TLS certificates");
    w.line(format!("ssl_certificate {};", certs.join("fullchain.pem").display()));
    w.line(format!("ssl_certificate_key {};", certs.join("privkey.pem").display()));
    w.line(format!("ssl_trusted_certificate {};", certs.join("chain.pem").display()));
    w.blank();
    w.line(format!("ssl_protocols {};", TLS_PROTOCOLS));
    w.line(format!("ssl_ciphers '{}';", TLS_CIPHERS));
    w.line("ssl_prefer_server_ciphers off;");
    w.blank();
    w.line("ssl_session_timeout 1d;");
    w.line("ssl_session_cache shared:SSL:50m;");
    w.line("ssl_session_tickets off;");
    w.blank();
    w.line("# OCSP stapling");
    w.line("ssl_stapling on;");
    w.line("ssl_stapling_verify on;");
    w.line("resolver 8.8.8.8 8.8.4.4 valid=300s;");
    w.line("resolver_timeout 5s;");
    w.blank();
    w.line(
        "add_header Strict-Transport-Security \"max-age=31536000; includeSubDomains; preload\" always;",
    );
}

fn common_directives(w: &mut ConfigWriter, site: &Site, paths: &ResolvedPaths) {
    let logs = &paths.proxy_log_dir;
    w.line(format!(
        "access_log {};",
        logs.join(format!("{}-access.log", site.domain)).display()
    ));
    w.line(format!(
        "error_log {};",
        logs.join(format!("{}-error.log", site.domain)).display()
    ));
    w.blank();
    w.line("client_max_body_size 100M;");
    w.line("client_body_buffer_size 128k;");
    w.line("client_body_timeout 12;");
    w.line("client_header_timeout 12;");
    w.line("keepalive_timeout 15;");
    w.line("send_timeout 10;");
    w.blank();
    w.line("# Security headers");
    w.line("add_header X-Frame-Options \"SAMEORIGIN\" always;");
    w.line("add_header X-Content-Type-Options \"nosniff\" always;");
    w.line("add_header X-XSS-Protection \"1; mode=block\" always;");
    w.line("add_header Referrer-Policy \"strict-origin-when-cross-origin\" always;");
    w.line("add_header Permissions-Policy \"geolocation=(), microphone=(), camera=()\" always;");
    w.line("server_tokens off;");
    w.blank();
}

fn deny_dotfiles(w: &mut ConfigWriter) {
    w.open(r"location ~ /\.");
    w.line("deny all;");
    w.line("access_log off;");
    w.line("log_not_found off;");
    w.close();
    w.blank();
}

fn quiet_well_known_files(w: &mut ConfigWriter) {
    for file in ["/favicon.ico", "/robots.txt"] {
        w.open(format!("location = {}", file));
        w.line("access_log off;");
        w.line("log_not_found off;");
        w.close();
    }
}

fn proxy_headers(w: &mut ConfigWriter) {
    w.line("proxy_set_header Host $host;");
    w.line("proxy_set_header X-Real-IP $remote_addr;");
    w.line("proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;");
    w.line("proxy_set_header X-Forwarded-Proto $scheme;");
}

fn php_body(w: &mut ConfigWriter, site: &Site, paths: &ResolvedPaths) -> Result<()> {
    let pool = paths.pool()?;

    w.line(format!("root {};", site.document_root().display()));
    w.line("index index.php index.html index.htm;");
    w.blank();
    common_directives(w, site, paths);

    w.open("location /");
    w.line("try_files $uri $uri/ /index.php?$query_string;");
    w.close();
    w.blank();

    w.open(r"location ~ \.php$");
    // fastcgi.conf ships with upstream nginx on every family; snippets/ is Debian-only
    w.line(r"fastcgi_split_path_info ^(.+\.php)(/.+)$;");
    w.line("try_files $fastcgi_script_name =404;");
    w.line("set $path_info $fastcgi_path_info;");
    w.line("fastcgi_index index.php;");
    w.line("include fastcgi.conf;");
    w.line("fastcgi_param PATH_INFO $path_info;");
    w.line(format!("fastcgi_pass unix:{};", pool.socket_path.display()));
    w.line("fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;");
    w.line("fastcgi_buffers 16 16k;");
    w.line("fastcgi_buffer_size 32k;");
    w.close();
    w.blank();

    deny_dotfiles(w);

    w.open(format!(r"location ~* \.({})$", SENSITIVE_EXTENSIONS));
    w.line("deny all;");
    w.line("access_log off;");
    w.line("log_not_found off;");
    w.close();
    w.blank();

    w.open(format!("location ~* {}", SENSITIVE_PATHS));
    w.line("deny all;");
    w.line("access_log off;");
    w.line("log_not_found off;");
    w.close();
    w.blank();

    w.open(format!(r"location ~* \.({})$", STATIC_EXTENSIONS));
    w.line("expires 30d;");
    w.line("add_header Cache-Control \"public, immutable\";");
    w.line("access_log off;");
    w.close();
    w.blank();

    quiet_well_known_files(w);
    Ok(())
}

fn node_body(w: &mut ConfigWriter, site: &Site, paths: &ResolvedPaths) -> Result<()> {
    let backend = format!("http://localhost:{}", site.node_port()?);

    common_directives(w, site, paths);

    w.open("location /");
    w.line(format!("proxy_pass {};", backend));
    w.line("proxy_http_version 1.1;");
    w.blank();
    w.line("# WebSocket upgrade");
    w.line("proxy_set_header Upgrade $http_upgrade;");
    w.line("proxy_set_header Connection 'upgrade';");
    w.blank();
    proxy_headers(w);
    w.line("proxy_set_header X-Forwarded-Host $host;");
    w.line("proxy_set_header X-Forwarded-Port $server_port;");
    w.blank();
    w.line("proxy_connect_timeout 60s;");
    w.line("proxy_send_timeout 60s;");
    w.line("proxy_read_timeout 60s;");
    w.blank();
    w.line("proxy_buffering on;");
    w.line("proxy_buffer_size 4k;");
    w.line("proxy_buffers 8 4k;");
    w.line("proxy_busy_buffers_size 8k;");
    w.line("proxy_cache_bypass $http_upgrade;");
    w.close();
    w.blank();

    deny_dotfiles(w);

    w.open(format!(r"location ~* \.({})$", STATIC_EXTENSIONS));
    w.line("expires 30d;");
    w.line("add_header Cache-Control \"public, immutable\";");
    w.line("access_log off;");
    w.line("try_files $uri @backend;");
    w.close();
    w.blank();

    w.open("location @backend");
    w.line(format!("proxy_pass {};", backend));
    w.line("proxy_http_version 1.1;");
    proxy_headers(w);
    w.close();
    w.blank();

    quiet_well_known_files(w);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{DebianAdapter, OsFamilyAdapter, RhelAdapter};
    use crate::site::TlsStatus;

    fn render(site: &Site) -> String {
        let paths = DebianAdapter::new().resolve(site).unwrap();
        render_proxy_config(site, &paths).unwrap()
    }

    fn php_site() -> Site {
        Site::php("app.example.com", "8.3", "/srv/app").with_working_subpath("public")
    }

    #[test]
    fn test_php_document_root_and_socket() {
        let config = render(&php_site());
        assert!(config.contains("    root /srv/app/public;\n"));
        assert!(config.contains("fastcgi_pass unix:/var/run/php/php8.3-fpm-app_example_com.sock;"));
        assert!(config.contains("server_name app.example.com;"));
    }

    #[test]
    fn test_php_socket_follows_adapter() {
        let site = Site::php("app.example.com", "8.4", "/srv/app");
        let paths = RhelAdapter::new().resolve(&site).unwrap();
        let config = render_proxy_config(&site, &paths).unwrap();
        assert!(config.contains(
            "fastcgi_pass unix:/var/opt/remi/php84/run/php-fpm/app_example_com.sock;"
        ));
        assert!(config.contains("include fastcgi.conf;"));
        assert!(!config.contains("snippets/"));
    }

    #[test]
    fn test_empty_subpath_has_no_trailing_slash() {
        let config = render(&Site::php("app.example.com", "8.3", "/srv/app/"));
        assert!(config.contains("    root /srv/app;\n"));
    }

    #[test]
    fn test_php_security_locations() {
        let config = render(&php_site());
        assert!(config.contains(r"location ~ /\. {"));
        assert!(config.contains("env|log|md|sql"));
        assert!(config.contains("composer"));
        assert!(config.contains("expires 30d;"));
        assert!(config.contains("X-Content-Type-Options"));
        assert!(config.contains("server_tokens off;"));
    }

    #[test]
    fn test_node_has_no_document_root() {
        let site = Site::node("api.example.com", 3000, "/srv/api");
        let config = render(&site);

        assert!(!config.lines().any(|l| l.trim_start().starts_with("root ")));
        assert!(config.contains("proxy_pass http://localhost:3000;"));
        assert!(config.contains("proxy_set_header Upgrade $http_upgrade;"));
        assert!(config.contains("proxy_set_header X-Forwarded-Proto $scheme;"));
        assert!(config.contains("try_files $uri @backend;"));
        assert!(config.contains("location @backend {"));
        assert!(!config.contains("fastcgi_pass"));
    }

    #[test]
    fn test_tls_block_only_when_active() {
        let mut site = php_site().with_tls_desired(true);

        for status in [TlsStatus::None, TlsStatus::Pending, TlsStatus::Failed] {
            site.tls_status = status;
            let config = render(&site);
            assert!(!config.contains("listen 443"), "TLS rendered for {}", status);
            assert!(!config.contains("ssl_certificate"));
            assert!(!config.contains("return 301"));
        }

        site.tls_status = TlsStatus::Active;
        let config = render(&site);
        assert_eq!(config.matches("listen 443 ssl http2;").count(), 1);
        assert_eq!(config.matches("listen [::]:443 ssl http2;").count(), 1);
        assert_eq!(config.matches("return 301 https://$host$request_uri;").count(), 1);
        assert!(config.contains("ssl_certificate /etc/letsencrypt/live/app.example.com/fullchain.pem;"));
        assert!(config.contains("ssl_protocols TLSv1.2 TLSv1.3;"));
        assert!(config.contains("ssl_stapling on;"));
        assert!(config.contains("Strict-Transport-Security"));
    }

    #[test]
    fn test_active_status_without_desire_renders_plaintext() {
        let mut site = Site::node("api.example.com", 3000, "/srv/api");
        site.tls_status = TlsStatus::Active;
        assert!(!render(&site).contains("listen 443"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut site = php_site().with_tls_desired(true);
        site.tls_status = TlsStatus::Active;
        assert_eq!(render(&site), render(&site));
    }

    #[test]
    fn test_render_rejects_missing_port() {
        let mut site = Site::node("api.example.com", 3000, "/srv/api");
        let paths = DebianAdapter::new().resolve(&site).unwrap();
        site.listen_port = None;
        assert!(render_proxy_config(&site, &paths).is_err());
    }
}
