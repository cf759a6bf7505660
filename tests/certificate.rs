// tests/certificate.rs

//! Certificate requests end to end: state transitions written to the store
//! and the TLS redeploy that follows an issued certificate.

mod common;

use chrono::{Duration, Utc};
use common::{Harness, ScriptedIssuer};
use sitewarden::{
    ArtifactKind, CommandOutput, DeployStage, ErrorKind, PhpSettings, ProxyStatus, Site, SiteStore,
    SiteUpdate, TlsStatus,
};

#[test]
fn test_issued_certificate_enables_tls() {
    let h = Harness::sandbox(ScriptedIssuer::succeeding());
    let root = h.site_root("app", "public");
    h.manager
        .add_site(&Site::php("app.example.com", "8.3", &root).with_working_subpath("public"))
        .unwrap();
    h.manager.deploy("app.example.com").unwrap();

    let plain = h.manager.render("app.example.com").unwrap();
    let proxy = plain.iter().find(|a| a.kind == ArtifactKind::Proxy).unwrap();
    assert!(!proxy.content.contains("listen 443"));

    let outcome = h.manager.request_certificate("app.example.com").unwrap();
    assert!(outcome.redeploy_error.is_none());
    assert_eq!(h.issuer.calls(), 1);

    let site = h.store.get("app.example.com").unwrap();
    assert_eq!(site, outcome.site);
    assert!(site.tls_desired);
    assert_eq!(site.tls_status, TlsStatus::Active);
    assert_eq!(site.tls_issued_at, Some(outcome.certificate.issued_at));
    assert_eq!(site.tls_expires_at, Some(outcome.certificate.expires_at));
    assert!(site.tls_pending_since.is_none());
    assert!(site.tls_last_error.is_none());
    assert_eq!(site.proxy_status, ProxyStatus::Active);

    let paths = h.deployer().resolve(&site).unwrap();
    let deployed = std::fs::read_to_string(&paths.proxy_available).unwrap();
    assert_eq!(deployed.matches("listen 443 ssl http2;").count(), 1);
    assert!(deployed.contains("return 301 https://$host$request_uri;"));
    assert!(deployed.contains("fullchain.pem"));
}

#[test]
fn test_tls_redeploy_uses_record_changed_during_issuance() {
    let h = Harness::sandbox(ScriptedIssuer::succeeding());
    let root = h.site_root("app", "public");
    h.manager
        .add_site(&Site::php("app.example.com", "8.3", &root).with_working_subpath("public"))
        .unwrap();
    h.manager.deploy("app.example.com").unwrap();

    // someone reconfigures PHP while the issuer is still validating
    let store = h.store.clone();
    h.issuer.on_issue(move |domain| {
        let change = SiteUpdate {
            php_settings: Some(PhpSettings::wordpress()),
            ..SiteUpdate::default()
        };
        store.update(domain, &change).unwrap();
    });

    let outcome = h.manager.request_certificate("app.example.com").unwrap();
    assert!(outcome.redeploy_error.is_none());

    let site = h.store.get("app.example.com").unwrap();
    assert_eq!(site.php_settings, PhpSettings::wordpress());
    assert_eq!(site.tls_status, TlsStatus::Active);
    assert_eq!(site.proxy_status, ProxyStatus::Active);

    let paths = h.deployer().resolve(&site).unwrap();
    let pool = std::fs::read_to_string(&paths.pool().unwrap().config_path).unwrap();
    assert!(pool.contains("php_admin_value[upload_max_filesize] = 64M"));
    let proxy = std::fs::read_to_string(&paths.proxy_available).unwrap();
    assert!(proxy.contains("listen 443 ssl http2;"));
}

#[test]
fn test_failed_issuance_is_recorded_without_tls() {
    // two attempts, both refused
    let h = Harness::sandbox(ScriptedIssuer::failing(2));
    let root = h.site_root("app", "");
    h.manager
        .add_site(&Site::node("app.example.com", 3000, &root))
        .unwrap();
    h.manager.deploy("app.example.com").unwrap();

    let err = h.manager.request_certificate("app.example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalService);
    assert_eq!(h.issuer.calls(), 2);

    let site = h.store.get("app.example.com").unwrap();
    assert_eq!(site.tls_status, TlsStatus::Failed);
    assert!(!site.tls_desired);
    assert!(site.tls_pending_since.is_none());
    assert!(site.tls_last_error.unwrap().contains("rate limited"));
    assert_eq!(site.proxy_status, ProxyStatus::Active);

    let rendered = h.manager.render("app.example.com").unwrap();
    assert!(!rendered[0].content.contains("ssl_certificate"));
}

#[test]
fn test_second_attempt_succeeds_after_transient_failure() {
    let h = Harness::sandbox(ScriptedIssuer::failing(1));
    let root = h.site_root("app", "");
    h.manager
        .add_site(&Site::node("app.example.com", 3000, &root))
        .unwrap();

    h.manager.request_certificate("app.example.com").unwrap();
    assert_eq!(h.issuer.calls(), 2);
    assert_eq!(
        h.store.get("app.example.com").unwrap().tls_status,
        TlsStatus::Active
    );
}

#[test]
fn test_missing_document_root_never_reaches_issuer() {
    let h = Harness::sandbox(ScriptedIssuer::succeeding());
    let root = h.temp.path().join("srv/absent");
    h.manager
        .add_site(&Site::php("app.example.com", "8.3", &root).with_working_subpath("public"))
        .unwrap();

    let err = h.manager.request_certificate("app.example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert!(!err.is_retryable());
    assert_eq!(h.issuer.calls(), 0);

    let site = h.store.get("app.example.com").unwrap();
    assert_eq!(site.tls_status, TlsStatus::None);
    assert!(site.tls_pending_since.is_none());
}

#[test]
fn test_request_while_pending_is_refused_until_stale() {
    let h = Harness::sandbox(ScriptedIssuer::succeeding());
    let root = h.site_root("app", "");
    h.manager
        .add_site(&Site::node("app.example.com", 3000, &root))
        .unwrap();

    // a request started a minute ago is still in flight
    let pending = SiteUpdate {
        tls_status: Some(TlsStatus::Pending),
        tls_pending_since: Some(Some(Utc::now() - Duration::minutes(1))),
        ..SiteUpdate::default()
    };
    h.store.update("app.example.com", &pending).unwrap();

    let err = h.manager.request_certificate("app.example.com").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);
    assert_eq!(h.issuer.calls(), 0);

    // one abandoned long enough ago may be retried
    let abandoned = SiteUpdate {
        tls_pending_since: Some(Some(Utc::now() - Duration::hours(1))),
        ..SiteUpdate::default()
    };
    h.store.update("app.example.com", &abandoned).unwrap();

    h.manager.request_certificate("app.example.com").unwrap();
    assert_eq!(h.issuer.calls(), 1);
}

#[test]
fn test_redeploy_failure_keeps_certificate_active() {
    let h = Harness::staged(ScriptedIssuer::succeeding());
    let root = h.site_root("api", "");
    h.manager
        .add_site(&Site::node("api.example.com", 3000, &root))
        .unwrap();

    h.executor.respond(
        "nginx -t",
        CommandOutput::failed(1, "nginx: [emerg] cannot load certificate"),
    );
    let outcome = h.manager.request_certificate("api.example.com").unwrap();

    let redeploy = outcome.redeploy_error.expect("redeploy should fail");
    assert_eq!(redeploy.stage(), Some(DeployStage::Validate));

    let site = h.store.get("api.example.com").unwrap();
    assert_eq!(site.tls_status, TlsStatus::Active);
    assert!(site.tls_desired);
    assert_eq!(site.proxy_status, ProxyStatus::Failed);
    assert!(site.proxy_last_error.unwrap().contains("cannot load certificate"));
}

#[tokio::test]
async fn test_spawned_request_completes_off_the_runtime() {
    let h = Harness::sandbox(ScriptedIssuer::succeeding());
    let root = h.site_root("app", "");
    h.manager
        .add_site(&Site::node("app.example.com", 3000, &root))
        .unwrap();

    let outcome = h
        .manager
        .spawn_certificate_request("app.example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.site.tls_status, TlsStatus::Active);
    assert_eq!(outcome.certificate.domain, "app.example.com");
}
