//! HTTP allowlist, redirect validation, and installer integrity scenarios
//! against a local server.

mod common;

use common::{
    make_manager, manifest_with, plugin_zip_bytes, register_enabled, spawn_http_server, write_plugin,
    Routes,
};
use shisho::config::HostConfig;
use shisho::plugins::installer::sha256_hex;
use shisho::plugins::{PluginManager, PluginService};
use std::net::SocketAddr;

const FETCHER_JS: &str = r#"
globalThis.plugin = { fileParser: { parse(ctx) {
  try {
    const response = shisho.http.fetch(shisho.config.get("url"));
    return { title: response.status + ":" + response.text() };
  } catch (e) {
    return { title: "error " + e.message };
  }
} } };
"#;

fn fetcher_manifest(domains: &[String]) -> serde_json::Value {
    manifest_with(
        "fetcher",
        serde_json::json!({
            "fileParser": { "types": ["testfmt"] },
            "httpAccess": { "domains": domains },
        }),
    )
}

async fn run_fetch(manager: &PluginManager, root: &std::path::Path, url: &str) -> String {
    manager
        .service()
        .set_config("community", "fetcher", "url", Some(url), None)
        .await
        .unwrap();
    let input = root.join("x.testfmt");
    std::fs::write(&input, "x").unwrap();
    manager
        .run_file_parser("community", "fetcher", &input, "testfmt")
        .await
        .unwrap()
        .title
        .unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread")]
async fn s4_allowlisted_host_and_port() {
    let mut routes = Routes::new();
    routes.insert("/data".to_string(), (200, Vec::new(), b"payload".to_vec()));
    let addr: SocketAddr = spawn_http_server(routes).await;

    let root = tempfile::tempdir().unwrap();
    write_plugin(
        root.path(),
        "community",
        "fetcher",
        &fetcher_manifest(&[format!("127.0.0.1:{}", addr.port())]),
        FETCHER_JS,
    );
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "fetcher").await;
    manager.load_all().await.unwrap();

    let ok = run_fetch(&manager, root.path(), &format!("http://127.0.0.1:{}/data", addr.port())).await;
    assert_eq!(ok, "200:payload");

    // same host, wrong port: the allowlist names an exact port
    let denied = run_fetch(
        &manager,
        root.path(),
        &format!("http://127.0.0.1:{}/data", addr.port() + 1),
    )
    .await;
    assert!(denied.contains("AccessDenied"), "got: {denied}");
    assert!(denied.contains("allowed domains"), "got: {denied}");
}

#[tokio::test(flavor = "multi_thread")]
async fn s4_host_not_declared_is_denied_without_a_request() {
    let root = tempfile::tempdir().unwrap();
    write_plugin(
        root.path(),
        "community",
        "fetcher",
        &fetcher_manifest(&["goodreads.com".to_string()]),
        FETCHER_JS,
    );
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "fetcher").await;
    manager.load_all().await.unwrap();

    // api.goodreads.com is not covered by a bare goodreads.com entry
    let denied = run_fetch(&manager, root.path(), "https://api.goodreads.com/book/1").await;
    assert!(denied.contains("AccessDenied"), "got: {denied}");
}

#[tokio::test(flavor = "multi_thread")]
async fn s5_redirect_hops_are_validated() {
    // target server holds the payload
    let mut target_routes = Routes::new();
    target_routes.insert("/final".to_string(), (200, Vec::new(), b"landed".to_vec()));
    let target: SocketAddr = spawn_http_server(target_routes).await;

    // hop server redirects to the target
    let mut hop_routes = Routes::new();
    hop_routes.insert(
        "/hop".to_string(),
        (
            302,
            vec![(
                "Location".to_string(),
                format!("http://127.0.0.1:{}/final", target.port()),
            )],
            Vec::new(),
        ),
    );
    let hop: SocketAddr = spawn_http_server(hop_routes).await;

    let root = tempfile::tempdir().unwrap();

    // manifest allows only the hop: the redirect target is blocked
    write_plugin(
        root.path(),
        "community",
        "fetcher",
        &fetcher_manifest(&[format!("127.0.0.1:{}", hop.port())]),
        FETCHER_JS,
    );
    let manager = make_manager(root.path()).await;
    register_enabled(&manager, "community", "fetcher").await;
    manager.load_all().await.unwrap();

    let blocked = run_fetch(&manager, root.path(), &format!("http://127.0.0.1:{}/hop", hop.port())).await;
    assert!(blocked.contains("RedirectBlocked"), "got: {blocked}");

    // allowing both hops lets the fetch land
    write_plugin(
        root.path(),
        "community",
        "fetcher",
        &fetcher_manifest(&[
            format!("127.0.0.1:{}", hop.port()),
            format!("127.0.0.1:{}", target.port()),
        ]),
        FETCHER_JS,
    );
    manager.reload_plugin("community", "fetcher").await.unwrap();

    let landed = run_fetch(&manager, root.path(), &format!("http://127.0.0.1:{}/hop", hop.port())).await;
    assert_eq!(landed, "200:landed");
}

#[tokio::test(flavor = "multi_thread")]
async fn s6_integrity_failure_leaves_no_destination() {
    let archive = plugin_zip_bytes("demo", "1.0.0");
    let mut routes = Routes::new();
    routes.insert("/plugin.zip".to_string(), (200, Vec::new(), archive.clone()));
    let addr: SocketAddr = spawn_http_server(routes).await;

    let root = tempfile::tempdir().unwrap();
    let config = HostConfig {
        plugin_root: root.path().to_path_buf(),
        download_allowlist: vec![format!("http://127.0.0.1:{}/", addr.port())],
        ..HostConfig::default()
    };
    let service = PluginService::open_in_memory().await.unwrap();
    let manager = PluginManager::new(config, service).unwrap();

    let url = format!("http://127.0.0.1:{}/plugin.zip", addr.port());
    let err = manager
        .install_plugin("community", "demo", &url, "0000000000000000000000000000000000000000000000000000000000000000")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "IntegrityMismatch");
    assert!(!root.path().join("community/demo").exists());
    assert!(manager.service().get_plugin("community", "demo").await.unwrap().is_none());

    // correct hash installs and records the (disabled) plugin
    let manifest = manager
        .install_plugin("community", "demo", &url, &sha256_hex(&archive))
        .await
        .unwrap();
    assert_eq!(manifest.id, "demo");
    assert!(root.path().join("community/demo/main.js").exists());
    let record = manager
        .service()
        .get_plugin("community", "demo")
        .await
        .unwrap()
        .unwrap();
    assert!(!record.enabled);
}

#[tokio::test]
async fn install_from_unlisted_url_is_invalid_source() {
    let root = tempfile::tempdir().unwrap();
    let config = HostConfig {
        plugin_root: root.path().to_path_buf(),
        ..HostConfig::default()
    };
    let service = PluginService::open_in_memory().await.unwrap();
    let manager = PluginManager::new(config, service).unwrap();

    let err = manager
        .install_plugin("community", "demo", "http://evil.example/p.zip", "aa")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidSource");
}
