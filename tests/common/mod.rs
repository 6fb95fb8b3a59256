//! Shared fixtures for integration tests: on-disk plugin trees and a manager
//! wired to an in-memory store.

// each test binary uses a different subset of these helpers
#![allow(dead_code)]

use chrono::Utc;
use shisho::config::HostConfig;
use shisho::plugins::service::{PluginRecord, PluginService};
use shisho::plugins::PluginManager;
use std::path::Path;
use std::time::Duration;

/// Write a plugin directory (`manifest.json` + `main.js`) under `root`.
pub fn write_plugin(root: &Path, scope: &str, id: &str, manifest: &serde_json::Value, script: &str) {
    let dir = root.join(scope).join(id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        serde_json::to_vec_pretty(manifest).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.join("main.js"), script).unwrap();
}

/// A manifest declaring the given capability objects on top of valid identity.
pub fn manifest_with(id: &str, capabilities: serde_json::Value) -> serde_json::Value {
    let mut manifest = serde_json::json!({
        "manifestVersion": 1,
        "id": id,
        "name": format!("Test plugin {id}"),
        "version": "1.0.0",
    });
    if let (Some(base), Some(extra)) = (manifest.as_object_mut(), capabilities.as_object()) {
        for (key, value) in extra {
            base.insert(key.clone(), value.clone());
        }
    }
    manifest
}

/// Manager over `root` with an in-memory store and short hook deadlines.
pub async fn make_manager(root: &Path) -> PluginManager {
    let config = HostConfig {
        plugin_root: root.to_path_buf(),
        short_hook_timeout: Duration::from_secs(10),
        long_hook_timeout: Duration::from_secs(20),
        ..HostConfig::default()
    };
    let service = PluginService::open_in_memory().await.unwrap();
    PluginManager::new(config, service).unwrap()
}

/// Routes for [`spawn_http_server`]: path -> (status, headers, body).
pub type Routes = std::collections::HashMap<String, (u16, Vec<(String, String)>, Vec<u8>)>;

/// Serve canned HTTP/1.1 responses on a random local port.
///
/// Just enough HTTP for the tests: reads the request head, matches the path
/// exactly, closes the connection after each response. Unknown paths get 404.
pub async fn spawn_http_server(routes: Routes) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = std::sync::Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&buf);
                let path = head
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .to_string();

                let (status, headers, body) = routes
                    .get(&path)
                    .cloned()
                    .unwrap_or((404, Vec::new(), b"not found".to_vec()));
                let mut response = format!("HTTP/1.1 {status} X\r\nContent-Length: {}\r\n", body.len());
                for (name, value) in &headers {
                    response.push_str(&format!("{name}: {value}\r\n"));
                }
                response.push_str("Connection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// A zip archive holding a minimal valid plugin (`manifest.json` + `main.js`).
pub fn plugin_zip_bytes(id: &str, version: &str) -> Vec<u8> {
    use std::io::Write;

    let manifest = serde_json::json!({
        "manifestVersion": 1,
        "id": id,
        "name": format!("Test plugin {id}"),
        "version": version,
    });
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        writer
            .start_file("manifest.json", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer
            .write_all(&serde_json::to_vec(&manifest).unwrap())
            .unwrap();
        writer
            .start_file("main.js", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"globalThis.plugin = {};").unwrap();
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Insert an enabled plugin row so `load_all` picks the plugin up.
pub async fn register_enabled(manager: &PluginManager, scope: &str, id: &str) {
    manager
        .service()
        .install_plugin(&PluginRecord {
            scope: scope.to_string(),
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            installed_at: Utc::now(),
            updated_at: Utc::now(),
            enabled: true,
            load_error: None,
            update_available_version: None,
        })
        .await
        .unwrap();
}
