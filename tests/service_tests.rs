//! Store-level invariants: secret masking, field-setting priority, and the
//! repository update check with an injected index fetcher.

mod common;

use proptest::prelude::*;
use shisho::config::HostConfig;
use shisho::plugins::manifest::ConfigField;
use shisho::plugins::repository::{RepositoryIndex, RepositoryPlugin, RepositoryVersion};
use shisho::plugins::service::{PluginService, RepositoryRecord, SECRET_MASK};
use shisho::plugins::manager::RepoFetchFuture;
use shisho::plugins::{HookType, PluginManager};
use std::collections::BTreeMap;
use std::sync::Arc;

proptest! {
    // effective = library override > global disable > default enabled
    #[test]
    fn effective_field_priority(
        global in prop::option::of(any::<bool>()),
        library in prop::option::of(any::<bool>()),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let service = PluginService::open_in_memory().await.unwrap();
            let declared = vec!["title".to_string()];

            if let Some(enabled) = global {
                service.set_field_setting("s", "p", "title", enabled).await.unwrap();
            }
            if let Some(enabled) = library {
                service
                    .set_library_field_setting(1, "s", "p", "title", enabled)
                    .await
                    .unwrap();
            }

            let effective = service
                .get_effective_field_settings(1, "s", "p", &declared)
                .await
                .unwrap();
            let expected = library.unwrap_or_else(|| global.unwrap_or(true));
            prop_assert_eq!(effective["title"], expected);
            Ok(())
        }).unwrap();
    }

    #[test]
    fn secrets_are_always_masked_unless_raw(
        value in "[a-zA-Z0-9]{1,16}",
        secret in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let service = PluginService::open_in_memory().await.unwrap();
            let mut schema = BTreeMap::new();
            schema.insert(
                "key".to_string(),
                ConfigField { secret, ..ConfigField::default() },
            );
            service
                .set_config("s", "p", "key", Some(&value), schema.get("key"))
                .await
                .unwrap();

            let masked = service.get_config("s", "p", &schema, false).await.unwrap();
            let expected = if secret { SECRET_MASK } else { value.as_str() };
            prop_assert_eq!(masked.get("key").map(String::as_str), Some(expected));

            let raw = service.get_config("s", "p", &schema, true).await.unwrap();
            prop_assert_eq!(raw.get("key").map(String::as_str), Some(value.as_str()));
            Ok(())
        }).unwrap();
    }

    // replacing an order always yields contiguous positions 0..n-1
    #[test]
    fn set_order_reassigns_contiguous_positions(
        ids in prop::collection::btree_set("[a-z]{1,8}", 1..6),
    ) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let service = PluginService::open_in_memory().await.unwrap();
            let entries: Vec<(String, String)> = ids
                .iter()
                .map(|id| ("s".to_string(), id.clone()))
                .collect();
            service.set_order(HookType::FileParser, &entries).await.unwrap();

            let stored = service.get_order(HookType::FileParser).await.unwrap();
            prop_assert_eq!(stored.len(), entries.len());
            for (index, entry) in stored.iter().enumerate() {
                prop_assert_eq!(entry.position, index as i64);
                prop_assert_eq!(entry.plugin_id.as_str(), entries[index].1.as_str());
            }
            Ok(())
        }).unwrap();
    }
}

fn index_with(scope: &str, plugin_id: &str, versions: &[(&str, i64)]) -> RepositoryIndex {
    RepositoryIndex {
        repository_version: 1,
        scope: scope.to_string(),
        name: scope.to_string(),
        plugins: vec![RepositoryPlugin {
            id: plugin_id.to_string(),
            name: plugin_id.to_string(),
            versions: versions
                .iter()
                .map(|(version, manifest_version)| RepositoryVersion {
                    version: version.to_string(),
                    manifest_version: *manifest_version,
                    ..RepositoryVersion::default()
                })
                .collect(),
            ..RepositoryPlugin::default()
        }],
    }
}

#[tokio::test]
async fn update_check_sets_and_clears_marker() {
    let service = PluginService::open_in_memory().await.unwrap();
    service
        .add_repository(&RepositoryRecord {
            scope: "community".into(),
            url: "https://raw.githubusercontent.com/x/community.json".into(),
            name: None,
            is_official: false,
            enabled: true,
            last_fetched_at: None,
            fetch_error: None,
        })
        .await
        .unwrap();

    let root = tempfile::tempdir().unwrap();
    let manager = PluginManager::with_repository_fetch(
        Arc::new(HostConfig {
            plugin_root: root.path().to_path_buf(),
            ..HostConfig::default()
        }),
        service.clone(),
        Arc::new(|_url: String| {
            let future: RepoFetchFuture = Box::pin(async {
                // newest compatible is 1.2.0; the 9.9.9 entry needs a manifest
                // revision this host does not speak
                Ok(index_with("community", "p", &[("1.0.0", 1), ("1.2.0", 1), ("9.9.9", 99)]))
            });
            future
        }),
    )
    .unwrap();

    common::register_enabled(&manager, "community", "p").await;
    manager.check_for_updates().await.unwrap();

    let plugin = service.get_plugin("community", "p").await.unwrap().unwrap();
    assert_eq!(plugin.update_available_version.as_deref(), Some("1.2.0"));
    let repository = &service.list_repositories().await.unwrap()[0];
    assert!(repository.last_fetched_at.is_some());
    assert!(repository.fetch_error.is_none());

    // once the installed version catches up, the marker clears
    let mut record = plugin.clone();
    record.version = "1.2.0".to_string();
    service.update_plugin(&record).await.unwrap();
    manager.check_for_updates().await.unwrap();
    let plugin = service.get_plugin("community", "p").await.unwrap().unwrap();
    assert!(plugin.update_available_version.is_none());
}

#[tokio::test]
async fn update_check_survives_fetch_failures() {
    let service = PluginService::open_in_memory().await.unwrap();
    service
        .add_repository(&RepositoryRecord {
            scope: "broken".into(),
            url: "https://raw.githubusercontent.com/x/broken.json".into(),
            name: None,
            is_official: false,
            enabled: true,
            last_fetched_at: None,
            fetch_error: None,
        })
        .await
        .unwrap();

    let root = tempfile::tempdir().unwrap();
    let manager = PluginManager::with_repository_fetch(
        Arc::new(HostConfig {
            plugin_root: root.path().to_path_buf(),
            ..HostConfig::default()
        }),
        service.clone(),
        Arc::new(|url: String| {
            let future: RepoFetchFuture = Box::pin(async move {
                Err(shisho::PluginError::RepositoryInvalid(format!(
                    "unreachable: {url}"
                )))
            });
            future
        }),
    )
    .unwrap();

    manager.check_for_updates().await.unwrap();
    let repository = &service.list_repositories().await.unwrap()[0];
    assert!(repository.fetch_error.as_deref().unwrap().contains("unreachable"));
    assert!(repository.last_fetched_at.is_none());
}
