//! Registry lifecycle tests

use super::*;
use crate::events::PluginEvent;
use crate::tools::{CatalogProvider, ProviderError, ResourceContent, ResourceDescriptor, StaticCatalog, ToolDefinition};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tempfile::TempDir;

fn p1() -> PluginMetadata {
    PluginMetadata::new("p1", "1.0.0").with_capability("tools")
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<PluginEvent>) -> Vec<PluginEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

struct FailingProvider;

#[async_trait]
impl CatalogProvider for FailingProvider {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ProviderError> {
        Err(ProviderError::Unavailable("socket closed".to_string()))
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, _params: Value) -> Result<Value, ProviderError> {
        Err(ProviderError::UnknownTool(name.to_string()))
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ProviderError> {
        Err(ProviderError::UnknownResource(uri.to_string()))
    }
}

#[tokio::test]
async fn test_load_disable_enable_unload_scenario() {
    let registry = PluginRegistry::default();

    registry.load(p1()).await.unwrap();
    assert_eq!(registry.len().await, 1);
    assert_eq!(registry.state("p1").await, Some(PluginState::Loaded));

    registry.disable("p1").await.unwrap();
    registry.enable("p1").await.unwrap();
    assert_eq!(registry.state("p1").await, Some(PluginState::Active));

    registry.unload("p1").await.unwrap();
    assert!(registry.get("p1").await.is_none());
}

#[tokio::test]
async fn test_invalid_names_register_nothing() {
    let registry = PluginRegistry::default();
    let mut events = registry.subscribe();

    for name in ["", "a/b", "..", "../etc", "x\\y"] {
        let err = registry
            .load(PluginMetadata::new(name, "1.0.0").with_capability("tools"))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::InvalidName(_)), "{}", name);
    }

    assert!(registry.is_empty().await);
    let events = drain(&mut events);
    assert_eq!(events.len(), 5);
    assert!(events.iter().all(|e| e.event_type() == "plugin_error"));
}

#[tokio::test]
async fn test_version_and_capability_validation() {
    let registry = PluginRegistry::default();

    let err = registry
        .load(PluginMetadata::new("p1", "1.0").with_capability("tools"))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::InvalidVersion { .. }));

    let err = registry.load(PluginMetadata::new("p1", "1.0.0")).await.unwrap_err();
    assert_eq!(err, PluginError::NoCapabilities("p1".to_string()));

    let err = registry
        .load(PluginMetadata::new("p1", "1.0.0").with_capability(""))
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::EmptyCapability { .. }));

    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn test_duplicate_name() {
    let registry = PluginRegistry::default();
    registry.load(p1()).await.unwrap();

    let err = registry.load(p1()).await.unwrap_err();
    assert_eq!(err, PluginError::DuplicateName("p1".to_string()));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_load_emits_transitions_in_order() {
    let registry = PluginRegistry::default();
    let mut rx = registry.subscribe();

    registry.load(p1()).await.unwrap();

    let events = drain(&mut rx);
    let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
    assert_eq!(
        kinds,
        vec!["plugin_state_change", "plugin_state_change", "plugin_loaded"]
    );
    assert!(matches!(
        events[0],
        PluginEvent::StateChange { from: PluginState::Unloaded, to: PluginState::Loading, .. }
    ));
    assert!(matches!(
        events[1],
        PluginEvent::StateChange { from: PluginState::Loading, to: PluginState::Loaded, .. }
    ));
}

#[tokio::test]
async fn test_invalid_transitions_leave_state() {
    let registry = PluginRegistry::default();
    registry.load(p1()).await.unwrap();
    registry.enable("p1").await.unwrap();

    let err = registry.enable("p1").await.unwrap_err();
    assert_eq!(
        err,
        PluginError::InvalidTransition {
            name: "p1".to_string(),
            from: PluginState::Active,
            to: PluginState::Active,
        }
    );
    assert_eq!(registry.state("p1").await, Some(PluginState::Active));

    registry.disable("p1").await.unwrap();
    assert!(registry.disable("p1").await.is_err());
    assert_eq!(registry.state("p1").await, Some(PluginState::Disabled));
}

#[tokio::test]
async fn test_unknown_plugin_operations() {
    let registry = PluginRegistry::default();

    assert_eq!(
        registry.unload("ghost").await.unwrap_err(),
        PluginError::PluginNotFound("ghost".to_string())
    );
    assert!(matches!(registry.enable("ghost").await, Err(PluginError::PluginNotFound(_))));
    assert!(matches!(registry.reload("ghost").await, Err(PluginError::PluginNotFound(_))));
}

#[tokio::test]
async fn test_reload_resets_timestamp_and_state() {
    let registry = PluginRegistry::default();
    registry.load(p1()).await.unwrap();
    registry.enable("p1").await.unwrap();
    let before = registry.get("p1").await.unwrap().loaded_at;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    registry.reload("p1").await.unwrap();

    let after = registry.get("p1").await.unwrap();
    assert_eq!(after.state, PluginState::Loaded);
    assert_eq!(after.metadata, p1());
    assert!(after.loaded_at > before);
}

#[tokio::test]
async fn test_concurrent_transitions_serialize() {
    let registry = Arc::new(PluginRegistry::default());
    registry.load(p1()).await.unwrap();

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.enable("p1").await })
        })
        .collect();

    let mut successes = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(registry.state("p1").await, Some(PluginState::Active));
}

#[tokio::test]
async fn test_failing_handler_leaves_error_state() {
    let registry = PluginRegistry::default();
    registry.register_handler("p1", Arc::new(FailingProvider)).await;

    let err = registry.load(p1()).await.unwrap_err();
    assert!(matches!(err, PluginError::Handler { .. }));

    let instance = registry.get("p1").await.unwrap();
    assert_eq!(instance.state, PluginState::Error);
    assert!(instance.error.unwrap().contains("socket closed"));
    assert!(matches!(
        registry.enable("p1").await,
        Err(PluginError::InvalidTransition { from: PluginState::Error, .. })
    ));
}

#[tokio::test]
async fn test_queries_and_statistics() {
    let registry = PluginRegistry::default();
    registry.load(p1()).await.unwrap();
    registry
        .load(
            PluginMetadata::new("p2", "0.3.0")
                .with_capability("tools")
                .with_capability("resources"),
        )
        .await
        .unwrap();
    registry.enable("p2").await.unwrap();

    assert_eq!(registry.by_capability(&PluginCapability::Resources).await.len(), 1);
    assert_eq!(registry.by_state(PluginState::Active).await[0].name(), "p2");

    let stats = registry.statistics().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_state["loaded"], 1);
    assert_eq!(stats.by_state["active"], 1);
    assert_eq!(stats.by_capability["tools"], 2);

    let snapshot = registry.export_configuration().await;
    assert_eq!(snapshot.plugins.len(), 2);
    let json: Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
    assert_eq!(json["plugins"][0]["metadata"]["name"], "p1");
    assert_eq!(json["statistics"]["total"], 2);
}

#[tokio::test]
async fn test_discover_and_load_all() {
    let dir = TempDir::new().unwrap();
    for (plugin, version) in [("alpha", "1.0.0"), ("beta", "bad")] {
        let plugin_dir = dir.path().join(plugin);
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.yaml"),
            format!("name: {}\nversion: {}\ncapabilities: [tools]\n", plugin, version),
        )
        .unwrap();
    }

    let registry = PluginRegistry::default();
    let report = registry.discover(&[dir.path()]);
    assert_eq!(report.found.len(), 1);
    assert_eq!(report.errors.len(), 1);

    let failures = registry.load_all(&report).await;
    assert!(failures.is_empty());

    let alpha = registry.get("alpha").await.unwrap();
    assert_eq!(alpha.source.as_deref(), Some(dir.path().join("alpha").as_path()));
}

#[tokio::test]
async fn test_registry_catalog_serves_only_live_plugins() {
    let registry = Arc::new(PluginRegistry::default());
    let sql = StaticCatalog::new().with_fn(ToolDefinition::new("query", "Run SQL"), |_| async {
        Ok(json!([[1]]))
    });
    let shadow = StaticCatalog::new().with_fn(ToolDefinition::new("query", "Shadowed"), |_| async {
        Ok(json!("shadow"))
    });
    registry.register_handler("a-sql", Arc::new(sql)).await;
    registry.register_handler("b-shadow", Arc::new(shadow)).await;
    registry
        .load(PluginMetadata::new("a-sql", "1.0.0").with_capability("tools"))
        .await
        .unwrap();
    registry
        .load(PluginMetadata::new("b-shadow", "1.0.0").with_capability("tools"))
        .await
        .unwrap();

    let catalog = RegistryCatalog::new(registry.clone());
    let tools = catalog.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].description, "Run SQL");
    assert_eq!(catalog.call_tool("query", json!({})).await.unwrap(), json!([[1]]));

    registry.disable("a-sql").await.unwrap();
    assert_eq!(catalog.call_tool("query", json!({})).await.unwrap(), json!("shadow"));

    registry.disable("b-shadow").await.unwrap();
    assert!(catalog.list_tools().await.unwrap().is_empty());
    assert!(matches!(
        catalog.call_tool("query", json!({})).await,
        Err(ProviderError::UnknownTool(_))
    ));
}
