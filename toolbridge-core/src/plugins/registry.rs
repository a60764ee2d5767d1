//! Plugin registry: validation, lifecycle and queries
//!
//! # Lifecycle
//!
//! ```text
//! load:    UNLOADED -> LOADING -> LOADED   (or ERROR if the handler probe fails)
//! enable:  LOADED | DISABLED -> ACTIVE
//! disable: LOADED | ACTIVE   -> DISABLED
//! reload:  any -> (unload) -> load with the same metadata
//! unload:  any -> removed
//! ```
//!
//! Transitions for one plugin name are serialized by a per-name async lock;
//! transitions for different names run independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, broadcast};

use super::descriptor::{DiscoveredPlugin, DiscoveryReport, discover};
use super::error::PluginError;
use super::metadata::{PluginCapability, PluginInstance, PluginMetadata, PluginState};
use crate::config::PluginConfig;
use crate::events::{EventBus, PluginEvent};
use crate::tools::CatalogProvider;

/// Counts by state and by capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total: usize,
    pub by_state: BTreeMap<String, usize>,
    pub by_capability: BTreeMap<String, usize>,
}

/// Serializable snapshot of the whole registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub exported_at: DateTime<Utc>,
    pub plugins: Vec<PluginInstance>,
    pub statistics: RegistryStatistics,
}

impl RegistrySnapshot {
    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Registry of plugins and their lifecycle
pub struct PluginRegistry {
    config: PluginConfig,
    plugins: RwLock<BTreeMap<String, PluginInstance>>,
    handlers: RwLock<HashMap<String, Arc<dyn CatalogProvider>>>,
    transitions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    events: EventBus<PluginEvent>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(PluginConfig::default())
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new(config: PluginConfig) -> Self {
        Self {
            config,
            plugins: RwLock::new(BTreeMap::new()),
            handlers: RwLock::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
            events: EventBus::default(),
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    /// Bind the tool/resource handler for a plugin name.
    ///
    /// Takes effect on the next `load`/`reload` of that name.
    pub async fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn CatalogProvider>) {
        self.handlers.write().await.insert(name.into(), handler);
    }

    /// Scan `paths` for plugin descriptors
    pub fn discover<P: AsRef<std::path::Path>>(&self, paths: &[P]) -> DiscoveryReport {
        discover(paths, &self.config.descriptor_files)
    }

    /// Scan the configured search paths
    pub fn discover_configured(&self) -> DiscoveryReport {
        self.discover(&self.config.search_paths)
    }

    /// Validate and register a plugin
    pub async fn load(&self, metadata: PluginMetadata) -> Result<(), PluginError> {
        self.load_with_source(metadata, None).await
    }

    /// Load a discovered plugin, remembering its directory
    pub async fn load_discovered(&self, plugin: DiscoveredPlugin) -> Result<(), PluginError> {
        self.load_with_source(plugin.metadata, Some(plugin.directory))
            .await
    }

    /// Load every discovered plugin. Returns the failures; successes are registered.
    pub async fn load_all(&self, report: &DiscoveryReport) -> Vec<(String, PluginError)> {
        let mut failures = Vec::new();
        for plugin in &report.found {
            let name = plugin.metadata.name.clone();
            if let Err(e) = self.load_discovered(plugin.clone()).await {
                failures.push((name, e));
            }
        }
        failures
    }

    async fn load_with_source(
        &self,
        metadata: PluginMetadata,
        source: Option<PathBuf>,
    ) -> Result<(), PluginError> {
        if let Err(e) = metadata.validate() {
            self.emit_error(&metadata.name, &e);
            return Err(e);
        }

        let _guard = self.lock_name(&metadata.name).await;
        self.load_locked(metadata, source).await
    }

    async fn load_locked(
        &self,
        metadata: PluginMetadata,
        source: Option<PathBuf>,
    ) -> Result<(), PluginError> {
        let name = metadata.name.clone();
        let version = metadata.version.clone();

        {
            let mut plugins = self.plugins.write().await;
            if plugins.contains_key(&name) {
                drop(plugins);
                let e = PluginError::DuplicateName(name.clone());
                self.emit_error(&name, &e);
                return Err(e);
            }
            let mut instance = PluginInstance::new(metadata, source);
            instance.state = PluginState::Loading;
            plugins.insert(name.clone(), instance);
        }
        self.emit_state_change(&name, PluginState::Unloaded, PluginState::Loading);

        let handler = self.handlers.read().await.get(&name).cloned();
        let limit = self.config.load_timeout;
        let probe = match &handler {
            Some(handler) => match tokio::time::timeout(limit, handler.list_tools()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("catalog probe timed out after {:?}", limit)),
            },
            None => Ok(()),
        };

        let mut plugins = self.plugins.write().await;
        let Some(instance) = plugins.get_mut(&name) else {
            return Err(PluginError::PluginNotFound(name));
        };

        match probe {
            Ok(()) => {
                instance.state = PluginState::Loaded;
                instance.handler = handler;
                instance.loaded_at = Utc::now();
                instance.error = None;
                drop(plugins);

                self.emit_state_change(&name, PluginState::Loading, PluginState::Loaded);
                self.events.emit(PluginEvent::Loaded {
                    name: name.clone(),
                    version: version.clone(),
                    timestamp: Utc::now(),
                });
                tracing::info!(plugin = %name, version = %version, "Plugin loaded");
                Ok(())
            }
            Err(message) => {
                instance.state = PluginState::Error;
                instance.error = Some(message.clone());
                drop(plugins);

                self.emit_state_change(&name, PluginState::Loading, PluginState::Error);
                let e = PluginError::Handler {
                    name: name.clone(),
                    message,
                };
                self.emit_error(&name, &e);
                Err(e)
            }
        }
    }

    /// Remove a plugin from the registry
    pub async fn unload(&self, name: &str) -> Result<PluginInstance, PluginError> {
        let _guard = self.lock_name(name).await;
        self.unload_locked(name).await
    }

    async fn unload_locked(&self, name: &str) -> Result<PluginInstance, PluginError> {
        let removed = self
            .plugins
            .write()
            .await
            .remove(name)
            .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;

        self.events.emit(PluginEvent::Unloaded {
            name: name.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!(plugin = %name, "Plugin unloaded");
        Ok(removed)
    }

    /// Activate a loaded or disabled plugin
    pub async fn enable(&self, name: &str) -> Result<(), PluginError> {
        self.transition(name, &[PluginState::Loaded, PluginState::Disabled], PluginState::Active)
            .await
    }

    /// Disable a loaded or active plugin
    pub async fn disable(&self, name: &str) -> Result<(), PluginError> {
        self.transition(name, &[PluginState::Loaded, PluginState::Active], PluginState::Disabled)
            .await
    }

    /// Unload and load again with the original metadata. Resets the load timestamp.
    pub async fn reload(&self, name: &str) -> Result<(), PluginError> {
        let _guard = self.lock_name(name).await;
        let previous = self.unload_locked(name).await?;
        self.load_locked(previous.metadata, previous.source).await
    }

    async fn transition(
        &self,
        name: &str,
        allowed_from: &[PluginState],
        to: PluginState,
    ) -> Result<(), PluginError> {
        let _guard = self.lock_name(name).await;

        let from = {
            let mut plugins = self.plugins.write().await;
            let instance = plugins
                .get_mut(name)
                .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;

            let from = instance.state;
            if !allowed_from.contains(&from) {
                return Err(PluginError::InvalidTransition {
                    name: name.to_string(),
                    from,
                    to,
                });
            }
            instance.state = to;
            from
        };

        self.emit_state_change(name, from, to);
        tracing::info!(plugin = %name, from = %from, to = %to, "Plugin state changed");
        Ok(())
    }

    /// Get a plugin by name
    pub async fn get(&self, name: &str) -> Option<PluginInstance> {
        self.plugins.read().await.get(name).cloned()
    }

    /// Current state of a plugin
    pub async fn state(&self, name: &str) -> Option<PluginState> {
        self.plugins.read().await.get(name).map(|p| p.state)
    }

    /// All plugins, ordered by name
    pub async fn list(&self) -> Vec<PluginInstance> {
        self.plugins.read().await.values().cloned().collect()
    }

    /// Plugins declaring `capability`
    pub async fn by_capability(&self, capability: &PluginCapability) -> Vec<PluginInstance> {
        self.plugins
            .read()
            .await
            .values()
            .filter(|p| p.metadata.has_capability(capability))
            .cloned()
            .collect()
    }

    /// Plugins in `state`
    pub async fn by_state(&self, state: PluginState) -> Vec<PluginInstance> {
        self.plugins
            .read()
            .await
            .values()
            .filter(|p| p.state == state)
            .cloned()
            .collect()
    }

    /// Number of registered plugins
    pub async fn len(&self) -> usize {
        self.plugins.read().await.len()
    }

    /// Whether no plugins are registered
    pub async fn is_empty(&self) -> bool {
        self.plugins.read().await.is_empty()
    }

    /// Counts by state and capability
    pub async fn statistics(&self) -> RegistryStatistics {
        let plugins = self.plugins.read().await;
        compute_statistics(plugins.values())
    }

    /// Snapshot of every instance plus statistics
    pub async fn export_configuration(&self) -> RegistrySnapshot {
        let plugins = self.plugins.read().await;
        RegistrySnapshot {
            exported_at: Utc::now(),
            statistics: compute_statistics(plugins.values()),
            plugins: plugins.values().cloned().collect(),
        }
    }

    async fn lock_name(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut transitions = self.transitions.lock().await;
            transitions
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    fn emit_state_change(&self, name: &str, from: PluginState, to: PluginState) {
        self.events.emit(PluginEvent::StateChange {
            name: name.to_string(),
            from,
            to,
            timestamp: Utc::now(),
        });
    }

    fn emit_error(&self, name: &str, error: &PluginError) {
        tracing::warn!(plugin = %name, error = %error, "Plugin error");
        self.events.emit(PluginEvent::Error {
            name: name.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

fn compute_statistics<'a>(plugins: impl Iterator<Item = &'a PluginInstance>) -> RegistryStatistics {
    let mut stats = RegistryStatistics::default();
    for plugin in plugins {
        stats.total += 1;
        *stats
            .by_state
            .entry(plugin.state.as_str().to_string())
            .or_default() += 1;
        for capability in &plugin.metadata.capabilities {
            *stats
                .by_capability
                .entry(capability.as_str().to_string())
                .or_default() += 1;
        }
    }
    stats
}
