//! Registry-backed tool catalog
//!
//! Exposes the tools and resources of every LOADED or ACTIVE plugin that has
//! a handler, so a [`crate::tools::ToolExecutor`] can run on top of the
//! registry directly. Plugins are visited in name order and the first plugin
//! to declare a tool name or resource URI owns it.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use super::registry::PluginRegistry;
use crate::tools::{
    CatalogProvider, ProviderError, ResourceContent, ResourceDescriptor, ToolDefinition,
};

/// [`CatalogProvider`] over the serving plugins of a registry
#[derive(Debug, Clone)]
pub struct RegistryCatalog {
    registry: Arc<PluginRegistry>,
}

impl RegistryCatalog {
    pub fn new(registry: Arc<PluginRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying registry
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    async fn serving_handlers(&self) -> Vec<(String, Arc<dyn CatalogProvider>)> {
        self.registry
            .list()
            .await
            .into_iter()
            .filter(|p| p.state.is_serving())
            .filter_map(|p| {
                let handler = p.handler()?.clone();
                Some((p.metadata.name, handler))
            })
            .collect()
    }

    async fn tool_owner(&self, name: &str) -> Result<Arc<dyn CatalogProvider>, ProviderError> {
        for (_, handler) in self.serving_handlers().await {
            let tools = handler.list_tools().await?;
            if tools.iter().any(|t| t.name == name) {
                return Ok(handler);
            }
        }
        Err(ProviderError::UnknownTool(name.to_string()))
    }

    async fn resource_owner(&self, uri: &str) -> Result<Arc<dyn CatalogProvider>, ProviderError> {
        for (_, handler) in self.serving_handlers().await {
            let resources = handler.list_resources().await?;
            if resources.iter().any(|r| r.uri == uri) {
                return Ok(handler);
            }
        }
        Err(ProviderError::UnknownResource(uri.to_string()))
    }
}

#[async_trait]
impl CatalogProvider for RegistryCatalog {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ProviderError> {
        let mut seen = HashSet::new();
        let mut tools = Vec::new();
        for (plugin, handler) in self.serving_handlers().await {
            for tool in handler.list_tools().await? {
                if seen.insert(tool.name.clone()) {
                    tools.push(tool);
                } else {
                    tracing::debug!(plugin = %plugin, tool = %tool.name, "Tool name already provided by another plugin");
                }
            }
        }
        Ok(tools)
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        let mut seen = HashSet::new();
        let mut resources = Vec::new();
        for (_, handler) in self.serving_handlers().await {
            for resource in handler.list_resources().await? {
                if seen.insert(resource.uri.clone()) {
                    resources.push(resource);
                }
            }
        }
        Ok(resources)
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<Value, ProviderError> {
        self.tool_owner(name).await?.call_tool(name, params).await
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ProviderError> {
        self.resource_owner(uri).await?.read_resource(uri).await
    }
}
