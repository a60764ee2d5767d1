//! Tool and resource providers
//!
//! A [`CatalogProvider`] is the external collaborator that owns the actual tool
//! implementations: an MCP-style protocol client, the plugin registry, or an
//! in-process [`StaticCatalog`]. The executor only sees the catalog through
//! this trait.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::definition::{ResourceContent, ResourceDescriptor, ToolDefinition};

/// Failure reported by a provider
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The provider does not know the tool
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The provider does not know the resource
    #[error("Unknown resource: {0}")]
    UnknownResource(String),

    /// The tool ran and failed
    #[error("{0}")]
    Failed(String),

    /// The provider could not be reached
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Create a generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        ProviderError::Failed(message.into())
    }
}

/// Source of tool definitions, resources, and their implementations
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    /// Current tool definitions
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ProviderError>;

    /// Current resource descriptors
    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError>;

    /// Invoke a tool by name
    async fn call_tool(&self, name: &str, params: Value) -> Result<Value, ProviderError>;

    /// Fetch a resource by URI
    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ProviderError>;
}

/// In-process tool implementation
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already-validated parameters
    async fn handle(&self, params: Value) -> Result<Value, ProviderError>;
}

type BoxedHandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ProviderError>> + Send>>;

struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> BoxedHandlerFuture + Send + Sync,
{
    async fn handle(&self, params: Value) -> Result<Value, ProviderError> {
        (self.0)(params).await
    }
}

/// Catalog of in-process tools and static resources
#[derive(Clone, Default)]
pub struct StaticCatalog {
    tools: BTreeMap<String, (ToolDefinition, Arc<dyn ToolHandler>)>,
    resources: BTreeMap<String, (ResourceDescriptor, ResourceContent)>,
}

impl StaticCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool backed by a handler. A tool with the same name is replaced.
    pub fn with_tool(mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools
            .insert(definition.name.clone(), (definition, handler));
        self
    }

    /// Add a tool backed by an async closure
    pub fn with_fn<F, Fut>(self, definition: ToolDefinition, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ProviderError>> + Send + 'static,
    {
        let handler = FnHandler(move |params| Box::pin(f(params)) as BoxedHandlerFuture);
        self.with_tool(definition, Arc::new(handler))
    }

    /// Add a static text resource
    pub fn with_resource(mut self, descriptor: ResourceDescriptor, text: impl Into<String>) -> Self {
        let mut content = ResourceContent::text(descriptor.uri.clone(), text);
        if let Some(mime) = &descriptor.mime_type {
            content = content.with_mime_type(mime.clone());
        }
        self.resources
            .insert(descriptor.uri.clone(), (descriptor, content));
        self
    }

    /// Number of tools
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Number of resources
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}

impl std::fmt::Debug for StaticCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCatalog")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalog {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, ProviderError> {
        Ok(self.tools.values().map(|(def, _)| def.clone()).collect())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceDescriptor>, ProviderError> {
        Ok(self.resources.values().map(|(desc, _)| desc.clone()).collect())
    }

    async fn call_tool(&self, name: &str, params: Value) -> Result<Value, ProviderError> {
        let (_, handler) = self
            .tools
            .get(name)
            .ok_or_else(|| ProviderError::UnknownTool(name.to_string()))?;
        handler.handle(params).await
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ProviderError> {
        self.resources
            .get(uri)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| ProviderError::UnknownResource(uri.to_string()))
    }
}
