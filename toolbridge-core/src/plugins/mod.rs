//! Plugin discovery and lifecycle management
//!
//! Plugins are named, versioned bundles of tools and resources. The registry
//! never executes code from disk: a descriptor only names a plugin, and its
//! tools are served by a [`CatalogProvider`](crate::tools::CatalogProvider)
//! handler bound in-process with [`PluginRegistry::register_handler`].
//!
//! # Example
//!
//! ```rust,ignore
//! use toolbridge_core::plugins::{PluginMetadata, PluginRegistry, RegistryCatalog};
//!
//! let registry = Arc::new(PluginRegistry::default());
//! registry.register_handler("sqlite", Arc::new(sqlite_tools)).await;
//! registry
//!     .load(PluginMetadata::new("sqlite", "1.0.0").with_capability("tools"))
//!     .await?;
//! registry.enable("sqlite").await?;
//!
//! let executor = ToolExecutor::new(Arc::new(RegistryCatalog::new(registry)), config).await?;
//! ```

mod catalog;
mod descriptor;
mod error;
mod metadata;
mod registry;

pub use catalog::RegistryCatalog;
pub use descriptor::{
    DEFAULT_DESCRIPTOR_FILES, DiscoveredPlugin, DiscoveryError, DiscoveryReport, discover,
    parse_descriptor, read_descriptor,
};
pub use error::PluginError;
pub use metadata::{
    PluginCapability, PluginInstance, PluginMetadata, PluginState, is_valid_plugin_name,
    is_valid_semver,
};
pub use registry::{PluginRegistry, RegistrySnapshot, RegistryStatistics};

#[cfg(test)]
mod tests;
