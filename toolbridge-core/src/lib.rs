//! # Toolbridge - Tool orchestration for LLM applications
//!
//! Toolbridge sits between a language model and the tools it may call:
//! - Plugin discovery and lifecycle management with validated metadata
//! - A tool executor with schema validation, security policy, rate limiting
//!   and a TTL result cache
//! - An LLM-tool bridge that runs the model, executes the `[TOOL_CALL]` blocks
//!   it writes and feeds results back, in complete or streaming mode
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use toolbridge_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ToolbridgeConfig::load()?;
//!
//!     let registry = Arc::new(PluginRegistry::new(config.plugins.clone()));
//!     let report = registry.discover_configured();
//!     registry.load_all(&report).await;
//!
//!     let catalog = Arc::new(RegistryCatalog::new(registry.clone()));
//!     let executor = Arc::new(ToolExecutor::new(catalog, config.executor.clone()).await?);
//!
//!     let llm: Arc<dyn LLMProvider> = Arc::new(StubLLMProvider);
//!     let bridge = LlmToolBridge::new(executor, llm, config.bridge.clone()).await;
//!
//!     let response = bridge.generate(GenerateOptions::new("List the tables")).await?;
//!     println!("{}", response.content);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **plugins**: registry of named, versioned plugins and their state machine
//! - **tools**: catalog provider trait and the execution pipeline
//! - **bridge**: prompt assembly, tool-call parsing and the conversation loop
//! - **llm**: the provider trait implemented by model clients
//! - **events**: broadcast channels for registry, executor and bridge events

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod plugins;
pub mod tools;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::{
        BridgeResponse, BridgeStatistics, BridgeStream, ConversationContext, ConversationTurn,
        GenerateOptions, LlmToolBridge, StreamEvent, ToolCallRecord, ToolCallScanner,
        extract_tool_calls, strip_tool_calls,
    };
    pub use crate::config::{
        BridgeConfig, ConfigBuilder, ExecutorConfig, PluginConfig, ToolbridgeConfig,
    };
    pub use crate::error::{BridgeError, Result};
    pub use crate::events::{BridgeEvent, EventBus, ExecutorEvent, PluginEvent};
    pub use crate::llm::{
        LLMProvider, LLMRequest, LLMResponse, LLMStream, Message, MessageRole, ModelInfo,
        StubLLMProvider, TokenUsage,
    };
    pub use crate::logging::{init_tracing, try_init_tracing};
    pub use crate::plugins::{
        DiscoveryReport, PluginCapability, PluginError, PluginInstance, PluginMetadata,
        PluginRegistry, PluginState, RegistryCatalog,
    };
    pub use crate::tools::{
        CatalogProvider, ExecutionContext, ExecutionResult, ExecutorStatistics, ParamType,
        PermissionSet, PropertySchema, ProviderError, ResourceContent, ResourceDescriptor,
        SecurityPolicy, StaticCatalog, ToolDefinition, ToolError, ToolErrorKind, ToolExecutor,
        ToolHandler, ToolInvocation, ToolSchema, ValidationError,
    };
}
