//! Error types for Toolbridge operations
//!
//! Only hard failures live here: a rejected tool or resource lookup, a plugin
//! that failed validation, or an LLM provider that errored. Failures local to
//! one tool invocation travel in-band on [`crate::tools::ExecutionResult`].

use std::time::Duration;

use crate::plugins::PluginError;

/// Result type for Toolbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error types for the Toolbridge core
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Plugin lifecycle or validation failure
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// Tool is not present in the current catalog
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Resource URI is not present in the current catalog
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The LLM provider returned an error
    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    /// The LLM provider did not answer in time
    #[error("LLM provider timed out after {0:?}")]
    LlmTimeout(Duration),

    /// The tool/resource provider failed outside of a tool invocation
    #[error("Provider error: {0}")]
    Provider(String),

    /// The tool/resource provider did not answer in time
    #[error("Provider timed out after {0:?}")]
    ProviderTimeout(Duration),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the error originated at the LLM provider
    pub fn is_llm_failure(&self) -> bool {
        matches!(self, BridgeError::LlmProvider(_) | BridgeError::LlmTimeout(_))
    }
}
