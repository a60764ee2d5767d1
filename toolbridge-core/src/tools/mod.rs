//! Tool catalog and policy-enforcing executor
//!
//! Key pieces:
//! - [`CatalogProvider`]: source of tool definitions, resources and their implementations
//! - [`ToolExecutor`]: validates, polices, caches and runs tool calls
//! - [`SecurityPolicy`]: allow/deny lists, permission requirements and a rate limit
//! - [`ExecutionResult`]: in-band result envelope with structured [`ToolError`]s
//!
//! # Example
//!
//! ```rust,ignore
//! use toolbridge_core::config::ExecutorConfig;
//! use toolbridge_core::tools::{ExecutionContext, SecurityPolicy, StaticCatalog, ToolExecutor};
//!
//! let config = ExecutorConfig::default()
//!     .with_security(SecurityPolicy::permissive().deny("drop-table"));
//! let executor = ToolExecutor::new(Arc::new(catalog), config).await?;
//!
//! let result = executor.execute("query", json!({"sql": "select 1"}), &ExecutionContext::new()).await?;
//! assert!(result.success);
//! ```

mod cache;
mod context;
mod definition;
mod executor;
mod policy;
mod provider;
mod rate_limit;
mod result;
pub mod validation;

pub use cache::{CacheLookup, ResultCache, cache_key};
pub use context::{DEFAULT_CALL_TIMEOUT, ExecutionContext};
pub use definition::{
    ParamType, PropertySchema, ResourceContent, ResourceDescriptor, ToolDefinition, ToolSchema,
};
pub use executor::{ExecutorStatistics, ToolExecutor, ToolInvocation, ToolMatch};
pub use policy::{PermissionSet, RateLimitSpec, SecurityPolicy};
pub use provider::{CatalogProvider, ProviderError, StaticCatalog, ToolHandler};
pub use rate_limit::RateLimiter;
pub use result::{ExecutionResult, ToolError, ToolErrorKind, ValidationError};
pub use validation::validate_params;
