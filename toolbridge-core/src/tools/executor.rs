//! Tool executor with validation, policy enforcement and caching
//!
//! Every call runs the same pipeline:
//! 1. Catalog lookup (`ToolNotFound` if absent)
//! 2. Schema validation
//! 3. Security policy: deny list, allow list, permissions, rate limit
//! 4. Result cache lookup
//! 5. Provider call. The context timeout and cancellation token bound steps 4
//!    and 5 together, including any wait on an identical in-flight call.
//!
//! Steps 2 through 5 report failures in-band on the [`ExecutionResult`].

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::time::timeout;

use super::cache::ResultCache;
use super::context::ExecutionContext;
use super::definition::{ResourceContent, ResourceDescriptor, ToolDefinition};
use super::provider::{CatalogProvider, ProviderError};
use super::rate_limit::RateLimiter;
use super::result::{ExecutionResult, ToolError};
use super::validation::validate_params;
use crate::config::ExecutorConfig;
use crate::error::{BridgeError, Result};
use crate::events::{EventBus, ExecutorEvent};

/// A requested tool call: a tool name and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Tool name
    pub name: String,

    /// Parameters (an object, or null for none)
    #[serde(default)]
    pub params: Value,
}

impl ToolInvocation {
    /// Create an invocation
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// A tool matched by [`ToolExecutor::find_tools`]
#[derive(Debug, Clone)]
pub struct ToolMatch {
    /// The matching tool
    pub definition: ToolDefinition,

    /// Relevance in `0.0..=1.0`
    pub score: f32,
}

/// Executor counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorStatistics {
    /// Live cache entries
    pub cache_size: usize,

    /// Tools in the current catalog
    pub tool_count: usize,

    /// Resources in the current catalog
    pub resource_count: usize,

    /// Lifetime cache hits
    pub cache_hits: u64,

    /// Lifetime cache misses
    pub cache_misses: u64,

    /// hits / (hits + misses)
    pub hit_rate: f64,

    /// Calls that resolved to a catalog tool
    pub executions: u64,
}

#[derive(Debug, Default)]
struct Catalog {
    tools: Vec<ToolDefinition>,
    resources: Vec<ResourceDescriptor>,
}

/// Validating, policy-enforcing, caching front end to a [`CatalogProvider`]
pub struct ToolExecutor {
    provider: Arc<dyn CatalogProvider>,
    config: ExecutorConfig,
    catalog: RwLock<Catalog>,
    cache: ResultCache,
    rate_limiter: Option<RateLimiter>,
    events: EventBus<ExecutorEvent>,
    executions: AtomicU64,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("config", &self.config)
            .field("executions", &self.executions)
            .finish_non_exhaustive()
    }
}

impl ToolExecutor {
    /// Create an executor and pull the initial catalog from `provider`
    pub async fn new(provider: Arc<dyn CatalogProvider>, config: ExecutorConfig) -> Result<Self> {
        let rate_limiter = config.security.rate_limit.map(RateLimiter::new);
        let executor = Self {
            provider,
            cache: ResultCache::new(config.cache_ttl),
            rate_limiter,
            config,
            catalog: RwLock::new(Catalog::default()),
            events: EventBus::default(),
            executions: AtomicU64::new(0),
        };
        executor.refresh_tool_cache().await?;
        Ok(executor)
    }

    /// Executor configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Underlying provider
    pub fn provider(&self) -> &Arc<dyn CatalogProvider> {
        &self.provider
    }

    /// Context carrying this executor's default timeout
    pub fn default_context(&self) -> ExecutionContext {
        ExecutionContext::new().with_timeout(self.config.default_timeout)
    }

    /// Subscribe to executor events
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.events.subscribe()
    }

    /// Re-pull tool and resource listings from the provider
    pub async fn refresh_tool_cache(&self) -> Result<()> {
        let limit = self.config.default_timeout;
        let tools = timeout(limit, self.provider.list_tools())
            .await
            .map_err(|_| BridgeError::ProviderTimeout(limit))?
            .map_err(|e| BridgeError::Provider(e.to_string()))?;
        let resources = timeout(limit, self.provider.list_resources())
            .await
            .map_err(|_| BridgeError::ProviderTimeout(limit))?
            .map_err(|e| BridgeError::Provider(e.to_string()))?;

        let (tool_count, resource_count) = (tools.len(), resources.len());
        *self.catalog.write().await = Catalog { tools, resources };

        tracing::info!(
            tools = tool_count,
            resources = resource_count,
            "Tool catalog refreshed"
        );
        self.events.emit(ExecutorEvent::CatalogRefreshed {
            tools: tool_count,
            resources: resource_count,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Current tool definitions
    pub async fn tools(&self) -> Vec<ToolDefinition> {
        self.catalog.read().await.tools.clone()
    }

    /// Current resource descriptors
    pub async fn resources(&self) -> Vec<ResourceDescriptor> {
        self.catalog.read().await.resources.clone()
    }

    /// Look up a tool by name
    pub async fn tool(&self, name: &str) -> Option<ToolDefinition> {
        self.catalog
            .read()
            .await
            .tools
            .iter()
            .find(|t| t.name == name)
            .cloned()
    }

    /// Look up a resource by URI
    pub async fn resource(&self, uri: &str) -> Option<ResourceDescriptor> {
        self.catalog
            .read()
            .await
            .resources
            .iter()
            .find(|r| r.uri == uri)
            .cloned()
    }

    /// Rank tools by how well their name and description match `query`
    pub async fn find_tools(&self, query: &str) -> Vec<ToolMatch> {
        let catalog = self.catalog.read().await;
        let mut matches: Vec<ToolMatch> = catalog
            .tools
            .iter()
            .map(|definition| ToolMatch {
                score: match_score(query, definition),
                definition: definition.clone(),
            })
            .filter(|m| m.score > 0.0)
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.definition.name.cmp(&b.definition.name))
        });
        matches
    }

    /// Fetch a resource from the provider, bounded by `limit` (or the default timeout)
    pub async fn read_resource(
        &self,
        uri: &str,
        limit: Option<Duration>,
    ) -> Result<ResourceContent> {
        if self.resource(uri).await.is_none() {
            return Err(BridgeError::ResourceNotFound(uri.to_string()));
        }

        let limit = limit
            .filter(|d| !d.is_zero())
            .unwrap_or(self.config.default_timeout);
        timeout(limit, self.provider.read_resource(uri))
            .await
            .map_err(|_| BridgeError::ProviderTimeout(limit))?
            .map_err(|e| BridgeError::Provider(e.to_string()))
    }

    /// Execute one tool call.
    ///
    /// Fails only when the tool is not in the catalog; every other failure is
    /// reported on the returned result.
    pub async fn execute(
        &self,
        tool_name: &str,
        params: Value,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult> {
        let started_at = Utc::now();
        let definition = self
            .tool(tool_name)
            .await
            .ok_or_else(|| BridgeError::ToolNotFound(tool_name.to_string()))?;

        self.executions.fetch_add(1, Ordering::Relaxed);
        self.events.emit(ExecutorEvent::ExecutionStart {
            tool: tool_name.to_string(),
            session_id: context.session_id.clone(),
            timestamp: started_at,
        });

        let result = self
            .run(&definition, params, context, started_at)
            .await
            .with_session_id(context.session_id.clone());

        tracing::debug!(
            tool = %tool_name,
            success = result.success,
            cached = result.cached,
            duration_ms = result.duration_ms(),
            "Tool execution complete"
        );
        self.events.emit(ExecutorEvent::ExecutionComplete {
            tool: tool_name.to_string(),
            success: result.success,
            cached: result.cached,
            duration_ms: result.duration_ms(),
            timestamp: Utc::now(),
        });

        Ok(result)
    }

    /// Execute calls concurrently. Results are in input order; one failure
    /// never affects the others.
    pub async fn execute_batch(
        &self,
        calls: &[ToolInvocation],
        context: &ExecutionContext,
    ) -> Vec<ExecutionResult> {
        let runs = calls.iter().map(|call| async move {
            let started_at = Utc::now();
            match self.execute(&call.name, call.params.clone(), context).await {
                Ok(result) => result,
                Err(e) => {
                    let error = match e {
                        BridgeError::ToolNotFound(_) => ToolError::not_found(&call.name),
                        other => ToolError::execution_failed(other.to_string()),
                    };
                    ExecutionResult::failure(&call.name, error, started_at)
                        .with_session_id(context.session_id.clone())
                }
            }
        });
        join_all(runs).await
    }

    /// Drop cached results for one tool, or all of them
    pub async fn clear_cache(&self, tool: Option<&str>) {
        self.cache.clear(tool).await;
        tracing::debug!(tool = ?tool, "Result cache cleared");
        self.events.emit(ExecutorEvent::CacheCleared {
            tool: tool.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    /// Current counters
    pub async fn get_statistics(&self) -> ExecutorStatistics {
        let (tool_count, resource_count) = {
            let catalog = self.catalog.read().await;
            (catalog.tools.len(), catalog.resources.len())
        };
        ExecutorStatistics {
            cache_size: self.cache.len().await,
            tool_count,
            resource_count,
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            hit_rate: self.cache.hit_rate(),
            executions: self.executions.load(Ordering::Relaxed),
        }
    }

    async fn run(
        &self,
        definition: &ToolDefinition,
        params: Value,
        context: &ExecutionContext,
        started_at: chrono::DateTime<Utc>,
    ) -> ExecutionResult {
        let name = definition.name.as_str();

        if context.is_cancelled() {
            return ExecutionResult::failure(name, ToolError::cancelled(), started_at);
        }

        if self.config.enable_validation {
            let errors = validate_params(&definition.input_schema, &params);
            if !errors.is_empty() {
                tracing::warn!(tool = %name, errors = errors.len(), "Tool parameters failed validation");
                self.events.emit(ExecutorEvent::ValidationError {
                    tool: name.to_string(),
                    errors: errors.clone(),
                    timestamp: Utc::now(),
                });
                return ExecutionResult::invalid(name, errors, started_at);
            }
        }

        if let Err(error) = self.check_policy(name, context).await {
            tracing::warn!(tool = %name, code = %error.code, "Tool call rejected by policy");
            self.events.emit(ExecutorEvent::SecurityViolation {
                tool: name.to_string(),
                kind: error.kind,
                message: error.message.clone(),
                timestamp: Utc::now(),
            });
            return ExecutionResult::failure(name, error, started_at);
        }

        // The caller's own timeout and token cover the wait on another
        // caller's in-flight computation as well as the provider call
        let (outcome, cached) = if self.config.enable_cache {
            let lookup = self.bounded(name, context, async {
                self.cache
                    .get_or_compute(name, &params, || self.invoke(name, params.clone()))
                    .await
            });
            match lookup.await {
                Ok(lookup) => {
                    if lookup.hit {
                        tracing::debug!(tool = %name, "Cache hit");
                    }
                    (lookup.result, lookup.hit)
                }
                Err(error) => (Err(error), false),
            }
        } else {
            let outcome = self.bounded(name, context, self.invoke(name, params)).await;
            (outcome.and_then(|result| result), false)
        };

        match outcome {
            Ok(value) => ExecutionResult::success(name, value, started_at).with_cached(cached),
            Err(error) => ExecutionResult::failure(name, error, started_at),
        }
    }

    async fn check_policy(
        &self,
        tool: &str,
        context: &ExecutionContext,
    ) -> std::result::Result<(), ToolError> {
        self.config.security.check(tool, &context.permissions)?;

        if let Some(limiter) = &self.rate_limiter {
            limiter
                .try_acquire(tool)
                .await
                .map_err(|retry_after| ToolError::rate_limited(tool, retry_after))?;
        }
        Ok(())
    }

    /// Run `work` under the context timeout and cancellation token
    async fn bounded<T>(
        &self,
        tool: &str,
        context: &ExecutionContext,
        work: impl Future<Output = T>,
    ) -> std::result::Result<T, ToolError> {
        let limit = context.timeout;
        let call = timeout(limit, work);

        let outcome = match &context.cancellation {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(ToolError::cancelled()),
                    res = call => res,
                }
            }
            None => call.await,
        };

        outcome.map_err(|_| {
            tracing::warn!(tool = %tool, timeout_ms = limit.as_millis() as u64, "Tool call timed out");
            ToolError::timeout(limit)
        })
    }

    async fn invoke(&self, tool: &str, params: Value) -> std::result::Result<Value, ToolError> {
        match self.provider.call_tool(tool, params).await {
            Ok(value) => Ok(value),
            // Catalog snapshot is stale: the provider no longer has the tool
            Err(ProviderError::UnknownTool(_)) => Err(ToolError::not_found(tool)),
            Err(e) => Err(ToolError::execution_failed(e.to_string())),
        }
    }
}

/// Substring relevance of a tool to a free-text query
fn match_score(query: &str, definition: &ToolDefinition) -> f32 {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return 0.0;
    }

    let name = definition.name.to_lowercase();
    if name == query {
        return 1.0;
    }

    let description = definition.description.to_lowercase();
    let mut score = 0.0f32;
    if name.contains(&query) {
        score = score.max(0.9);
    }
    if description.contains(&query) {
        score = score.max(0.7);
    }

    let words: Vec<&str> = query.split_whitespace().collect();
    let hits = words
        .iter()
        .filter(|w| w.len() > 2 && (description.contains(*w) || name.contains(*w)))
        .count();
    if !words.is_empty() {
        score = score.max(hits as f32 / words.len() as f32 * 0.6);
    }

    score
}
