//! LLM-tool conversation loop
//!
//! [`LlmToolBridge::generate`] calls the model, runs every tool-call block in
//! its output through the [`ToolExecutor`], feeds the results back as a tool
//! turn and repeats until the model stops calling tools or a limit is hit.
//! [`LlmToolBridge::generate_stream`] does the same over incremental output.
//! Conversation history is committed only once a generation completes.

use chrono::Utc;
use futures::future::join_all;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::context::{ConversationContext, ConversationTurn};
use super::prompt::build_system_prompt;
use super::protocol::{
    TOOL_CALL_CLOSE, TOOL_CALL_OPEN, parse_output, parse_tool_call, render_tool_results,
};
use super::stream::{ScanEvent, ToolCallScanner};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::events::{BridgeEvent, EventBus};
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, Message, MessageRole, TokenUsage};
use crate::tools::{
    ExecutionContext, ExecutionResult, ExecutorStatistics, PermissionSet, ResourceContent,
    ToolError, ToolExecutor, ToolInvocation,
};

const STREAM_BUFFER: usize = 64;

/// Per-call options. Unset limits fall back to [`BridgeConfig`].
///
/// ```rust,ignore
/// let options = GenerateOptions::new("Summarize the schema")
///     .with_max_iterations(3)
///     .with_permissions(PermissionSet::new().with("db:read"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// User message for this turn
    pub prompt: String,

    /// Replaces `BridgeConfig::system_prompt` for this call
    pub system_prompt: Option<String>,

    /// Whether to advertise and execute tools
    pub enable_tools: Option<bool>,

    /// Model round trips before the loop stops. Values below 1 count as 1.
    pub max_iterations: Option<usize>,

    /// Tool calls allowed across the whole generation
    pub max_tool_calls: Option<usize>,

    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,

    /// Permissions granted to tool calls made during this generation
    pub permissions: PermissionSet,

    /// Per tool call timeout, capped by `BridgeConfig::tool_call_timeout`
    pub timeout: Option<Duration>,
}

impl GenerateOptions {
    /// Options for `prompt` with every limit taken from the config
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set system prompt
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Turn tool use on or off
    pub fn with_tools(mut self, enabled: bool) -> Self {
        self.enable_tools = Some(enabled);
        self
    }

    /// Set iteration limit
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    /// Set tool call budget
    pub fn with_max_tool_calls(mut self, max_tool_calls: usize) -> Self {
        self.max_tool_calls = Some(max_tool_calls);
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Grant permissions to this generation's tool calls
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set per tool call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One tool call issued during a generation, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub params: Value,

    /// 1-based iteration that issued the call
    pub iteration: usize,

    pub result: ExecutionResult,
}

impl ToolCallRecord {
    pub fn succeeded(&self) -> bool {
        self.result.success
    }
}

/// Outcome of a generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeResponse {
    /// Final model output with tool-call blocks removed
    pub content: String,

    /// Number of model calls made
    pub iterations: usize,

    /// Every issued call in order
    pub tool_calls: Vec<ToolCallRecord>,

    /// Summed usage reported by the provider
    pub usage: TokenUsage,
}

/// Item of a [`BridgeStream`]
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Visible model output
    Text(String),
    /// A tool call finished
    ToolCall(ToolCallRecord),
    /// The generation completed; always the last event
    Done(BridgeResponse),
}

/// Streaming generation handle.
///
/// Dropping the stream cancels the generation.
pub struct BridgeStream {
    inner: ReceiverStream<Result<StreamEvent>>,
    cancel: CancellationToken,
}

impl BridgeStream {
    fn new(rx: mpsc::Receiver<Result<StreamEvent>>, cancel: CancellationToken) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            cancel,
        }
    }

    /// Token that stops the generation when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Stream for BridgeStream {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for BridgeStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Bridge counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatistics {
    pub generations: u64,
    pub tool_calls: u64,
    pub resource_accesses: u64,
    pub cached_resources: usize,
    pub history_turns: usize,
    pub executor: ExecutorStatistics,
}

/// Drives the model-tool loop for one conversation
#[derive(Clone)]
pub struct LlmToolBridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    executor: Arc<ToolExecutor>,
    llm: Arc<dyn LLMProvider>,
    config: BridgeConfig,
    context: RwLock<ConversationContext>,
    resource_cache: RwLock<HashMap<String, ResourceContent>>,
    events: EventBus<BridgeEvent>,
    generations: AtomicU64,
    tool_calls: AtomicU64,
    resource_accesses: AtomicU64,
}

/// Settings resolved for one generation
struct Plan {
    system_prompt: Option<String>,
    history: Vec<Message>,
    enable_tools: bool,
    max_iterations: usize,
    max_tool_calls: usize,
    temperature: Option<f32>,
    max_tokens: Option<usize>,
    tool_context: ExecutionContext,
}

impl Plan {
    fn request(&self, turns: &[ConversationTurn]) -> LLMRequest {
        let mut messages = Vec::with_capacity(self.history.len() + turns.len() + 1);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.extend(turns.iter().map(Message::from));

        LLMRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stop_sequences: Vec::new(),
        }
    }
}

impl std::fmt::Debug for LlmToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmToolBridge")
            .field("config", &self.inner.config)
            .field("model", &self.inner.llm.model_info())
            .finish_non_exhaustive()
    }
}

impl LlmToolBridge {
    /// Create a bridge with a fresh conversation and the executor's current catalog
    pub async fn new(
        executor: Arc<ToolExecutor>,
        llm: Arc<dyn LLMProvider>,
        config: BridgeConfig,
    ) -> Self {
        let mut context = ConversationContext::default();
        context.set_catalog(executor.tools().await, executor.resources().await);

        Self {
            inner: Arc::new(BridgeInner {
                executor,
                llm,
                config,
                context: RwLock::new(context),
                resource_cache: RwLock::new(HashMap::new()),
                events: EventBus::default(),
                generations: AtomicU64::new(0),
                tool_calls: AtomicU64::new(0),
                resource_accesses: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.inner.executor
    }

    /// Subscribe to bridge events
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.inner.events.subscribe()
    }

    /// Run a full generation.
    ///
    /// Provider failures abort the generation; tool failures are recorded and
    /// fed back to the model.
    pub async fn generate(&self, options: GenerateOptions) -> Result<BridgeResponse> {
        self.inner.generate(options).await
    }

    /// Run a generation over streamed model output.
    ///
    /// Must be called within a tokio runtime. Provider failures arrive as an
    /// `Err` item and end the stream.
    pub fn generate_stream(&self, options: GenerateOptions) -> BridgeStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let cancel = CancellationToken::new();

        let inner = self.inner.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            match inner.stream_generation(options, &tx, &token).await {
                Ok(response) => {
                    let _ = tx.send(Ok(StreamEvent::Done(response))).await;
                }
                Err(BridgeError::Cancelled) => {
                    tracing::debug!("Streaming generation cancelled");
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        BridgeStream::new(rx, cancel)
    }

    /// Read a resource, serving repeats from the bridge's resource cache
    pub async fn access_resource(&self, uri: &str) -> Result<ResourceContent> {
        let inner = &self.inner;
        let cached = inner.resource_cache.read().await.get(uri).cloned();
        let (content, cached) = match cached {
            Some(content) => (content, true),
            None => {
                let content = inner.executor.read_resource(uri, None).await?;
                inner
                    .resource_cache
                    .write()
                    .await
                    .insert(uri.to_string(), content.clone());
                (content, false)
            }
        };

        inner.resource_accesses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(uri = %uri, cached, "Resource accessed");
        inner.events.emit(BridgeEvent::ResourceAccess {
            uri: uri.to_string(),
            cached,
            timestamp: Utc::now(),
        });
        Ok(content)
    }

    /// Call one tool directly with the conversation's session, the
    /// configured tool timeout and no permissions
    pub async fn execute_tool_call(&self, name: &str, params: Value) -> Result<ExecutionResult> {
        self.execute_tool_call_with(name, params, PermissionSet::new())
            .await
    }

    /// Like [`execute_tool_call`](Self::execute_tool_call), granting `permissions`
    pub async fn execute_tool_call_with(
        &self,
        name: &str,
        params: Value,
        permissions: PermissionSet,
    ) -> Result<ExecutionResult> {
        let session_id = self.inner.context.read().await.session_id.clone();
        let context = ExecutionContext::new()
            .with_session_id(session_id)
            .with_permissions(permissions)
            .with_timeout(self.inner.config.tool_call_timeout);
        self.inner.executor.execute(name, params, &context).await
    }

    pub async fn get_statistics(&self) -> BridgeStatistics {
        let inner = &self.inner;
        BridgeStatistics {
            generations: inner.generations.load(Ordering::Relaxed),
            tool_calls: inner.tool_calls.load(Ordering::Relaxed),
            resource_accesses: inner.resource_accesses.load(Ordering::Relaxed),
            cached_resources: inner.resource_cache.read().await.len(),
            history_turns: inner.context.read().await.turns.len(),
            executor: inner.executor.get_statistics().await,
        }
    }

    /// Snapshot of the conversation
    pub async fn get_context(&self) -> ConversationContext {
        self.inner.context.read().await.clone()
    }

    /// Merge `patch` into the conversation metadata
    pub async fn update_context(&self, patch: Value) {
        self.inner.context.write().await.update_metadata(patch);
    }

    /// Forget the turn history. Cached resources and results are kept.
    pub async fn clear_history(&self) {
        self.inner.context.write().await.clear_history();
    }

    /// Re-pull the catalog and update the conversation snapshot
    pub async fn refresh(&self) -> Result<()> {
        let executor = &self.inner.executor;
        executor.refresh_tool_cache().await?;
        let (tools, resources) = (executor.tools().await, executor.resources().await);
        self.inner.context.write().await.set_catalog(tools, resources);
        Ok(())
    }

    /// Clear the resource cache and the executor's result cache
    pub async fn clear_cache(&self) {
        self.inner.resource_cache.write().await.clear();
        self.inner.executor.clear_cache(None).await;
    }
}

impl BridgeInner {
    async fn plan(&self, options: &GenerateOptions) -> Plan {
        let context = self.context.read().await;
        let config = &self.config;

        let enable_tools = options.enable_tools.unwrap_or(config.enable_tools);
        let base_prompt = options
            .system_prompt
            .as_deref()
            .or(config.system_prompt.as_deref());
        let tool_timeout = options
            .timeout
            .filter(|t| !t.is_zero())
            .map_or(config.tool_call_timeout, |t| t.min(config.tool_call_timeout));

        Plan {
            system_prompt: build_system_prompt(
                base_prompt,
                enable_tools,
                &context.tools,
                &context.resources,
            ),
            history: context.to_messages(),
            enable_tools,
            max_iterations: options.max_iterations.unwrap_or(config.max_iterations).max(1),
            max_tool_calls: options.max_tool_calls.unwrap_or(config.max_tool_calls),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            tool_context: ExecutionContext::new()
                .with_session_id(context.session_id.clone())
                .with_permissions(options.permissions.clone())
                .with_timeout(tool_timeout),
        }
    }

    async fn generate(&self, options: GenerateOptions) -> Result<BridgeResponse> {
        let plan = self.plan(&options).await;
        self.generations.fetch_add(1, Ordering::Relaxed);

        let mut turns = vec![ConversationTurn::new(MessageRole::User, options.prompt)];
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut usage = TokenUsage::default();
        let mut iterations = 0;

        let content = loop {
            iterations += 1;
            let response = self.call_llm(&plan.request(&turns)).await?;
            if let Some(turn_usage) = &response.usage {
                usage.add(turn_usage);
            }

            let parsed = parse_output(&response.content);
            turns.push(ConversationTurn::new(MessageRole::Assistant, response.content));

            let remaining = plan.max_tool_calls.saturating_sub(records.len());
            if !plan.enable_tools || parsed.calls.is_empty() || remaining == 0 {
                break parsed.text;
            }
            if parsed.calls.len() > remaining {
                tracing::debug!(
                    requested = parsed.calls.len(),
                    remaining,
                    "Tool call budget reached, extra calls skipped"
                );
            }

            let batch = join_all(
                parsed
                    .calls
                    .into_iter()
                    .take(remaining)
                    .map(|call| self.run_tool_call(call, iterations, &plan.tool_context)),
            )
            .await;
            turns.push(ConversationTurn::new(
                MessageRole::Tool,
                render_tool_results(batch.iter().map(|r| &r.result)),
            ));
            records.extend(batch);

            if iterations >= plan.max_iterations {
                break parsed.text;
            }
        };

        self.context.write().await.extend(turns);
        tracing::info!(
            iterations,
            tool_calls = records.len(),
            "Generation complete"
        );

        Ok(BridgeResponse {
            content,
            iterations,
            tool_calls: records,
            usage,
        })
    }

    async fn stream_generation(
        &self,
        options: GenerateOptions,
        tx: &mpsc::Sender<Result<StreamEvent>>,
        token: &CancellationToken,
    ) -> Result<BridgeResponse> {
        let mut plan = self.plan(&options).await;
        plan.tool_context = plan.tool_context.with_cancellation(token.clone());
        self.generations.fetch_add(1, Ordering::Relaxed);

        let limit = self.config.llm_timeout;
        let mut turns = vec![ConversationTurn::new(MessageRole::User, options.prompt)];
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut iterations = 0;

        let content = loop {
            iterations += 1;
            let request = plan.request(&turns);
            let mut stream = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(BridgeError::Cancelled),
                opened = timeout(limit, self.llm.generate_stream(&request)) => {
                    opened.map_err(|_| BridgeError::LlmTimeout(limit))??
                }
            };

            let can_call = plan.enable_tools && records.len() < plan.max_tool_calls;
            let mut scanner = ToolCallScanner::new();
            let mut raw = String::new();
            let mut visible = String::new();
            let mut pending: Option<ToolInvocation> = None;

            while pending.is_none() {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(BridgeError::Cancelled),
                    next = timeout(limit, stream.next()) => {
                        next.map_err(|_| BridgeError::LlmTimeout(limit))?
                    }
                };
                let ended = next.is_none();
                let events = match next {
                    Some(chunk) => scanner.feed(&chunk?),
                    None => scanner.finish(),
                };

                for event in events {
                    match event {
                        ScanEvent::Text(text) => {
                            raw.push_str(&text);
                            visible.push_str(&text);
                            self.events.emit(BridgeEvent::StreamChunk {
                                text: text.clone(),
                                timestamp: Utc::now(),
                            });
                            send(tx, StreamEvent::Text(text)).await?;
                        }
                        ScanEvent::Block(payload) => {
                            raw.push_str(TOOL_CALL_OPEN);
                            raw.push_str(&payload);
                            raw.push_str(TOOL_CALL_CLOSE);
                            tracing::debug!(iteration = iterations, "Tool call block closed in stream");
                            if !can_call {
                                continue;
                            }
                            match parse_tool_call(&payload) {
                                Some(call) => {
                                    pending = Some(call);
                                    break;
                                }
                                None => {
                                    tracing::warn!("Skipping malformed tool call block in stream");
                                }
                            }
                        }
                    }
                }

                if ended {
                    break;
                }
            }
            // Stop the current model stream before running the tool
            drop(stream);
            turns.push(ConversationTurn::new(MessageRole::Assistant, raw));

            let Some(call) = pending else {
                break visible.trim().to_string();
            };

            let record = self.run_tool_call(call, iterations, &plan.tool_context).await;
            turns.push(ConversationTurn::new(
                MessageRole::Tool,
                render_tool_results([&record.result]),
            ));
            send(tx, StreamEvent::ToolCall(record.clone())).await?;
            records.push(record);

            if iterations >= plan.max_iterations {
                break visible.trim().to_string();
            }
        };

        if token.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        self.context.write().await.extend(turns);
        tracing::info!(
            iterations,
            tool_calls = records.len(),
            "Streaming generation complete"
        );

        Ok(BridgeResponse {
            content,
            iterations,
            tool_calls: records,
            usage: TokenUsage::default(),
        })
    }

    async fn call_llm(&self, request: &LLMRequest) -> Result<LLMResponse> {
        let limit = self.config.llm_timeout;
        match timeout(limit, self.llm.generate(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "LLM provider failed");
                Err(e)
            }
            Err(_) => {
                tracing::error!(timeout_ms = limit.as_millis() as u64, "LLM call timed out");
                Err(BridgeError::LlmTimeout(limit))
            }
        }
    }

    async fn run_tool_call(
        &self,
        call: ToolInvocation,
        iteration: usize,
        context: &ExecutionContext,
    ) -> ToolCallRecord {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        self.events.emit(BridgeEvent::ToolCall {
            name: call.name.clone(),
            params: call.params.clone(),
            iteration,
            timestamp: Utc::now(),
        });

        let started_at = Utc::now();
        let result = match self
            .executor
            .execute(&call.name, call.params.clone(), context)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                // The model may name a tool that has since been unloaded
                let error = match e {
                    BridgeError::ToolNotFound(_) => ToolError::not_found(&call.name),
                    other => ToolError::execution_failed(other.to_string()),
                };
                ExecutionResult::failure(&call.name, error, started_at)
                    .with_session_id(context.session_id.clone())
            }
        };

        tracing::debug!(
            tool = %call.name,
            iteration,
            success = result.success,
            "Tool call finished"
        );
        self.events.emit(BridgeEvent::ToolResult {
            name: call.name.clone(),
            success: result.success,
            duration_ms: result.duration_ms(),
            timestamp: Utc::now(),
        });

        ToolCallRecord {
            name: call.name,
            params: call.params,
            iteration,
            result,
        }
    }
}

async fn send(tx: &mpsc::Sender<Result<StreamEvent>>, event: StreamEvent) -> Result<()> {
    tx.send(Ok(event))
        .await
        .map_err(|_| BridgeError::Cancelled)
}
