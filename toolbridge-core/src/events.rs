//! Event fan-out for registry, executor and bridge observability
//!
//! Each component owns one [`EventBus`] and publishes a typed event enum on it.
//! Subscribers receive events from a given bus in emission order; there is no
//! ordering guarantee across different buses.
//!
//! # Example
//!
//! ```rust,ignore
//! use toolbridge_core::events::ExecutorEvent;
//!
//! let mut rx = executor.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = rx.recv().await {
//!         if let ExecutorEvent::SecurityViolation { tool, kind, .. } = event {
//!             println!("{} rejected: {:?}", tool, kind);
//!         }
//!     }
//! });
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::plugins::PluginState;
use crate::tools::{ToolErrorKind, ValidationError};

/// Default per-bus buffer capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast fan-out of one event kind.
///
/// Emitting never blocks; slow subscribers observe `RecvError::Lagged`
/// instead of stalling the emitter.
#[derive(Debug, Clone)]
pub struct EventBus<E: Clone> {
    sender: broadcast::Sender<E>,
}

impl<E: Clone> EventBus<E> {
    /// Create a bus with the given buffer capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers
    pub fn emit(&self, event: E) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<E: Clone> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Plugin registry events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginEvent {
    /// A plugin moved between lifecycle states
    StateChange {
        name: String,
        from: PluginState,
        to: PluginState,
        timestamp: DateTime<Utc>,
    },

    /// A plugin finished loading
    Loaded {
        name: String,
        version: String,
        timestamp: DateTime<Utc>,
    },

    /// A plugin was removed from the registry
    Unloaded {
        name: String,
        timestamp: DateTime<Utc>,
    },

    /// A plugin failed validation or a lifecycle operation
    Error {
        name: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PluginEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            PluginEvent::StateChange { .. } => "plugin_state_change",
            PluginEvent::Loaded { .. } => "plugin_loaded",
            PluginEvent::Unloaded { .. } => "plugin_unloaded",
            PluginEvent::Error { .. } => "plugin_error",
        }
    }

    /// Name of the plugin the event is about
    pub fn plugin_name(&self) -> &str {
        match self {
            PluginEvent::StateChange { name, .. }
            | PluginEvent::Loaded { name, .. }
            | PluginEvent::Unloaded { name, .. }
            | PluginEvent::Error { name, .. } => name,
        }
    }
}

/// Tool executor events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutorEvent {
    /// A call passed catalog lookup and is about to be checked and run
    ExecutionStart {
        tool: String,
        session_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A call finished, successfully or not
    ExecutionComplete {
        tool: String,
        success: bool,
        cached: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Parameters failed schema validation
    ValidationError {
        tool: String,
        errors: Vec<ValidationError>,
        timestamp: DateTime<Utc>,
    },

    /// The security policy rejected a call
    SecurityViolation {
        tool: String,
        kind: ToolErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Cached results were dropped (`tool` is `None` for a full clear)
    CacheCleared {
        tool: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The tool/resource catalog was re-pulled from the provider
    CatalogRefreshed {
        tools: usize,
        resources: usize,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutorEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            ExecutorEvent::ExecutionStart { .. } => "execution_start",
            ExecutorEvent::ExecutionComplete { .. } => "execution_complete",
            ExecutorEvent::ValidationError { .. } => "validation_error",
            ExecutorEvent::SecurityViolation { .. } => "security_violation",
            ExecutorEvent::CacheCleared { .. } => "cache_cleared",
            ExecutorEvent::CatalogRefreshed { .. } => "catalog_refreshed",
        }
    }
}

/// LLM-tool bridge events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// The model requested a tool call
    ToolCall {
        name: String,
        params: Value,
        iteration: usize,
        timestamp: DateTime<Utc>,
    },

    /// A requested tool call finished
    ToolResult {
        name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A resource was read (from the provider or the resource cache)
    ResourceAccess {
        uri: String,
        cached: bool,
        timestamp: DateTime<Utc>,
    },

    /// Visible text was emitted by a streaming generation
    StreamChunk {
        text: String,
        timestamp: DateTime<Utc>,
    },
}

impl BridgeEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            BridgeEvent::ToolCall { .. } => "tool_call",
            BridgeEvent::ToolResult { .. } => "tool_result",
            BridgeEvent::ResourceAccess { .. } => "resource_access",
            BridgeEvent::StreamChunk { .. } => "stream_chunk",
        }
    }
}
