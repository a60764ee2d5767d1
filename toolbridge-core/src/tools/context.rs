//! Per-call execution context

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::policy::PermissionSet;

/// Default per-call timeout when the caller does not set one
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Caller identity and limits for one `execute` call
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Session issuing the call
    pub session_id: String,

    /// Permissions held by the caller
    pub permissions: PermissionSet,

    /// Upper bound on the provider call. Always non-zero.
    pub timeout: Duration,

    /// Free-form caller metadata
    pub metadata: HashMap<String, Value>,

    /// Cancellation token
    pub cancellation: Option<CancellationToken>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            permissions: PermissionSet::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
            metadata: HashMap::new(),
            cancellation: None,
        }
    }
}

impl ExecutionContext {
    /// Create a context with a fresh session id
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session id
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    /// Set the caller's permissions
    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the call timeout. A zero duration is ignored.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Attach a metadata value
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Set cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Check if cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .map(|t| t.is_cancelled())
            .unwrap_or(false)
    }
}
