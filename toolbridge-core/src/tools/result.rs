//! Execution result and in-band error model
//!
//! Every `execute` call produces an [`ExecutionResult`]. Validation failures,
//! policy rejections, timeouts and provider failures are reported on the
//! result with `success == false` instead of being raised.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Outcome of one tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Tool that was requested
    pub tool_name: String,

    /// Whether the provider was reached and returned a value
    pub success: bool,

    /// Provider result (on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Failure detail (on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,

    /// Schema violations, empty unless validation rejected the call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<ValidationError>,

    /// Wall time spent inside `execute`
    #[serde(with = "duration_millis")]
    pub duration: Duration,

    /// When the call started
    pub timestamp: DateTime<Utc>,

    /// Whether the value was served from the result cache
    #[serde(default)]
    pub cached: bool,

    /// Session that issued the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn success(tool_name: impl Into<String>, value: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            result: Some(value),
            error: None,
            validation_errors: Vec::new(),
            duration: elapsed_since(started_at),
            timestamp: started_at,
            cached: false,
            session_id: None,
        }
    }

    /// Create a failed result
    pub fn failure(tool_name: impl Into<String>, error: ToolError, started_at: DateTime<Utc>) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            result: None,
            error: Some(error),
            validation_errors: Vec::new(),
            duration: elapsed_since(started_at),
            timestamp: started_at,
            cached: false,
            session_id: None,
        }
    }

    /// Create a result rejected by schema validation
    pub fn invalid(
        tool_name: impl Into<String>,
        errors: Vec<ValidationError>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let error = ToolError::validation(&errors);
        let mut result = Self::failure(tool_name, error, started_at);
        result.validation_errors = errors;
        result
    }

    /// Mark the result as served from cache
    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    /// Attach the issuing session
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Error kind, if the call failed
    pub fn error_kind(&self) -> Option<ToolErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        self.error
            .as_ref()
            .map(|e| e.kind.is_retryable())
            .unwrap_or(false)
    }

    /// Duration in whole milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }
}

fn elapsed_since(started_at: DateTime<Utc>) -> Duration {
    (Utc::now() - started_at).to_std().unwrap_or_default()
}

/// Structured tool error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    /// Error kind (determines retryability)
    pub kind: ToolErrorKind,

    /// Human-readable error message
    pub message: String,

    /// Stable error code
    pub code: String,

    /// Suggested retry delay (rate limiting, timeouts)
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_duration_millis"
    )]
    pub retry_after: Option<Duration>,
}

impl ToolError {
    /// Create a new tool error using the kind's default code
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: kind.code().to_string(),
            retry_after: None,
        }
    }

    /// Add retry delay
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Create a validation error summarizing field errors
    pub fn validation(errors: &[ValidationError]) -> Self {
        Self::new(
            ToolErrorKind::Validation,
            format!(
                "Validation failed: {}",
                errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            ),
        )
    }

    /// Tool is on the deny list
    pub fn denied(tool: &str) -> Self {
        Self::new(ToolErrorKind::Denied, format!("Tool '{}' is denied by policy", tool))
    }

    /// Tool is missing from a configured allow list
    pub fn not_allowed(tool: &str) -> Self {
        Self::new(
            ToolErrorKind::NotAllowed,
            format!("Tool '{}' is not in the allowed tools list", tool),
        )
    }

    /// Caller lacks permissions required by the tool
    pub fn insufficient_permissions(tool: &str, missing: &[String]) -> Self {
        Self::new(
            ToolErrorKind::InsufficientPermissions,
            format!(
                "Tool '{}' requires permissions: {}",
                tool,
                missing.join(", ")
            ),
        )
    }

    /// Rate-limit window exhausted
    pub fn rate_limited(tool: &str, retry_after: Duration) -> Self {
        Self::new(
            ToolErrorKind::RateLimitExceeded,
            format!("Rate limit exceeded for tool '{}'", tool),
        )
        .with_retry_after(retry_after)
    }

    /// Provider did not answer within the call timeout
    pub fn timeout(duration: Duration) -> Self {
        Self::new(
            ToolErrorKind::Timeout,
            format!("Tool execution timed out after {:?}", duration),
        )
    }

    /// Provider returned an error
    pub fn execution_failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ExecutionFailure, message)
    }

    /// Tool is not in the catalog
    pub fn not_found(tool: &str) -> Self {
        Self::new(ToolErrorKind::NotFound, format!("Tool not found: {}", tool))
    }

    /// Call was cancelled by the caller
    pub fn cancelled() -> Self {
        Self::new(ToolErrorKind::Cancelled, "Execution cancelled")
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ToolError {}

/// Error kind taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Parameters failed schema validation
    Validation,

    /// Tool is on the deny list
    Denied,

    /// Tool is absent from the allow list
    NotAllowed,

    /// Caller lacks a required permission
    InsufficientPermissions,

    /// Rate-limit window exhausted
    RateLimitExceeded,

    /// Provider did not answer in time
    Timeout,

    /// Provider returned an error
    ExecutionFailure,

    /// Tool is not in the catalog
    NotFound,

    /// Cancelled by the caller
    Cancelled,
}

impl ToolErrorKind {
    /// Stable upper-snake error code
    pub fn code(&self) -> &'static str {
        match self {
            ToolErrorKind::Validation => "VALIDATION_FAILED",
            ToolErrorKind::Denied => "TOOL_DENIED",
            ToolErrorKind::NotAllowed => "TOOL_NOT_ALLOWED",
            ToolErrorKind::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            ToolErrorKind::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ToolErrorKind::Timeout => "EXECUTION_TIMEOUT",
            ToolErrorKind::ExecutionFailure => "EXECUTION_FAILED",
            ToolErrorKind::NotFound => "TOOL_NOT_FOUND",
            ToolErrorKind::Cancelled => "CANCELLED",
        }
    }

    /// Check if this error kind is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, ToolErrorKind::Timeout | ToolErrorKind::RateLimitExceeded)
    }

    /// Whether the kind is a security policy rejection
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            ToolErrorKind::Denied
                | ToolErrorKind::NotAllowed
                | ToolErrorKind::InsufficientPermissions
                | ToolErrorKind::RateLimitExceeded
        )
    }
}

/// Validation error for a specific field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Error code, e.g. `REQUIRED_FIELD_MISSING`
    pub code: String,

    /// Field name (empty for whole-object errors)
    pub field: String,

    /// Error message
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(
        code: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.field, self.message)
    }
}

// Serde helpers for Duration serialization as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<u64> = Option::deserialize(deserializer)?;
        Ok(opt.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod result_tests {
    use super::*;

    #[test]
    fn test_success_result() {
        let result = ExecutionResult::success("echo", serde_json::json!({"ok": true}), Utc::now());

        assert!(result.success);
        assert!(result.error.is_none());
        assert!(!result.cached);
        assert_eq!(result.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_invalid_result_carries_field_errors() {
        let errors = vec![
            ValidationError::new("REQUIRED_FIELD_MISSING", "query", "query is required"),
            ValidationError::new("INVALID_TYPE", "limit", "limit must be integer"),
        ];
        let result = ExecutionResult::invalid("search", errors, Utc::now());

        assert!(!result.success);
        assert_eq!(result.error_kind(), Some(ToolErrorKind::Validation));
        assert_eq!(result.validation_errors.len(), 2);
        assert!(result.error.unwrap().message.contains("query is required"));
    }

    #[test]
    fn test_error_kind_classification() {
        assert!(ToolErrorKind::Timeout.is_retryable());
        assert!(ToolErrorKind::RateLimitExceeded.is_retryable());
        assert!(!ToolErrorKind::Denied.is_retryable());

        assert!(ToolErrorKind::Denied.is_security_violation());
        assert!(ToolErrorKind::InsufficientPermissions.is_security_violation());
        assert!(!ToolErrorKind::ExecutionFailure.is_security_violation());
    }

    #[test]
    fn test_rate_limited_error_has_retry_after() {
        let error = ToolError::rate_limited("search", Duration::from_millis(250));
        assert_eq!(error.code, "RATE_LIMIT_EXCEEDED");
        assert_eq!(error.retry_after, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_result_serialization() {
        let result = ExecutionResult::failure("drop-table", ToolError::denied("drop-table"), Utc::now())
            .with_session_id("s1");

        let json = serde_json::to_string(&result).unwrap();
        let parsed: ExecutionResult = serde_json::from_str(&json).unwrap();

        assert!(!parsed.success);
        assert_eq!(parsed.error_kind(), Some(ToolErrorKind::Denied));
        assert_eq!(parsed.session_id.as_deref(), Some("s1"));
    }
}
