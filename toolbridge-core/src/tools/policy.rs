//! Security policy for tool invocation
//!
//! Policies are checks on names and permissions, not process isolation.
//! Checks run in a fixed order: deny list, allow list, required permissions,
//! then the rate limit (enforced by the executor's [`super::RateLimiter`]).
//! A tool on both lists is denied.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use super::result::ToolError;

/// Permissions held by a caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    permissions: BTreeSet<String>,
}

impl PermissionSet {
    /// Create an empty permission set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a permission
    pub fn add(&mut self, permission: impl Into<String>) -> &mut Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Builder-style add
    pub fn with(mut self, permission: impl Into<String>) -> Self {
        self.add(permission);
        self
    }

    /// Check if permission is present
    pub fn contains(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Permissions in `required` that this set lacks
    pub fn missing<'a>(&self, required: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        required
            .into_iter()
            .filter(|p| !self.permissions.contains(p.as_str()))
            .cloned()
            .collect()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    /// Get iterator over permissions
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.permissions.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            permissions: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Sliding-window rate limit applied per tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Maximum calls per window
    pub max_calls: u32,

    /// Window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimitSpec {
    /// Create a rate limit spec
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max_calls, window }
    }
}

/// Policy that controls which tools may run and who may run them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// If set, only these tools may run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<HashSet<String>>,

    /// Tools that may never run (takes precedence over `allowed_tools`)
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub denied_tools: HashSet<String>,

    /// Permissions a caller must hold, per tool
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub required_permissions: HashMap<String, BTreeSet<String>>,

    /// Per-tool call budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSpec>,
}

impl SecurityPolicy {
    /// Policy that permits every tool without limits
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Restrict execution to the given tools
    pub fn allow_only<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.allowed_tools = Some(tools.into_iter().map(Into::into).collect());
        self
    }

    /// Deny a specific tool
    pub fn deny(mut self, tool: impl Into<String>) -> Self {
        self.denied_tools.insert(tool.into());
        self
    }

    /// Deny multiple tools
    pub fn deny_many<S: Into<String>>(mut self, tools: impl IntoIterator<Item = S>) -> Self {
        self.denied_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    /// Require a permission for a tool
    pub fn require_permission(
        mut self,
        tool: impl Into<String>,
        permission: impl Into<String>,
    ) -> Self {
        self.required_permissions
            .entry(tool.into())
            .or_default()
            .insert(permission.into());
        self
    }

    /// Set the per-tool rate limit
    pub fn with_rate_limit(mut self, max_calls: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimitSpec::new(max_calls, window));
        self
    }

    /// Whether the deny list names the tool
    pub fn is_denied(&self, tool: &str) -> bool {
        self.denied_tools.contains(tool)
    }

    /// Whether the allow list (if any) admits the tool
    pub fn is_allowed(&self, tool: &str) -> bool {
        if self.is_denied(tool) {
            return false;
        }
        self.allowed_tools
            .as_ref()
            .map(|allowed| allowed.contains(tool))
            .unwrap_or(true)
    }

    /// Run the name and permission checks, in policy order.
    ///
    /// Rate limiting is stateful and checked separately by the executor.
    pub fn check(&self, tool: &str, permissions: &PermissionSet) -> Result<(), ToolError> {
        if self.is_denied(tool) {
            return Err(ToolError::denied(tool));
        }

        if let Some(allowed) = &self.allowed_tools {
            if !allowed.contains(tool) {
                return Err(ToolError::not_allowed(tool));
            }
        }

        if let Some(required) = self.required_permissions.get(tool) {
            let missing = permissions.missing(required);
            if !missing.is_empty() {
                return Err(ToolError::insufficient_permissions(tool, &missing));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use crate::tools::ToolErrorKind;

    #[test]
    fn test_permissive_allows_everything() {
        let policy = SecurityPolicy::permissive();
        assert!(policy.check("anything", &PermissionSet::new()).is_ok());
    }

    #[test]
    fn test_deny_list() {
        let policy = SecurityPolicy::permissive().deny("drop-table");
        let err = policy.check("drop-table", &PermissionSet::new()).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Denied);
        assert!(policy.check("select", &PermissionSet::new()).is_ok());
    }

    #[test]
    fn test_allow_list_rejects_unlisted() {
        let policy = SecurityPolicy::permissive().allow_only(["x"]);
        let err = policy.check("y", &PermissionSet::new()).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::NotAllowed);
        assert!(policy.check("x", &PermissionSet::new()).is_ok());
    }

    #[test]
    fn test_deny_takes_precedence() {
        let policy = SecurityPolicy::permissive().allow_only(["x"]).deny("x");

        assert!(!policy.is_allowed("x"));
        let err = policy.check("x", &PermissionSet::new()).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::Denied);
    }

    #[test]
    fn test_required_permissions() {
        let policy = SecurityPolicy::permissive()
            .require_permission("write_file", "fs:write")
            .require_permission("write_file", "fs:read");

        let err = policy
            .check("write_file", &PermissionSet::from_iter(["fs:read"]))
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InsufficientPermissions);
        assert!(err.message.contains("fs:write"));

        let granted: PermissionSet = ["fs:read", "fs:write"].into_iter().collect();
        assert!(policy.check("write_file", &granted).is_ok());
    }

    #[test]
    fn test_policy_deserializes_humantime_window() {
        let policy: SecurityPolicy = serde_json::from_value(serde_json::json!({
            "denied_tools": ["drop-table"],
            "rate_limit": { "max_calls": 2, "window": "1s" }
        }))
        .unwrap();

        assert!(policy.is_denied("drop-table"));
        assert_eq!(
            policy.rate_limit,
            Some(RateLimitSpec::new(2, Duration::from_secs(1)))
        );
    }
}
