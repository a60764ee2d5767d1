//! Per-bridge conversation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::llm::{Message, MessageRole};
use crate::tools::{ResourceDescriptor, ToolDefinition};

/// One recorded turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

impl From<&ConversationTurn> for Message {
    fn from(turn: &ConversationTurn) -> Self {
        Message::new(turn.role, turn.content.clone())
    }
}

/// Conversation history, catalog snapshot and freeform metadata.
///
/// History only grows until [`ConversationContext::clear_history`] is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub turns: Vec<ConversationTurn>,
    pub tools: Vec<ToolDefinition>,
    pub resources: Vec<ResourceDescriptor>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            turns: Vec::new(),
            tools: Vec::new(),
            resources: Vec::new(),
            metadata: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append turns in order
    pub fn extend(&mut self, turns: impl IntoIterator<Item = ConversationTurn>) {
        self.turns.extend(turns);
        self.touch();
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.extend([turn]);
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn clear_history(&mut self) {
        self.turns.clear();
        self.touch();
    }

    /// Shallow-merge an object into the metadata; `null` values remove keys.
    /// A non-object patch is stored under `"value"`.
    pub fn update_metadata(&mut self, patch: Value) {
        match patch {
            Value::Object(fields) => {
                for (key, value) in fields {
                    if value.is_null() {
                        self.metadata.remove(&key);
                    } else {
                        self.metadata.insert(key, value);
                    }
                }
            }
            Value::Null => {}
            other => {
                self.metadata.insert("value".to_string(), other);
            }
        }
        self.touch();
    }

    /// Replace the catalog snapshot
    pub fn set_catalog(&mut self, tools: Vec<ToolDefinition>, resources: Vec<ResourceDescriptor>) {
        self.tools = tools;
        self.resources = resources;
        self.touch();
    }

    /// History as provider messages
    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(Message::from).collect()
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_merge() {
        let mut context = ConversationContext::new("s1");
        context.update_metadata(json!({"user": "ana", "locale": "pt"}));
        context.update_metadata(json!({"locale": "en", "user": null}));

        assert_eq!(Value::Object(context.metadata.clone()), json!({"locale": "en"}));

        context.update_metadata(json!(42));
        assert_eq!(context.metadata["value"], json!(42));
    }

    #[test]
    fn test_history_is_append_only_until_cleared() {
        let mut context = ConversationContext::default();
        context.push(ConversationTurn::new(MessageRole::User, "hi"));
        context.extend([
            ConversationTurn::new(MessageRole::Assistant, "hello"),
            ConversationTurn::new(MessageRole::Tool, "[TOOL_RESULT]"),
        ]);

        let roles: Vec<_> = context.to_messages().iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::User, MessageRole::Assistant, MessageRole::Tool]
        );

        context.update_metadata(json!({"keep": true}));
        context.clear_history();
        assert!(context.history().is_empty());
        assert_eq!(context.metadata["keep"], json!(true));
    }
}
