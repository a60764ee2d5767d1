//! Bridge loop tests against a scripted model

use super::*;
use crate::config::{BridgeConfig, ExecutorConfig};
use crate::error::BridgeError;
use crate::events::BridgeEvent;
use crate::llm::{LLMProvider, LLMRequest, LLMResponse, LLMStream, MessageRole, StubLLMProvider, TokenUsage};
use crate::plugins::{PluginMetadata, PluginRegistry, RegistryCatalog};
use crate::tools::{
    ParamType, PermissionSet, PropertySchema, ResourceDescriptor, SecurityPolicy, StaticCatalog,
    ToolDefinition, ToolErrorKind, ToolExecutor, ToolSchema,
};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Model that replays canned replies. Each reply is a list of stream chunks;
/// once the script runs out the last reply repeats.
struct ScriptedLlm {
    replies: Mutex<VecDeque<Vec<String>>>,
    last: Mutex<Vec<String>>,
    requests: Mutex<Vec<LLMRequest>>,
}

impl ScriptedLlm {
    fn new(replies: &[&[&str]]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(
                replies
                    .iter()
                    .map(|chunks| chunks.iter().map(|c| c.to_string()).collect())
                    .collect(),
            ),
            last: Mutex::new(vec!["done".to_string()]),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn next_reply(&self, request: &LLMRequest) -> Vec<String> {
        self.requests.lock().unwrap().push(request.clone());
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            *last = reply;
        }
        last.clone()
    }

    fn requests(&self) -> Vec<LLMRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedLlm {
    async fn generate(&self, request: &LLMRequest) -> crate::error::Result<LLMResponse> {
        let content = self.next_reply(request).concat();
        Ok(LLMResponse::new(content).with_usage(TokenUsage::new(10, 5)))
    }

    async fn generate_stream(&self, request: &LLMRequest) -> crate::error::Result<LLMStream> {
        let chunks = self.next_reply(request);
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }
}

const QUERY_CALL: &str = r#"[TOOL_CALL]{"name":"query","params":{"sql":"select 1"}}[/TOOL_CALL]"#;

fn sql_catalog(calls: Arc<AtomicUsize>) -> StaticCatalog {
    let schema =
        ToolSchema::empty().required_property("sql", PropertySchema::of_type(ParamType::String));
    StaticCatalog::new()
        .with_fn(
            ToolDefinition::new("query", "Run a read-only SQL query").with_schema(schema),
            move |_params| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!([[1]]))
                }
            },
        )
        .with_resource(
            ResourceDescriptor::new("db://schema", "Schema"),
            "CREATE TABLE t (id int)",
        )
}

async fn bridge_with(llm: Arc<dyn LLMProvider>) -> (LlmToolBridge, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ExecutorConfig {
        enable_cache: false,
        ..Default::default()
    };
    let executor = ToolExecutor::new(Arc::new(sql_catalog(calls.clone())), config)
        .await
        .unwrap();
    let bridge = LlmToolBridge::new(Arc::new(executor), llm, BridgeConfig::default()).await;
    (bridge, calls)
}

fn has_catalog(request: &LLMRequest) -> bool {
    request
        .messages
        .iter()
        .any(|m| m.content.contains(prompt::TOOLS_HEADING))
}

#[tokio::test]
async fn test_tools_disabled_is_single_pass() {
    let llm = ScriptedLlm::new(&[&["Sure. ", QUERY_CALL]]);
    let (bridge, calls) = bridge_with(llm.clone()).await;

    let response = bridge
        .generate(GenerateOptions::new("how many rows?").with_tools(false))
        .await
        .unwrap();

    assert_eq!(response.iterations, 1);
    assert!(response.tool_calls.is_empty());
    assert_eq!(response.content, "Sure.");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!llm.requests().iter().any(has_catalog));
}

#[tokio::test]
async fn test_tool_results_are_fed_back() {
    let llm = ScriptedLlm::new(&[
        &["Let me look. ", QUERY_CALL],
        &["There is one row."],
    ]);
    let (bridge, calls) = bridge_with(llm.clone()).await;

    let response = bridge.generate(GenerateOptions::new("how many rows?")).await.unwrap();

    assert_eq!(response.iterations, 2);
    assert_eq!(response.content, "There is one row.");
    assert_eq!(response.tool_calls.len(), 1);
    assert!(response.tool_calls[0].succeeded());
    assert_eq!(response.tool_calls[0].iteration, 1);
    assert_eq!(response.usage, TokenUsage::new(20, 10));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let requests = llm.requests();
    assert!(has_catalog(&requests[0]));
    let fed_back = requests[1].messages.last().unwrap();
    assert_eq!(fed_back.role, MessageRole::Tool);
    assert!(fed_back.content.starts_with(TOOL_RESULT_OPEN));
    assert!(fed_back.content.contains("[[1]]"));

    let roles: Vec<_> = bridge.get_context().await.history().iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            MessageRole::User,
            MessageRole::Assistant,
            MessageRole::Tool,
            MessageRole::Assistant
        ]
    );
}

#[tokio::test]
async fn test_call_budget_caps_execution() {
    let three = format!("{0}{0}{0}", QUERY_CALL);
    let llm = ScriptedLlm::new(&[&[three.as_str()]]);
    let (bridge, calls) = bridge_with(llm).await;

    let response = bridge
        .generate(GenerateOptions::new("go").with_max_tool_calls(2))
        .await
        .unwrap();

    assert_eq!(response.tool_calls.len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    // Second reply still asks for tools but the budget is spent
    assert_eq!(response.iterations, 2);
}

#[tokio::test]
async fn test_max_iterations_stops_loop() {
    let llm = ScriptedLlm::new(&[&[QUERY_CALL]]);
    let (bridge, calls) = bridge_with(llm.clone()).await;

    let response = bridge
        .generate(GenerateOptions::new("loop").with_max_iterations(3))
        .await
        .unwrap();

    assert_eq!(response.iterations, 3);
    assert_eq!(response.tool_calls.len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(llm.requests().len(), 3);
    assert_eq!(response.content, "");
}

#[tokio::test]
async fn test_malformed_block_is_skipped() {
    let llm = ScriptedLlm::new(&[&["[TOOL_CALL]{broken[/TOOL_CALL] The answer is 4."]]);
    let (bridge, calls) = bridge_with(llm).await;

    let response = bridge.generate(GenerateOptions::new("2+2?")).await.unwrap();

    assert_eq!(response.content, "The answer is 4.");
    assert_eq!(response.iterations, 1);
    assert!(response.tool_calls.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_calls_do_not_abort_loop() {
    let llm = ScriptedLlm::new(&[
        &[r#"[TOOL_CALL]{"name":"ghost"}[/TOOL_CALL][TOOL_CALL]{"name":"query","params":{}}[/TOOL_CALL]"#],
        &["Neither worked."],
    ]);
    let (bridge, calls) = bridge_with(llm.clone()).await;

    let response = bridge.generate(GenerateOptions::new("try")).await.unwrap();

    assert_eq!(response.content, "Neither worked.");
    assert_eq!(response.tool_calls.len(), 2);
    assert_eq!(response.tool_calls[0].result.error_kind(), Some(ToolErrorKind::NotFound));
    assert!(!response.tool_calls[1].result.validation_errors.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let requests = llm.requests();
    let fed_back = &requests[1].messages.last().unwrap().content;
    assert!(fed_back.contains("TOOL_NOT_FOUND"));
    assert!(fed_back.contains("REQUIRED_FIELD_MISSING"));
}

#[tokio::test]
async fn test_llm_failure_propagates_without_history() {
    let (bridge, _) = bridge_with(Arc::new(StubLLMProvider)).await;

    let err = bridge.generate(GenerateOptions::new("hi")).await.unwrap_err();
    assert!(err.is_llm_failure());
    assert!(bridge.get_context().await.history().is_empty());
}

#[tokio::test]
async fn test_history_carries_into_next_generation() {
    let llm = ScriptedLlm::new(&[&["First answer."], &["Second answer."]]);
    let (bridge, _) = bridge_with(llm.clone()).await;

    bridge.generate(GenerateOptions::new("first question")).await.unwrap();
    bridge.generate(GenerateOptions::new("second question")).await.unwrap();

    let second = &llm.requests()[1];
    assert!(second.messages.iter().any(|m| m.content == "first question"));
    assert!(second.messages.iter().any(|m| m.content == "First answer."));

    bridge.update_context(json!({"user": "ana"})).await;
    bridge.clear_history().await;
    let context = bridge.get_context().await;
    assert!(context.history().is_empty());
    assert_eq!(context.metadata["user"], json!("ana"));
}

#[tokio::test]
async fn test_events_follow_call_lifecycle() {
    let llm = ScriptedLlm::new(&[&[QUERY_CALL], &["ok"]]);
    let (bridge, _) = bridge_with(llm).await;
    let mut rx = bridge.subscribe();

    bridge.generate(GenerateOptions::new("go")).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BridgeEvent::ToolCall { iteration, .. } = &event {
            assert_eq!(*iteration, 1);
        }
        kinds.push(event.event_type());
    }
    assert_eq!(kinds, vec!["tool_call", "tool_result"]);
}

#[tokio::test]
async fn test_stream_reassembles_split_markers() {
    let llm = ScriptedLlm::new(&[
        &[
            "Checking [TOO",
            r#"L_CALL]{"name":"query","params":{"sql":"select 1"}}[/TOOL"#,
            "_CALL] ignored",
        ],
        &["All ", "done."],
    ]);
    let (bridge, calls) = bridge_with(llm.clone()).await;

    let events: Vec<StreamEvent> = bridge
        .generate_stream(GenerateOptions::new("rows?"))
        .map(|e| e.unwrap())
        .collect()
        .await;

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Checking All done.");
    assert!(!text.contains("TOOL"));

    let tool_events = events.iter().filter(|e| matches!(e, StreamEvent::ToolCall(_))).count();
    assert_eq!(tool_events, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    match events.last() {
        Some(StreamEvent::Done(response)) => {
            assert_eq!(response.content, "All done.");
            assert_eq!(response.iterations, 2);
            assert_eq!(response.tool_calls.len(), 1);
        }
        other => panic!("expected Done, got {:?}", other),
    }

    assert_eq!(llm.requests()[1].messages.last().unwrap().role, MessageRole::Tool);
    assert_eq!(bridge.get_context().await.history().len(), 4);
}

#[tokio::test]
async fn test_stream_cancel_commits_nothing() {
    let llm = ScriptedLlm::new(&[&["never ", "seen"]]);
    let (bridge, _) = bridge_with(llm).await;

    let stream = bridge.generate_stream(GenerateOptions::new("hi"));
    stream.cancel();
    let events: Vec<_> = stream.collect().await;

    assert!(events.iter().all(|e| !matches!(e, Ok(StreamEvent::Done(_)))));
    assert!(bridge.get_context().await.history().is_empty());
}

#[tokio::test]
async fn test_stream_surfaces_llm_failure() {
    let (bridge, _) = bridge_with(Arc::new(StubLLMProvider)).await;

    let mut stream = bridge.generate_stream(GenerateOptions::new("hi"));
    let first = stream.next().await.unwrap();
    assert!(matches!(first, Err(BridgeError::LlmProvider(_))));
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_resource_access_is_cached_until_cleared() {
    let (bridge, _) = bridge_with(ScriptedLlm::new(&[])).await;
    let mut rx = bridge.subscribe();

    let first = bridge.access_resource("db://schema").await.unwrap();
    let second = bridge.access_resource("db://schema").await.unwrap();
    assert_eq!(first, second);

    let cached: Vec<bool> = std::iter::from_fn(|| rx.try_recv().ok())
        .filter_map(|e| match e {
            BridgeEvent::ResourceAccess { cached, .. } => Some(cached),
            _ => None,
        })
        .collect();
    assert_eq!(cached, vec![false, true]);

    let stats = bridge.get_statistics().await;
    assert_eq!(stats.resource_accesses, 2);
    assert_eq!(stats.cached_resources, 1);

    bridge.clear_cache().await;
    assert_eq!(bridge.get_statistics().await.cached_resources, 0);

    assert!(matches!(
        bridge.access_resource("db://missing").await,
        Err(BridgeError::ResourceNotFound(_))
    ));
}

#[tokio::test]
async fn test_execute_tool_call_uses_conversation_session() {
    let (bridge, calls) = bridge_with(ScriptedLlm::new(&[])).await;

    let result = bridge
        .execute_tool_call("query", json!({"sql": "select 1"}))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.session_id, Some(bridge.get_context().await.session_id));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_execute_tool_call_with_permissions() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = ExecutorConfig::default()
        .without_cache()
        .with_security(SecurityPolicy::permissive().require_permission("query", "db:read"));
    let executor = ToolExecutor::new(Arc::new(sql_catalog(calls.clone())), config)
        .await
        .unwrap();
    let bridge = LlmToolBridge::new(
        Arc::new(executor),
        ScriptedLlm::new(&[]),
        BridgeConfig::default(),
    )
    .await;
    let params = json!({"sql": "select 1"});

    let denied = bridge.execute_tool_call("query", params.clone()).await.unwrap();
    assert_eq!(denied.error_kind(), Some(ToolErrorKind::InsufficientPermissions));

    let granted = bridge
        .execute_tool_call_with("query", params, PermissionSet::new().with("db:read"))
        .await
        .unwrap();
    assert!(granted.success);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_refresh_and_unloaded_tool_over_registry() {
    let registry = Arc::new(PluginRegistry::default());
    let executor = ToolExecutor::new(
        Arc::new(RegistryCatalog::new(registry.clone())),
        ExecutorConfig::default(),
    )
    .await
    .unwrap();
    let llm = ScriptedLlm::new(&[&[QUERY_CALL], &["It is gone."]]);
    let bridge = LlmToolBridge::new(Arc::new(executor), llm, BridgeConfig::default()).await;
    assert!(bridge.get_context().await.tools.is_empty());

    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register_handler("sql", Arc::new(sql_catalog(calls.clone())))
        .await;
    registry
        .load(PluginMetadata::new("sql", "1.0.0").with_capability("tools"))
        .await
        .unwrap();
    bridge.refresh().await.unwrap();
    assert_eq!(bridge.get_context().await.tools.len(), 1);

    // Unloaded after the snapshot was taken
    registry.unload("sql").await.unwrap();
    let response = bridge.generate(GenerateOptions::new("rows?")).await.unwrap();

    assert_eq!(response.content, "It is gone.");
    assert_eq!(
        response.tool_calls[0].result.error_kind(),
        Some(ToolErrorKind::NotFound)
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
