//! Text protocol for tool calls embedded in model output
//!
//! A call is written as
//!
//! ```text
//! [TOOL_CALL]{"name": "list_tables", "params": {"schema": "public"}}[/TOOL_CALL]
//! ```
//!
//! and results are fed back to the model as `[TOOL_RESULT]` sections.

use serde_json::Value;

use super::stream::{ScanEvent, ToolCallScanner};
use crate::tools::{ExecutionResult, ToolInvocation};

pub const TOOL_CALL_OPEN: &str = "[TOOL_CALL]";
pub const TOOL_CALL_CLOSE: &str = "[/TOOL_CALL]";
pub const TOOL_RESULT_OPEN: &str = "[TOOL_RESULT]";
pub const TOOL_RESULT_CLOSE: &str = "[/TOOL_RESULT]";

/// Model output split into visible text and tool calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedOutput {
    /// Output with every tool-call block removed
    pub text: String,

    /// Well-formed calls in order of appearance
    pub calls: Vec<ToolInvocation>,

    /// Blocks whose payload could not be parsed
    pub malformed: usize,
}

/// Parse one block payload. Returns `None` for anything that is not an object
/// with a non-empty string `name` and an object (or absent) `params`.
pub fn parse_tool_call(payload: &str) -> Option<ToolInvocation> {
    let value: Value = serde_json::from_str(payload.trim()).ok()?;
    let name = value.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let params = match value.get("params") {
        None | Some(Value::Null) => Value::Object(Default::default()),
        Some(params @ Value::Object(_)) => params.clone(),
        Some(_) => return None,
    };

    Some(ToolInvocation::new(name, params))
}

/// Split complete model output into text and tool calls
pub fn parse_output(text: &str) -> ParsedOutput {
    let mut scanner = ToolCallScanner::new();
    let mut events = scanner.feed(text);
    events.extend(scanner.finish());

    let mut output = ParsedOutput::default();
    for event in events {
        match event {
            ScanEvent::Text(t) => output.text.push_str(&t),
            ScanEvent::Block(payload) => match parse_tool_call(&payload) {
                Some(call) => output.calls.push(call),
                None => {
                    tracing::warn!(payload = %truncate(&payload, 200), "Skipping malformed tool call block");
                    output.malformed += 1;
                }
            },
        }
    }
    output.text = output.text.trim().to_string();
    output
}

/// Well-formed tool calls in `text`, in order
pub fn extract_tool_calls(text: &str) -> Vec<ToolInvocation> {
    parse_output(text).calls
}

/// `text` with all tool-call blocks removed
pub fn strip_tool_calls(text: &str) -> String {
    parse_output(text).text
}

/// Render a call back into block form
pub fn render_tool_call(call: &ToolInvocation) -> String {
    let payload = serde_json::json!({ "name": call.name, "params": call.params });
    format!("{}{}{}", TOOL_CALL_OPEN, payload, TOOL_CALL_CLOSE)
}

/// Render results as the synthetic turn fed back to the model
pub fn render_tool_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> String {
    let mut rendered = String::new();
    for result in results {
        rendered.push_str(TOOL_RESULT_OPEN);
        rendered.push('\n');
        rendered.push_str(&format!("name: {}\n", result.tool_name));
        rendered.push_str(&format!("success: {}\n", result.success));
        if let Some(value) = &result.result {
            rendered.push_str(&format!("result: {}\n", value));
        }
        if let Some(error) = &result.error {
            rendered.push_str(&format!("error: {}\n", error));
        }
        for validation in &result.validation_errors {
            rendered.push_str(&format!("validation: {}\n", validation));
        }
        rendered.push_str(TOOL_RESULT_CLOSE);
        rendered.push('\n');
    }
    rendered.trim_end().to_string()
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod protocol_tests {
    use super::*;
    use crate::tools::ToolError;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_parse_tool_call_shapes() {
        let call = parse_tool_call(r#" {"name":"q","params":{"sql":"select 1"}} "#).unwrap();
        assert_eq!(call, ToolInvocation::new("q", json!({"sql": "select 1"})));

        let call = parse_tool_call(r#"{"name":"list"}"#).unwrap();
        assert_eq!(call.params, json!({}));

        assert!(parse_tool_call("not json").is_none());
        assert!(parse_tool_call(r#"{"params":{}}"#).is_none());
        assert!(parse_tool_call(r#"{"name":""}"#).is_none());
        assert!(parse_tool_call(r#"{"name":"q","params":[1]}"#).is_none());
        assert!(parse_tool_call(r#"["q"]"#).is_none());
    }

    #[test]
    fn test_parse_output_skips_malformed() {
        let output = parse_output(
            "Before [TOOL_CALL]{oops[/TOOL_CALL] middle [TOOL_CALL]{\"name\":\"a\"}[/TOOL_CALL] after",
        );
        assert_eq!(output.calls.len(), 1);
        assert_eq!(output.malformed, 1);
        assert_eq!(output.text, "Before  middle  after");
    }

    #[test]
    fn test_strip_and_render_round_trip() {
        let call = ToolInvocation::new("q", json!({"x": 1}));
        let text = format!("See {} now", render_tool_call(&call));

        assert_eq!(extract_tool_calls(&text), vec![call]);
        assert_eq!(strip_tool_calls(&text), "See  now");
    }

    #[test]
    fn test_render_tool_results() {
        let ok = ExecutionResult::success("q", json!([1, 2]), Utc::now());
        let failed = ExecutionResult::failure("d", ToolError::denied("d"), Utc::now());

        let rendered = render_tool_results([&ok, &failed]);
        assert!(rendered.starts_with(TOOL_RESULT_OPEN));
        assert!(rendered.contains("name: q\nsuccess: true\nresult: [1,2]"));
        assert!(rendered.contains("success: false"));
        assert!(rendered.contains("TOOL_DENIED"));
        assert!(rendered.ends_with(TOOL_RESULT_CLOSE));
    }
}
