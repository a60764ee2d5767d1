//! LLM-tool bridge
//!
//! Connects an [`crate::llm::LLMProvider`] to a [`crate::tools::ToolExecutor`]
//! through a plain-text call protocol:
//!
//! - [`protocol`]: `[TOOL_CALL]` block parsing and `[TOOL_RESULT]` rendering
//! - [`stream`]: incremental block scanner for streamed output
//! - [`prompt`]: catalog section of the system prompt
//! - [`LlmToolBridge`]: the generate/tool-call/feed-back loop

mod context;
pub mod prompt;
pub mod protocol;
pub mod stream;
mod tool_bridge;

pub use context::{ConversationContext, ConversationTurn};
pub use prompt::{build_system_prompt, render_catalog};
pub use protocol::{
    ParsedOutput, TOOL_CALL_CLOSE, TOOL_CALL_OPEN, TOOL_RESULT_CLOSE, TOOL_RESULT_OPEN,
    extract_tool_calls, parse_output, parse_tool_call, render_tool_call, render_tool_results,
    strip_tool_calls,
};
pub use stream::{ScanEvent, ScanState, ToolCallScanner};
pub use tool_bridge::{
    BridgeResponse, BridgeStatistics, BridgeStream, GenerateOptions, LlmToolBridge,
    StreamEvent, ToolCallRecord,
};

#[cfg(test)]
mod tests;
