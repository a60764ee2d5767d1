//! System prompt assembly
//!
//! When tools are enabled the base prompt is followed by a catalog section the
//! model can read: call format, then every tool with its JSON schema, then the
//! readable resources.

use super::protocol::{TOOL_CALL_CLOSE, TOOL_CALL_OPEN, TOOL_RESULT_OPEN};
use crate::tools::{ResourceDescriptor, ToolDefinition};

/// Heading that opens the catalog section
pub const TOOLS_HEADING: &str = "## Available Tools";

const RESOURCES_HEADING: &str = "## Available Resources";

/// Render the tool and resource catalog for the model
pub fn render_catalog(tools: &[ToolDefinition], resources: &[ResourceDescriptor]) -> String {
    let mut out = String::new();
    out.push_str(TOOLS_HEADING);
    out.push_str("\n\n");
    out.push_str(&format!(
        "To call a tool, write a block of the form\n{}{{\"name\": \"<tool>\", \"params\": {{...}}}}{}\n",
        TOOL_CALL_OPEN, TOOL_CALL_CLOSE
    ));
    out.push_str(&format!(
        "You may write several blocks in one reply. Results come back in {} sections.\n",
        TOOL_RESULT_OPEN
    ));

    if tools.is_empty() {
        out.push_str("\nNo tools are currently available.\n");
    }
    for tool in tools {
        out.push_str(&format!("\n### {}\n", tool.name));
        if !tool.description.is_empty() {
            out.push_str(&tool.description);
            out.push('\n');
        }
        let schema = serde_json::to_string(&tool.input_schema.to_json_schema())
            .unwrap_or_else(|_| "{}".to_string());
        out.push_str(&format!("Parameters: {}\n", schema));
    }

    if !resources.is_empty() {
        out.push_str(&format!("\n{}\n\n", RESOURCES_HEADING));
        for resource in resources {
            out.push_str(&format!("- {} ({})", resource.uri, resource.name));
            if let Some(mime) = &resource.mime_type {
                out.push_str(&format!(" [{}]", mime));
            }
            if let Some(description) = &resource.description {
                out.push_str(&format!(": {}", description));
            }
            out.push('\n');
        }
    }

    out.trim_end().to_string()
}

/// Combine the base prompt with the catalog. Returns `None` when there is
/// nothing to send.
pub fn build_system_prompt(
    base: Option<&str>,
    enable_tools: bool,
    tools: &[ToolDefinition],
    resources: &[ResourceDescriptor],
) -> Option<String> {
    let base = base.map(str::trim).filter(|b| !b.is_empty());
    match (base, enable_tools) {
        (None, false) => None,
        (Some(base), false) => Some(base.to_string()),
        (None, true) => Some(render_catalog(tools, resources)),
        (Some(base), true) => Some(format!("{}\n\n{}", base, render_catalog(tools, resources))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParamType, PropertySchema, ToolSchema};

    fn query_tool() -> ToolDefinition {
        ToolDefinition::new("query", "Run a read-only SQL query").with_schema(
            ToolSchema::empty().required_property("sql", PropertySchema::of_type(ParamType::String)),
        )
    }

    #[test]
    fn test_catalog_lists_tools_and_resources() {
        let resources = vec![
            ResourceDescriptor::new("db://schema", "Schema")
                .with_mime_type("text/plain")
                .with_description("Table layout"),
        ];
        let catalog = render_catalog(&[query_tool()], &resources);

        assert!(catalog.starts_with(TOOLS_HEADING));
        assert!(catalog.contains("### query"));
        assert!(catalog.contains("\"required\":[\"sql\"]"));
        assert!(catalog.contains("- db://schema (Schema) [text/plain]: Table layout"));
        assert!(catalog.contains(TOOL_CALL_OPEN));
    }

    #[test]
    fn test_system_prompt_without_tools_has_no_catalog() {
        assert_eq!(build_system_prompt(None, false, &[query_tool()], &[]), None);
        assert_eq!(build_system_prompt(Some("  "), false, &[], &[]), None);

        let prompt = build_system_prompt(Some("Be brief."), false, &[query_tool()], &[]).unwrap();
        assert_eq!(prompt, "Be brief.");
    }

    #[test]
    fn test_system_prompt_with_tools_appends_catalog() {
        let prompt = build_system_prompt(Some("Be brief."), true, &[query_tool()], &[]).unwrap();
        assert!(prompt.starts_with("Be brief.\n\n## Available Tools"));

        let prompt = build_system_prompt(None, true, &[], &[]).unwrap();
        assert!(prompt.contains("No tools are currently available."));
    }
}
