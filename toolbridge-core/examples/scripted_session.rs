//! Scripted Session
//!
//! Runs the whole stack without a real model: a plugin is registered and
//! loaded, its tools are served through a policy-enforcing executor, and a
//! scripted "model" asks for tool calls that the bridge executes.
//!
//! Run with `RUST_LOG=debug` to see the pipeline's tracing output.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use toolbridge_core::prelude::*;

/// Stand-in model that replays fixed replies
struct ScriptedModel {
    replies: Mutex<VecDeque<&'static str>>,
}

impl ScriptedModel {
    fn new(replies: &[&'static str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().copied().collect()),
        }
    }

    fn next_reply(&self) -> String {
        self.replies
            .lock()
            .ok()
            .and_then(|mut r| r.pop_front())
            .unwrap_or("I have nothing more to add.")
            .to_string()
    }
}

#[async_trait]
impl LLMProvider for ScriptedModel {
    async fn generate(&self, _request: &LLMRequest) -> Result<LLMResponse> {
        Ok(LLMResponse::new(self.next_reply()))
    }

    async fn generate_stream(&self, _request: &LLMRequest) -> Result<LLMStream> {
        // Emit in small pieces so markers get split across chunks
        let reply = self.next_reply();
        let chunks: Vec<Result<String>> = reply
            .chars()
            .collect::<Vec<_>>()
            .chunks(7)
            .map(|c| Ok(c.iter().collect()))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: "scripted".to_string(),
            model_name: "example".to_string(),
        }
    }
}

fn weather_tools() -> StaticCatalog {
    let forecast = ToolDefinition::new("forecast", "Weather forecast for a city").with_schema(
        ToolSchema::empty()
            .required_property(
                "city",
                PropertySchema::of_type(ParamType::String).with_length(Some(1), Some(64)),
            )
            .optional_property(
                "days",
                PropertySchema::of_type(ParamType::Integer).with_range(Some(1.0), Some(7.0)),
            ),
    );

    StaticCatalog::new()
        .with_fn(forecast, |params| async move {
            let days = params["days"].as_u64().unwrap_or(1);
            Ok(json!({ "city": params["city"], "days": days, "summary": "sunny" }))
        })
        .with_fn(
            ToolDefinition::new("reset-station", "Reset a weather station"),
            |_| async { Ok(json!("reset")) },
        )
        .with_resource(
            ResourceDescriptor::new("weather://stations", "Stations").with_mime_type("text/plain"),
            "lisbon\nporto",
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    println!("Toolbridge scripted session (v{})", toolbridge_core::VERSION);
    println!("=================================\n");

    // 1. Registry
    let registry = Arc::new(PluginRegistry::default());
    registry
        .register_handler("weather", Arc::new(weather_tools()))
        .await;
    registry
        .load(
            PluginMetadata::new("weather", "0.4.1")
                .with_description("Forecasts and station data")
                .with_capability("tools")
                .with_capability("resources"),
        )
        .await?;
    registry.enable("weather").await?;
    println!("Loaded plugins: {:?}\n", registry.statistics().await.by_state);

    // 2. Executor with a policy
    let config = ConfigBuilder::new()
        .security(
            SecurityPolicy::permissive()
                .deny("reset-station")
                .with_rate_limit(20, Duration::from_secs(60)),
        )
        .system_prompt("You are a concise weather assistant.")
        .build();
    let executor = Arc::new(
        ToolExecutor::new(
            Arc::new(RegistryCatalog::new(registry.clone())),
            config.executor.clone(),
        )
        .await?,
    );

    // 3. Bridge over a scripted model
    let model = ScriptedModel::new(&[
        r#"Checking. [TOOL_CALL]{"name":"forecast","params":{"city":"Lisbon","days":3}}[/TOOL_CALL] [TOOL_CALL]{"name":"reset-station","params":{}}[/TOOL_CALL]"#,
        "Lisbon will be sunny for the next 3 days.",
        r#"One moment. [TOOL_CALL]{"name":"forecast","params":{"city":"Porto"}}[/TOOL_CALL]"#,
        "Porto is sunny today too.",
    ]);
    let bridge = LlmToolBridge::new(executor, Arc::new(model), config.bridge.clone()).await;

    let response = bridge
        .generate(GenerateOptions::new("What's the weather in Lisbon?"))
        .await?;
    println!("Answer: {}", response.content);
    println!("Iterations: {}", response.iterations);
    for call in &response.tool_calls {
        match &call.result.error {
            None => println!("  ✓ {} -> {}", call.name, call.result.result.clone().unwrap_or_default()),
            Some(error) => println!("  ✗ {} -> {}", call.name, error),
        }
    }

    // 4. Streaming
    println!("\nStreaming:");
    let mut stream = bridge.generate_stream(GenerateOptions::new("And in Porto?"));
    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::Text(text) => print!("{}", text),
            StreamEvent::ToolCall(call) => print!(" <{} ok={}> ", call.name, call.succeeded()),
            StreamEvent::Done(response) => println!("\n[done after {} iterations]", response.iterations),
        }
    }

    // 5. Resources and statistics
    let stations = bridge.access_resource("weather://stations").await?;
    println!("\nStations:\n{}", stations.text);

    let stats = bridge.get_statistics().await;
    println!(
        "\nGenerations: {}, tool calls: {}, cache hit rate: {:.2}",
        stats.generations, stats.tool_calls, stats.executor.hit_rate
    );

    Ok(())
}
