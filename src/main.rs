use std::{collections::HashMap, sync::Arc};

use mcp_session_server::{
    auth::BearerTokenAuthenticator,
    config::Config,
    domain::{
        completion::Argument,
        content::ToolOutput,
        prompts::Prompt,
        resources::{Resource, ResourceOutput, ResourceTemplate},
        tools::{Tool, ToolContext},
    },
    errors::HandlerError,
    logging,
    server::ServerInfo,
    McpServer,
};
use rust_mcp_sdk::schema::ToolAnnotations;
use serde_json::{json, Value};
use tracing::info;

const NOTES: [(&str, &str); 3] = [
    ("welcome", "This server exposes a small notebook over MCP."),
    ("protocol", "Requests are JSON-RPC 2.0; see tools/list for what is available."),
    ("roadmap", "Nothing planned yet."),
];

fn add_numbers_tool() -> Tool {
    Tool::new("add", |args: Value, ctx: ToolContext| async move {
        let a = args["a"].as_f64().unwrap_or_default();
        let b = args["b"].as_f64().unwrap_or_default();
        ctx.log()
            .debug("adding numbers", Some(json!({"a": a, "b": b})))
            .await;
        Ok::<_, HandlerError>(ToolOutput::Text((a + b).to_string()))
    })
    .description("Adds two numbers")
    .parameters(json!({
        "type": "object",
        "properties": {
            "a": {"type": "number"},
            "b": {"type": "number"}
        },
        "required": ["a", "b"]
    }))
    .annotations(ToolAnnotations {
        title: Some("Add".to_string()),
        read_only_hint: Some(true),
        ..ToolAnnotations::default()
    })
}

fn count_words_tool() -> Tool {
    Tool::new("count_words", |args: Value, ctx: ToolContext| async move {
        let Some(text) = args["text"].as_str() else {
            return Err(HandlerError::user("`text` must be a string"));
        };
        let lines = text.lines().collect::<Vec<_>>();
        let mut words = 0;
        for (index, line) in lines.iter().enumerate() {
            words += line.split_whitespace().count();
            ctx.report_progress((index + 1) as f64, Some(lines.len() as f64))
                .await;
        }
        Ok(ToolOutput::Text(words.to_string()))
    })
    .description("Counts the words in a text, reporting progress per line")
    .parameters(json!({
        "type": "object",
        "properties": {"text": {"type": "string"}},
        "required": ["text"]
    }))
}

fn note_names() -> Vec<String> {
    NOTES.iter().map(|(name, _)| name.to_string()).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let config = Config::from_env()?;

    let mut server = McpServer::new(
        ServerInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            .instructions("Use the notes resources for context before calling tools."),
    )
    .session_config(config.session_config());
    if let Some(token) = config.api_token.clone() {
        server = server.authenticator(Arc::new(BearerTokenAuthenticator::new(token)));
    }

    server
        .add_tool(add_numbers_tool())?
        .add_tool(count_words_tool())?
        .add_resource(
            Resource::new("notes://index", "Note index", || async {
                Ok::<_, HandlerError>(ResourceOutput::from(note_names().join("\n")))
            })
            .description("Names of every note")
            .mime_type("text/plain"),
        )?
        .add_resource_template(
            ResourceTemplate::new(
                "notes://{name}",
                "Note",
                |args: HashMap<String, String>| async move {
                    let name = args.get("name").cloned().unwrap_or_default();
                    NOTES
                        .iter()
                        .find(|(candidate, _)| *candidate == name)
                        .map(|(_, body)| ResourceOutput::from(*body))
                        .ok_or_else(|| HandlerError::user(format!("no note named `{name}`")))
                },
            )?
            .mime_type("text/plain")
            .argument(Argument::new("name").enum_values(note_names())),
        )?
        .add_prompt(
            Prompt::new("summarize_note", |args: HashMap<String, String>| async move {
                let name = args.get("name").cloned().unwrap_or_default();
                let style = args.get("style").cloned().unwrap_or_else(|| "brief".to_string());
                Ok::<_, HandlerError>(format!(
                    "Read notes://{name} and write a {style} summary of it."
                ))
            })
            .description("Asks for a summary of one note")
            .argument(
                Argument::new("name")
                    .description("Note to summarize")
                    .required(true)
                    .enum_values(note_names()),
            )
            .argument(Argument::new("style").enum_values(["brief", "detailed", "bullet points"])),
        )?;

    info!(transport = ?config.transport, "configuration loaded");
    server.start(config.start_options()).await?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("interrupt received");
        }
        _ = server.stopped() => {}
    }

    server.stop().await;
    Ok(())
}
