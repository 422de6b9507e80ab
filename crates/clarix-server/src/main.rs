//! Clarix MCP Server
//!
//! Model Context Protocol server that answers natural language questions by
//! having a language model write DuckDB SQL and running it against a store
//! materialized from CSV files at startup.

use anyhow::{Context, Result};
use clarix_duck::QueryExecutor;
use rust_mcp_sdk::mcp_server::{hyper_server, HyperServerOptions};
use std::sync::Arc;
use tracing::info;

mod catalog;
mod config;
mod llm;
mod logging;
mod mcp;
mod query;
mod tool;

use config::Config;
use llm::{OpenAiCompletionModel, SqlSynthesizer};
use query::StoreGateway;
use tool::QueryTool;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CLARIX_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path))?;

    config.apply_logging_env();
    logging::init();
    info!(config = %config_path, "Configuration loaded");

    let schema = Arc::new(catalog::load_schema(&config)?);
    let rules = Arc::new(catalog::load_rules(&config)?);

    let store = config.store.descriptor();
    catalog::materialize(&config, &store)?;
    catalog::check_drift(&schema, &store)?;

    let api_key = Config::get_openai_api_key()?;
    info!(
        "OpenAI API key loaded: {}...",
        api_key.chars().take(8).collect::<String>()
    );
    info!(
        model = %config.model.name,
        max_tokens = config.model.max_tokens,
        timeout_secs = config.model.timeout_secs,
        "Using language model"
    );

    let model = Arc::new(OpenAiCompletionModel::new(api_key, &config.model));
    let synthesizer = SqlSynthesizer::new(model, config.model.timeout());
    let gateway = StoreGateway::new(
        QueryExecutor::new(store).with_budget(config.store.budget()),
        config.store.timeout(),
    );
    let tool = Arc::new(QueryTool::new(schema, rules, synthesizer, gateway));

    let handler = mcp::ClarixServerHandler::new(tool);
    let server_info = mcp::ClarixServerHandler::server_info();

    info!(
        "Starting Clarix MCP server on {}:{}",
        config.server.host, config.server.port
    );
    info!("Protocol: MCP with SSE (Server-Sent Events) support");

    let server = hyper_server::create_server(
        server_info,
        handler,
        HyperServerOptions {
            host: config.server.host.clone(),
            port: config.server.port,
            sse_support: true,
            ..Default::default()
        },
    );

    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server stopped: {}", e))?;

    Ok(())
}
