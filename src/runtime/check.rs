use std::sync::Arc;
use std::time::Instant;

use crate::adapters::config::CheckConfig;
use crate::adapters::mcp::McpClient;
use crate::core::agent::{Agent, RunOutcome, RunRequest};
use crate::core::ports::emitter::EmitterPort;
use crate::core::ports::llm::LlmPort;
use crate::error::CheckError;

/// Opens the MCP server, runs one check, and shuts the server down again
/// whether the run succeeded or not. The reported duration includes the
/// server start-up.
pub async fn run_check(
    config: &CheckConfig,
    llm: Arc<dyn LlmPort>,
    emitter: Arc<dyn EmitterPort>,
) -> Result<RunOutcome, CheckError> {
    let started = Instant::now();
    log::info!("starting `{}`", config.server.display_command());
    let client = Arc::new(McpClient::open(&config.server).await?);

    let agent = Agent::new(client.clone(), llm, emitter);
    let result = agent
        .run(RunRequest {
            rule: &config.rule,
            scope: &config.scope,
            limit: config.limit,
            model_id: &config.model_id,
            api_key: &config.api_key,
            budget: config.budget,
            started,
        })
        .await;

    client.shutdown().await;
    result
}
