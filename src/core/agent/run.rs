use serde_json::{json, Value};
use std::time::Instant;

use crate::adapters::llm::{TokenUsage, ToolCall};
use crate::core::ports::llm::{ChatMessage, CompletionRequest, ToolDefinition, Turn};
use crate::core::ports::tools::ToolOutcome;
use crate::error::CheckError;

use super::budget::StepBudget;
use super::events::{emit_done, emit_run_state, emit_tool_result, emit_tool_start};
use super::instructions::{seed_message, SYSTEM_INSTRUCTIONS};
use super::report::{CheckOutput, ComplianceReport};
use super::scope::Scope;
use super::state::AgentState;
use super::Agent;

pub struct RunRequest<'a> {
    pub rule: &'a str,
    pub scope: &'a Scope,
    pub limit: Option<u32>,
    pub model_id: &'a str,
    pub api_key: &'a str,
    pub budget: StepBudget,
    /// Start of the run as reported in `duration_ms`, taken before the
    /// query server was launched.
    pub started: Instant,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub state: AgentState,
    pub output: CheckOutput,
    /// Reasoning-engine round-trips made.
    pub steps: u32,
    pub tool_calls: u32,
    pub duration_ms: u64,
    pub token_usage: TokenUsage,
    pub transcript: Vec<ChatMessage>,
}

struct RunContext<'a> {
    run_id: String,
    started: Instant,
    scope: &'a Scope,
    token_usage: TokenUsage,
    messages: Vec<ChatMessage>,
}

// Tool arguments that are not a JSON object are sent as `{}`.
fn parse_tool_args(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => json!({}),
    }
}

impl Agent {
    fn fail(&self, ctx: &RunContext<'_>, step: u32, error: CheckError) -> CheckError {
        log::error!("run {} failed at step {step}: {error}", ctx.run_id);
        emit_run_state(
            self.emitter.as_ref(),
            &ctx.run_id,
            AgentState::Failed,
            step,
            Some(&error.to_string()),
        );
        error
    }

    fn finish(
        &self,
        ctx: RunContext<'_>,
        step: u32,
        state: AgentState,
        reason: Option<&str>,
        output: CheckOutput,
    ) -> RunOutcome {
        let tool_calls = self.tools.tool_call_count();
        let duration_ms = ctx.started.elapsed().as_millis() as u64;

        emit_run_state(self.emitter.as_ref(), &ctx.run_id, state, step, reason);
        emit_done(
            self.emitter.as_ref(),
            &ctx.run_id,
            state,
            step,
            tool_calls,
            duration_ms,
        );

        RunOutcome {
            run_id: ctx.run_id,
            state,
            output,
            steps: step,
            tool_calls,
            duration_ms,
            token_usage: ctx.token_usage,
            transcript: ctx.messages,
        }
    }

    async fn execute_one_tool(
        &self,
        ctx: &RunContext<'_>,
        step: u32,
        tc: &ToolCall,
    ) -> Result<ToolOutcome, CheckError> {
        let args = parse_tool_args(&tc.function.arguments);
        emit_tool_start(
            self.emitter.as_ref(),
            &ctx.run_id,
            step,
            &tc.id,
            &tc.function.name,
            &args,
        );

        let outcome = self.tools.invoke(&tc.function.name, args).await?;
        if outcome.is_error {
            log::info!("tool {} reported an error: {}", tc.function.name, outcome.content);
        }

        emit_tool_result(
            self.emitter.as_ref(),
            &ctx.run_id,
            step,
            &tc.id,
            &tc.function.name,
            outcome.is_error,
            &outcome.content,
        );
        Ok(outcome)
    }

    /// Drives one compliance check to a terminal state.
    ///
    /// The tool catalog is fetched once. Each step is one round-trip to the
    /// model; requested tool calls run sequentially in the order given and their
    /// results, failures included, are appended before the next round-trip.
    /// Running out of steps or receiving an empty turn yields a degraded FAIL
    /// report instead of an error.
    pub async fn run(&self, request: RunRequest<'_>) -> Result<RunOutcome, CheckError> {
        let mut ctx = RunContext {
            run_id: uuid::Uuid::new_v4().to_string(),
            started: request.started,
            scope: request.scope,
            token_usage: TokenUsage::default(),
            messages: vec![
                ChatMessage::system(SYSTEM_INSTRUCTIONS),
                ChatMessage::user(seed_message(request.rule, request.scope, request.limit)),
            ],
        };

        emit_run_state(
            self.emitter.as_ref(),
            &ctx.run_id,
            AgentState::Seeded,
            0,
            None,
        );

        let catalog = match self.tools.list_tools().await {
            Ok(catalog) => catalog,
            Err(error) => return Err(self.fail(&ctx, 0, error)),
        };
        let tools: Vec<ToolDefinition> = catalog.iter().map(|tool| tool.to_definition()).collect();
        log::debug!(
            "run {}: {} tools available, budget {} steps",
            ctx.run_id,
            tools.len(),
            request.budget.max_steps
        );

        for step in 1..=request.budget.max_steps {
            emit_run_state(
                self.emitter.as_ref(),
                &ctx.run_id,
                AgentState::AwaitingTurn,
                step,
                None,
            );

            let completion = self
                .llm
                .complete(CompletionRequest {
                    api_key: request.api_key,
                    model_id: request.model_id,
                    messages: &ctx.messages,
                    tools: &tools,
                })
                .await;
            let completion = match completion {
                Ok(completion) => completion,
                Err(error) => return Err(self.fail(&ctx, step, error)),
            };
            ctx.token_usage.saturating_add_assign(&completion.usage);

            match completion.turn {
                Turn::Final(text) => {
                    ctx.messages.push(ChatMessage::assistant(text.clone()));
                    return Ok(self.finish(ctx, step, AgentState::Done, None, CheckOutput::Answer(text)));
                }
                Turn::Malformed => {
                    log::warn!("run {}: empty model turn at step {step}", ctx.run_id);
                    let report =
                        ComplianceReport::malformed_turn(step, self.tools.tool_call_count(), ctx.scope);
                    return Ok(self.finish(
                        ctx,
                        step,
                        AgentState::BudgetExhausted,
                        Some("malformed_turn"),
                        CheckOutput::Degraded(report),
                    ));
                }
                Turn::ToolCalls { text, calls } => {
                    let call_count = calls.len().to_string();
                    emit_run_state(
                        self.emitter.as_ref(),
                        &ctx.run_id,
                        AgentState::ExecutingTools,
                        step,
                        Some(&call_count),
                    );
                    ctx.messages
                        .push(ChatMessage::assistant_tool_calls(text, calls.clone()));

                    for tc in &calls {
                        let outcome = match self.execute_one_tool(&ctx, step, tc).await {
                            Ok(outcome) => outcome,
                            Err(error) => return Err(self.fail(&ctx, step, error)),
                        };
                        ctx.messages.push(ChatMessage::tool_result(
                            tc,
                            outcome.for_model(),
                            outcome.is_error,
                        ));
                    }
                }
            }
        }

        let max_steps = request.budget.max_steps;
        log::warn!("run {}: step budget of {max_steps} exhausted", ctx.run_id);
        let report =
            ComplianceReport::budget_exhausted(max_steps, self.tools.tool_call_count(), ctx.scope);
        Ok(self.finish(
            ctx,
            max_steps,
            AgentState::BudgetExhausted,
            Some("step_budget_exhausted"),
            CheckOutput::Degraded(report),
        ))
    }
}
