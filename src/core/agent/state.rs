use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Seeded,
    AwaitingTurn,
    ExecutingTools,
    Done,
    BudgetExhausted,
    Failed,
}

impl AgentState {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Seeded => "seeded",
            AgentState::AwaitingTurn => "awaiting_turn",
            AgentState::ExecutingTools => "executing_tools",
            AgentState::Done => "done",
            AgentState::BudgetExhausted => "budget_exhausted",
            AgentState::Failed => "failed",
        }
    }
}
