mod budget;
mod events;
pub mod instructions;
pub mod report;
pub mod run;
pub mod scope;
pub mod state;

use std::sync::Arc;

use crate::core::ports::{emitter::EmitterPort, llm::LlmPort, tools::ToolPort};

pub use budget::{StepBudget, DEFAULT_MAX_STEPS};
pub use report::{CheckOutput, ComplianceReport, ComplianceStatus};
pub use run::{RunOutcome, RunRequest};
pub use scope::Scope;
pub use state::AgentState;

pub struct Agent {
    pub(crate) tools: Arc<dyn ToolPort>,
    pub(crate) llm: Arc<dyn LlmPort>,
    pub(crate) emitter: Arc<dyn EmitterPort>,
}

impl Agent {
    pub fn new(
        tools: Arc<dyn ToolPort>,
        llm: Arc<dyn LlmPort>,
        emitter: Arc<dyn EmitterPort>,
    ) -> Self {
        Self {
            tools,
            llm,
            emitter,
        }
    }
}
