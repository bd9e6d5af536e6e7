pub const DEFAULT_MAX_STEPS: u32 = 25;

/// Ceiling on reasoning-engine round-trips for one run.
///
/// Only round-trips are counted. A single turn may request any number of tool
/// calls without consuming more than one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepBudget {
    pub max_steps: u32,
}

impl Default for StepBudget {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

impl StepBudget {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_budget_is_twenty_five_round_trips() {
        assert_eq!(StepBudget::default().max_steps, 25);
    }
}
