use serde_json::Value;

/// Sink for run lifecycle events, keyed by channel name (`agent:run_state`, ...).
pub trait EmitterPort: Send + Sync {
    fn emit(&self, channel: &str, payload: &Value);
}
