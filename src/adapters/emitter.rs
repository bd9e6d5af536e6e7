use serde_json::Value;

use crate::core::ports::emitter::EmitterPort;

/// Writes run events to the `log` facade.
pub struct LogEmitter;

impl EmitterPort for LogEmitter {
    fn emit(&self, channel: &str, payload: &Value) {
        match channel {
            "agent:done" => log::info!("{channel} {payload}"),
            "agent:run_state" if payload["state"] == "failed" => {
                log::warn!("{channel} {payload}")
            }
            _ => log::debug!("{channel} {payload}"),
        }
    }
}
