use serde_json::{json, Value};

use crate::core::ports::emitter::EmitterPort;

use super::state::AgentState;

pub(super) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(super) fn emit_run_state(
    emitter: &dyn EmitterPort,
    run_id: &str,
    state: AgentState,
    step: u32,
    reason: Option<&str>,
) {
    let mut payload = serde_json::Map::new();
    payload.insert("run_id".to_string(), json!(run_id));
    payload.insert("state".to_string(), json!(state.as_str()));
    payload.insert("step".to_string(), json!(step));
    payload.insert("ts".to_string(), json!(now_iso()));
    if let Some(reason) = reason {
        payload.insert("reason".to_string(), json!(reason));
    }

    emitter.emit("agent:run_state", &Value::Object(payload));
}

pub(super) fn emit_tool_start(
    emitter: &dyn EmitterPort,
    run_id: &str,
    step: u32,
    call_id: &str,
    tool: &str,
    args: &Value,
) {
    emitter.emit(
        "agent:tool_start",
        &json!({
            "run_id": run_id,
            "id": call_id,
            "step": step,
            "tool": tool,
            "args": args,
            "ts": now_iso(),
        }),
    );
}

pub(super) fn emit_tool_result(
    emitter: &dyn EmitterPort,
    run_id: &str,
    step: u32,
    call_id: &str,
    tool: &str,
    is_error: bool,
    content: &str,
) {
    emitter.emit(
        "agent:tool_result",
        &json!({
            "run_id": run_id,
            "id": call_id,
            "step": step,
            "tool": tool,
            "is_error": is_error,
            "result_preview": preview(content, 200),
            "ts": now_iso(),
        }),
    );
}

pub(super) fn emit_done(
    emitter: &dyn EmitterPort,
    run_id: &str,
    state: AgentState,
    steps: u32,
    tool_calls: u32,
    duration_ms: u64,
) {
    emitter.emit(
        "agent:done",
        &json!({
            "run_id": run_id,
            "state": state.as_str(),
            "steps": steps,
            "tool_calls": tool_calls,
            "duration_ms": duration_ms,
            "ts": now_iso(),
        }),
    );
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ääääää", 3), "äää...");
    }
}
