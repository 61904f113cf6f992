use serde_json::Value;

use crate::frames::RunMetadata;

/// Concatenate the text of every `"text"` content block in an assistant
/// payload, in order. Any shape mismatch yields an empty string.
pub fn assistant_text(payload: &Value) -> String {
    let Some(blocks) = payload
        .get("message")
        .and_then(|msg| msg.get("content"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };

    let mut text = String::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) == Some("text") {
            if let Some(part) = block.get("text").and_then(Value::as_str) {
                text.push_str(part);
            }
        }
    }
    text
}

/// Pull run statistics out of a `result` payload. Missing keys simply leave
/// the corresponding field absent.
pub fn run_metadata(payload: &Value) -> RunMetadata {
    let usage = payload.get("usage");
    RunMetadata {
        token_count: field_u64(usage, "output_tokens"),
        input_tokens: field_u64(usage, "input_tokens"),
        cache_read_tokens: field_u64(usage, "cache_read_input_tokens"),
        duration_ms: payload.get("duration_ms").and_then(Value::as_u64),
        duration_api_ms: payload.get("duration_api_ms").and_then(Value::as_u64),
        cost_usd: payload.get("total_cost_usd").and_then(Value::as_f64),
        agent_session_id: payload
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        num_turns: payload.get("num_turns").and_then(Value::as_u64),
    }
}

fn field_u64(object: Option<&Value>, key: &str) -> Option<u64> {
    object.and_then(|obj| obj.get(key)).and_then(Value::as_u64)
}
