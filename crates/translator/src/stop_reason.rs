//! Stop-reason mapping: a pure table, testable in isolation, grounded on
//! the teacher's inline `match` arms in `claude_to_openai::translate_non_stream`
//! (reversed: OpenAI `finish_reason` → Anthropic `stop_reason`).

/// `stop -> end_turn`, `length -> max_tokens`, `tool_calls -> tool_use`,
/// `content_filter -> refusal`, anything else passes through unchanged.
pub fn openai_finish_reason_to_anthropic_stop_reason(finish_reason: &str) -> String {
    match finish_reason {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" => "tool_use".to_string(),
        "content_filter" => "refusal".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_reasons() {
        assert_eq!(openai_finish_reason_to_anthropic_stop_reason("stop"), "end_turn");
        assert_eq!(openai_finish_reason_to_anthropic_stop_reason("length"), "max_tokens");
        assert_eq!(openai_finish_reason_to_anthropic_stop_reason("tool_calls"), "tool_use");
        assert_eq!(openai_finish_reason_to_anthropic_stop_reason("content_filter"), "refusal");
    }

    #[test]
    fn passes_through_unknown_reasons() {
        assert_eq!(openai_finish_reason_to_anthropic_stop_reason("something_new"), "something_new");
    }
}
