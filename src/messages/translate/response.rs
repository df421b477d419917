//! C4: upstream non-streaming response → Anthropic response.

use serde_json::Value;
use uuid::Uuid;

use crate::messages::anthropic as a;
use crate::messages::openai as o;

/// Translates a complete upstream response into an Anthropic response,
/// echoing `caller_model` (the model string the caller originally sent)
/// rather than whatever model id the upstream reports.
pub fn translate_response(upstream: &o::Response, caller_model: &str) -> a::Response {
    let choice = upstream.choices.first();

    let mut content = Vec::new();
    if let Some(choice) = choice {
        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(a::ResponseContentBlock::Text { text: text.clone() });
            }
        }
        if let Some(tool_calls) = &choice.message.tool_calls {
            for call in tool_calls {
                content.push(a::ResponseContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input: parse_tool_arguments(&call.function.arguments),
                });
            }
        }
    }
    if content.is_empty() {
        content.push(a::ResponseContentBlock::Text { text: String::new() });
    }

    let stop_reason = choice.and_then(|c| c.finish_reason.as_deref()).map(map_finish_reason);

    let usage = upstream.usage.as_ref();
    let id = upstream
        .id
        .clone()
        .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple()));

    a::Response {
        id,
        kind: "message".to_string(),
        role: a::Role::Assistant,
        model: caller_model.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: a::Usage {
            input_tokens: usage.map(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens: usage.map(|u| u.completion_tokens).unwrap_or(0),
        },
    }
}

/// Parses a tool call's JSON-string arguments into an object. On parse
/// failure, the raw string is preserved under `_raw_arguments` rather than
/// failing the whole response.
fn parse_tool_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({ "_raw_arguments": raw }))
}

pub fn map_finish_reason(reason: &str) -> a::StopReason {
    match reason {
        "stop" => a::StopReason::EndTurn,
        "length" => a::StopReason::MaxTokens,
        "tool_calls" | "function_call" => a::StopReason::ToolUse,
        "content_filter" => a::StopReason::ContentFiltered,
        _ => a::StopReason::EndTurn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_text_round_trip() {
        let upstream = o::Response {
            id: None,
            model: "gpt-4o-mini".to_string(),
            choices: vec![o::Choice {
                index: 0,
                message: o::ResponseMessage {
                    role: o::Role::Assistant,
                    content: Some("Hello".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
            }],
            usage: Some(o::Usage { prompt_tokens: 3, completion_tokens: 1, total_tokens: 4 }),
        };
        let resp = translate_response(&upstream, "claude-3-haiku");
        assert_eq!(resp.model, "claude-3-haiku");
        assert_eq!(resp.stop_reason, Some(a::StopReason::EndTurn));
        assert_eq!(resp.usage.input_tokens, 3);
        assert_eq!(resp.usage.output_tokens, 1);
        match &resp.content[0] {
            a::ResponseContentBlock::Text { text } => assert_eq!(text, "Hello"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tool_call_response_parses_arguments_and_maps_stop_reason() {
        let upstream = o::Response {
            id: Some("resp1".to_string()),
            model: "gpt-4o-mini".to_string(),
            choices: vec![o::Choice {
                index: 0,
                message: o::ResponseMessage {
                    role: o::Role::Assistant,
                    content: None,
                    tool_calls: Some(vec![o::ToolCall {
                        id: "c1".to_string(),
                        kind: "function".to_string(),
                        function: o::FunctionCall {
                            name: "get_weather".to_string(),
                            arguments: r#"{"city":"SF"}"#.to_string(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            usage: None,
        };
        let resp = translate_response(&upstream, "claude-3-haiku");
        assert_eq!(resp.stop_reason, Some(a::StopReason::ToolUse));
        match &resp.content[0] {
            a::ResponseContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "get_weather");
                assert_eq!(input, &json!({"city": "SF"}));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_tool_arguments_fall_back_to_raw_wrapper() {
        let value = parse_tool_arguments("not json");
        assert_eq!(value, json!({"_raw_arguments": "not json"}));
    }

    #[test]
    fn empty_upstream_message_yields_single_empty_text_block() {
        let upstream = o::Response {
            id: None,
            model: "gpt-4o-mini".to_string(),
            choices: vec![o::Choice {
                index: 0,
                message: o::ResponseMessage { role: o::Role::Assistant, content: None, tool_calls: None },
                finish_reason: Some("stop".to_string()),
            }],
            usage: None,
        };
        let resp = translate_response(&upstream, "claude-3-haiku");
        assert_eq!(resp.content.len(), 1);
        assert!(matches!(&resp.content[0], a::ResponseContentBlock::Text { text } if text.is_empty()));
    }
}
