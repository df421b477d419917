//! C10: best-effort `/v1/messages/count_tokens` collaborator.
//!
//! Runs the caller's request through C3's message-flattening logic (without
//! dispatching upstream) and estimates a token count over the flattened text
//! with a local BPE tokenizer. Per §6, this collaborator's availability is
//! not guaranteed: if no tokenizer can be loaded, callers get a `501` rather
//! than a fabricated number.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

use crate::error::ProxyError;
use crate::messages::anthropic as a;
use crate::messages::openai as o;
use crate::messages::translate::translate_request;

fn tokenizer() -> Option<&'static CoreBPE> {
    static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()).as_ref()
}

/// Estimates `input_tokens` for a `count_tokens` request without dispatching
/// it upstream. The model id in the request is not resolved through the
/// router; flattening only depends on message/system/tool shape, not the
/// target provider.
pub fn count_tokens(req: &a::CountTokensRequest) -> Result<u32, ProxyError> {
    let Some(bpe) = tokenizer() else {
        return Err(ProxyError::NotImplemented(
            "no tokenizer is loaded for the active model family".to_string(),
        ));
    };

    let full_request = req.clone().into_full_request();
    let upstream = translate_request(&full_request, &full_request.model);
    let flattened = flatten(&upstream);
    Ok(bpe.encode_with_special_tokens(&flattened).len() as u32)
}

/// Concatenates every piece of text the upstream request carries: message
/// content, tool-call arguments, and tool declarations. Over-counting
/// structural JSON characters is acceptable for a best-effort estimate.
fn flatten(req: &o::Request) -> String {
    let mut out = String::new();

    for message in &req.messages {
        if let Some(content) = &message.content {
            match content {
                o::UserContent::Text(text) => {
                    out.push_str(text);
                    out.push('\n');
                }
                o::UserContent::Parts(parts) => {
                    for part in parts {
                        if let o::UserContentPart::Text { text } = part {
                            out.push_str(text);
                            out.push('\n');
                        }
                    }
                }
            }
        }
        if let Some(tool_calls) = &message.tool_calls {
            for call in tool_calls {
                out.push_str(&call.function.name);
                out.push('\n');
                out.push_str(&call.function.arguments);
                out.push('\n');
            }
        }
    }

    if let Some(tools) = &req.tools {
        for tool in tools {
            out.push_str(&tool.function.name);
            out.push('\n');
            if let Some(description) = &tool.function.description {
                out.push_str(description);
                out.push('\n');
            }
            out.push_str(&tool.function.parameters.to_string());
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> a::CountTokensRequest {
        a::CountTokensRequest {
            model: "claude-3-haiku".to_string(),
            messages: vec![a::InputMessage {
                role: a::Role::User,
                content: a::MessageContent::Text("Hello, world!".to_string()),
            }],
            system: None,
            tools: None,
            tool_choice: None,
        }
    }

    #[test]
    fn counts_a_positive_number_of_tokens_for_nonempty_input() {
        let count = count_tokens(&base_request()).expect("tokenizer should load");
        assert!(count > 0);
    }

    #[test]
    fn longer_input_counts_at_least_as_many_tokens() {
        let mut longer = base_request();
        longer.messages[0].content =
            a::MessageContent::Text("Hello, world! This is quite a bit more text than before.".to_string());
        let short = count_tokens(&base_request()).unwrap();
        let long = count_tokens(&longer).unwrap();
        assert!(long > short);
    }

    #[test]
    fn max_tokens_is_absent_from_the_wire_body_and_still_counts() {
        let json = serde_json::json!({
            "model": "claude-3-haiku",
            "messages": [{ "role": "user", "content": "hi" }]
        });
        let req: a::CountTokensRequest = serde_json::from_value(json).expect("max_tokens is optional here");
        assert!(count_tokens(&req).unwrap() > 0);
    }
}
