//! C3: Anthropic request → upstream request. Pure, no I/O.

use log::warn;
use serde_json::Value;

use crate::messages::anthropic as a;
use crate::messages::openai as o;

/// Translates an Anthropic `/v1/messages` request body into an upstream
/// Chat Completions request, targeting `upstream_model`.
pub fn translate_request(req: &a::Request, upstream_model: &str) -> o::Request {
    let mut messages = Vec::new();

    if let Some(system_message) = translate_system(req.system.as_ref()) {
        messages.push(o::Message::system(system_message));
    }

    for message in &req.messages {
        translate_message(message, &mut messages);
    }

    let tools = req.tools.as_ref().map(|tools| tools.iter().map(translate_tool).collect());
    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    o::Request {
        model: upstream_model.to_string(),
        messages,
        max_tokens: req.max_tokens,
        stream: req.stream,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        tools,
        tool_choice,
    }
}

/// Joins a system prompt's blocks with `\n`, trimming the result. Returns
/// `None` when no system prompt was given or the joined text is empty.
fn translate_system(system: Option<&a::SystemPrompt>) -> Option<String> {
    let joined = match system? {
        a::SystemPrompt::Text(text) => text.clone(),
        a::SystemPrompt::Blocks(blocks) => blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n"),
    };
    let trimmed = joined.trim();
    if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
}

fn translate_message(message: &a::InputMessage, out: &mut Vec<o::Message>) {
    match message.role {
        a::Role::User => translate_user_message(message, out),
        a::Role::Assistant => translate_assistant_message(message, out),
    }
}

fn translate_user_message(message: &a::InputMessage, out: &mut Vec<o::Message>) {
    let blocks = match &message.content {
        a::MessageContent::Text(text) => {
            out.push(o::Message::user(o::UserContent::Text(text.clone())));
            return;
        }
        a::MessageContent::Blocks(blocks) => blocks,
    };

    if blocks.is_empty() {
        out.push(o::Message::user(o::UserContent::Text(String::new())));
        return;
    }

    let mut parts = Vec::new();
    for block in blocks {
        match block {
            a::ContentBlock::ToolResult { tool_use_id, content, .. } => {
                out.push(o::Message::tool(tool_use_id.clone(), stringify_tool_result(content.as_ref())));
            }
            a::ContentBlock::Text { text } => parts.push(o::UserContentPart::Text { text: text.clone() }),
            a::ContentBlock::Image { source } => {
                let media_type = if source.media_type.is_empty() { "image/jpeg" } else { &source.media_type };
                parts.push(o::UserContentPart::ImageUrl {
                    image_url: o::ImageUrl {
                        url: format!("data:{media_type};base64,{}", source.data),
                        detail: None,
                    },
                });
            }
            a::ContentBlock::ToolUse { .. } => {}
        }
    }

    if !parts.is_empty() {
        let content = match <[_; 1]>::try_from(parts) {
            Ok([o::UserContentPart::Text { text }]) => o::UserContent::Text(text),
            Ok([part]) => o::UserContent::Parts(vec![part]),
            Err(parts) => o::UserContent::Parts(parts),
        };
        out.push(o::Message::user(content));
    }
}

fn stringify_tool_result(content: Option<&a::ToolResultContent>) -> String {
    match content {
        None => String::new(),
        Some(a::ToolResultContent::Text(text)) => text.clone(),
        Some(a::ToolResultContent::Blocks(blocks)) => {
            serde_json::to_string(blocks).unwrap_or_default()
        }
    }
}

fn translate_assistant_message(message: &a::InputMessage, out: &mut Vec<o::Message>) {
    let blocks: Vec<&a::ContentBlock> = match &message.content {
        a::MessageContent::Text(text) => {
            out.push(o::Message {
                role: o::Role::Assistant,
                content: Some(o::UserContent::Text(text.clone())),
                tool_calls: None,
                tool_call_id: None,
            });
            return;
        }
        a::MessageContent::Blocks(blocks) => blocks.iter().collect(),
    };

    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();
    for block in &blocks {
        match block {
            a::ContentBlock::Text { text } => texts.push(text.as_str()),
            a::ContentBlock::ToolUse { id, name, input } => tool_calls.push(o::ToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: o::FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            a::ContentBlock::Image { .. } | a::ContentBlock::ToolResult { .. } => {}
        }
    }

    let has_text = !texts.is_empty();
    let has_tool_calls = !tool_calls.is_empty();

    let content = if has_text {
        Some(o::UserContent::Text(texts.join("\n")))
    } else if !has_tool_calls {
        Some(o::UserContent::Text(String::new()))
    } else {
        None
    };

    out.push(o::Message {
        role: o::Role::Assistant,
        content,
        tool_calls: if has_tool_calls { Some(tool_calls) } else { None },
        tool_call_id: None,
    });
}

fn translate_tool(tool: &a::Tool) -> o::ToolDef {
    o::ToolDef {
        kind: "function".to_string(),
        function: o::FunctionDef {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: sanitize_schema(tool.input_schema.clone()),
        },
    }
}

/// Recursively strips `format` from any `{"type":"string", ...}` schema node
/// unless `format == "date-time"`. Idempotent: applying this twice is the
/// same as applying it once, since the second pass finds nothing left to
/// strip.
pub fn sanitize_schema(mut schema: Value) -> Value {
    sanitize_schema_in_place(&mut schema);
    schema
}

fn sanitize_schema_in_place(schema: &mut Value) {
    let Value::Object(map) = schema else {
        if let Value::Array(items) = schema {
            for item in items {
                sanitize_schema_in_place(item);
            }
        }
        return;
    };

    let is_string_type = matches!(map.get("type"), Some(Value::String(t)) if t == "string");
    if is_string_type {
        let keep_format = matches!(map.get("format"), Some(Value::String(f)) if f == "date-time");
        if !keep_format {
            map.remove("format");
        }
    }

    if let Some(properties) = map.get_mut("properties") {
        sanitize_schema_in_place(properties);
    }
    if let Some(items) = map.get_mut("items") {
        sanitize_schema_in_place(items);
    }
    for (key, value) in map.iter_mut() {
        if key == "properties" || key == "items" {
            continue;
        }
        if value.is_object() {
            sanitize_schema_in_place(value);
        }
    }
}

fn translate_tool_choice(choice: &a::ToolChoice) -> o::ToolChoice {
    match choice {
        a::ToolChoice::Auto => o::ToolChoice::Mode("auto".to_string()),
        a::ToolChoice::Any => {
            warn!("tool_choice:any has no upstream equivalent; downgrading to auto");
            o::ToolChoice::Mode("auto".to_string())
        }
        a::ToolChoice::Tool { name } => o::ToolChoice::Specific {
            r#type: "function".to_string(),
            function: o::ToolChoiceFunction { name: name.clone() },
        },
    }
}
