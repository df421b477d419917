//! C5: the stream translator. Consumes upstream `chat.completion.chunk`
//! values in order and produces Anthropic SSE events, one upstream chunk at
//! a time, preserving the open/close bracketing invariant of the Anthropic
//! stream protocol.
//!
//! Replaces the boolean-latch approach (`text_block_closed`,
//! `has_sent_stop_reason`) with an explicit state machine and an indexed
//! table mapping upstream tool-call index to the Anthropic block index, so
//! interleaved tool-call fragments route to the correct block even when a
//! text block or another tool is open at the same time.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::ProxyError;
use crate::messages::anthropic as a;
use crate::messages::openai as o;
use crate::messages::translate::error::stream_error_event;
use crate::messages::translate::response::map_finish_reason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(u32),
    Tool(u32),
}

/// Per-request state machine driving one Anthropic SSE stream.
pub struct StreamTranslator {
    caller_model: String,
    message_id: Option<String>,
    message_start_emitted: bool,
    next_index: u32,
    open: Option<OpenBlock>,
    tool_index_map: HashMap<u32, u32>,
    last_completion_tokens: Option<u32>,
    closed: bool,
}

impl StreamTranslator {
    pub fn new(caller_model: impl Into<String>) -> Self {
        Self {
            caller_model: caller_model.into(),
            message_id: None,
            message_start_emitted: false,
            next_index: 0,
            open: None,
            tool_index_map: HashMap::new(),
            last_completion_tokens: None,
            closed: false,
        }
    }

    /// Translates one upstream chunk into zero or more Anthropic SSE events.
    /// Returns no further events once the stream has reached its terminal
    /// sequence (`message_stop`), matching "any further chunks are ignored".
    pub fn push_chunk(&mut self, chunk: &o::Chunk) -> Vec<a::StreamEvent> {
        if self.closed {
            return Vec::new();
        }

        let mut events = Vec::new();
        self.ensure_message_start(chunk.id.as_deref(), &mut events);

        if let Some(usage) = &chunk.usage {
            self.last_completion_tokens = Some(usage.completion_tokens);
        }

        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if let Some(content) = &choice.delta.content {
            if !content.is_empty() {
                self.open_text_block_if_needed(&mut events);
                let index = match self.open {
                    Some(OpenBlock::Text(i)) => i,
                    _ => unreachable!("open_text_block_if_needed always leaves a text block open"),
                };
                events.push(a::StreamEvent::ContentBlockDelta {
                    index,
                    delta: a::ContentDelta::TextDelta { text: content.clone() },
                });
            }
        }

        if let Some(tool_calls) = &choice.delta.tool_calls {
            for call in tool_calls {
                self.handle_tool_call_delta(call, &mut events);
            }
        }

        if let Some(finish_reason) = &choice.finish_reason {
            self.close_open_block(&mut events);
            let stop_reason = map_finish_reason(finish_reason);
            let output_tokens = chunk
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .or(self.last_completion_tokens)
                .unwrap_or(1);
            events.push(a::StreamEvent::MessageDelta {
                delta: a::MessageDeltaFields { stop_reason: Some(stop_reason), stop_sequence: None },
                usage: a::StreamUsage { input_tokens: None, output_tokens: Some(output_tokens) },
            });
            events.push(a::StreamEvent::MessageStop);
            self.closed = true;
        }

        events
    }

    /// Called when the upstream byte stream ends without ever sending a
    /// chunk whose `finish_reason` was set. Synthesises the closing sequence
    /// with `stop_reason: end_turn`.
    pub fn finish(&mut self) -> Vec<a::StreamEvent> {
        if self.closed {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.ensure_message_start(None, &mut events);
        self.close_open_block(&mut events);
        events.push(a::StreamEvent::MessageDelta {
            delta: a::MessageDeltaFields { stop_reason: Some(a::StopReason::EndTurn), stop_sequence: None },
            usage: a::StreamUsage { input_tokens: None, output_tokens: Some(self.last_completion_tokens.unwrap_or(1)) },
        });
        events.push(a::StreamEvent::MessageStop);
        self.closed = true;
        events
    }

    /// Called when dispatch fails mid-stream. Closes any open block, emits
    /// a single in-band `error` event, then `message_stop`.
    pub fn error(&mut self, err: &ProxyError) -> Vec<a::StreamEvent> {
        if self.closed {
            return Vec::new();
        }
        let mut events = Vec::new();
        self.ensure_message_start(None, &mut events);
        self.close_open_block(&mut events);
        events.push(stream_error_event(err));
        events.push(a::StreamEvent::MessageStop);
        self.closed = true;
        events
    }

    fn ensure_message_start(&mut self, chunk_id: Option<&str>, events: &mut Vec<a::StreamEvent>) {
        if self.message_start_emitted {
            return;
        }
        let id = chunk_id
            .map(str::to_string)
            .or_else(|| self.message_id.clone())
            .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple()));
        self.message_id = Some(id.clone());
        self.message_start_emitted = true;
        events.push(a::StreamEvent::MessageStart {
            message: a::MessageStartPayload {
                id,
                kind: "message".to_string(),
                role: a::Role::Assistant,
                model: self.caller_model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: a::StreamUsage { input_tokens: Some(0), output_tokens: Some(0) },
            },
        });
    }

    fn open_text_block_if_needed(&mut self, events: &mut Vec<a::StreamEvent>) {
        if matches!(self.open, Some(OpenBlock::Text(_))) {
            return;
        }
        self.close_open_block(events);
        let index = self.allocate_index();
        self.open = Some(OpenBlock::Text(index));
        events.push(a::StreamEvent::ContentBlockStart {
            index,
            content_block: a::ResponseContentBlock::Text { text: String::new() },
        });
    }

    fn handle_tool_call_delta(&mut self, call: &o::DeltaToolCall, events: &mut Vec<a::StreamEvent>) {
        let anthropic_index = if let Some(&existing) = self.tool_index_map.get(&call.index) {
            if self.open != Some(OpenBlock::Tool(existing)) {
                self.close_open_block(events);
                self.open = Some(OpenBlock::Tool(existing));
            }
            existing
        } else {
            self.close_open_block(events);
            let index = self.allocate_index();
            self.tool_index_map.insert(call.index, index);
            self.open = Some(OpenBlock::Tool(index));
            let id = call.id.clone().unwrap_or_default();
            let name = call.function.as_ref().and_then(|f| f.name.clone()).unwrap_or_default();
            events.push(a::StreamEvent::ContentBlockStart {
                index,
                content_block: a::ResponseContentBlock::ToolUse { id, name, input: serde_json::json!({}) },
            });
            index
        };

        if let Some(function) = &call.function {
            if let Some(arguments) = &function.arguments {
                if !arguments.is_empty() {
                    events.push(a::StreamEvent::ContentBlockDelta {
                        index: anthropic_index,
                        delta: a::ContentDelta::InputJsonDelta { partial_json: arguments.clone() },
                    });
                }
            }
        }
    }

    fn close_open_block(&mut self, events: &mut Vec<a::StreamEvent>) {
        if let Some(open) = self.open.take() {
            let index = match open {
                OpenBlock::Text(i) | OpenBlock::Tool(i) => i,
            };
            events.push(a::StreamEvent::ContentBlockStop { index });
        }
    }

    fn allocate_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(content: Option<&str>, tool_calls: Vec<o::DeltaToolCall>, finish: Option<&str>) -> o::Chunk {
        o::Chunk {
            id: Some("chatcmpl-1".to_string()),
            model: Some("gpt-4o-mini".to_string()),
            choices: vec![o::ChunkChoice {
                index: 0,
                delta: o::Delta {
                    role: None,
                    content: content.map(str::to_string),
                    tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                },
                finish_reason: finish.map(str::to_string),
            }],
            usage: None,
        }
    }

    fn event_names(events: &[a::StreamEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.event_name()).collect()
    }

    #[test]
    fn streaming_text_follows_bracketing_invariant() {
        let mut t = StreamTranslator::new("claude-3-haiku");
        let mut all = Vec::new();
        all.extend(t.push_chunk(&chunk(Some("He"), vec![], None)));
        all.extend(t.push_chunk(&chunk(Some("llo"), vec![], None)));
        let mut last = chunk(None, vec![], Some("stop"));
        last.usage = Some(o::Usage { prompt_tokens: 0, completion_tokens: 2, total_tokens: 2 });
        all.extend(t.push_chunk(&last));

        assert_eq!(
            event_names(&all),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        match &all[5] {
            a::StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason, Some(a::StopReason::EndTurn));
                assert_eq!(usage.output_tokens, Some(2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn streaming_tool_call_opens_single_block_and_concatenates_arguments() {
        let mut t = StreamTranslator::new("claude-3-haiku");
        let mut all = Vec::new();
        all.extend(t.push_chunk(&chunk(
            None,
            vec![o::DeltaToolCall {
                index: 0,
                id: Some("c1".to_string()),
                function: Some(o::DeltaToolCallFunction { name: Some("f".to_string()), arguments: None }),
            }],
            None,
        )));
        all.extend(t.push_chunk(&chunk(
            None,
            vec![o::DeltaToolCall {
                index: 0,
                id: None,
                function: Some(o::DeltaToolCallFunction { name: None, arguments: Some("{\"x\":".to_string()) }),
            }],
            None,
        )));
        all.extend(t.push_chunk(&chunk(
            None,
            vec![o::DeltaToolCall {
                index: 0,
                id: None,
                function: Some(o::DeltaToolCallFunction { name: None, arguments: Some("1}".to_string()) }),
            }],
            None,
        )));
        all.extend(t.push_chunk(&chunk(None, vec![], Some("tool_calls"))));

        assert_eq!(
            event_names(&all),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        let mut concatenated = String::new();
        for event in &all {
            if let a::StreamEvent::ContentBlockDelta { delta: a::ContentDelta::InputJsonDelta { partial_json }, .. } = event {
                concatenated.push_str(partial_json);
            }
        }
        let parsed: serde_json::Value = serde_json::from_str(&concatenated).unwrap();
        assert_eq!(parsed, serde_json::json!({"x": 1}));

        match &all[1] {
            a::StreamEvent::ContentBlockStart { index, content_block: a::ResponseContentBlock::ToolUse { id, name, .. } } => {
                assert_eq!(*index, 0);
                assert_eq!(id, "c1");
                assert_eq!(name, "f");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn block_indices_are_strictly_increasing() {
        let mut t = StreamTranslator::new("claude-3-haiku");
        let mut all = Vec::new();
        all.extend(t.push_chunk(&chunk(Some("hi"), vec![], None)));
        all.extend(t.push_chunk(&chunk(
            None,
            vec![o::DeltaToolCall {
                index: 0,
                id: Some("c1".to_string()),
                function: Some(o::DeltaToolCallFunction { name: Some("f".to_string()), arguments: None }),
            }],
            None,
        )));
        all.extend(t.push_chunk(&chunk(None, vec![], Some("tool_calls"))));

        let starts: Vec<u32> = all
            .iter()
            .filter_map(|e| match e {
                a::StreamEvent::ContentBlockStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1]);
    }

    #[test]
    fn mid_stream_error_closes_open_block_before_emitting_error() {
        let mut t = StreamTranslator::new("claude-3-haiku");
        let mut all = Vec::new();
        all.extend(t.push_chunk(&chunk(Some("partial"), vec![], None)));
        all.extend(t.error(&ProxyError::ApiConnection("connection reset".to_string())));

        assert_eq!(
            event_names(&all),
            vec!["message_start", "content_block_start", "content_block_delta", "content_block_stop", "error", "message_stop"]
        );
    }

    #[test]
    fn stream_ending_without_finish_reason_synthesises_end_turn() {
        let mut t = StreamTranslator::new("claude-3-haiku");
        let mut all = Vec::new();
        all.extend(t.push_chunk(&chunk(Some("hi"), vec![], None)));
        all.extend(t.finish());

        match all.last().unwrap() {
            a::StreamEvent::MessageStop => {}
            other => panic!("unexpected: {other:?}"),
        }
        let delta_event = all.iter().rev().nth(1).unwrap();
        match delta_event {
            a::StreamEvent::MessageDelta { delta, .. } => assert_eq!(delta.stop_reason, Some(a::StopReason::EndTurn)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn further_chunks_after_close_are_ignored() {
        let mut t = StreamTranslator::new("claude-3-haiku");
        let _ = t.push_chunk(&chunk(Some("hi"), vec![], Some("stop")));
        let trailing = t.push_chunk(&chunk(Some("more"), vec![], None));
        assert!(trailing.is_empty());
    }
}
