//! Convert Kiro stream events to Anthropic Messages API responses.

use uuid::Uuid;

use crate::config::CONTEXT_USAGE_BASE_TOKENS;
use crate::models::kiro::KiroStreamEvent;
use crate::models::request::MessagesRequest;
use crate::models::response::{MessagesResponse, ResponseContentBlock, StopReason, Usage};
use crate::models::stream::{ContentDelta, MessageDelta, PartialMessage, StreamEvent};

/// Estimate the character count of a request's system + message text, used
/// as the last-resort fallback for input token estimation.
pub fn estimate_request_chars(request: &MessagesRequest) -> usize {
    let system_chars = request.system.as_ref().map(|s| s.text().len()).unwrap_or(0);
    let message_chars: usize = request
        .messages
        .iter()
        .map(|m| crate::convert::content::extract_text(&m.content).len())
        .sum();
    system_chars + message_chars
}

/// One accumulated content block, in arrival order.
enum BlockAccum {
    Text(String),
    Thinking(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Accumulates Kiro stream events into Anthropic SSE events and/or a
/// complete `MessagesResponse`. Streaming and non-streaming callers drive
/// the same state machine; the non-streaming caller simply discards the
/// returned events and reads `into_response()` once the stream ends.
pub struct ResponseAccumulator {
    id: String,
    model: String,
    blocks: Vec<BlockAccum>,
    open_index: Option<usize>,
    in_thinking: bool,
    message_start_emitted: bool,
    message_delta_emitted: bool,
    finished: bool,
    had_tool_use: bool,
    input_tokens_upstream: Option<u32>,
    output_tokens_upstream: Option<u32>,
    context_usage_pct: Option<f64>,
    output_chars: usize,
    input_char_estimate: usize,
}

impl ResponseAccumulator {
    /// Create a new accumulator for the given model.
    ///
    /// `input_char_estimate` is the character count of the outgoing
    /// request's system + message text, used only if upstream never
    /// reports usage or `contextUsagePercentage`.
    pub fn new(model: &str, input_char_estimate: usize) -> Self {
        Self {
            id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            blocks: Vec::new(),
            open_index: None,
            in_thinking: false,
            message_start_emitted: false,
            message_delta_emitted: false,
            finished: false,
            had_tool_use: false,
            input_tokens_upstream: None,
            output_tokens_upstream: None,
            context_usage_pct: None,
            output_chars: 0,
            input_char_estimate,
        }
    }

    /// Process a Kiro stream event and return any Anthropic stream events to emit.
    pub fn process_event(&mut self, event: KiroStreamEvent) -> Vec<StreamEvent> {
        match event {
            KiroStreamEvent::Content(text) => self.process_content_chunk(text),
            KiroStreamEvent::ToolStart {
                name,
                tool_use_id,
                input,
            } => {
                let mut out = self.ensure_message_started();
                out.extend(self.close_open_block());

                let tool_id = if tool_use_id.is_empty() {
                    format!("toolu_{}", Uuid::new_v4().simple())
                } else {
                    tool_use_id
                };

                self.blocks.push(BlockAccum::ToolUse {
                    id: tool_id.clone(),
                    name: name.clone(),
                    input_json: String::new(),
                });
                let index = self.blocks.len() - 1;
                self.open_index = Some(index);
                self.had_tool_use = true;

                out.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::ToolUse {
                        id: tool_id,
                        name,
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });

                if !input.is_empty() {
                    if let Some(BlockAccum::ToolUse { input_json, .. }) =
                        self.blocks.get_mut(index)
                    {
                        input_json.push_str(&input);
                    }
                    out.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: ContentDelta::InputJsonDelta { partial_json: input },
                    });
                }

                out
            }
            KiroStreamEvent::ToolInput(input) => {
                if let Some(index) = self.open_index {
                    if let Some(BlockAccum::ToolUse { input_json, .. }) =
                        self.blocks.get_mut(index)
                    {
                        input_json.push_str(&input);
                    }
                    vec![StreamEvent::ContentBlockDelta {
                        index,
                        delta: ContentDelta::InputJsonDelta { partial_json: input },
                    }]
                } else {
                    Vec::new()
                }
            }
            KiroStreamEvent::ToolStop => self.close_open_block(),
            KiroStreamEvent::Usage(usage_data) => {
                if let Some(input) = usage_data.get("inputTokenCount").and_then(|v| v.as_u64()) {
                    self.input_tokens_upstream = Some(input as u32);
                }
                if let Some(output) = usage_data.get("outputTokenCount").and_then(|v| v.as_u64())
                {
                    self.output_tokens_upstream = Some(output as u32);
                }
                Vec::new()
            }
            KiroStreamEvent::ContextUsage(pct) => {
                self.context_usage_pct = Some(pct);
                Vec::new()
            }
        }
    }

    /// Build the final `content_block_stop` / `message_delta` / `message_stop`
    /// events. Idempotent: calling this more than once only emits
    /// `message_stop` again, never a second `message_delta`.
    pub fn finish_events(&mut self) -> Vec<StreamEvent> {
        let mut out = self.close_open_block();
        self.finished = true;

        if !self.message_delta_emitted {
            self.message_delta_emitted = true;
            let usage = self.final_usage();
            let stop_reason = if self.had_tool_use {
                StopReason::ToolUse
            } else {
                StopReason::EndTurn
            };
            out.push(StreamEvent::MessageDelta {
                delta: MessageDelta {
                    stop_reason: Some(stop_reason),
                    stop_sequence: None,
                },
                usage: Some(usage),
            });
        }

        out.push(StreamEvent::MessageStop);
        out
    }

    /// Build a complete `MessagesResponse` from accumulated data.
    pub fn into_response(self) -> MessagesResponse {
        let usage = self.final_usage();
        let stop_reason = if self.had_tool_use {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };

        let content = self
            .blocks
            .into_iter()
            .filter_map(|block| match block {
                BlockAccum::Text(text) if !text.is_empty() => {
                    Some(ResponseContentBlock::Text { text })
                }
                BlockAccum::Text(_) => None,
                BlockAccum::Thinking(thinking) if !thinking.is_empty() => {
                    Some(ResponseContentBlock::Thinking { thinking })
                }
                BlockAccum::Thinking(_) => None,
                BlockAccum::ToolUse {
                    id,
                    name,
                    input_json,
                } => {
                    let input = serde_json::from_str(&input_json)
                        .unwrap_or_else(|_| serde_json::json!({ "raw_arguments": input_json }));
                    Some(ResponseContentBlock::ToolUse { id, name, input })
                }
            })
            .collect();

        MessagesResponse {
            id: self.id,
            response_type: "message".to_string(),
            role: "assistant".to_string(),
            content,
            model: self.model,
            stop_reason: Some(stop_reason),
            stop_sequence: None,
            usage,
        }
    }

    /// Split a content chunk on `<kiro_thinking>`/`</kiro_thinking>` tags and
    /// route each segment to the text or thinking block as appropriate.
    fn process_content_chunk(&mut self, text: String) -> Vec<StreamEvent> {
        let mut out = self.ensure_message_started();

        let mut remaining = text.as_str();
        loop {
            let tag = if self.in_thinking {
                "</kiro_thinking>"
            } else {
                "<kiro_thinking>"
            };

            match remaining.find(tag) {
                Some(pos) => {
                    let segment = &remaining[..pos];
                    if !segment.is_empty() {
                        out.extend(self.push_segment(segment.to_string()));
                    }
                    remaining = &remaining[pos + tag.len()..];
                    self.in_thinking = !self.in_thinking;
                }
                None => {
                    if !remaining.is_empty() {
                        out.extend(self.push_segment(remaining.to_string()));
                    }
                    break;
                }
            }
        }

        out
    }

    fn push_segment(&mut self, text: String) -> Vec<StreamEvent> {
        if self.in_thinking {
            self.push_thinking_delta(text)
        } else {
            self.push_text_delta(text)
        }
    }

    fn push_text_delta(&mut self, text: String) -> Vec<StreamEvent> {
        let mut out = self.ensure_text_block_open();
        let index = self.open_index.expect("text block just ensured open");
        if let Some(BlockAccum::Text(t)) = self.blocks.get_mut(index) {
            t.push_str(&text);
        }
        self.output_chars += text.chars().count();
        out.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::TextDelta { text },
        });
        out
    }

    fn push_thinking_delta(&mut self, text: String) -> Vec<StreamEvent> {
        let mut out = self.ensure_thinking_block_open();
        let index = self.open_index.expect("thinking block just ensured open");
        if let Some(BlockAccum::Thinking(t)) = self.blocks.get_mut(index) {
            t.push_str(&text);
        }
        self.output_chars += text.chars().count();
        out.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentDelta::ThinkingDelta { thinking: text },
        });
        out
    }

    fn ensure_message_started(&mut self) -> Vec<StreamEvent> {
        if self.message_start_emitted {
            return Vec::new();
        }
        self.message_start_emitted = true;
        vec![StreamEvent::MessageStart {
            message: PartialMessage {
                id: self.id.clone(),
                message_type: "message".to_string(),
                role: "assistant".to_string(),
                model: self.model.clone(),
                usage: self.initial_usage(),
            },
        }]
    }

    fn ensure_text_block_open(&mut self) -> Vec<StreamEvent> {
        if let Some(index) = self.open_index {
            if matches!(self.blocks[index], BlockAccum::Text(_)) {
                return Vec::new();
            }
        }
        let mut out = self.close_open_block();
        self.blocks.push(BlockAccum::Text(String::new()));
        let index = self.blocks.len() - 1;
        self.open_index = Some(index);
        out.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Text {
                text: String::new(),
            },
        });
        out
    }

    fn ensure_thinking_block_open(&mut self) -> Vec<StreamEvent> {
        if let Some(index) = self.open_index {
            if matches!(self.blocks[index], BlockAccum::Thinking(_)) {
                return Vec::new();
            }
        }
        let mut out = self.close_open_block();
        self.blocks.push(BlockAccum::Thinking(String::new()));
        let index = self.blocks.len() - 1;
        self.open_index = Some(index);
        out.push(StreamEvent::ContentBlockStart {
            index,
            content_block: ResponseContentBlock::Thinking {
                thinking: String::new(),
            },
        });
        out
    }

    fn close_open_block(&mut self) -> Vec<StreamEvent> {
        if let Some(index) = self.open_index.take() {
            vec![StreamEvent::ContentBlockStop { index }]
        } else {
            Vec::new()
        }
    }

    /// Usage reported in `message_start`: estimated input, zeroed output and
    /// cache fields regardless of the synthetic distribution applied later.
    fn initial_usage(&self) -> Usage {
        Usage {
            input_tokens: self.estimate_input_tokens(0),
            output_tokens: 0,
            cache_creation_input_tokens: Some(0),
            cache_read_input_tokens: Some(0),
        }
    }

    /// Usage reported in the terminal `message_delta`, with the synthetic
    /// 1:2:25 cache distribution applied.
    fn final_usage(&self) -> Usage {
        let output_tokens = self
            .output_tokens_upstream
            .unwrap_or_else(|| (self.output_chars / 4) as u32);
        let input_tokens = self.estimate_input_tokens(output_tokens);
        distribute_synthetic_cache(input_tokens, output_tokens)
    }

    fn estimate_input_tokens(&self, output_tokens: u32) -> u32 {
        if let Some(input) = self.input_tokens_upstream {
            return input;
        }
        if let Some(pct) = self.context_usage_pct {
            let raw = (CONTEXT_USAGE_BASE_TOKENS * pct / 100.0).round() - output_tokens as f64;
            return raw.max(0.0) as u32;
        }
        (self.input_char_estimate / 4) as u32
    }
}

/// Apply the 1:2:25 synthetic input/cache-creation/cache-read distribution.
/// Below 100 input tokens the distribution is skipped entirely.
fn distribute_synthetic_cache(input_tokens: u32, output_tokens: u32) -> Usage {
    if input_tokens < 100 {
        return Usage {
            input_tokens,
            output_tokens,
            cache_creation_input_tokens: Some(0),
            cache_read_input_tokens: Some(0),
        };
    }

    let total = input_tokens as u64;
    let input = (total * 1 / 28) as u32;
    let cache_creation = (total * 2 / 28) as u32;
    let cache_read = input_tokens - input - cache_creation;

    Usage {
        input_tokens: input,
        output_tokens,
        cache_creation_input_tokens: Some(cache_creation),
        cache_read_input_tokens: Some(cache_read),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_then_tool_then_text_opens_three_blocks() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5", 0);
        acc.process_event(KiroStreamEvent::Content("Hello".into()));
        acc.process_event(KiroStreamEvent::ToolStart {
            name: "get_weather".into(),
            tool_use_id: "tool_1".into(),
            input: String::new(),
        });
        acc.process_event(KiroStreamEvent::ToolInput(r#"{"city":"NYC"}"#.into()));
        acc.process_event(KiroStreamEvent::ToolStop);
        acc.process_event(KiroStreamEvent::Content(" done".into()));
        acc.finish_events();

        let response = acc.into_response();
        assert_eq!(response.content.len(), 3);
        assert!(matches!(response.content[0], ResponseContentBlock::Text { .. }));
        assert!(matches!(response.content[1], ResponseContentBlock::ToolUse { .. }));
        assert!(matches!(response.content[2], ResponseContentBlock::Text { .. }));
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn thinking_tags_are_split_into_a_separate_block() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5", 0);
        acc.process_event(KiroStreamEvent::Content(
            "<kiro_thinking>reasoning here</kiro_thinking>answer".into(),
        ));
        acc.finish_events();

        let response = acc.into_response();
        assert_eq!(response.content.len(), 2);
        match &response.content[0] {
            ResponseContentBlock::Thinking { thinking } => assert_eq!(thinking, "reasoning here"),
            _ => panic!("expected thinking block first"),
        }
        match &response.content[1] {
            ResponseContentBlock::Text { text } => assert_eq!(text, "answer"),
            _ => panic!("expected text block second"),
        }
    }

    #[test]
    fn malformed_tool_input_falls_back_to_raw_arguments() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5", 0);
        acc.process_event(KiroStreamEvent::ToolStart {
            name: "broken".into(),
            tool_use_id: "tool_1".into(),
            input: "not json".into(),
        });
        acc.process_event(KiroStreamEvent::ToolStop);
        acc.finish_events();

        let response = acc.into_response();
        match &response.content[0] {
            ResponseContentBlock::ToolUse { input, .. } => {
                assert_eq!(input["raw_arguments"], "not json");
            }
            _ => panic!("expected tool_use block"),
        }
    }

    #[test]
    fn message_delta_emitted_exactly_once_across_repeated_finish_calls() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5", 0);
        acc.process_event(KiroStreamEvent::Content("Hi".into()));
        let first = acc.finish_events();
        let second = acc.finish_events();

        assert!(first.iter().any(|e| matches!(e, StreamEvent::MessageDelta { .. })));
        assert!(!second.iter().any(|e| matches!(e, StreamEvent::MessageDelta { .. })));
    }

    #[test]
    fn synthetic_cache_distribution_applies_above_threshold() {
        let usage = distribute_synthetic_cache(2800, 10);
        assert_eq!(usage.input_tokens, 100);
        assert_eq!(usage.cache_creation_input_tokens, Some(200));
        assert_eq!(usage.cache_read_input_tokens, Some(2500));
        assert_eq!(
            usage.input_tokens
                + usage.cache_creation_input_tokens.unwrap()
                + usage.cache_read_input_tokens.unwrap(),
            2800
        );
    }

    #[test]
    fn synthetic_cache_distribution_skipped_below_threshold() {
        let usage = distribute_synthetic_cache(50, 5);
        assert_eq!(usage.input_tokens, 50);
        assert_eq!(usage.cache_creation_input_tokens, Some(0));
        assert_eq!(usage.cache_read_input_tokens, Some(0));
    }

    #[test]
    fn context_usage_percentage_drives_input_token_estimate() {
        let mut acc = ResponseAccumulator::new("claude-sonnet-4.5", 0);
        acc.process_event(KiroStreamEvent::Content("Hello world".into()));
        acc.process_event(KiroStreamEvent::ContextUsage(0.05));
        let events = acc.finish_events();
        let usage = events.iter().find_map(|e| match e {
            StreamEvent::MessageDelta { usage, .. } => usage.clone(),
            _ => None,
        });
        assert!(usage.is_some());
    }
}
