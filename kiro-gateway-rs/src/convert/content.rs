//! Content block conversion between Anthropic and Kiro formats.

use crate::models::kiro::{
    KiroImage, KiroImageSource, KiroTextContent, KiroToolResult, KiroToolUse,
};
use crate::models::request::{ContentBlock, ImageSource, Message, MessageContent, Role};

/// Extract plain text from a message's content.
pub fn extract_text(content: &MessageContent) -> String {
    content.text()
}

/// Extract images from a message's content blocks.
pub fn extract_images(content: &MessageContent) -> Vec<KiroImage> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Image { source } => Some(image_to_kiro(source)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Convert an Anthropic image source to Kiro format.
fn image_to_kiro(source: &ImageSource) -> KiroImage {
    // Map media type to Kiro format string
    let format = match source.media_type.as_str() {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "jpeg",
    };

    KiroImage {
        format: format.to_string(),
        source: KiroImageSource {
            bytes: source.data.clone(),
        },
    }
}

/// Returns true if a tool_use input is null or an empty object — such blocks
/// are dropped rather than forwarded to Kiro.
fn is_empty_tool_input(input: &serde_json::Value) -> bool {
    match input {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Extract tool use blocks from a message, dropping any whose input is
/// null or an empty object.
pub fn extract_tool_uses(content: &MessageContent) -> Vec<KiroToolUse> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } if !is_empty_tool_input(input) => {
                    Some(KiroToolUse {
                        name: name.clone(),
                        input: input.clone(),
                        tool_use_id: id.clone(),
                    })
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract tool result blocks from a message.
pub fn extract_tool_results(content: &MessageContent) -> Vec<KiroToolResult> {
    match content {
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let text = content.text();
                    let status = if *is_error { "error" } else { "success" };
                    Some(KiroToolResult {
                        content: vec![KiroTextContent { text }],
                        status: status.to_string(),
                        tool_use_id: tool_use_id.clone(),
                    })
                }
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Extract tool result blocks from a message, dropping any whose
/// `tool_use_id` does not match a tool_use seen earlier in the conversation.
pub fn extract_tool_results_known(
    content: &MessageContent,
    known_tool_use_ids: &std::collections::HashSet<String>,
) -> Vec<KiroToolResult> {
    extract_tool_results(content)
        .into_iter()
        .filter(|r| known_tool_use_ids.contains(&r.tool_use_id))
        .collect()
}

/// Extract thinking text from message content.
pub fn extract_thinking(content: &MessageContent) -> Option<String> {
    match content {
        MessageContent::Blocks(blocks) => {
            let thinking: Vec<&str> = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Thinking { thinking } => Some(thinking.as_str()),
                    _ => None,
                })
                .collect();
            if thinking.is_empty() {
                None
            } else {
                Some(thinking.join("\n"))
            }
        }
        _ => None,
    }
}

/// Convert a message to a Kiro history entry.
///
/// `known_tool_use_ids` tracks tool_use ids seen so far in the conversation;
/// it is updated in place with any tool_use ids emitted by this message.
pub fn message_to_history_entry(
    msg: &Message,
    model_id: &str,
    known_tool_use_ids: &mut std::collections::HashSet<String>,
) -> serde_json::Value {
    match msg.role {
        Role::User => {
            // toolResults is only ever attached to currentMessage, not to
            // history turns - see build_kiro_payload.
            let text = extract_text(&msg.content);
            let images = extract_images(&msg.content);

            let mut entry = serde_json::json!({
                "userInputMessage": {
                    "content": text,
                    "modelId": model_id,
                    "origin": crate::config::API_ORIGIN,
                }
            });

            if !images.is_empty() {
                entry["userInputMessage"]["images"] =
                    serde_json::to_value(&images).unwrap_or_default();
            }

            entry
        }
        Role::Assistant => {
            let text = extract_text(&msg.content);
            let tool_uses = extract_tool_uses(&msg.content);
            let thinking = extract_thinking(&msg.content);

            // Wrap thinking in XML tags if present
            let content = if let Some(thinking_text) = thinking {
                format!(
                    "<kiro_thinking>\n{}\n</kiro_thinking>\n{}",
                    thinking_text, text
                )
            } else {
                text
            };

            let mut entry = serde_json::json!({
                "assistantResponseMessage": {
                    "content": content,
                }
            });

            if !tool_uses.is_empty() {
                known_tool_use_ids.extend(tool_uses.iter().map(|t| t.tool_use_id.clone()));
                entry["assistantResponseMessage"]["toolUses"] =
                    serde_json::to_value(&tool_uses).unwrap_or_default();
            }

            entry
        }
        Role::System => {
            // System messages get folded into the user message as a prefix
            let text = extract_text(&msg.content);
            serde_json::json!({
                "userInputMessage": {
                    "content": text,
                    "modelId": model_id,
                    "origin": crate::config::API_ORIGIN,
                }
            })
        }
    }
}
