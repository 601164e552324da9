//! # Provider adapter module
//!
//! Bidirectional translation between the OpenAI-compatible wire shape
//! (`ChatRequest`/`ChatResponse`/`StreamChunk`, already the canonical wire
//! types used across this crate) and a provider-native shape exposed by the
//! gateway's `/v1/messages` endpoint, modeled on Anthropic's Messages API.
//!
//! This generalizes the ad hoc translation already written by hand inside
//! `providers::anthropic` (system-message concatenation, role mapping,
//! stop-reason translation) into reusable functions so any native-shaped
//! provider can reuse the same rules instead of reimplementing them.

use crate::error::ProviderError;
use crate::models::{ChatRequest, ChatResponse, Choice, Delta, Message, Role, StreamChunk, Usage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resolve an OpenAI-shaped model name to a provider-native model name.
///
/// Looks up `model` in the per-provider `mapping` override table first (the
/// operator-configured `model_mapping`), then falls back to `defaults` (the
/// adapter's built-in static table), and finally returns `model` unchanged
/// when neither has an entry — the "default fallback" SPEC_FULL §4.A1 calls
/// for when an unknown OpenAI model name is supplied.
pub fn resolve_model_name(
    model: &str,
    mapping: &HashMap<String, String>,
    defaults: &HashMap<&str, &str>,
) -> String {
    mapping
        .get(model)
        .cloned()
        .or_else(|| defaults.get(model).map(|s| s.to_string()))
        .unwrap_or_else(|| model.to_string())
}

/// A single message in the native (Anthropic-style) wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeMessage {
    pub role: String,
    pub content: String,
}

/// A native-shaped chat request: a top-level `system` field plus a
/// strictly alternating user/assistant message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<NativeMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeResponse {
    pub id: String,
    pub model: String,
    pub content: Vec<NativeContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: NativeUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Error returned when a request cannot be translated into the native shape.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<AdapterError> for ProviderError {
    fn from(e: AdapterError) -> Self {
        ProviderError::ValidationError {
            field: "messages".to_string(),
            message: e.to_string(),
        }
    }
}

/// Translate an OpenAI-shaped request into the native shape.
///
/// Consecutive `system` messages are concatenated with `\n\n` into the
/// native top-level `system` field. The first remaining message must be a
/// `user` message. Consecutive messages of the same role are merged.
pub fn to_native(request: &ChatRequest) -> Result<NativeRequest, AdapterError> {
    let mut system_parts = Vec::new();
    let mut rest = Vec::new();

    for msg in &request.messages {
        match msg.role {
            Role::System => system_parts.push(msg.content.clone()),
            _ => rest.push(msg.clone()),
        }
    }

    if rest.is_empty() {
        return Err(AdapterError::InvalidRequest(
            "request has no user or assistant messages".to_string(),
        ));
    }
    if !matches!(rest[0].role, Role::User) {
        return Err(AdapterError::InvalidRequest(
            "first non-system message must have role user".to_string(),
        ));
    }

    let mut messages: Vec<NativeMessage> = Vec::with_capacity(rest.len());
    for msg in rest {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            _ => continue,
        };
        if let Some(last) = messages.last_mut() {
            if last.role == role {
                last.content.push('\n');
                last.content.push_str(&msg.content);
                continue;
            }
        }
        messages.push(NativeMessage {
            role: role.to_string(),
            content: msg.content,
        });
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    Ok(NativeRequest {
        model: request.model.clone(),
        system,
        messages,
        max_tokens: request.max_tokens.unwrap_or(4096),
        temperature: request.temperature,
        stream: request.stream,
    })
}

/// Map a native stop reason to an OpenAI finish reason.
pub fn stop_reason_to_finish_reason(stop_reason: Option<&str>) -> Option<String> {
    stop_reason.map(|r| match r {
        "end_turn" | "stop_sequence" => "stop".to_string(),
        "max_tokens" => "length".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    })
}

/// Map an OpenAI finish reason back to a native stop reason, the inverse of
/// [`stop_reason_to_finish_reason`], used when replying to the native-shaped
/// `/v1/messages` endpoint with a response produced by the OpenAI-shaped
/// dataplane.
pub fn finish_reason_to_stop_reason(finish_reason: Option<&str>) -> Option<String> {
    finish_reason.map(|r| match r {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" => "tool_use".to_string(),
        other => other.to_string(),
    })
}

/// Translate a native-shaped request into the OpenAI-compatible shape, the
/// inverse of [`to_native`].
///
/// The top-level `system` field, if present, becomes a leading system
/// message; each native message becomes a `user`/`assistant` message in
/// order.
pub fn from_native(native: &NativeRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(native.messages.len() + 1);
    if let Some(system) = &native.system {
        messages.push(Message::system(system.clone()));
    }
    for msg in &native.messages {
        let role = if msg.role == "assistant" {
            Role::Assistant
        } else {
            Role::User
        };
        messages.push(Message {
            role,
            content: msg.content.clone(),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        });
    }

    ChatRequest {
        model: native.model.clone(),
        messages,
        temperature: native.temperature,
        max_tokens: Some(native.max_tokens),
        stream: native.stream,
        ..Default::default()
    }
}

/// Translate an OpenAI-shaped response into the native shape, the inverse of
/// [`to_openai`]. Uses the first choice only; native replies are single-turn.
pub fn to_native_response(response: &ChatResponse) -> NativeResponse {
    let choice = response.choices.first();
    let mut content = Vec::new();

    if let Some(choice) = choice {
        if !choice.message.content.is_empty() {
            content.push(NativeContentBlock {
                block_type: "text".to_string(),
                text: Some(choice.message.content.clone()),
                id: None,
                name: None,
                input: None,
            });
        }
        for call in choice.message.tool_calls.iter().flatten() {
            content.push(NativeContentBlock {
                block_type: "tool_use".to_string(),
                text: None,
                id: Some(call.id.clone()),
                name: Some(call.function.name.clone()),
                input: serde_json::from_str(&call.function.arguments).ok(),
            });
        }
    }

    NativeResponse {
        id: response.id.clone(),
        model: response.model.clone(),
        content,
        stop_reason: finish_reason_to_stop_reason(
            choice.and_then(|c| c.finish_reason.as_deref()),
        ),
        usage: NativeUsage {
            input_tokens: response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
            output_tokens: response
                .usage
                .as_ref()
                .map(|u| u.completion_tokens)
                .unwrap_or(0),
        },
    }
}

/// Translate a native response into the OpenAI-compatible shape.
///
/// Text-only content blocks collapse into a single string; tool-use blocks
/// become structured `tool_calls` entries.
pub fn to_openai(native: NativeResponse) -> ChatResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in native.content {
        match block.block_type.as_str() {
            "text" => {
                if let Some(t) = block.text {
                    text.push_str(&t);
                }
            }
            "tool_use" => {
                tool_calls.push(crate::models::ToolCall {
                    id: block.id.unwrap_or_default(),
                    call_type: "function".to_string(),
                    function: crate::models::FunctionCall {
                        name: block.name.unwrap_or_default(),
                        arguments: block
                            .input
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "{}".to_string()),
                    },
                });
            }
            _ => {}
        }
    }

    ChatResponse {
        id: native.id,
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: native.model,
        choices: vec![Choice {
            index: 0,
            message: Message {
                role: Role::Assistant,
                content: text,
                name: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            },
            finish_reason: stop_reason_to_finish_reason(native.stop_reason.as_deref()),
            logprobs: None,
        }],
        usage: Some(Usage {
            prompt_tokens: native.usage.input_tokens,
            completion_tokens: native.usage.output_tokens,
            total_tokens: native.usage.input_tokens + native.usage.output_tokens,
        }),
        system_fingerprint: None,
    }
}

/// One decoded native streaming event, prior to OpenAI-delta translation.
#[derive(Debug, Clone)]
pub enum NativeStreamEvent {
    MessageStart { id: String, model: String },
    ContentDelta { text: String },
    MessageStop { stop_reason: Option<String> },
}

/// Translate a single native stream event into zero-or-one OpenAI delta
/// chunks. `is_first` controls whether the role field is populated (role is
/// only ever set on the first chunk); `finish_reason` is only set on the
/// final chunk.
pub fn translate_stream_event(
    event: NativeStreamEvent,
    is_first: bool,
) -> Option<StreamChunk> {
    match event {
        NativeStreamEvent::MessageStart { id, model } => Some(StreamChunk {
            id,
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model,
            choices: vec![crate::models::StreamChoice {
                index: 0,
                delta: Delta {
                    role: if is_first { Some(Role::Assistant) } else { None },
                    content: None,
                    tool_calls: None,
                },
                finish_reason: None,
            }],
        }),
        NativeStreamEvent::ContentDelta { text } => Some(StreamChunk {
            id: "native-stream".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: String::new(),
            choices: vec![crate::models::StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: Some(text),
                    tool_calls: None,
                },
                finish_reason: None,
            }],
        }),
        NativeStreamEvent::MessageStop { stop_reason } => Some(StreamChunk {
            id: "native-stream".to_string(),
            object: "chat.completion.chunk".to_string(),
            created: chrono::Utc::now().timestamp() as u64,
            model: String::new(),
            choices: vec![crate::models::StreamChoice {
                index: 0,
                delta: Delta {
                    role: None,
                    content: None,
                    tool_calls: None,
                },
                finish_reason: stop_reason_to_finish_reason(stop_reason.as_deref()),
            }],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    #[test]
    fn concatenates_system_messages_and_requires_leading_user() {
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![
                Message::system("be terse"),
                Message::system("answer in english"),
                Message::user("hi"),
            ],
            ..Default::default()
        };
        let native = to_native(&request).unwrap();
        assert_eq!(native.system.as_deref(), Some("be terse\n\nanswer in english"));
        assert_eq!(native.messages.len(), 1);
        assert_eq!(native.messages[0].role, "user");
    }

    #[test]
    fn rejects_request_with_no_leading_user_message() {
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::assistant("hi")],
            ..Default::default()
        };
        assert!(to_native(&request).is_err());
    }

    #[test]
    fn merges_consecutive_same_role_messages() {
        let request = ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message::user("one"), Message::user("two")],
            ..Default::default()
        };
        let native = to_native(&request).unwrap();
        assert_eq!(native.messages.len(), 1);
        assert_eq!(native.messages[0].content, "one\ntwo");
    }

    #[test]
    fn resolves_model_name_via_mapping_then_defaults_then_identity() {
        let mut defaults = HashMap::new();
        defaults.insert("gpt-4", "claude-3-opus-20240229");

        let empty_mapping = HashMap::new();
        assert_eq!(
            resolve_model_name("gpt-4", &empty_mapping, &defaults),
            "claude-3-opus-20240229"
        );

        let mut override_mapping = HashMap::new();
        override_mapping.insert("gpt-4".to_string(), "claude-3-5-sonnet-20241022".to_string());
        assert_eq!(
            resolve_model_name("gpt-4", &override_mapping, &defaults),
            "claude-3-5-sonnet-20241022"
        );

        assert_eq!(
            resolve_model_name("unknown-model", &empty_mapping, &defaults),
            "unknown-model"
        );
    }

    #[test]
    fn maps_stop_reasons_to_openai_finish_reasons() {
        assert_eq!(
            stop_reason_to_finish_reason(Some("end_turn")),
            Some("stop".to_string())
        );
        assert_eq!(
            stop_reason_to_finish_reason(Some("max_tokens")),
            Some("length".to_string())
        );
        assert_eq!(
            stop_reason_to_finish_reason(Some("tool_use")),
            Some("tool_calls".to_string())
        );
    }

    #[test]
    fn collapses_text_blocks_into_single_string() {
        let native = NativeResponse {
            id: "msg_1".to_string(),
            model: "claude-3-opus-20240229".to_string(),
            content: vec![
                NativeContentBlock {
                    block_type: "text".to_string(),
                    text: Some("hello ".to_string()),
                    id: None,
                    name: None,
                    input: None,
                },
                NativeContentBlock {
                    block_type: "text".to_string(),
                    text: Some("world".to_string()),
                    id: None,
                    name: None,
                    input: None,
                },
            ],
            stop_reason: Some("end_turn".to_string()),
            usage: NativeUsage {
                input_tokens: 5,
                output_tokens: 2,
            },
        };
        let openai = to_openai(native);
        assert_eq!(openai.choices[0].message.content, "hello world");
        assert_eq!(openai.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn from_native_promotes_system_field_to_leading_message() {
        let native = NativeRequest {
            model: "claude-3-opus-20240229".to_string(),
            system: Some("be terse".to_string()),
            messages: vec![NativeMessage {
                role: "user".to_string(),
                content: "hi".to_string(),
            }],
            max_tokens: 256,
            temperature: Some(0.5),
            stream: Some(false),
        };
        let chat = from_native(&native);
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, Role::System);
        assert_eq!(chat.messages[0].content, "be terse");
        assert_eq!(chat.messages[1].role, Role::User);
        assert_eq!(chat.max_tokens, Some(256));
    }

    #[test]
    fn to_native_response_round_trips_finish_reason_and_usage() {
        let response = ChatResponse {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("hello"),
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 4,
                total_tokens: 14,
            }),
            system_fingerprint: None,
        };
        let native = to_native_response(&response);
        assert_eq!(native.content[0].text.as_deref(), Some("hello"));
        assert_eq!(native.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(native.usage.input_tokens, 10);
        assert_eq!(native.usage.output_tokens, 4);
    }
}
