//! # Response cache (L5)
//!
//! Caches whole chat completions under a deterministic fingerprint of the
//! request shape. Consulted by the router before a non-streaming request is
//! dispatched; streaming requests never reach this cache (SPEC_FULL §2).

use crate::gateway_caching::CacheKeyBuilder;
use crate::multi_layer_cache::MultiLayerCache;
use crate::semantic_cache::SemanticCache;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use ultrafast_models_sdk::models::{ChatRequest, ChatResponse};

/// `¬stream ∧ temperature ≤ 0.7 ∧ messages ≠ ∅`.
pub fn is_cacheable(request: &ChatRequest) -> bool {
    !request.stream.unwrap_or(false)
        && request.temperature.unwrap_or(0.0) <= 0.7
        && !request.messages.is_empty()
}

/// Deterministic hash over the parts of the request that determine the
/// response: model, message sequence, temperature, max-tokens, top-p,
/// stop-sequences, tool definitions.
pub fn fingerprint(request: &ChatRequest) -> String {
    #[derive(Serialize)]
    struct FingerprintInput<'a> {
        model: &'a str,
        messages: &'a [ultrafast_models_sdk::models::Message],
        temperature: Option<f32>,
        max_tokens: Option<u32>,
        top_p: Option<f32>,
        stop: &'a Option<Vec<String>>,
        tools: &'a Option<Vec<ultrafast_models_sdk::models::Tool>>,
    }
    let input = FingerprintInput {
        model: &request.model,
        messages: &request.messages,
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        stop: &request.stop,
        tools: &request.tools,
    };
    let canonical = serde_json::to_string(&input).unwrap_or_default();
    CacheKeyBuilder::hash_content(&canonical)
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    compressed: bool,
    payload: String,
}

/// The outcome of an L5 lookup: the decompressed response plus the
/// fingerprint it was stored under, for the `X-Cache-Key` response header.
pub struct CacheHit {
    pub response: ChatResponse,
    pub fingerprint: String,
}

pub struct ResponseCache {
    cache: Arc<MultiLayerCache>,
    semantic: Option<Arc<SemanticCache>>,
    compression_min_size: usize,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(
        cache: Arc<MultiLayerCache>,
        semantic: Option<Arc<SemanticCache>>,
        compression_min_size: usize,
        default_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            semantic,
            compression_min_size,
            default_ttl,
        }
    }

    /// `get(request)` per SPEC_FULL §4.L5: if semantic cache is enabled, try
    /// it first on the last user message; otherwise go straight to L3 with
    /// the fingerprint.
    pub async fn get(&self, request: &ChatRequest) -> Option<CacheHit> {
        let fp = fingerprint(request);

        if let Some(semantic) = &self.semantic {
            if let Some(last_user) = last_user_message(request) {
                if let Some(raw) = semantic.get(last_user).await {
                    if let Some(response) = decode(&raw) {
                        return Some(CacheHit {
                            response,
                            fingerprint: fp,
                        });
                    }
                }
            }
        }

        let key = format!("resp:{fp}");
        let raw = self.cache.get(&key).await?;
        decode(&raw).map(|response| CacheHit {
            response,
            fingerprint: fp,
        })
    }

    /// `set(request, response, ttl)` per SPEC_FULL §4.L5: serialize, gzip
    /// above `compression_min_size`, write to L3 under the fingerprint and,
    /// if semantic cache is enabled, also under the embedding key.
    pub async fn set(&self, request: &ChatRequest, response: &ChatResponse, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let encoded = encode(response, self.compression_min_size);

        let fp = fingerprint(request);
        let key = format!("resp:{fp}");
        self.cache.set(&key, encoded.clone(), Some(ttl)).await;

        if let Some(semantic) = &self.semantic {
            if let Some(last_user) = last_user_message(request) {
                semantic.set(last_user, encoded, ttl).await;
            }
        }
    }
}

fn last_user_message(request: &ChatRequest) -> Option<&str> {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == ultrafast_models_sdk::models::Role::User)
        .map(|m| m.content.as_str())
}

fn encode(response: &ChatResponse, compression_min_size: usize) -> String {
    let json = serde_json::to_vec(response).unwrap_or_default();
    let stored = if json.len() > compression_min_size {
        let mut encoder = GzEncoder::new(json.as_slice(), Compression::default());
        let mut compressed = Vec::new();
        if encoder.read_to_end(&mut compressed).is_ok() {
            StoredEntry {
                compressed: true,
                payload: STANDARD.encode(&compressed),
            }
        } else {
            StoredEntry {
                compressed: false,
                payload: STANDARD.encode(&json),
            }
        }
    } else {
        StoredEntry {
            compressed: false,
            payload: STANDARD.encode(&json),
        }
    };
    serde_json::to_string(&stored).unwrap_or_default()
}

fn decode(raw: &str) -> Option<ChatResponse> {
    let stored: StoredEntry = serde_json::from_str(raw).ok()?;
    let bytes = STANDARD.decode(&stored.payload).ok()?;
    let json = if stored.compressed {
        let mut decoder = GzDecoder::new(bytes.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).ok()?;
        out
    } else {
        bytes
    };
    serde_json::from_slice(&json).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::multi_layer_cache::MemoryCache;
    use ultrafast_models_sdk::models::{Message, Role};

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: "gpt-4".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: "What is 2+2?".to_string(),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            }],
            temperature: Some(0.0),
            max_tokens: None,
            stream: Some(false),
            tools: None,
            tool_choice: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            user: None,
        }
    }

    fn sample_response() -> ChatResponse {
        ChatResponse {
            id: "chatcmpl-1".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4".to_string(),
            choices: vec![],
            usage: None,
            system_fingerprint: None,
        }
    }

    fn make_response_cache() -> ResponseCache {
        let memory = Arc::new(MemoryCache::new(100, 1_000_000));
        let multi = Arc::new(MultiLayerCache::new(
            memory,
            InMemoryKv::new(),
            Duration::from_secs(60),
        ));
        ResponseCache::new(multi, None, 1024, Duration::from_secs(60))
    }

    #[test]
    fn streaming_requests_are_not_cacheable() {
        let mut req = sample_request();
        req.stream = Some(true);
        assert!(!is_cacheable(&req));
    }

    #[test]
    fn high_temperature_requests_are_not_cacheable() {
        let mut req = sample_request();
        req.temperature = Some(1.0);
        assert!(!is_cacheable(&req));
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let req = sample_request();
        assert_eq!(fingerprint(&req), fingerprint(&req));
    }

    #[tokio::test]
    async fn round_trips_through_compression_boundary() {
        let cache = make_response_cache();
        let req = sample_request();
        let resp = sample_response();
        cache.set(&req, &resp, None).await;
        let hit = cache.get(&req).await.expect("cache hit");
        assert_eq!(hit.response.id, resp.id);
    }
}
