//! # HTTP Server Module
//!
//! This module provides the HTTP server setup and configuration for the Ultrafast Gateway.
//! It handles server initialization, middleware setup, routing, and application state management.
//!
//! ## Overview
//!
//! The server module is responsible for:
//! - **Server Initialization**: Setting up the HTTP server with Axum
//! - **Middleware Configuration**: Authentication, CORS, logging, metrics, and plugins
//! - **Route Registration**: API endpoints for chat, embeddings, and admin functions
//! - **Application State**: Shared state across all handlers
//! - **Plugin Integration**: Dynamic plugin loading and management
//!
//! ## Architecture
//!
//! The server uses Axum as the web framework with the following layers:
//!
//! 1. **Timeout Layer**: Request timeout handling
//! 2. **CORS Middleware**: Cross-origin resource sharing
//! 3. **Logging Middleware**: Request/response logging
//! 4. **Metrics Middleware**: Performance monitoring
//! 5. **Authentication Middleware**: API key and JWT validation
//! 6. **Input Validation Middleware**: Request validation and sanitization
//! 7. **Plugin Middleware**: Dynamic request/response modification
//!
//! ## API Endpoints
//!
//! ### Core API Endpoints
//!
//! - `POST /v1/chat/completions` - Chat completion API
//! - `POST /v1/messages` - Native (Anthropic Messages-style) chat completion API
//! - `POST /v1/embeddings` - Text embedding API
//! - `POST /v1/images/generations` - Image generation API
//!
//! ### Admin Endpoints
//!
//! - `GET /health` - Health check endpoint
//! - `GET /metrics` - Performance metrics
//! - `GET /admin/providers` - Provider status
//! - `GET /admin/config` - Configuration status
//!
//! ### WebSocket Endpoints
//!
//! - `GET /ws/dashboard` - Real-time dashboard WebSocket
//!
//! ## Usage
//!
//! ```rust
//! use ultrafast_gateway::server::create_server;
//! use ultrafast_gateway::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml")?;
//!     let app = create_server(config).await?;
//!     
//!     // The server is ready to handle requests
//!     Ok(())
//! }
//! ```
//!
//! ## Middleware Stack
//!
//! The server applies middleware in the following order:
//!
//! 1. **Timeout**: Ensures requests don't hang indefinitely
//! 2. **CORS**: Handles cross-origin requests
//! 3. **Logging**: Records request/response details
//! 4. **Metrics**: Tracks performance metrics
//! 5. **Authentication**: Validates API keys and JWT tokens
//! 6. **Input Validation**: Validates and sanitizes requests
//! 7. **Plugin Processing**: Applies dynamic plugins
//!
//! ## Application State
//!
//! The `AppState` struct contains shared state accessible to all handlers:
//!
//! - **Configuration**: Server and provider configuration
//! - **Client**: Ultrafast SDK client for provider communication
//! - **Plugin Manager**: Dynamic plugin management
//! - **Cache Manager**: Redis and in-memory caching
//! - **WebSocket Manager**: Real-time dashboard connections
//!
//! ## Error Handling
//!
//! The server includes comprehensive error handling:
//!
//! - **Timeout Errors**: Automatic request cancellation
//! - **Authentication Errors**: Proper HTTP status codes
//! - **Validation Errors**: Detailed error messages
//! - **Provider Errors**: Graceful fallback handling
//! - **Plugin Errors**: Non-blocking plugin failures

use crate::config::Config;
use crate::dashboard::websocket::WebSocketManager;
use crate::gateway_caching::CacheManager;
use crate::handlers;
use crate::kv::{InMemoryKv, KvClient, RedisKv};
use crate::middleware::{
    auth_middleware, cors_middleware, logging_middleware, metrics_middleware, plugin_middleware,
};
use crate::multi_layer_cache::{MemoryCache, MultiLayerCache};
use crate::plugins::{create_plugin, PluginManager};
use crate::pool::{Capability, PoolManager, Provider, ProviderRegistry, ProviderStatus};
use crate::quota::{Account, QuotaManager};
use crate::rate_limiter::RateLimiter;
use crate::resilience::ResilienceRegistry;
use crate::response_cache::ResponseCache;
use crate::router::ModelCatalog;
use crate::semantic_cache::{FeatureHashingEmbedder, SemanticCache};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use ultrafast_models_sdk::UltrafastClient;

/// Application state shared across all HTTP handlers.
///
/// Contains all the necessary components for handling requests:
/// configuration, client, plugins, caching, and WebSocket management.
///
/// # Thread Safety
///
/// All fields are wrapped in `Arc` for thread-safe sharing across
/// multiple request handlers.
///
/// # Example
///
/// ```rust
/// let app_state = AppState {
///     config: Arc::new(config),
///     client: Arc::new(client),
///     plugin_manager: Arc::new(plugin_manager),
///     cache_manager: Arc::new(cache_manager),
///     websocket_manager: Some(Arc::new(websocket_manager)),
/// };
/// ```
pub struct AppState {
    /// Server and provider configuration
    pub config: Arc<Config>,
    /// Ultrafast SDK client for provider communication
    pub client: Arc<UltrafastClient>,
    /// Dynamic plugin management system
    pub plugin_manager: Arc<PluginManager>,
    /// Redis and in-memory caching layer
    pub cache_manager: Arc<CacheManager>,
    /// Real-time dashboard WebSocket connections
    pub websocket_manager: Option<Arc<WebSocketManager>>,
    /// Shared key/value store backing quota, rate limiting, and L3 cache
    pub kv: Arc<dyn KvClient>,
    /// Per-account daily token quota tracker (Q1)
    pub quota_manager: Arc<QuotaManager>,
    /// Distributed sliding-window/token-bucket rate limiter (Q2)
    pub rate_limiter: Arc<RateLimiter>,
    /// Account pool selection across a provider (Q4)
    pub pool_manager: Arc<PoolManager>,
    /// Per-provider circuit breaker/bulkhead/retry pipelines (R1-R3)
    pub resilience_registry: Arc<ResilienceRegistry>,
    /// L2/L3 memory+KV cache chain
    pub multi_layer_cache: Arc<MultiLayerCache>,
    /// L4 semantic cache, when enabled
    pub semantic_cache: Option<Arc<SemanticCache>>,
    /// L5 whole-response cache
    pub response_cache: Arc<ResponseCache>,
    /// Provider administrative records consulted by the router (G1)
    pub provider_registry: Arc<ProviderRegistry>,
    /// Static model price/quality/speed catalog used to score G1 candidates
    pub model_catalog: Arc<ModelCatalog>,
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            client: self.client.clone(),
            plugin_manager: self.plugin_manager.clone(),
            cache_manager: self.cache_manager.clone(),
            websocket_manager: self.websocket_manager.clone(),
            kv: self.kv.clone(),
            quota_manager: self.quota_manager.clone(),
            rate_limiter: self.rate_limiter.clone(),
            pool_manager: self.pool_manager.clone(),
            resilience_registry: self.resilience_registry.clone(),
            multi_layer_cache: self.multi_layer_cache.clone(),
            semantic_cache: self.semantic_cache.clone(),
            response_cache: self.response_cache.clone(),
            provider_registry: self.provider_registry.clone(),
            model_catalog: self.model_catalog.clone(),
        }
    }
}

/// Create and configure the HTTP server with all middleware and routes.
///
/// This function initializes all components of the gateway:
/// - Ultrafast SDK client with configured providers
/// - Cache manager (Redis or in-memory)
/// - Authentication service and rate limiter
/// - Metrics collection system
/// - Plugin manager with configured plugins
/// - WebSocket manager for real-time dashboard
/// - HTTP server with middleware stack and routes
///
/// # Arguments
///
/// * `config` - The gateway configuration containing all settings
///
/// # Returns
///
/// Returns a configured Axum router ready to handle HTTP requests.
///
/// # Errors
///
/// Returns an error if:
/// - SDK client cannot be created
/// - Cache manager cannot be initialized
/// - Authentication service cannot be set up
/// - Metrics system cannot be initialized
/// - Plugin manager cannot be created
///
/// # Example
///
/// ```rust
/// let config = Config::load("config.toml")?;
/// let app = create_server(config).await?;
/// ```
pub async fn create_server(config: Config) -> anyhow::Result<Router> {
    // Create the SDK client in standalone mode with configured providers
    let mut client_builder = UltrafastClient::standalone();

    // Add configured providers to the client
    for (name, provider_config) in &config.providers {
        client_builder = client_builder.with_provider(name.clone(), provider_config.clone());
    }

    // Seed the G1 provider registry; accounts are registered with the
    // quota manager once it is constructed below.
    let provider_registry = Arc::new(ProviderRegistry::new());
    for (name, provider_config) in &config.providers {
        provider_registry.register(Provider {
            id: name.clone(),
            display_name: name.clone(),
            base_url: provider_config.base_url.clone().unwrap_or_default(),
            tier: default_tier_for(name),
            capabilities: default_capabilities_for(name),
            health_score: 1.0,
            avg_latency_ms: 0.0,
            status: if provider_config.enabled {
                ProviderStatus::Active
            } else {
                ProviderStatus::Maintenance
            },
            last_health_check: chrono::Utc::now(),
        });
    }
    let model_catalog = Arc::new(ModelCatalog::with_defaults());

    // If no providers configured, add Ollama as default for development
    if config.providers.is_empty() {
        client_builder = client_builder.with_ollama("http://localhost:11434");
    }

    // Build the client with the configured routing strategy
    let client = client_builder
        .with_routing_strategy(config.routing.sdk_strategy.clone())
        .build()?;

    // Initialize cache manager with the configured backend
    let cache_manager = Arc::new(CacheManager::new(config.cache.clone()).await?);

    // Initialize authentication service and rate limiter with cache manager
    crate::auth::initialize_auth_service(config.auth.clone(), cache_manager.clone()).await;

    // Perform security sanity check for JWT secrets
    if let Err(e) = {
        // Create a temporary auth service instance for sanity checking
        let tmp = crate::auth::AuthService::new(config.auth.clone());
        tmp.sanity_check()
    } {
        return Err(anyhow::anyhow!(e.to_string()));
    }

    // Initialize rate limiter with cache manager for distributed rate limiting
    crate::auth::initialize_rate_limiter(cache_manager.clone()).await?;

    // Initialize metrics collector with configuration
    let metrics_config = crate::metrics::MetricsConfig {
        enabled: config.metrics.enabled,
        max_requests: config.metrics.max_requests,
        retention_duration: config.metrics.retention_duration,
        cleanup_interval: config.metrics.cleanup_interval,
    };
    crate::metrics::initialize_metrics(metrics_config).await;

    // Initialize plugin manager for dynamic functionality
    let mut plugin_manager = PluginManager::new();

    // Register plugins from configuration
    for plugin_config in &config.plugins {
        if plugin_config.enabled {
            match create_plugin(plugin_config) {
                Ok(plugin) => {
                    if let Err(e) = plugin_manager.register_plugin(plugin).await {
                        tracing::error!("Failed to register plugin {}: {}", plugin_config.name, e);
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to create plugin {}: {}", plugin_config.name, e);
                }
            }
        }
    }

    let plugin_manager = Arc::new(plugin_manager);

    // Initialize WebSocket manager for dashboard real-time updates
    let websocket_manager = {
        let ws_manager = Arc::new(WebSocketManager::new());
        ws_manager.start_background_tasks().await;
        Some(ws_manager)
    };

    // Shared KV store backing quota, rate limiting, and the L3 cache tier.
    // Redis when the cache backend is configured for it, otherwise an
    // in-process map so the gateway still runs standalone.
    let kv: Arc<dyn KvClient> = match &config.cache.backend {
        crate::config::CacheBackend::Redis { url } => match RedisKv::new(url) {
            Ok(redis_kv) => Arc::new(redis_kv),
            Err(e) => {
                tracing::warn!("Failed to initialize Redis KV store, falling back to in-memory: {e}");
                InMemoryKv::new()
            }
        },
        crate::config::CacheBackend::Memory => InMemoryKv::new(),
    };

    let (quota_manager, mut quota_events) = QuotaManager::new(kv.clone());
    let quota_manager = Arc::new(quota_manager);
    tokio::spawn(async move {
        while let Some(event) = quota_events.recv().await {
            tracing::info!("quota event: {event:?}");
        }
    });

    let rate_limiter = Arc::new(RateLimiter::new(kv.clone()));
    let pool_manager = Arc::new(PoolManager::new(quota_manager.clone(), rate_limiter.clone()));
    let resilience_registry = Arc::new(ResilienceRegistry::new());

    // One default account per configured provider, keyed `{provider}:default`
    // so Q4 always has at least one account to select when no multi-account
    // pool has been configured elsewhere.
    for (name, provider_config) in &config.providers {
        let quota_limit = provider_config
            .rate_limit
            .as_ref()
            .map(|r| r.tokens_per_minute as u64 * 60 * 24)
            .unwrap_or(0);
        quota_manager.register(Account::new(
            format!("{name}:default"),
            name.clone(),
            quota_limit,
        ));
    }

    let memory_cache = Arc::new(MemoryCache::new(
        config.cache.memory.max_entries,
        config.cache.memory.max_size_bytes,
    ));
    let multi_layer_cache = Arc::new(MultiLayerCache::new(
        memory_cache,
        kv.clone(),
        config.cache.memory.ttl,
    ));

    let semantic_cache = if config.cache.semantic.enabled {
        Some(Arc::new(SemanticCache::new(
            Arc::new(FeatureHashingEmbedder),
            multi_layer_cache.clone(),
            config.cache.semantic.similarity_threshold,
        )))
    } else {
        None
    };

    let response_cache = Arc::new(ResponseCache::new(
        multi_layer_cache.clone(),
        semantic_cache.clone(),
        config.cache.response.compression_min_size,
        config.cache.response.default_ttl,
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        client: Arc::new(client),
        plugin_manager,
        cache_manager,
        websocket_manager,
        kv,
        quota_manager,
        rate_limiter,
        pool_manager,
        resilience_registry,
        multi_layer_cache,
        semantic_cache,
        response_cache,
        provider_registry,
        model_catalog,
    };

    // Warn if permissive CORS is used in production-like settings
    if config.server.cors.enabled && config.server.cors.allowed_origins.iter().any(|o| o == "*") {
        tracing::warn!(
            "CORS is enabled with wildcard origins. This is unsafe for production. Configure explicit allowed_origins."
        );
    }

    // Create the main router
    let app = Router::new()
        // OpenAI-compatible endpoints
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/completions", post(handlers::completions))
        .route("/v1/embeddings", post(handlers::embeddings))
        .route("/v1/images/generations", post(handlers::image_generations))
        .route(
            "/v1/audio/transcriptions",
            post(handlers::audio_transcriptions),
        )
        .route("/v1/audio/speech", post(handlers::text_to_speech))
        .route("/v1/models", get(handlers::list_models))
        // Health and admin endpoints
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .route("/metrics/prometheus", get(handlers::prometheus_metrics))
        .route("/admin/providers", get(handlers::list_providers))
        .route("/admin/config", get(handlers::get_config))
        .route(
            "/admin/circuit-breakers",
            get(handlers::get_circuit_breaker_metrics),
        )
        .route("/admin/cache/stats", get(handlers::cache_stats))
        .route("/admin/cache/clear", post(handlers::cache_clear))
        .route("/admin/cache/invalidate", post(handlers::cache_invalidate))
        // Dashboard routes
        .route("/dashboard", get(handlers::dashboard))
        .route("/dashboard.js", get(handlers::dashboard_js))
        .route("/dashboard.css", get(handlers::dashboard_css))
        .route("/ws/dashboard", get(handlers::dashboard_websocket))
        // Middleware stack (plugins now handle input validation)
        .layer(
            ServiceBuilder::new()
                .layer(cors_middleware(&config.server.cors)) // 1. CORS (first)
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    auth_middleware,
                )) // 2. Authentication (includes rate limiting)
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    plugin_middleware::plugin_middleware,
                )) // 3. Plugins (after auth)
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    logging_middleware,
                )) // 4. Logging (only authenticated requests)
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                )) // 5. Metrics (only authenticated requests)
                .layer(TimeoutLayer::new(config.server.timeout)), // 6. Timeout (last)
        )
        .with_state(state);

    Ok(app)
}

/// Tier classification for known provider names (SPEC_FULL §3: 1=premium,
/// 2=standard, 3=experimental), used to order G1 candidates. Unknown
/// providers default to standard.
fn default_tier_for(provider: &str) -> u8 {
    match provider {
        "openai" | "anthropic" => 1,
        "azure" | "google" | "google-vertex-ai" | "gemini" | "mistral" | "cohere" | "groq" => 2,
        "ollama" | "openrouter" | "perplexity" | "custom" => 3,
        _ => 2,
    }
}

/// Capability flags for known provider names, used to filter the G1
/// candidate set before ordering. Unknown providers are assumed to support
/// streaming only, the lowest common denominator.
fn default_capabilities_for(provider: &str) -> Vec<Capability> {
    match provider {
        "openai" | "azure" => vec![Capability::Streaming, Capability::Tools, Capability::JsonMode],
        "anthropic" => vec![Capability::Streaming, Capability::Tools],
        "google" | "google-vertex-ai" | "gemini" => {
            vec![Capability::Streaming, Capability::Tools, Capability::JsonMode]
        }
        "mistral" | "cohere" | "groq" | "openrouter" => {
            vec![Capability::Streaming, Capability::Tools]
        }
        _ => vec![Capability::Streaming],
    }
}
