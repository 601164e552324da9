//! # Router (G1)
//!
//! Resolves a canonical OpenAI model name to a candidate provider set,
//! filters that set by the request's required capabilities, and orders the
//! survivors per SPEC_FULL §4.G1: `(tier, strategy score, health score desc,
//! latency asc)`. The router itself never calls a provider — `handlers`
//! drives Q4 account selection and R5 execution over the ordered list this
//! module returns.

use crate::pool::{Capability, Provider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `routing.strategy`, per SPEC_FULL §6's configuration surface. Distinct
/// from `ultrafast_models_sdk::routing::RoutingStrategy`, which configures
/// the SDK's own standalone-mode client (still used directly by the
/// embeddings/image/audio endpoints that sit outside the account-pool
/// dataplane).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterStrategy {
    CostOptimized,
    LatencyFirst,
    QualityFirst,
}

impl Default for RouterStrategy {
    fn default() -> Self {
        RouterStrategy::CostOptimized
    }
}

/// A generation model hosted by a provider (SPEC_FULL §3 `Model`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub canonical_name: String,
    pub context_length: u32,
    pub max_output_tokens: u32,
    pub input_price_per_1k: f64,
    pub output_price_per_1k: f64,
    pub quality: f64,
    pub speed: f64,
}

impl ModelInfo {
    fn fallback(provider: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            canonical_name: model.to_string(),
            context_length: 8192,
            max_output_tokens: 2048,
            input_price_per_1k: 0.01,
            output_price_per_1k: 0.03,
            quality: 0.6,
            speed: 0.6,
        }
    }
}

/// Static catalog of known model names, used to score the `cost_optimized`
/// and `quality_first` routing strategies. Unknown `(provider, model)`
/// pairs fall back to `ModelInfo::fallback`, so every lookup is total.
pub struct ModelCatalog {
    entries: HashMap<(String, String), ModelInfo>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ModelCatalog {
    pub fn with_defaults() -> Self {
        let mut entries = HashMap::new();
        let known = [
            (
                "openai",
                "gpt-4",
                8192,
                4096,
                0.03,
                0.06,
                0.95_f64,
                0.5_f64,
            ),
            (
                "openai",
                "gpt-4o",
                128_000,
                4096,
                0.005,
                0.015,
                0.93,
                0.8,
            ),
            (
                "openai",
                "gpt-3.5-turbo",
                16_385,
                4096,
                0.0005,
                0.0015,
                0.75,
                0.9,
            ),
            (
                "anthropic",
                "claude-3-opus-20240229",
                200_000,
                4096,
                0.015,
                0.075,
                0.97,
                0.45,
            ),
            (
                "anthropic",
                "claude-3-sonnet-20240229",
                200_000,
                4096,
                0.003,
                0.015,
                0.88,
                0.7,
            ),
            (
                "anthropic",
                "claude-3-haiku-20240307",
                200_000,
                4096,
                0.00025,
                0.00125,
                0.72,
                0.95,
            ),
            (
                "google",
                "gemini-1.5-pro",
                1_000_000,
                8192,
                0.0035,
                0.0105,
                0.9,
                0.7,
            ),
            (
                "google",
                "gemini-1.5-flash",
                1_000_000,
                8192,
                0.000075,
                0.0003,
                0.78,
                0.95,
            ),
            (
                "groq",
                "llama3-70b-8192",
                8192,
                8192,
                0.00059,
                0.00079,
                0.8,
                0.99,
            ),
            (
                "mistral",
                "mistral-large-latest",
                32_000,
                4096,
                0.004,
                0.012,
                0.85,
                0.75,
            ),
            (
                "ollama",
                "llama3",
                8192,
                4096,
                0.0,
                0.0,
                0.65,
                0.85,
            ),
        ];
        for (provider, model, ctx, max_out, in_price, out_price, quality, speed) in known {
            entries.insert(
                (provider.to_string(), model.to_string()),
                ModelInfo {
                    provider: provider.to_string(),
                    canonical_name: model.to_string(),
                    context_length: ctx,
                    max_output_tokens: max_out,
                    input_price_per_1k: in_price,
                    output_price_per_1k: out_price,
                    quality,
                    speed,
                },
            );
        }
        Self { entries }
    }

    pub fn lookup(&self, provider: &str, model: &str) -> ModelInfo {
        self.entries
            .get(&(provider.to_string(), model.to_string()))
            .cloned()
            .unwrap_or_else(|| ModelInfo::fallback(provider, model))
    }
}

/// A candidate provider ready for G1 ordering: the provider record plus the
/// model info resolved for the requested canonical model name.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider_id: String,
    pub model: ModelInfo,
    pub health_score: f64,
    pub avg_latency_ms: f64,
    pub tier: u8,
}

fn strategy_score(strategy: RouterStrategy, model: &ModelInfo, latency_ms: f64) -> f64 {
    match strategy {
        // Lower is better for cost; price per 1k tokens blended input/output.
        RouterStrategy::CostOptimized => model.input_price_per_1k + model.output_price_per_1k,
        // Lower is better; latency already in the right direction.
        RouterStrategy::LatencyFirst => latency_ms,
        // Lower is better, so invert a [0,1] quality score.
        RouterStrategy::QualityFirst => 1.0 - model.quality,
    }
}

/// SPEC_FULL §4.G1 steps 2-3: resolve `model` across `providers` (capability
/// filtered), order by `(tier, strategy score, health score desc, latency
/// asc)`, and return provider ids in the order they should be tried.
pub fn order_candidates(
    providers: &[Provider],
    catalog: &ModelCatalog,
    model: &str,
    strategy: RouterStrategy,
    required_capabilities: &[Capability],
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = providers
        .iter()
        .filter(|p| p.available())
        .filter(|p| required_capabilities.iter().all(|cap| p.supports(*cap)))
        .map(|p| {
            let info = catalog.lookup(&p.id, model);
            Candidate {
                provider_id: p.id.clone(),
                model: info,
                health_score: p.health_score,
                avg_latency_ms: p.avg_latency_ms,
                tier: p.tier,
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        a.tier
            .cmp(&b.tier)
            .then(
                strategy_score(strategy, &a.model, a.avg_latency_ms)
                    .partial_cmp(&strategy_score(strategy, &b.model, b.avg_latency_ms))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                b.health_score
                    .partial_cmp(&a.health_score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(
                a.avg_latency_ms
                    .partial_cmp(&b.avg_latency_ms)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ProviderStatus;
    use chrono::Utc;

    fn provider(id: &str, tier: u8, health: f64, latency: f64) -> Provider {
        Provider {
            id: id.to_string(),
            display_name: id.to_string(),
            base_url: String::new(),
            tier,
            capabilities: vec![Capability::Streaming],
            health_score: health,
            avg_latency_ms: latency,
            status: ProviderStatus::Active,
            last_health_check: Utc::now(),
        }
    }

    #[test]
    fn cost_optimized_orders_cheapest_model_first() {
        let providers = vec![provider("openai", 1, 0.9, 200.0), provider("ollama", 2, 0.9, 300.0)];
        let catalog = ModelCatalog::with_defaults();
        let ordered = order_candidates(
            &providers,
            &catalog,
            "gpt-4",
            RouterStrategy::CostOptimized,
            &[],
        );
        // openai is tier 1 so it sorts first regardless of price at equal tier ranking
        assert_eq!(ordered.first().unwrap().provider_id, "openai");
    }

    #[test]
    fn unavailable_providers_are_filtered_out() {
        let mut down = provider("openai", 1, 0.9, 200.0);
        down.status = ProviderStatus::Down;
        let providers = vec![down];
        let catalog = ModelCatalog::with_defaults();
        let ordered = order_candidates(
            &providers,
            &catalog,
            "gpt-4",
            RouterStrategy::CostOptimized,
            &[],
        );
        assert!(ordered.is_empty());
    }

    #[test]
    fn capability_filter_excludes_non_supporting_providers() {
        let providers = vec![provider("openai", 1, 0.9, 200.0)];
        let catalog = ModelCatalog::with_defaults();
        let ordered = order_candidates(
            &providers,
            &catalog,
            "gpt-4",
            RouterStrategy::CostOptimized,
            &[Capability::Tools],
        );
        assert!(ordered.is_empty());
    }
}
