//! # Pool manager (Q4)
//!
//! Selects an account from a provider's pool under a configured strategy,
//! gated by the quota manager (Q1) and rate limiter (Q2). Per SPEC_FULL §9
//! the pool manager is the sole orchestrator holding references to Q1/Q2;
//! neither of them calls back into this module, breaking the
//! pool/quota/rate-limiter coordination cycle.

use crate::quota::{Availability, QuotaManager};
use crate::rate_limiter::{LimitKind, RateLimiter};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A provider's lifecycle status, per SPEC_FULL §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderStatus {
    Active,
    Maintenance,
    Down,
    Deprecated,
}

/// A capability a provider may or may not support; used to filter candidate
/// providers before routing orders them (SPEC_FULL §4.G1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    Streaming,
    Tools,
    JsonMode,
}

/// An upstream LLM provider's administrative record. Mutated by the health
/// monitor (out of scope here) and by the resilience manager on circuit
/// transitions; never deleted by the dataplane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    pub tier: u8,
    pub capabilities: Vec<Capability>,
    pub health_score: f64,
    pub avg_latency_ms: f64,
    pub status: ProviderStatus,
    pub last_health_check: DateTime<Utc>,
}

impl Provider {
    /// `available ⇔ status=active ∧ health_score > 0.5 ∧ (now − last_health_check) < 10 min`
    pub fn available(&self) -> bool {
        self.status == ProviderStatus::Active
            && self.health_score > 0.5
            && (Utc::now() - self.last_health_check).num_seconds() < 600
    }

    pub fn supports(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }

    /// Update the EMA latency the way a health monitor would after an
    /// observed call; exposed here because the resilience manager is the
    /// one observing per-call latency in this dataplane.
    pub fn record_latency(&mut self, observed_ms: f64, alpha: f64) {
        self.avg_latency_ms = alpha * observed_ms + (1.0 - alpha) * self.avg_latency_ms;
    }
}

/// Load-balancing strategy for `Q4.get_account`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceMethod {
    LeastUsed,
    RoundRobin,
    Random,
}

impl Default for LoadBalanceMethod {
    fn default() -> Self {
        LoadBalanceMethod::LeastUsed
    }
}

pub struct PoolManager {
    quota: Arc<QuotaManager>,
    rate_limiter: Arc<RateLimiter>,
    round_robin_cursors: DashMap<String, AtomicUsize>,
}

/// Administrative registry of `Provider` records, populated at startup from
/// configuration and consulted by the router (G1) to build its candidate
/// set. Mutation (health/status transitions) happens out of band from the
/// request path, per SPEC_FULL §3's provider lifecycle.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: DashMap<String, Provider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    pub fn register(&self, provider: Provider) {
        self.providers.insert(provider.id.clone(), provider);
    }

    pub fn get(&self, id: &str) -> Option<Provider> {
        self.providers.get(id).map(|e| e.clone())
    }

    pub fn all(&self) -> Vec<Provider> {
        self.providers.iter().map(|e| e.clone()).collect()
    }

    /// Applied by the resilience manager on circuit-breaker state
    /// transitions (SPEC_FULL §3's provider lifecycle note) and by a health
    /// monitor after an observed call.
    pub fn record_outcome(&self, id: &str, success: bool, latency_ms: f64) {
        if let Some(mut entry) = self.providers.get_mut(id) {
            entry.record_latency(latency_ms, 0.2);
            entry.health_score = if success {
                (entry.health_score + 0.05).min(1.0)
            } else {
                (entry.health_score - 0.2).max(0.0)
            };
            entry.last_health_check = Utc::now();
        }
    }
}

impl PoolManager {
    pub fn new(quota: Arc<QuotaManager>, rate_limiter: Arc<RateLimiter>) -> Self {
        Self {
            quota,
            rate_limiter,
            round_robin_cursors: DashMap::new(),
        }
    }

    /// SPEC_FULL §4.Q4 `get_account`. Returns `None` rather than waiting
    /// when no account is eligible, per the fail-fast Open Question
    /// resolution in DESIGN.md.
    pub async fn get_account(
        &self,
        provider: &str,
        method: LoadBalanceMethod,
        tokens_needed: u64,
    ) -> Option<String> {
        let mut accounts = self.quota.accounts_for_provider(provider);
        if accounts.is_empty() {
            return None;
        }
        // Tie-break on `quota_used` ascending, then creation timestamp
        // (older first), which both `least_used` and the eligibility scan
        // below rely on.
        accounts.sort_by(|a, b| {
            a.quota_used
                .cmp(&b.quota_used)
                .then(a.created_at.cmp(&b.created_at))
        });

        match method {
            LoadBalanceMethod::LeastUsed => {
                for account in &accounts {
                    if self.eligible(provider, &account.id, tokens_needed).await {
                        return Some(account.id.clone());
                    }
                }
                None
            }
            LoadBalanceMethod::RoundRobin => {
                let len = accounts.len();
                let start = {
                    // Short lock only to read the cursor; dropped before the
                    // (possibly multi-await) eligibility scan below, per
                    // SPEC_FULL §5's ban on holding the cursor lock across
                    // account eligibility checks.
                    self.round_robin_cursors
                        .entry(provider.to_string())
                        .or_insert_with(|| AtomicUsize::new(0))
                        .load(Ordering::SeqCst)
                };
                for offset in 0..len {
                    let idx = (start + 1 + offset) % len;
                    if self
                        .eligible(provider, &accounts[idx].id, tokens_needed)
                        .await
                    {
                        if let Some(cursor) = self.round_robin_cursors.get(provider) {
                            cursor.store(idx, Ordering::SeqCst);
                        }
                        return Some(accounts[idx].id.clone());
                    }
                }
                None
            }
            LoadBalanceMethod::Random => {
                let mut eligible = Vec::new();
                for account in &accounts {
                    if self.eligible(provider, &account.id, tokens_needed).await {
                        eligible.push(account.id.clone());
                    }
                }
                eligible.choose(&mut rand::thread_rng()).cloned()
            }
        }
    }

    /// SPEC_FULL §4.Q4 `get_best`: score-based pick across eligible
    /// accounts, smaller score wins.
    pub async fn get_best(&self, provider: &str, tokens_needed: u64) -> Option<String> {
        let accounts = self.quota.accounts_for_provider(provider);
        let mut best: Option<(String, f64)> = None;
        for account in &accounts {
            if !self.eligible(provider, &account.id, tokens_needed).await {
                continue;
            }
            let usage_ratio = account.usage_percent();
            let days_since_reset = (Utc::now() - account.last_reset).num_seconds() as f64
                / 86_400.0;
            let recency_factor = days_since_reset.min(1.0);
            let score = 0.5 * usage_ratio + 0.3 * days_since_reset.min(1.0) + 0.2 * recency_factor;
            if best.as_ref().map(|(_, s)| score < *s).unwrap_or(true) {
                best = Some((account.id.clone(), score));
            }
        }
        best.map(|(id, _)| id)
    }

    async fn eligible(&self, provider: &str, account_id: &str, tokens_needed: u64) -> bool {
        if !matches!(
            self.quota.check_availability(account_id, tokens_needed).await,
            Availability::Available { .. }
        ) {
            return false;
        }
        self.rate_limiter
            .check(provider, account_id, LimitKind::Rpm)
            .await
            .allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;
    use crate::quota::Account;

    async fn setup() -> (Arc<QuotaManager>, Arc<RateLimiter>) {
        let kv = InMemoryKv::new();
        let (quota, _rx) = QuotaManager::new(kv.clone());
        let rate_limiter = RateLimiter::new(kv);
        (Arc::new(quota), Arc::new(rate_limiter))
    }

    #[tokio::test]
    async fn least_used_picks_lowest_quota_used() {
        let (quota, rate_limiter) = setup().await;
        quota.register(Account::new("a", "openai", 1000));
        let mut b = Account::new("b", "openai", 1000);
        b.quota_used = 10;
        quota.register(b);

        let mgr = PoolManager::new(quota, rate_limiter);
        let picked = mgr
            .get_account("openai", LoadBalanceMethod::LeastUsed, 1)
            .await;
        assert_eq!(picked.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn no_eligible_account_returns_none() {
        let (quota, rate_limiter) = setup().await;
        let mut a = Account::new("a", "openai", 100);
        a.quota_used = 100;
        quota.register(a);

        let mgr = PoolManager::new(quota, rate_limiter);
        let picked = mgr
            .get_account("openai", LoadBalanceMethod::LeastUsed, 1)
            .await;
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn round_robin_advances_cursor() {
        let (quota, rate_limiter) = setup().await;
        quota.register(Account::new("a", "openai", 1000));
        quota.register(Account::new("b", "openai", 1000));

        let mgr = PoolManager::new(quota, rate_limiter);
        let first = mgr
            .get_account("openai", LoadBalanceMethod::RoundRobin, 1)
            .await;
        let second = mgr
            .get_account("openai", LoadBalanceMethod::RoundRobin, 1)
            .await;
        assert_ne!(first, second);
    }
}
