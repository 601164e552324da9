//! # Distributed rate limiter (Q2)
//!
//! Sliding-window (RPM/RPH/RPD) and token-bucket (TPM/TPD) limits over the
//! shared KV client, plus a concurrency gauge released via RAII so a leak
//! cannot survive any exit path — including panics — from the guarded
//! section (SPEC_FULL §9's "scoped-release discipline").

use crate::kv::{now_nanos, KvClient};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    Rpm,
    Rph,
    Rpd,
    Tpm,
    Tpd,
    Concurrent,
}

impl LimitKind {
    fn as_str(&self) -> &'static str {
        match self {
            LimitKind::Rpm => "rpm",
            LimitKind::Rph => "rph",
            LimitKind::Rpd => "rpd",
            LimitKind::Tpm => "tpm",
            LimitKind::Tpd => "tpd",
            LimitKind::Concurrent => "concurrent",
        }
    }

    fn window(&self) -> Duration {
        match self {
            LimitKind::Rpm | LimitKind::Tpm => Duration::from_secs(60),
            LimitKind::Rph => Duration::from_secs(3600),
            LimitKind::Rpd | LimitKind::Tpd => Duration::from_secs(86_400),
            LimitKind::Concurrent => Duration::from_secs(300),
        }
    }

    fn is_window(&self) -> bool {
        matches!(self, LimitKind::Rpm | LimitKind::Rph | LimitKind::Rpd)
    }

    fn is_bucket(&self) -> bool {
        matches!(self, LimitKind::Tpm | LimitKind::Tpd)
    }
}

/// Result of a `check` call, carrying enough information for the caller to
/// compute a `Retry-After` header.
#[derive(Debug, Clone, Copy)]
pub struct CheckResult {
    pub allowed: bool,
    pub retry_after: Duration,
}

/// A configured bound on `(provider, limit-kind)`, with an optional
/// per-account override (SPEC_FULL §3 `RateLimit`).
#[derive(Debug, Clone)]
pub struct RateLimitRule {
    pub kind: LimitKind,
    pub limit: i64,
    pub per_account_override: Option<i64>,
}

pub struct RateLimiter {
    kv: Arc<dyn KvClient>,
    concurrency: DashMap<String, Arc<AtomicI64>>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvClient>) -> Self {
        Self {
            kv,
            concurrency: DashMap::new(),
        }
    }

    fn key(&self, prefix: &str, provider: &str, account: &str, kind: LimitKind) -> String {
        format!("{prefix}:{provider}:{account}:{}", kind.as_str())
    }

    /// Sliding-window / token-bucket `check`, per SPEC_FULL §4.Q2. The
    /// concurrency kind has its own `acquire`/guard API below and is not
    /// handled by this method.
    pub async fn check(&self, provider: &str, account: &str, kind: LimitKind) -> CheckResult {
        if kind.is_window() {
            return self.check_window(provider, account, kind, i64::MAX).await;
        }
        if kind.is_bucket() {
            return self.check_bucket(provider, account, kind).await;
        }
        CheckResult {
            allowed: true,
            retry_after: Duration::from_secs(1),
        }
    }

    async fn check_window(
        &self,
        provider: &str,
        account: &str,
        kind: LimitKind,
        limit: i64,
    ) -> CheckResult {
        let key = self.key("slidingwindow", provider, account, kind);
        let window_nanos = kind.window().as_nanos() as i64;
        let now = now_nanos();
        let _ = self.kv.zremrangebyscore(&key, now - window_nanos).await;
        let count = self.kv.zcard(&key).await.unwrap_or(0);
        CheckResult {
            allowed: count < limit,
            retry_after: kind.window(),
        }
    }

    /// SPEC_FULL §4.Q2 sliding-window `record`.
    pub async fn record(&self, provider: &str, account: &str, kind: LimitKind) {
        let key = self.key("slidingwindow", provider, account, kind);
        let now = now_nanos();
        let _ = self.kv.zadd(&key, &now.to_string(), now).await;
        let _ = self.kv.expire(&key, kind.window() * 2).await;
    }

    /// Sliding-window check gated by an actual configured limit, used by
    /// the pool manager and router rather than the bare `check` above
    /// (which defaults to `i64::MAX`, i.e. unconfigured == unlimited).
    pub async fn check_with_limit(
        &self,
        provider: &str,
        account: &str,
        kind: LimitKind,
        limit: i64,
    ) -> CheckResult {
        if kind.is_window() {
            return self.check_window(provider, account, kind, limit).await;
        }
        self.check_bucket(provider, account, kind).await
    }

    async fn check_bucket(&self, provider: &str, account: &str, kind: LimitKind) -> CheckResult {
        let key = self.key("tokenbucket", provider, account, kind);
        let refill_key = format!("{key}:last_refill");
        let now = now_nanos();
        let last_refill: i64 = self
            .kv
            .get(&refill_key)
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        if last_refill == 0 || now - last_refill >= kind.window().as_nanos() as i64 {
            let _ = self.kv.set(&refill_key, &now.to_string(), None).await;
        }

        let remaining: i64 = self
            .kv
            .get(&key)
            .await
            .ok()
            .flatten()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        CheckResult {
            allowed: remaining > 0,
            retry_after: kind.window(),
        }
    }

    /// Token-bucket `consume(n)`: decrement atomically; roll back (re-add)
    /// if the result goes negative.
    pub async fn consume_tokens(
        &self,
        provider: &str,
        account: &str,
        kind: LimitKind,
        n: i64,
    ) -> bool {
        let key = self.key("tokenbucket", provider, account, kind);
        let remaining = self.kv.decr_by(&key, n).await.unwrap_or(-1);
        if remaining < 0 {
            let _ = self.kv.incr_by(&key, n, kind.window()).await;
            return false;
        }
        true
    }

    /// Refill a token bucket to `capacity`, called by the pool manager (or
    /// a background sweeper) on the refill boundary.
    pub async fn refill_bucket(&self, provider: &str, account: &str, kind: LimitKind, capacity: i64) {
        let key = self.key("tokenbucket", provider, account, kind);
        let _ = self.kv.set(&key, &capacity.to_string(), None).await;
        let refill_key = format!("{key}:last_refill");
        let _ = self.kv.set(&refill_key, &now_nanos().to_string(), None).await;
    }

    /// Acquire a concurrency slot for `(provider, account)`, returning a
    /// guard that decrements on every exit path from its scope, including
    /// panics — the scoped-release discipline SPEC_FULL §9 requires.
    pub fn try_acquire_concurrency(
        self: &Arc<Self>,
        provider: &str,
        account: &str,
        limit: i64,
    ) -> Option<ConcurrencySlot> {
        let key = format!("ratelimit:concurrent:{provider}:{account}");
        let counter = self
            .concurrency
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .clone();

        let mut current = counter.load(Ordering::SeqCst);
        loop {
            if current >= limit {
                return None;
            }
            match counter.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Some(ConcurrencySlot { counter });
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// `retry_after` per SPEC_FULL §4.Q2: window TTL (or window length) for
    /// window-based limits, a short constant for concurrency.
    pub fn retry_after(&self, kind: LimitKind) -> Duration {
        match kind {
            LimitKind::Concurrent => Duration::from_secs(1),
            other => other.window(),
        }
    }
}

/// RAII guard released on every exit path, including panic unwinds, from
/// the scope that acquired a concurrency slot.
pub struct ConcurrencySlot {
    counter: Arc<AtomicI64>,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    #[tokio::test]
    async fn sliding_window_allows_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new(InMemoryKv::new());
        for _ in 0..2 {
            let result = limiter
                .check_with_limit("openai", "acc", LimitKind::Rpm, 2)
                .await;
            assert!(result.allowed);
            limiter.record("openai", "acc", LimitKind::Rpm).await;
        }
        let result = limiter
            .check_with_limit("openai", "acc", LimitKind::Rpm, 2)
            .await;
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn concurrency_slot_releases_on_drop() {
        let limiter = Arc::new(RateLimiter::new(InMemoryKv::new()));
        {
            let _slot = limiter
                .try_acquire_concurrency("openai", "acc", 1)
                .expect("first acquire succeeds");
            assert!(limiter
                .try_acquire_concurrency("openai", "acc", 1)
                .is_none());
        }
        assert!(limiter
            .try_acquire_concurrency("openai", "acc", 1)
            .is_some());
    }
}
