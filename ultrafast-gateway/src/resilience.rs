//! # Resilience pipeline (R1-R5)
//!
//! Composes a per-provider circuit breaker (R1, reused from
//! `ultrafast_models_sdk::circuit_breaker`), a bounded-concurrency bulkhead
//! (R2), exponential backoff retry (R3), and a fallback strategy chain (R4)
//! into the exact nesting order SPEC_FULL §4.R5 mandates:
//!
//! ```text
//! circuit_breaker.execute(() -> bulkhead.execute(() -> retry.execute(() -> call())))
//! ```
//!
//! Fallback sits outside this stack and may substitute a value when it
//! returns an error.

use dashmap::DashMap;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Semaphore};
use ultrafast_models_sdk::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use ultrafast_models_sdk::error::ProviderError;

/// Errors the resilience stack itself can produce, distinct from the
/// provider call's own error type (SPEC_FULL §7).
#[derive(Debug, thiserror::Error)]
pub enum ResilienceError<E> {
    #[error("circuit open for provider")]
    CircuitOpen { retry_after: Duration },
    #[error("bulkhead full")]
    BulkheadFull,
    #[error("bulkhead queue wait timed out")]
    BulkheadTimeout,
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Inner(E),
}

/// R2 bulkhead: a bounded concurrency gate with a bounded wait queue,
/// isolating one provider's calls from the rest of the system.
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_queue: usize,
    queued: Arc<std::sync::atomic::AtomicUsize>,
    queue_timeout: Duration,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize, max_queue: usize, queue_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_queue,
            queued: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            queue_timeout,
        }
    }

    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, ResilienceError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        use std::sync::atomic::Ordering;

        if self.semaphore.available_permits() == 0 {
            if self.queued.load(Ordering::SeqCst) >= self.max_queue {
                return Err(ResilienceError::BulkheadFull);
            }
            self.queued.fetch_add(1, Ordering::SeqCst);
        }

        let acquire = self.semaphore.clone().acquire_owned();
        let permit = match tokio::time::timeout(self.queue_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(ResilienceError::BulkheadFull),
            Err(_) => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(ResilienceError::BulkheadTimeout);
            }
        };
        self.queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| {
                Some(q.saturating_sub(1))
            })
            .ok();

        let result = f().await;
        drop(permit);
        result.map_err(ResilienceError::Inner)
    }
}

/// R3 retry: exponential backoff with jitter over a retryable-error
/// predicate, honoring a cooperative cancellation signal during waits.
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let base = base.min(self.max_backoff.as_secs_f64());
        let jitter = self.jitter_fraction * base * rand::thread_rng().gen_range(-1.0..=1.0);
        Duration::from_secs_f64((base + jitter).max(0.0))
    }

    /// Execute `f`, retrying attempts where `retryable(&err)` holds, up to
    /// `max_retries + 1` total attempts. `cancel` is checked at every wait;
    /// a signal arriving mid-wait terminates immediately with `Cancelled`.
    pub async fn execute<F, Fut, T, E>(
        &self,
        mut cancel: Option<&mut oneshot::Receiver<()>>,
        retryable: impl Fn(&E) -> bool,
        mut f: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt >= self.max_retries || !retryable(&e) {
                        return Err(ResilienceError::Inner(e));
                    }
                    let wait = self.backoff_for(attempt);
                    attempt += 1;
                    match cancel.as_deref_mut() {
                        Some(rx) => {
                            tokio::select! {
                                _ = tokio::time::sleep(wait) => {}
                                _ = rx => return Err(ResilienceError::Cancelled),
                            }
                        }
                        None => tokio::time::sleep(wait).await,
                    }
                }
            }
        }
    }
}

/// R4 fallback strategies, tried in configured order on primary failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Return a fresh cached value for `key`, if present.
    CacheFresh,
    /// Return a stale cached value for `key`, if within the stale TTL.
    CacheStale,
    /// Call the configured alternative-provider function.
    AlternativeProvider,
    /// Return a fixed degraded response.
    Degraded,
}

/// A fallback cache entry: the last-known-good value for a key, with the
/// time it was written so staleness can be judged against `stale_ttl`.
#[derive(Clone)]
struct FallbackEntry<T> {
    value: T,
    written_at: std::time::Instant,
}

pub struct Fallback<T: Clone + Send + Sync + 'static> {
    strategies: Vec<FallbackStrategy>,
    cache: DashMap<String, FallbackEntry<T>>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
    degraded_response: Option<T>,
}

impl<T: Clone + Send + Sync + 'static> Fallback<T> {
    pub fn new(
        strategies: Vec<FallbackStrategy>,
        fresh_ttl: Duration,
        stale_ttl: Duration,
        degraded_response: Option<T>,
    ) -> Self {
        Self {
            strategies,
            cache: DashMap::new(),
            fresh_ttl,
            stale_ttl,
            degraded_response,
        }
    }

    /// SPEC_FULL §4.R4 `execute`: call `f`; on success, populate the
    /// fallback cache and return. On failure, walk the configured strategy
    /// list, returning the first one that succeeds.
    pub async fn execute<F, Fut, E, A>(
        &self,
        key: &str,
        f: F,
        alternative: Option<A>,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        A: Future<Output = Result<T, E>>,
    {
        match f().await {
            Ok(value) => {
                self.cache.insert(
                    key.to_string(),
                    FallbackEntry {
                        value: value.clone(),
                        written_at: std::time::Instant::now(),
                    },
                );
                Ok(value)
            }
            Err(primary_err) => {
                for strategy in &self.strategies {
                    match strategy {
                        FallbackStrategy::CacheFresh => {
                            if let Some(entry) = self.cache.get(key) {
                                if entry.written_at.elapsed() <= self.fresh_ttl {
                                    return Ok(entry.value.clone());
                                }
                            }
                        }
                        FallbackStrategy::CacheStale => {
                            if let Some(entry) = self.cache.get(key) {
                                if entry.written_at.elapsed() <= self.stale_ttl {
                                    return Ok(entry.value.clone());
                                }
                            }
                        }
                        FallbackStrategy::AlternativeProvider => {
                            if let Some(alt) = alternative {
                                return alt.await;
                            }
                        }
                        FallbackStrategy::Degraded => {
                            if let Some(degraded) = &self.degraded_response {
                                return Ok(degraded.clone());
                            }
                        }
                    }
                }
                Err(primary_err)
            }
        }
    }
}

/// R5: per-provider composition of R1..R4. One instance is held per
/// provider in the registry below; the circuit breaker must be outermost
/// (to see bulkhead/retry rejections) and retry innermost (so transient
/// failures never consume a bulkhead slot).
pub struct ResilienceManager {
    circuit: Arc<CircuitBreaker>,
    bulkhead: Bulkhead,
    retry: RetryPolicy,
}

impl ResilienceManager {
    pub fn new(
        provider: String,
        circuit_config: CircuitBreakerConfig,
        max_concurrent: usize,
        max_queue: usize,
        queue_timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            circuit: Arc::new(CircuitBreaker::new(provider, circuit_config)),
            bulkhead: Bulkhead::new(max_concurrent, max_queue, queue_timeout),
            retry,
        }
    }

    pub async fn circuit_state(&self) -> CircuitState {
        self.circuit.get_metrics().await.state
    }

    /// Execute one provider call through circuit breaker → bulkhead →
    /// retry, in that nesting order.
    ///
    /// The SDK's `CircuitBreaker::call` collapses whatever error the
    /// operation returns into its own `CircuitBreakerError::Open`, discarding
    /// it. To preserve the real `ProviderError` for the gateway's error
    /// response, the inner closure stashes a snapshot of it in `captured`
    /// before returning, and this method reads it back out on failure.
    pub async fn execute<F, Fut>(
        &self,
        call: F,
    ) -> Result<ultrafast_models_sdk::models::ChatResponse, ProviderError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<ultrafast_models_sdk::models::ChatResponse, ProviderError>>
            + Send,
    {
        let bulkhead = &self.bulkhead;
        let retry = &self.retry;
        let captured: Arc<std::sync::Mutex<Option<ProviderError>>> =
            Arc::new(std::sync::Mutex::new(None));
        let captured_write = captured.clone();

        let outcome = self
            .circuit
            .call(move || async move {
                let captured = captured_write;
                let mut call = call;
                let result = bulkhead
                    .execute(move || async move {
                        retry
                            .execute(None, |e: &ProviderError| e.is_retryable(), &mut call)
                            .await
                            .map_err(|e| match e {
                                ResilienceError::Inner(inner) => inner,
                                ResilienceError::Cancelled => ProviderError::Timeout,
                                _ => ProviderError::ServiceUnavailable,
                            })
                    })
                    .await
                    .map_err(|e| match e {
                        ResilienceError::Inner(inner) => inner,
                        ResilienceError::BulkheadFull | ResilienceError::BulkheadTimeout => {
                            ProviderError::ServiceUnavailable
                        }
                        _ => ProviderError::ServiceUnavailable,
                    });
                if let Err(ref e) = result {
                    *captured.lock().expect("capture lock poisoned") = Some(snapshot_error(e));
                }
                result
            })
            .await;

        match outcome {
            Ok(response) => Ok(response),
            Err(ultrafast_models_sdk::circuit_breaker::CircuitBreakerError::Timeout) => {
                Err(ProviderError::Timeout)
            }
            Err(ultrafast_models_sdk::circuit_breaker::CircuitBreakerError::Open) => {
                // `Open` covers both a genuinely open circuit (operation never
                // ran, `captured` stays empty) and an operation failure the
                // breaker collapsed into `Open` after recording it.
                match captured.lock().expect("capture lock poisoned").take() {
                    Some(inner) => Err(inner),
                    None => Err(ProviderError::ServiceUnavailable),
                }
            }
        }
    }
}

/// Clone the parts of a `ProviderError` needed to classify and report it,
/// for variants (`Http`, `Serialization`) that wrap non-`Clone` upstream
/// error types.
fn snapshot_error(e: &ProviderError) -> ProviderError {
    match e {
        ProviderError::Http(err) => ProviderError::Api {
            code: err.status().map(|s| s.as_u16()).unwrap_or(502),
            message: err.to_string(),
        },
        ProviderError::Serialization(err) => ProviderError::Api {
            code: 502,
            message: err.to_string(),
        },
        ProviderError::Api { code, message } => ProviderError::Api {
            code: *code,
            message: message.clone(),
        },
        ProviderError::InvalidApiKey => ProviderError::InvalidApiKey,
        ProviderError::ModelNotFound { model } => ProviderError::ModelNotFound {
            model: model.clone(),
        },
        ProviderError::RateLimit => ProviderError::RateLimit,
        ProviderError::QuotaExceeded => ProviderError::QuotaExceeded,
        ProviderError::ServiceUnavailable => ProviderError::ServiceUnavailable,
        ProviderError::Timeout => ProviderError::Timeout,
        ProviderError::InvalidResponse => ProviderError::InvalidResponse,
        ProviderError::Configuration { message } => ProviderError::Configuration {
            message: message.clone(),
        },
        ProviderError::ProviderNotSupported { provider } => ProviderError::ProviderNotSupported {
            provider: provider.clone(),
        },
        ProviderError::FeatureNotSupported { feature } => ProviderError::FeatureNotSupported {
            feature: feature.clone(),
        },
        ProviderError::AuthenticationFailed { reason } => ProviderError::AuthenticationFailed {
            reason: reason.clone(),
        },
        ProviderError::ValidationError { field, message } => ProviderError::ValidationError {
            field: field.clone(),
            message: message.clone(),
        },
        ProviderError::NetworkError { message } => ProviderError::NetworkError {
            message: message.clone(),
        },
        ProviderError::RetryableError { message } => ProviderError::RetryableError {
            message: message.clone(),
        },
    }
}

/// Registry handing out one `ResilienceManager` per provider, created
/// lazily on first use with the provider's configured circuit/bulkhead/
/// retry parameters.
pub struct ResilienceRegistry {
    managers: DashMap<String, Arc<ResilienceManager>>,
}

impl Default for ResilienceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceRegistry {
    pub fn new() -> Self {
        Self {
            managers: DashMap::new(),
        }
    }

    pub fn get_or_create(
        &self,
        provider: &str,
        circuit_config: CircuitBreakerConfig,
        max_concurrent: usize,
        max_queue: usize,
        queue_timeout: Duration,
        retry: RetryPolicy,
    ) -> Arc<ResilienceManager> {
        self.managers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(ResilienceManager::new(
                    provider.to_string(),
                    circuit_config,
                    max_concurrent,
                    max_queue,
                    queue_timeout,
                    retry,
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn bulkhead_rejects_beyond_queue_when_saturated() {
        let bulkhead = Arc::new(Bulkhead::new(1, 0, Duration::from_millis(20)));
        let b2 = bulkhead.clone();
        let holder = tokio::spawn(async move {
            b2.execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, ProviderError>(())
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = bulkhead
            .execute(|| async { Ok::<_, ProviderError>(()) })
            .await;
        assert!(matches!(
            result,
            Err(ResilienceError::BulkheadFull) | Err(ResilienceError::BulkheadTimeout)
        ));
        holder.abort();
    }

    #[tokio::test]
    async fn retry_stops_on_non_retryable_error() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 1.0,
            jitter_fraction: 0.0,
        };
        let attempts = AtomicU32::new(0);
        let result = policy
            .execute(
                None,
                |_: &ProviderError| false,
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(ProviderError::InvalidApiKey) }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_exhausts_budget_on_retryable_error() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            multiplier: 1.0,
            jitter_fraction: 0.0,
        };
        let attempts = AtomicU32::new(0);
        let result = policy
            .execute(
                None,
                |_: &ProviderError| true,
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(ProviderError::ServiceUnavailable) }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fallback_returns_fresh_cache_on_failure() {
        let fallback: Fallback<i32> = Fallback::new(
            vec![FallbackStrategy::CacheFresh],
            Duration::from_secs(60),
            Duration::from_secs(600),
            None,
        );
        let ok: Result<i32, ProviderError> = fallback
            .execute(
                "k",
                || async { Ok(42) },
                None::<std::future::Ready<Result<i32, ProviderError>>>,
            )
            .await;
        assert_eq!(ok.unwrap(), 42);

        let fell_back = fallback
            .execute(
                "k",
                || async { Err(ProviderError::ServiceUnavailable) },
                None::<std::future::Ready<Result<i32, ProviderError>>>,
            )
            .await;
        assert_eq!(fell_back.unwrap(), 42);
    }
}
