//! # Quota manager (Q1)
//!
//! Tracks per-account daily token quota with a daily reset boundary,
//! warning/exhausted observer callbacks, and a background sweeper. The
//! in-process `Account` map is the durable store; the shared KV client is an
//! advisory accelerator mirrored best-effort on every write, per the
//! reset-race resolution recorded in DESIGN.md.

use crate::kv::KvClient;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const ONE_DAY_SECS: i64 = 24 * 3600;
const WARNING_THRESHOLD: f64 = 0.80;

/// An account's lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Inactive,
    Expired,
}

/// A single provider account with its quota bookkeeping.
///
/// Invariants: `quota_used >= 0`; `quota_used <= quota_limit` unless
/// `quota_limit == 0` (unlimited).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub provider: String,
    pub status: AccountStatus,
    pub quota_used: u64,
    pub quota_limit: u64,
    pub last_reset: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Set once the 80% warning has fired since the last reset, so the
    /// callback is idempotent per crossing.
    #[serde(skip, default)]
    warned: Arc<AtomicBool>,
}

impl Account {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, quota_limit: u64) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            provider: provider.into(),
            status: AccountStatus::Active,
            quota_used: 0,
            quota_limit,
            last_reset: now,
            created_at: now,
            warned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn usage_percent(&self) -> f64 {
        if self.quota_limit == 0 {
            0.0
        } else {
            self.quota_used as f64 / self.quota_limit as f64
        }
    }
}

/// Outcome of `check_availability`.
#[derive(Debug, Clone, PartialEq)]
pub enum Availability {
    Available { usage_percent: f64 },
    Unavailable { reason: &'static str },
}

/// Effectful notifications the quota manager emits instead of calling back
/// into caller-supplied closures directly (SPEC_FULL §9).
#[derive(Debug, Clone)]
pub enum QuotaEvent {
    WarningThresholdCrossed { account_id: String, usage_percent: f64 },
    QuotaExhausted { account_id: String },
}

pub struct QuotaManager {
    accounts: DashMap<String, Account>,
    kv: Arc<dyn KvClient>,
    events: mpsc::Sender<QuotaEvent>,
}

impl QuotaManager {
    pub fn new(kv: Arc<dyn KvClient>) -> (Self, mpsc::Receiver<QuotaEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                accounts: DashMap::new(),
                kv,
                events: tx,
            },
            rx,
        )
    }

    pub fn register(&self, account: Account) {
        self.accounts.insert(account.id.clone(), account);
    }

    fn emit(&self, event: QuotaEvent) {
        if self.events.try_send(event).is_err() {
            tracing::warn!("quota event channel full, dropping event");
        }
    }

    /// SPEC_FULL §4.Q1 `check_availability`, in the exact specified order.
    pub async fn check_availability(&self, account_id: &str, tokens_needed: u64) -> Availability {
        let Some(mut entry) = self.accounts.get_mut(account_id) else {
            return Availability::Unavailable {
                reason: "not_found",
            };
        };

        if entry.status == AccountStatus::Inactive {
            return Availability::Unavailable { reason: "inactive" };
        }
        if entry.status == AccountStatus::Expired {
            return Availability::Unavailable { reason: "expired" };
        }

        if (Utc::now() - entry.last_reset).num_seconds() >= ONE_DAY_SECS {
            self.reset_locked(&mut entry);
        }

        if entry.quota_limit > 0 && entry.quota_used + tokens_needed > entry.quota_limit {
            self.emit(QuotaEvent::QuotaExhausted {
                account_id: account_id.to_string(),
            });
            return Availability::Unavailable { reason: "exceeded" };
        }

        let usage_percent = entry.usage_percent();
        if usage_percent >= WARNING_THRESHOLD
            && !entry.warned.swap(true, Ordering::SeqCst)
        {
            self.emit(QuotaEvent::WarningThresholdCrossed {
                account_id: account_id.to_string(),
                usage_percent,
            });
        }

        Availability::Available { usage_percent }
    }

    /// SPEC_FULL §4.Q1 `consume`: atomic increment in the shared KV (best
    /// effort) and the durable store, then a warning re-check.
    pub async fn consume(&self, account_id: &str, tokens: u64) {
        // Mutate and read back the durable store under the shard lock, then
        // drop the guard before awaiting the KV mirror — SPEC_FULL §5
        // forbids holding a lock across I/O.
        let usage_percent = {
            let Some(mut entry) = self.accounts.get_mut(account_id) else {
                return;
            };
            entry.quota_used += tokens;
            entry.usage_percent()
        };

        let kv_key = format!("quota:{account_id}");
        if let Err(e) = self
            .kv
            .incr_by(&kv_key, tokens as i64, std::time::Duration::from_secs(ONE_DAY_SECS as u64))
            .await
        {
            tracing::warn!("quota KV mirror failed for {account_id}: {e}");
        }

        if usage_percent >= WARNING_THRESHOLD {
            let Some(entry) = self.accounts.get(account_id) else {
                return;
            };
            if !entry.warned.swap(true, Ordering::SeqCst) {
                self.emit(QuotaEvent::WarningThresholdCrossed {
                    account_id: account_id.to_string(),
                    usage_percent,
                });
            }
        }
    }

    /// SPEC_FULL §4.Q1 `reset`: zero `quota_used`, advance `last_reset`,
    /// atomically with respect to concurrent consumers (guarded by the
    /// `DashMap` shard lock for the entry).
    pub async fn reset(&self, account_id: &str) {
        if let Some(mut entry) = self.accounts.get_mut(account_id) {
            self.reset_locked(&mut entry);
        }
        let kv_key = format!("quota:{account_id}");
        let _ = self.kv.del(&kv_key).await;
    }

    fn reset_locked(&self, entry: &mut Account) {
        entry.quota_used = 0;
        entry.last_reset = Utc::now();
        entry.warned.store(false, Ordering::SeqCst);
    }

    /// Hourly background sweep: resets every active account whose
    /// `last_reset` is more than 24h old. Intended to be driven by a
    /// `tokio::time::interval` in the server's background-task set.
    pub async fn sweep(&self) {
        let stale: Vec<String> = self
            .accounts
            .iter()
            .filter(|e| {
                e.status == AccountStatus::Active
                    && (Utc::now() - e.last_reset).num_seconds() >= ONE_DAY_SECS
            })
            .map(|e| e.id.clone())
            .collect();
        for id in stale {
            self.reset(&id).await;
        }
    }

    pub fn get(&self, account_id: &str) -> Option<Account> {
        self.accounts.get(account_id).map(|e| e.clone())
    }

    pub fn accounts_for_provider(&self, provider: &str) -> Vec<Account> {
        self.accounts
            .iter()
            .filter(|e| e.provider == provider)
            .map(|e| e.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKv;

    #[tokio::test]
    async fn exceeding_limit_is_unavailable() {
        let (mgr, _rx) = QuotaManager::new(InMemoryKv::new());
        let mut account = Account::new("acc-1", "openai", 100);
        account.quota_used = 50;
        mgr.register(account);

        let result = mgr.check_availability("acc-1", 80).await;
        assert_eq!(
            result,
            Availability::Unavailable {
                reason: "exceeded"
            }
        );
    }

    #[tokio::test]
    async fn warning_fires_once_per_crossing() {
        let (mgr, mut rx) = QuotaManager::new(InMemoryKv::new());
        let mut account = Account::new("acc-1", "openai", 100);
        account.quota_used = 75;
        mgr.register(account);

        mgr.consume("acc-1", 10).await;
        let event = rx.try_recv().expect("warning event expected");
        assert!(matches!(event, QuotaEvent::WarningThresholdCrossed { .. }));

        mgr.consume("acc-1", 1).await;
        assert!(rx.try_recv().is_err(), "warning should not refire");
    }

    #[tokio::test]
    async fn reset_zeroes_usage_and_unblocks() {
        let (mgr, _rx) = QuotaManager::new(InMemoryKv::new());
        let mut account = Account::new("acc-1", "openai", 100);
        account.quota_used = 100;
        mgr.register(account);

        assert!(matches!(
            mgr.check_availability("acc-1", 1).await,
            Availability::Unavailable { .. }
        ));
        mgr.reset("acc-1").await;
        assert!(matches!(
            mgr.check_availability("acc-1", 1).await,
            Availability::Available { .. }
        ));
    }
}
