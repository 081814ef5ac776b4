//! Explicitly owned pool state for one gateway instance
//!
//! A `Session` bundles the credential pool and its usage windows behind a
//! single async mutex, together with the read-only rate limits, the selection
//! policy and the clock. Independent sessions share nothing, so tests (or
//! several tenants in one process) never interfere.
//!
//! The mutex is only held for bookkeeping, never across an upstream call.

use std::sync::Arc;
use std::time::Duration;

use provider::ModelId;
use tokio::sync::Mutex;

use crate::clock::{Clock, TokioClock};
use crate::error::Result;
use crate::pool::{CredentialPool, CredentialStatus, PoolSummary};
use crate::profile::RateLimits;
use crate::selector::{KeySelector, SelectedCredential};
use crate::usage::UsageMonitor;

struct State {
    pool: CredentialPool,
    usage: UsageMonitor,
}

pub struct Session {
    state: Mutex<State>,
    limits: RateLimits,
    selector: KeySelector,
    clock: Arc<dyn Clock>,
}

impl Session {
    /// Session using the wall-anchored tokio clock.
    pub fn new(limits: RateLimits) -> Self {
        Self::with_clock(limits, Arc::new(TokioClock::new()))
    }

    pub fn with_clock(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State {
                pool: CredentialPool::new(),
                usage: UsageMonitor::new(limits.window),
            }),
            selector: KeySelector::new(limits.safety_margin),
            limits,
            clock,
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn ceiling_for(&self, model: ModelId) -> u32 {
        self.limits.ceiling_for(model)
    }

    /// Replace all credentials and forget all usage. Returns the loaded count.
    pub async fn load_credentials<I, S>(&self, secrets: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.lock().await;
        state.usage.clear();
        state.pool.load(secrets)
    }

    /// Pick the credential for the next attempt against `model`.
    pub async fn select(&self, model: ModelId) -> Result<SelectedCredential> {
        let now_ms = self.now_ms();
        let ceiling = self.ceiling_for(model);
        let mut state = self.state.lock().await;
        let State { pool, usage } = &mut *state;
        self.selector.select(pool, usage, ceiling, now_ms)
    }

    /// Count one dispatched call against `id`.
    pub async fn record_call(&self, id: &str) -> u32 {
        let now_ms = self.now_ms();
        self.state.lock().await.usage.record_call(id, now_ms)
    }

    pub async fn mark_invalid(&self, id: &str) -> bool {
        self.state.lock().await.pool.mark_invalid(id)
    }

    pub async fn mark_cooldown(&self, id: &str, duration: Duration) -> bool {
        let now_ms = self.now_ms();
        self.state
            .lock()
            .await
            .pool
            .mark_cooldown(id, duration, now_ms)
    }

    pub async fn reset_all(&self) {
        self.state.lock().await.pool.reset_all();
    }

    /// Number of credentials that are not invalid.
    pub async fn usable_count(&self) -> usize {
        self.state.lock().await.pool.usable_count()
    }

    pub async fn status(&self, id: &str) -> Option<CredentialStatus> {
        self.state.lock().await.pool.status(id)
    }

    pub async fn current_usage(&self, id: &str) -> u32 {
        let now_ms = self.now_ms();
        self.state.lock().await.usage.current_usage(id, now_ms)
    }

    pub async fn summary(&self) -> PoolSummary {
        let now_ms = self.now_ms();
        self.state.lock().await.pool.summary(now_ms)
    }

    /// Pool health JSON with the current-window usage of each credential.
    pub async fn health(&self) -> serde_json::Value {
        let now_ms = self.now_ms();
        let state = self.state.lock().await;
        let mut health = state.pool.health(now_ms);
        if let Some(entries) = health
            .get_mut("credentials")
            .and_then(serde_json::Value::as_array_mut)
        {
            for entry in entries {
                let usage = entry
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map(|id| state.usage.current_usage(id, now_ms))
                    .unwrap_or(0);
                entry["window_usage"] = serde_json::json!(usage);
            }
        }
        health
    }
}
