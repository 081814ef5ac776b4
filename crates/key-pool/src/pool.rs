//! Credential pool state machine
//!
//! The pool holds the loaded API keys in load order and a status per key
//! (Active, Cooldown, Invalid). It never blocks and never selects; the
//! `KeySelector` reads it and the failover executor drives its transitions.
//!
//! Cooldown recovery is lazy: `recover_expired` moves every elapsed cooldown
//! back to Active and runs at the start of every selection.

use std::collections::HashSet;
use std::time::Duration;

use common::Secret;
use tracing::{debug, info, warn};

/// Runtime status of a pooled credential.
///
/// Transitions:
/// - Active → Cooldown (quota retries exhausted)
/// - Active → Invalid (upstream rejected the key)
/// - Cooldown → Active (cooldown expired)
/// - Invalid → Active (only via `reset_all` or a fresh `load`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Active,
    Cooldown { until_ms: u64 },
    Invalid,
}

impl CredentialStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Cooldown { .. } => "cooldown",
            CredentialStatus::Invalid => "invalid",
        }
    }

    /// Earliest time this credential can be used, `None` if never.
    pub fn available_at(&self, now_ms: u64) -> Option<u64> {
        match self {
            CredentialStatus::Active => Some(now_ms),
            CredentialStatus::Cooldown { until_ms } => Some((*until_ms).max(now_ms)),
            CredentialStatus::Invalid => None,
        }
    }
}

/// One loaded API key.
#[derive(Debug)]
pub struct Credential {
    pub(crate) id: String,
    pub(crate) secret: Secret<String>,
    pub(crate) status: CredentialStatus,
}

/// Counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub total: usize,
    pub active: usize,
    pub cooling_down: usize,
    pub invalid: usize,
}

/// Ordered set of credentials with their lifecycle status.
#[derive(Debug, Default)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
}

impl CredentialPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pool wholesale.
    ///
    /// Entries are trimmed; blank entries are dropped and duplicates collapse
    /// to their first occurrence. Every loaded key starts Active. Returns the
    /// number of keys now in the pool.
    pub fn load<I, S>(&mut self, secrets: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut credentials = Vec::new();
        let mut skipped = 0usize;

        for raw in secrets {
            let trimmed = raw.as_ref().trim();
            if trimmed.is_empty() {
                skipped += 1;
                continue;
            }
            let secret = Secret::new(trimmed.to_string());
            let id = secret.fingerprint();
            if !seen.insert(id.clone()) {
                skipped += 1;
                continue;
            }
            credentials.push(Credential {
                id,
                secret,
                status: CredentialStatus::Active,
            });
        }

        self.credentials = credentials;
        info!(
            credentials = self.credentials.len(),
            skipped, "credential pool loaded"
        );
        self.credentials.len()
    }

    /// Permanently remove a credential from rotation.
    ///
    /// Returns false if the id is unknown.
    pub fn mark_invalid(&mut self, id: &str) -> bool {
        let Some(credential) = self.find_mut(id) else {
            return false;
        };
        if credential.status != CredentialStatus::Invalid {
            warn!(credential_id = id, "credential marked invalid");
            credential.status = CredentialStatus::Invalid;
            record_transition("invalid");
        }
        true
    }

    /// Put a credential into cooldown until `now_ms + duration`.
    ///
    /// An invalid credential stays invalid. Returns false if the id is unknown.
    pub fn mark_cooldown(&mut self, id: &str, duration: Duration, now_ms: u64) -> bool {
        let Some(credential) = self.find_mut(id) else {
            return false;
        };
        if credential.status == CredentialStatus::Invalid {
            debug!(credential_id = id, "ignoring cooldown for invalid credential");
            return true;
        }
        let until_ms = now_ms.saturating_add(duration.as_millis() as u64);
        info!(
            credential_id = id,
            cooldown_secs = duration.as_secs(),
            "credential entering cooldown (quota exhausted)"
        );
        credential.status = CredentialStatus::Cooldown { until_ms };
        record_transition("cooldown");
        true
    }

    /// Return every credential to Active.
    pub fn reset_all(&mut self) {
        for credential in &mut self.credentials {
            credential.status = CredentialStatus::Active;
        }
        info!(
            credentials = self.credentials.len(),
            "credential pool reset, all credentials active"
        );
        record_transition("reset");
    }

    /// Lift every cooldown that has elapsed at `now_ms`.
    ///
    /// Returns how many credentials recovered.
    pub fn recover_expired(&mut self, now_ms: u64) -> usize {
        let mut recovered = 0;
        for credential in &mut self.credentials {
            match credential.status {
                CredentialStatus::Cooldown { until_ms } if until_ms <= now_ms => {
                    info!(
                        credential_id = %credential.id,
                        "cooldown expired, credential active again"
                    );
                    credential.status = CredentialStatus::Active;
                    recovered += 1;
                }
                _ => {}
            }
        }
        if recovered > 0 {
            metrics::counter!("genai_credential_transitions_total", "to" => "active")
                .increment(recovered as u64);
        }
        recovered
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Number of credentials that are not invalid.
    pub fn usable_count(&self) -> usize {
        self.credentials
            .iter()
            .filter(|c| c.status != CredentialStatus::Invalid)
            .count()
    }

    /// Credential ids in pool order.
    pub fn ids(&self) -> Vec<String> {
        self.credentials.iter().map(|c| c.id.clone()).collect()
    }

    pub fn status(&self, id: &str) -> Option<CredentialStatus> {
        self.credentials
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.status)
    }

    /// Count credentials by status. Elapsed cooldowns count as active.
    pub fn summary(&self, now_ms: u64) -> PoolSummary {
        let mut summary = PoolSummary {
            total: self.credentials.len(),
            ..PoolSummary::default()
        };
        for credential in &self.credentials {
            match credential.status {
                CredentialStatus::Active => summary.active += 1,
                CredentialStatus::Cooldown { until_ms } if until_ms <= now_ms => {
                    summary.active += 1
                }
                CredentialStatus::Cooldown { .. } => summary.cooling_down += 1,
                CredentialStatus::Invalid => summary.invalid += 1,
            }
        }
        summary
    }

    /// Pool health summary for the health endpoint.
    ///
    /// All active → healthy, some usable → degraded, none usable → unhealthy.
    /// Only credential ids appear, never the keys.
    pub fn health(&self, now_ms: u64) -> serde_json::Value {
        let summary = self.summary(now_ms);
        let credentials: Vec<serde_json::Value> = self
            .credentials
            .iter()
            .map(|credential| match credential.status {
                CredentialStatus::Cooldown { until_ms } if until_ms > now_ms => {
                    serde_json::json!({
                        "id": credential.id,
                        "status": "cooldown",
                        "cooldown_remaining_secs": (until_ms - now_ms).div_ceil(1000)
                    })
                }
                CredentialStatus::Cooldown { .. } => serde_json::json!({
                    "id": credential.id,
                    "status": "active"
                }),
                status => serde_json::json!({
                    "id": credential.id,
                    "status": status.label()
                }),
            })
            .collect();

        let usable = summary.active + summary.cooling_down;
        let pool_status = if summary.total > 0 && summary.active == summary.total {
            "healthy"
        } else if usable > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": pool_status,
            "credentials_total": summary.total,
            "credentials_active": summary.active,
            "credentials_cooling_down": summary.cooling_down,
            "credentials_invalid": summary.invalid,
            "credentials": credentials
        })
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Credential> {
        self.credentials.iter_mut().find(|c| c.id == id)
    }
}

fn record_transition(to: &'static str) {
    metrics::counter!("genai_credential_transitions_total", "to" => to).increment(1);
}
