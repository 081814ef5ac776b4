//! Usage-aware credential selection
//!
//! Picks the coolest key: the active credential with the fewest calls in the
//! current window, as long as it is under the safety-margined ceiling. When
//! every active key is hot the selector degrades to "soonest available", and
//! when every key is invalid it resets the pool rather than refusing work.

use common::Secret;
use tracing::{debug, warn};

use crate::error::{PoolError, Result};
use crate::pool::{Credential, CredentialPool, CredentialStatus};
use crate::usage::UsageMonitor;

/// A credential chosen for one attempt.
#[derive(Debug, Clone)]
pub struct SelectedCredential {
    pub id: String,
    pub secret: Secret<String>,
    /// The pool had to be reset because every credential was invalid.
    pub reset_pool: bool,
}

/// Selection policy over a pool and its usage windows.
#[derive(Debug, Clone, Copy)]
pub struct KeySelector {
    safety_margin: f64,
}

impl KeySelector {
    pub fn new(safety_margin: f64) -> Self {
        Self { safety_margin }
    }

    /// Choose the credential for the next attempt.
    ///
    /// Priority:
    /// 1. Expired cooldowns are lifted first.
    /// 2. Active credentials below `ceiling × safety_margin`, lowest usage wins.
    /// 3. Any non-invalid credential, earliest availability then lowest usage.
    /// 4. Every credential invalid: reset the pool and return the first.
    ///
    /// Ties always go to pool order. An empty pool is the only error.
    pub fn select(
        &self,
        pool: &mut CredentialPool,
        usage: &UsageMonitor,
        ceiling: u32,
        now_ms: u64,
    ) -> Result<SelectedCredential> {
        if pool.is_empty() {
            return Err(PoolError::Empty);
        }

        pool.recover_expired(now_ms);

        let threshold = f64::from(ceiling) * self.safety_margin;

        let cool = pool
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == CredentialStatus::Active)
            .map(|(index, c)| (usage.current_usage(&c.id, now_ms), index, c))
            .filter(|(used, _, _)| f64::from(*used) < threshold)
            .min_by_key(|(used, index, _)| (*used, *index));

        if let Some((used, _, credential)) = cool {
            return Ok(selected(credential, used, false));
        }

        let fallback = pool
            .iter()
            .enumerate()
            .filter_map(|(index, c)| {
                c.status
                    .available_at(now_ms)
                    .map(|at| (at, usage.current_usage(&c.id, now_ms), index, c))
            })
            .min_by_key(|(at, used, index, _)| (*at, *used, *index));

        if let Some((available_at, used, _, credential)) = fallback {
            debug!(
                available_in_ms = available_at - now_ms,
                "no credential under the safety margin, using soonest available"
            );
            return Ok(selected(credential, used, false));
        }

        warn!(
            credentials = pool.len(),
            "every credential is invalid, resetting pool"
        );
        pool.reset_all();
        pool.iter()
            .next()
            .map(|first| selected(first, usage.current_usage(&first.id, now_ms), true))
            .ok_or(PoolError::Empty)
    }
}

fn selected(credential: &Credential, used: u32, reset_pool: bool) -> SelectedCredential {
    debug!(
        credential_id = %credential.id,
        usage = used,
        status = credential.status.label(),
        "credential selected"
    );
    SelectedCredential {
        id: credential.id.clone(),
        secret: credential.secret.clone(),
        reset_pool,
    }
}
