//! Retry and failover state machine for one logical generation
//!
//! Each request walks `SelectCredential → Attempt → {Succeed | RetrySame |
//! Switch | Abort}`. The transition from a classified outcome to the next step
//! is the pure `next_step` function; the executor only carries out steps
//! (sleeping, marking credentials, re-selecting).
//!
//! Attempt budget: `max(usable × (max_retries_per_credential + 1), 1)` computed
//! when the request starts, so every usable credential can take its first
//! attempt plus all of its retries. Retry counters are per request and per
//! credential.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use provider::{GenerateContentResponse, GenerationRequest, ModelId, Payload, Provider, ProviderError};
use tracing::{debug, info, warn};

use crate::classify::{ClassifiedOutcome, Expectation, classify};
use crate::error::{Failure, FailureKind, GenerationError};
use crate::scheduler::{Task, TaskFuture};
use crate::selector::SelectedCredential;
use crate::session::Session;

/// Retry tuning for quota errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries_per_credential: u32,
    pub base_backoff: Duration,
    /// How long a credential rests once its retries are used up.
    pub quota_cooldown: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `retries_used` (0-based): `base × 2^n`.
    pub fn backoff(&self, retries_used: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(retries_used))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries_per_credential: 3,
            base_backoff: Duration::from_secs(15),
            quota_cooldown: Duration::from_secs(60),
        }
    }
}

/// How to mark a credential that is being switched away from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Cooldown,
    Invalid,
}

/// Next step after one classified attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Succeed,
    RetrySame { delay: Duration },
    Switch { mark: Mark },
    Abort,
}

/// Transition table for one attempt outcome.
///
/// `retries_used` is how many same-credential retries this request already
/// spent on the credential that produced `outcome`.
pub fn next_step(outcome: &ClassifiedOutcome, retries_used: u32, policy: &RetryPolicy) -> Step {
    match outcome {
        ClassifiedOutcome::Success(_) => Step::Succeed,
        ClassifiedOutcome::RetryableSameCredential(_)
            if retries_used < policy.max_retries_per_credential =>
        {
            Step::RetrySame {
                delay: policy.backoff(retries_used),
            }
        }
        ClassifiedOutcome::RetryableSameCredential(_) => Step::Switch {
            mark: Mark::Cooldown,
        },
        ClassifiedOutcome::RetryableDifferentCredential(_) => Step::Switch {
            mark: Mark::Invalid,
        },
        ClassifiedOutcome::Fatal(_) => Step::Abort,
    }
}

enum State {
    SelectCredential,
    Attempt(SelectedCredential),
}

/// Runs one logical generation against the pool with retries and failover.
pub struct FailoverExecutor {
    session: Arc<Session>,
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
}

impl FailoverExecutor {
    pub fn new(session: Arc<Session>, provider: Arc<dyn Provider>, policy: RetryPolicy) -> Self {
        Self {
            session,
            provider,
            policy,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Run `request` through the configured provider.
    pub async fn generate(&self, request: &GenerationRequest) -> Result<Payload, GenerationError> {
        let provider = &self.provider;
        self.execute(
            request.model,
            Expectation::for_request(request),
            |credential| async move {
                provider
                    .generate(credential.secret.expose(), request)
                    .await
            },
        )
        .await
    }

    /// Wrap one generation of `request` as a scheduler task.
    pub fn task<'a>(&'a self, request: &'a GenerationRequest) -> Task<'a, Payload> {
        Box::new(move || -> TaskFuture<'a, Payload> { Box::pin(self.generate(request)) })
    }

    /// Run one logical operation with retries and failover.
    ///
    /// `op` performs exactly one upstream call with the given credential.
    /// Usage is recorded before every call.
    pub async fn execute<F, Fut>(
        &self,
        model: ModelId,
        expectation: Expectation,
        mut op: F,
    ) -> Result<Payload, GenerationError>
    where
        F: FnMut(SelectedCredential) -> Fut,
        Fut: Future<Output = Result<GenerateContentResponse, ProviderError>>,
    {
        let usable = self.session.usable_count().await;
        let budget = (usable as u32)
            .saturating_mul(self.policy.max_retries_per_credential.saturating_add(1))
            .max(1);

        let mut retries: HashMap<String, u32> = HashMap::new();
        let mut last: Option<Failure> = None;
        let mut attempts = 0u32;
        let mut state = State::SelectCredential;

        loop {
            state = match state {
                State::SelectCredential => {
                    if attempts >= budget {
                        break;
                    }
                    let selected = self.session.select(model).await?;
                    if selected.reset_pool && attempts > 0 {
                        // Every credential was rejected during this request
                        warn!(
                            credential_id = %selected.id,
                            %model,
                            "every credential rejected during this request"
                        );
                        break;
                    }
                    State::Attempt(selected)
                }
                State::Attempt(selected) => {
                    attempts += 1;
                    let id = selected.id.clone();
                    let retries_used = retries.get(&id).copied().unwrap_or(0);
                    self.session.record_call(&id).await;
                    debug!(credential_id = %id, %model, attempt = attempts, budget, "dispatching");

                    let outcome = classify(op(selected.clone()).await, expectation);
                    metrics::counter!("genai_attempts_total", "outcome" => outcome.label())
                        .increment(1);
                    let step = next_step(&outcome, retries_used, &self.policy);

                    let failure = match outcome {
                        ClassifiedOutcome::Success(payload) => {
                            info!(credential_id = %id, %model, attempt = attempts, "generation succeeded");
                            return Ok(payload);
                        }
                        ClassifiedOutcome::RetryableSameCredential(f)
                        | ClassifiedOutcome::RetryableDifferentCredential(f)
                        | ClassifiedOutcome::Fatal(f) => f,
                    };

                    let next = match step {
                        Step::RetrySame { delay } => {
                            retries.insert(id.clone(), retries_used + 1);
                            if attempts >= budget {
                                self.session
                                    .mark_cooldown(&id, self.policy.quota_cooldown)
                                    .await;
                                None
                            } else {
                                warn!(
                                    credential_id = %id,
                                    kind = %failure.kind,
                                    retry = retries_used + 1,
                                    delay_ms = delay.as_millis() as u64,
                                    "quota error, backing off before retrying same credential"
                                );
                                metrics::histogram!("genai_backoff_seconds")
                                    .record(delay.as_secs_f64());
                                tokio::time::sleep(delay).await;
                                Some(State::Attempt(selected))
                            }
                        }
                        Step::Switch { mark: Mark::Cooldown } => {
                            warn!(
                                credential_id = %id,
                                kind = %failure.kind,
                                "retries exhausted on credential, switching"
                            );
                            self.session
                                .mark_cooldown(&id, self.policy.quota_cooldown)
                                .await;
                            Some(State::SelectCredential)
                        }
                        Step::Switch { mark: Mark::Invalid } => {
                            warn!(
                                credential_id = %id,
                                kind = %failure.kind,
                                "credential rejected, switching"
                            );
                            self.session.mark_invalid(&id).await;
                            Some(State::SelectCredential)
                        }
                        Step::Succeed | Step::Abort => {
                            warn!(
                                %model,
                                kind = %failure.kind,
                                error = %failure.message,
                                "generation aborted"
                            );
                            return Err(GenerationError::from_failure(failure));
                        }
                    };

                    last = Some(failure);
                    match next {
                        Some(state) => state,
                        None => break,
                    }
                }
            };
        }

        let failure = last.unwrap_or_else(|| {
            Failure::new(FailureKind::UnknownTransient, "attempt budget exhausted")
        });
        warn!(
            %model,
            attempts,
            kind = %failure.kind,
            error = %failure.message,
            "attempt budget exhausted"
        );
        Err(GenerationError::from_failure(failure))
    }
}
