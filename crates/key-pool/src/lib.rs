//! Credential pool and failover core for the Gemini generation gateway
//!
//! Owns everything between "the caller wants one generation" and "one upstream
//! call with one API key": which key to use, how fast to go, what an outcome
//! means, and whether to wait, switch keys, or give up. All mutable state
//! lives in an explicit `Session`; nothing here is process-global.
//!
//! Credential lifecycle:
//! 1. Keys are loaded into the pool via `Session::load_credentials` → `Active`
//! 2. `KeySelector` picks the active key with the lowest usage in the current window
//! 3. Upstream quota error → delayed retry on the same key, then `Cooldown`
//! 4. Upstream invalid-key error → `Invalid`, next key tried immediately
//! 5. Cooldown expires → automatic transition back to `Active`
//! 6. Every key invalid → the pool is reset so the next request can start fresh

pub mod classify;
pub mod clock;
pub mod error;
pub mod failover;
pub mod pool;
pub mod profile;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod usage;

pub use classify::{ClassifiedOutcome, Expectation, classify};
pub use clock::{Clock, TokioClock};
pub use error::{Failure, FailureKind, GenerationError, PoolError, Result};
pub use failover::{FailoverExecutor, Mark, RetryPolicy, Step, next_step};
pub use pool::{CredentialPool, CredentialStatus, PoolSummary};
pub use profile::{RateLimitProfile, RateLimits};
pub use scheduler::{Task, TaskFuture, TaskScheduler, pacing_delay};
pub use selector::{KeySelector, SelectedCredential};
pub use session::Session;
pub use usage::UsageMonitor;
