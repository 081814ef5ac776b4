//! Sequential, paced batch execution
//!
//! Tasks run strictly one after another with a pacing delay between them so a
//! batch never bursts past the pool's combined rate. The delay is recomputed
//! before each task because the number of usable credentials can shrink
//! mid-batch.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use provider::ModelId;
use tracing::{debug, info, warn};

use crate::error::GenerationError;
use crate::session::Session;

/// Future produced by one task.
pub type TaskFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GenerationError>> + Send + 'a>>;

/// One logical generation, consumed exactly once.
pub type Task<'a, T> = Box<dyn FnOnce() -> TaskFuture<'a, T> + Send + 'a>;

/// Inter-task delay for a model's ceiling spread over the usable credentials.
///
/// `max(ceil(window / (ceiling × max(usable, 1) × margin)), floor)`. A zero
/// effective rate waits a full window.
pub fn pacing_delay(
    ceiling: u32,
    usable: usize,
    safety_margin: f64,
    window: Duration,
    floor: Duration,
) -> Duration {
    let effective = f64::from(ceiling) * usable.max(1) as f64 * safety_margin;
    if effective <= 0.0 {
        return window.max(floor);
    }
    let millis = (window.as_millis() as f64 / effective).ceil() as u64;
    Duration::from_millis(millis).max(floor)
}

pub struct TaskScheduler {
    session: Arc<Session>,
}

impl TaskScheduler {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Current pacing delay for `model`.
    pub async fn pacing_for(&self, model: ModelId) -> Duration {
        let limits = self.session.limits();
        pacing_delay(
            self.session.ceiling_for(model),
            self.session.usable_count().await,
            limits.safety_margin,
            limits.window,
            limits.floor_delay,
        )
    }

    /// Run `tasks` in order and collect the successes.
    ///
    /// A failing first task fails the whole batch. Later failures are logged
    /// and skipped, so the result may be shorter than the batch.
    pub async fn run<'a, T>(
        &self,
        model: ModelId,
        tasks: Vec<Task<'a, T>>,
    ) -> Result<Vec<T>, GenerationError> {
        let total = tasks.len();
        let mut results = Vec::with_capacity(total);

        for (index, task) in tasks.into_iter().enumerate() {
            if index > 0 {
                let delay = self.pacing_for(model).await;
                debug!(
                    task = index + 1,
                    delay_ms = delay.as_millis() as u64,
                    "pacing before next task"
                );
                tokio::time::sleep(delay).await;
            }

            match task().await {
                Ok(value) => results.push(value),
                Err(err) if index == 0 => {
                    warn!(%model, error = %err, "first task failed, abandoning batch");
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        %model,
                        task = index + 1,
                        error = %err,
                        "task failed, continuing with remaining tasks"
                    );
                }
            }
        }

        info!(%model, total, succeeded = results.len(), "batch finished");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::failover::tests::{Reply, ScriptedProvider, executor_with, image_request};
    use crate::profile::RateLimits;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[test]
    fn pacing_for_single_free_tier_key() {
        let delay = pacing_delay(
            15,
            1,
            0.85,
            Duration::from_secs(60),
            Duration::from_millis(4_000),
        );
        assert_eq!(delay, Duration::from_millis(4_706));
    }

    #[test]
    fn pacing_never_drops_below_floor() {
        let delay = pacing_delay(
            15,
            10,
            0.85,
            Duration::from_secs(60),
            Duration::from_millis(4_000),
        );
        assert_eq!(delay, Duration::from_millis(4_000));
    }

    #[test]
    fn pacing_treats_empty_pool_as_one_credential() {
        let none = pacing_delay(15, 0, 0.85, Duration::from_secs(60), Duration::ZERO);
        let one = pacing_delay(15, 1, 0.85, Duration::from_secs(60), Duration::ZERO);
        assert_eq!(none, one);
    }

    #[test]
    fn zero_ceiling_waits_a_full_window() {
        let delay = pacing_delay(0, 2, 0.85, Duration::from_secs(60), Duration::from_secs(4));
        assert_eq!(delay, Duration::from_secs(60));
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(Arc::new(Session::with_clock(
            RateLimits::default(),
            Arc::new(TokioClock::starting_at(0)),
        )))
    }

    fn fatal() -> GenerationError {
        GenerationError::ModelUnavailable {
            message: "models/gemini-x is not found".into(),
        }
    }

    /// Task that records its start time and returns `result`.
    fn recording_task<'a>(
        log: &'a Mutex<Vec<(usize, Duration)>>,
        started: Instant,
        index: usize,
        result: Result<usize, GenerationError>,
    ) -> Task<'a, usize> {
        Box::new(move || -> TaskFuture<'a, usize> {
            Box::pin(async move {
                log.lock().unwrap().push((index, started.elapsed()));
                result
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_returns_immediately() {
        let started = Instant::now();
        let results: Vec<usize> = scheduler()
            .run(ModelId::Gemini20FlashExp, Vec::new())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn first_task_failure_fails_batch() {
        let log = Mutex::new(Vec::new());
        let started = Instant::now();
        let tasks = vec![
            recording_task(&log, started, 1, Err(fatal())),
            recording_task(&log, started, 2, Ok(2)),
            recording_task(&log, started, 3, Ok(3)),
        ];

        let err = scheduler()
            .run(ModelId::Gemini20FlashExp, tasks)
            .await
            .unwrap_err();
        assert_eq!(err, fatal());
        assert_eq!(log.lock().unwrap().len(), 1, "no task runs after the first fails");
    }

    #[tokio::test(start_paused = true)]
    async fn later_failure_is_skipped_and_batch_continues() {
        let log = Mutex::new(Vec::new());
        let started = Instant::now();
        let tasks = vec![
            recording_task(&log, started, 1, Ok(1)),
            recording_task(&log, started, 2, Err(fatal())),
            recording_task(&log, started, 3, Ok(3)),
        ];

        let results = scheduler()
            .run(ModelId::Gemini20FlashExp, tasks)
            .await
            .unwrap();
        assert_eq!(results, vec![1, 3]);
        let ran: Vec<usize> = log.lock().unwrap().iter().map(|(i, _)| *i).collect();
        assert_eq!(ran, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_of_only_later_task_leaves_single_result() {
        let log = Mutex::new(Vec::new());
        let started = Instant::now();
        let tasks = vec![
            recording_task(&log, started, 1, Ok(1)),
            recording_task(&log, started, 2, Err(fatal())),
        ];

        let results = scheduler()
            .run(ModelId::Gemini20FlashExp, tasks)
            .await
            .unwrap();
        assert_eq!(results, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_are_paced_between_but_not_after() {
        let log = Mutex::new(Vec::new());
        let started = Instant::now();
        let tasks = vec![
            recording_task(&log, started, 1, Ok(1)),
            recording_task(&log, started, 2, Ok(2)),
            recording_task(&log, started, 3, Ok(3)),
        ];

        // Empty pool paces as one credential: 4706ms
        scheduler()
            .run(ModelId::Gemini20FlashExp, tasks)
            .await
            .unwrap();
        let offsets: Vec<u128> = log
            .lock()
            .unwrap()
            .iter()
            .map(|(_, at)| at.as_millis())
            .collect();
        assert_eq!(offsets, vec![0, 4_706, 9_412]);
        assert_eq!(started.elapsed().as_millis(), 9_412);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_of_generations_through_executor() {
        // Task 2 hits a safety block; tasks 1 and 3 still produce images
        let provider = Arc::new(
            ScriptedProvider::new(Reply::Image)
                .script("AIza-a", vec![Reply::Image, Reply::Blocked, Reply::Image]),
        );
        let executor = executor_with(&["AIza-a"], provider.clone()).await;
        let scheduler = TaskScheduler::new(executor.session().clone());
        let request = image_request();

        let tasks = (0..3)
            .map(|_| executor.task(&request))
            .collect();

        let results = scheduler.run(request.model, tasks).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(provider.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_generation_invalid_everywhere_fails_batch() {
        let provider = Arc::new(ScriptedProvider::new(Reply::InvalidKey));
        let executor = executor_with(&["AIza-a"], provider.clone()).await;
        let scheduler = TaskScheduler::new(executor.session().clone());
        let request = image_request();

        let tasks = (0..3)
            .map(|_| executor.task(&request))
            .collect();

        let err = scheduler.run(request.model, tasks).await.unwrap_err();
        assert_eq!(err, GenerationError::AllCredentialsInvalid);
        assert_eq!(provider.calls().len(), 1);
    }
}
