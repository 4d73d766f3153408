//! Periodic maintenance tasks.
//!
//! Each registered task runs on its own fixed interval. Runs serialize
//! across processes through a [`TaskLock`]: failing to take the lock means
//! another instance is already on it, and the run is skipped, not failed.
//! A task that still fails after the retry policy raises an operator alert.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use derive_more::{Display, Error};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::alert::AlertNotifier;
use crate::db::{DbError, GameRepository, GameStatus};
use crate::lock::TaskLock;
use crate::position;
use crate::retry::{self, RetryPolicy};

/// Scheduled task error with location tracking.
#[derive(Debug, Clone, Display, Error)]
#[display("Task error: {} at {}:{}", message, file, line)]
pub struct TaskError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl TaskError {
    /// Creates a new task error with caller location tracking.
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Self {
            message: message.into(),
            line: loc.line(),
            file: loc.file(),
        }
    }
}

impl From<DbError> for TaskError {
    #[track_caller]
    fn from(err: DbError) -> Self {
        Self::new(err.to_string())
    }
}

/// A unit of periodic maintenance work.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    /// Stable task name, used for the lock file and logs.
    fn name(&self) -> &'static str;

    /// Runs the task once.
    async fn run(&self) -> Result<(), TaskError>;
}

/// Drives registered tasks on their intervals.
pub struct Scheduler {
    tasks: Vec<(Arc<dyn ScheduledTask>, Duration)>,
    lock: Arc<dyn TaskLock>,
    retry_policy: RetryPolicy,
    alerts: AlertNotifier,
    run_on_startup: bool,
}

impl Scheduler {
    /// Creates a scheduler with its collaborators passed in explicitly.
    pub fn new(
        lock: Arc<dyn TaskLock>,
        retry_policy: RetryPolicy,
        alerts: AlertNotifier,
        run_on_startup: bool,
    ) -> Self {
        Self {
            tasks: Vec::new(),
            lock,
            retry_policy,
            alerts,
            run_on_startup,
        }
    }

    /// Registers a task to run every `every`.
    pub fn register(&mut self, task: Arc<dyn ScheduledTask>, every: Duration) {
        info!(task = task.name(), every_secs = every.as_secs(), "Task registered");
        self.tasks.push((task, every));
    }

    /// Spawns one tokio task per registered task and returns their handles.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let Self {
            tasks,
            lock,
            retry_policy,
            alerts,
            run_on_startup,
        } = self;

        tasks
            .into_iter()
            .map(|(task, every)| {
                let lock = lock.clone();
                let retry_policy = retry_policy.clone();
                let alerts = alerts.clone();

                tokio::spawn(async move {
                    if run_on_startup {
                        run_guarded(task.as_ref(), lock.as_ref(), &retry_policy, &alerts).await;
                    }
                    let mut ticker =
                        tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                    loop {
                        ticker.tick().await;
                        run_guarded(task.as_ref(), lock.as_ref(), &retry_policy, &alerts).await;
                    }
                })
            })
            .collect()
    }
}

/// One guarded run: lock, retry, alert on terminal failure.
async fn run_guarded(
    task: &dyn ScheduledTask,
    lock: &dyn TaskLock,
    policy: &RetryPolicy,
    alerts: &AlertNotifier,
) {
    let name = task.name();
    let _guard = match lock.try_acquire(name) {
        Ok(Some(guard)) => guard,
        Ok(None) => {
            info!(task = name, "Task already running elsewhere, skipping this run");
            return;
        }
        Err(e) => {
            error!(task = name, error = %e, "Lock acquisition failed, skipping this run");
            return;
        }
    };

    debug!(task = name, "Running scheduled task");
    match retry::retry(policy, name, || task.run()).await {
        Ok(()) => info!(task = name, "Scheduled task completed"),
        Err(e) => {
            error!(task = name, error = %e, "Scheduled task failed after retries");
            alerts
                .notify(
                    "scheduled_task_failure",
                    &e.to_string(),
                    serde_json::json!({ "task": name }),
                )
                .await;
        }
    }
}

/// Marks in-progress games with no move inside the idle window as abandoned,
/// closing them with a result-less game record.
pub struct AbandonStaleGames {
    repository: GameRepository,
    max_idle_hours: i64,
}

impl AbandonStaleGames {
    /// Creates the task over the given repository.
    pub fn new(repository: GameRepository, max_idle_hours: i64) -> Self {
        Self {
            repository,
            max_idle_hours,
        }
    }
}

#[async_trait]
impl ScheduledTask for AbandonStaleGames {
    fn name(&self) -> &'static str {
        "abandon_stale_games"
    }

    #[instrument(skip(self))]
    async fn run(&self) -> Result<(), TaskError> {
        let cutoff = Utc::now().naive_utc() - chrono::Duration::hours(self.max_idle_hours);
        let games = self.repository.stale_games(cutoff)?;

        for game in games {
            let history = match self.repository.current_session(*game.id())? {
                Some(session) => session.parse_moves()?,
                None => Vec::new(),
            };
            let token = GameStatus::Abandoned.result_token();
            let pgn = position::pgn_from_history(&history, token)
                .map_err(|e| TaskError::new(e.to_string()))?;
            self.repository
                .finish_game(*game.id(), GameStatus::Abandoned, &pgn)?;
            info!(game_id = game.id(), "Stale game abandoned");
        }
        Ok(())
    }
}
