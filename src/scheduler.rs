//! Periodic background tasks.
//!
//! Each task runs on its own loop. A tick that arrives while the previous run
//! is still in progress is skipped and logged. [`Scheduler::stop`] cancels every
//! loop and waits for in-flight runs to finish; calling it again is a no-op.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDateTime, NaiveTime};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::services::lifecycle::BookingEngine;

#[async_trait]
pub trait Job: Send + Sync + 'static {
    async fn run(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub enum Schedule {
    Every(Duration),
    /// Once a day at this wall-clock time, as reported by the scheduler's clock.
    DailyAt(NaiveTime),
}

#[derive(Default)]
struct TaskState {
    running: AtomicBool,
    stopped: AtomicBool,
    runs: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub name: &'static str,
    pub running: bool,
    pub stopped: bool,
    pub runs: u64,
    pub skipped: u64,
}

struct Task {
    name: &'static str,
    state: Arc<TaskState>,
    handle: Option<JoinHandle<()>>,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    token: CancellationToken,
    tasks: Mutex<Vec<Task>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub async fn spawn(&self, name: &'static str, schedule: Schedule, job: Arc<dyn Job>) {
        let state = Arc::new(TaskState::default());
        let handle = tokio::spawn(run_loop(
            name,
            schedule,
            job,
            self.clock.clone(),
            state.clone(),
            self.token.child_token(),
        ));
        tracing::info!(task = name, ?schedule, "scheduled task started");
        self.tasks.lock().await.push(Task {
            name,
            state,
            handle: Some(handle),
        });
    }

    pub async fn status(&self) -> Vec<TaskStatus> {
        self.tasks
            .lock()
            .await
            .iter()
            .map(|t| TaskStatus {
                name: t.name,
                running: t.state.running.load(Ordering::SeqCst),
                stopped: t.state.stopped.load(Ordering::SeqCst),
                runs: t.state.runs.load(Ordering::SeqCst),
                skipped: t.state.skipped.load(Ordering::SeqCst),
            })
            .collect()
    }

    pub async fn stop(&self) {
        let mut tasks = self.tasks.lock().await;
        self.token.cancel();
        for task in tasks.iter_mut() {
            if let Some(handle) = task.handle.take() {
                if let Err(e) = handle.await {
                    tracing::error!(task = task.name, error = %e, "scheduled task panicked");
                }
                tracing::info!(task = task.name, "scheduled task stopped");
            }
        }
    }
}

async fn run_loop(
    name: &'static str,
    schedule: Schedule,
    job: Arc<dyn Job>,
    clock: Arc<dyn Clock>,
    state: Arc<TaskState>,
    token: CancellationToken,
) {
    let mut in_flight = JoinSet::new();
    let mut interval = match schedule {
        Schedule::Every(period) => {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            Some(interval)
        }
        Schedule::DailyAt(_) => None,
    };

    loop {
        let tick = async {
            match (&mut interval, schedule) {
                (Some(interval), _) => {
                    interval.tick().await;
                }
                (None, Schedule::DailyAt(at)) => {
                    tokio::time::sleep(until_next(clock.now(), at)).await;
                }
                (None, Schedule::Every(period)) => tokio::time::sleep(period).await,
            }
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
            _ = tick => {}
        }

        if state.running.swap(true, Ordering::SeqCst) {
            state.skipped.fetch_add(1, Ordering::SeqCst);
            tracing::info!(task = name, "previous run still in progress, skipping tick");
            continue;
        }

        let job = job.clone();
        let state = state.clone();
        in_flight.spawn(async move {
            let started = std::time::Instant::now();
            if let Err(e) = job.run().await {
                tracing::error!(task = name, error = %e, "scheduled task failed");
            }
            state.runs.fetch_add(1, Ordering::SeqCst);
            state.running.store(false, Ordering::SeqCst);
            tracing::debug!(task = name, elapsed_ms = started.elapsed().as_millis() as u64, "scheduled task finished");
        });
    }

    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            tracing::error!(task = name, error = %e, "scheduled run panicked");
        }
    }
    state.stopped.store(true, Ordering::SeqCst);
}

/// Time from `now` until the next occurrence of `at`, strictly in the future.
fn until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

// ── Booking tasks ──

struct AutoComplete(Arc<BookingEngine>);

#[async_trait]
impl Job for AutoComplete {
    async fn run(&self) -> anyhow::Result<()> {
        self.0.complete_due().await?;
        Ok(())
    }
}

struct Reminders(Arc<BookingEngine>);

#[async_trait]
impl Job for Reminders {
    async fn run(&self) -> anyhow::Result<()> {
        self.0.send_reminders().await?;
        Ok(())
    }
}

struct IdleDeactivation(Arc<BookingEngine>);

#[async_trait]
impl Job for IdleDeactivation {
    async fn run(&self) -> anyhow::Result<()> {
        let deactivated = self.0.deactivate_idle_users().await?;
        tracing::info!(deactivated, "idle account sweep finished");
        Ok(())
    }
}

/// Starts auto-completion, reminders and idle-account deactivation.
pub async fn start(engine: Arc<BookingEngine>, clock: Arc<dyn Clock>, config: &AppConfig) -> Scheduler {
    let scheduler = Scheduler::new(clock);
    scheduler
        .spawn(
            "auto_complete",
            Schedule::Every(config.auto_complete_interval),
            Arc::new(AutoComplete(engine.clone())),
        )
        .await;
    scheduler
        .spawn(
            "reminders",
            Schedule::Every(config.reminder_interval),
            Arc::new(Reminders(engine.clone())),
        )
        .await;
    scheduler
        .spawn(
            "idle_deactivation",
            Schedule::DailyAt(config.deactivation_time),
            Arc::new(IdleDeactivation(engine)),
        )
        .await;
    scheduler
}
