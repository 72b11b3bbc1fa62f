//! Sync scheduling - manual and periodic modes, with backoff after failed
//! sessions.

use serde::{Deserialize, Serialize};
use std::future::{pending, Future};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use geosync_common::{Error, Result};

use crate::coordinator::{SyncCoordinator, SyncOutcome};
use crate::retry::RetryConfig;
use crate::transport::Transport;

/// Sync mode configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Sync only when requested.
    Manual,
    /// Sync at regular intervals, and when requested.
    Periodic { interval: Duration },
}

/// Requests accepted by the scheduler task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleRequest {
    /// Run a job and report its outcome.
    Sync,
    /// Run a job, nobody waits for it (e.g. app returned to foreground).
    Trigger,
    /// Stop the scheduler.
    Shutdown,
}

/// What a job tells the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// Done until the next trigger.
    Success,
    /// Try again later with backoff.
    Retry,
    /// The job cannot run at all; no retry is scheduled.
    Failure,
}

type Request = (ScheduleRequest, Option<oneshot::Sender<JobOutcome>>);

/// Scheduler for managing sync timing and requests.
pub struct SyncScheduler {
    /// Current sync mode.
    mode: watch::Sender<SyncMode>,
    /// Channel to send sync requests.
    request_tx: mpsc::Sender<Request>,
}

impl SyncScheduler {
    /// Create a new scheduler with the given mode.
    pub fn new(mode: SyncMode) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let (mode_tx, mode_rx) = watch::channel(mode);

        let scheduler = Self {
            mode: mode_tx,
            request_tx,
        };

        let handle = SyncSchedulerHandle {
            mode: mode_rx,
            request_rx,
            retry: RetryConfig::default(),
        };

        (scheduler, handle)
    }

    /// Request a job and wait for its outcome.
    pub async fn request_sync(&self) -> Result<JobOutcome> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send((ScheduleRequest::Sync, Some(response_tx)))
            .await
            .map_err(|_| Error::Scheduler("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Scheduler("Failed to receive sync outcome".to_string()))
    }

    /// Request a job without waiting for it.
    pub async fn notify_foreground(&self) -> Result<()> {
        self.request_tx
            .send((ScheduleRequest::Trigger, None))
            .await
            .map_err(|_| Error::Scheduler("Scheduler not running".to_string()))
    }

    /// Change the sync mode. Takes effect immediately.
    pub fn set_mode(&self, mode: SyncMode) {
        self.mode.send_replace(mode);
    }

    /// Get current sync mode.
    pub fn get_mode(&self) -> SyncMode {
        self.mode.borrow().clone()
    }

    /// Shutdown the scheduler.
    pub async fn shutdown(&self) {
        let _ = self
            .request_tx
            .send((ScheduleRequest::Shutdown, None))
            .await;
    }
}

/// Handle for the scheduler background task.
pub struct SyncSchedulerHandle {
    mode: watch::Receiver<SyncMode>,
    request_rx: mpsc::Receiver<Request>,
    retry: RetryConfig,
}

impl SyncSchedulerHandle {
    /// Set the backoff used after `Retry` outcomes.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run the scheduler background task.
    ///
    /// This should be spawned in a tokio task. `job` is called whenever a
    /// sync is needed, on its own task, and at most one job runs at a time:
    /// `Sync` requests arriving meanwhile receive the running job's outcome,
    /// while triggers and periodic ticks are dropped. Returns when the
    /// scheduler is shut down or every [`SyncScheduler`] is dropped, after
    /// the running job finishes.
    pub async fn run<F, Fut>(self, job: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = JobOutcome> + Send + 'static,
    {
        let Self {
            mut mode,
            mut request_rx,
            retry,
        } = self;
        let mut periodic = periodic_interval(&mode.borrow_and_update());
        let mut running: Option<JoinHandle<JobOutcome>> = None;
        let mut waiters: Vec<oneshot::Sender<JobOutcome>> = Vec::new();
        let mut backoff = Backoff::new(retry);

        info!("Sync scheduler started");

        loop {
            tokio::select! {
                request = request_rx.recv() => match request {
                    None => {
                        info!("Scheduler dropped, stopping");
                        break;
                    }
                    Some((ScheduleRequest::Shutdown, _)) => {
                        info!("Received shutdown request");
                        break;
                    }
                    Some((request, response_tx)) => {
                        if running.is_some() {
                            debug!("Sync already running, {:?} request joins it", request);
                        } else {
                            debug!("Processing sync request: {:?}", request);
                            running = Some(tokio::spawn(job()));
                        }
                        waiters.extend(response_tx);
                    }
                },

                Ok(()) = mode.changed() => {
                    let current = mode.borrow_and_update().clone();
                    info!("Sync mode changed to {:?}", current);
                    periodic = periodic_interval(&current);
                }

                _ = wait_for_periodic(&mut periodic) => {
                    if running.is_some() {
                        debug!("Sync already running, periodic tick dropped");
                    } else {
                        debug!("Triggering periodic sync");
                        running = Some(tokio::spawn(job()));
                    }
                }

                _ = wait_for_retry(backoff.retry_at), if running.is_none() => {
                    info!("Retrying sync (retry {} of {})", backoff.attempts, backoff.config.max_retries);
                    backoff.retry_at = None;
                    running = Some(tokio::spawn(job()));
                }

                finished = wait_for_job(&mut running) => {
                    running = None;
                    let outcome = job_outcome(finished);
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(outcome);
                    }
                    backoff.record(outcome);
                }
            }
        }

        if let Some(job) = running {
            info!("Waiting for the running sync to finish");
            let outcome = job_outcome(job.await);
            for waiter in waiters {
                let _ = waiter.send(outcome);
            }
        }
    }
}

/// Retry state after failed jobs.
struct Backoff {
    config: RetryConfig,
    attempts: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            retry_at: None,
        }
    }

    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Success => {
                if self.attempts > 0 {
                    info!("Sync recovered after {} retries", self.attempts);
                }
                self.reset();
            }
            JobOutcome::Retry if self.config.allows_retry(self.attempts) => {
                let delay = self.config.delay_for_attempt(self.attempts);
                self.attempts += 1;
                self.retry_at = Some(Instant::now() + delay);
                info!("Sync needs retry, next attempt in {:?}", delay);
            }
            JobOutcome::Retry => {
                warn!(
                    "Sync still failing after {} retries, waiting for the next trigger",
                    self.attempts
                );
                self.reset();
            }
            JobOutcome::Failure => {
                error!("Sync job failed, no retry scheduled");
                self.reset();
            }
        }
    }

    fn reset(&mut self) {
        self.attempts = 0;
        self.retry_at = None;
    }
}

fn job_outcome(finished: std::result::Result<JobOutcome, JoinError>) -> JobOutcome {
    finished.unwrap_or_else(|e| {
        error!("Sync job panicked: {}", e);
        JobOutcome::Failure
    })
}

async fn wait_for_job(
    job: &mut Option<JoinHandle<JobOutcome>>,
) -> std::result::Result<JobOutcome, JoinError> {
    match job {
        Some(job) => job.await,
        None => pending().await,
    }
}

/// Interval for `mode`, first ticking one period from now.
fn periodic_interval(mode: &SyncMode) -> Option<Interval> {
    match mode {
        SyncMode::Periodic { interval } if !interval.is_zero() => {
            let mut ticks = interval_at(Instant::now() + *interval, *interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(ticks)
        }
        _ => None,
    }
}

async fn wait_for_periodic(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_for_retry(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

/// Background job running one coordinator session.
///
/// Holds the coordinator weakly so a scheduler outliving it reports
/// [`JobOutcome::Failure`] instead of keeping it alive.
pub struct SyncJob<T: Transport + ?Sized> {
    coordinator: Weak<SyncCoordinator<T>>,
}

impl<T: Transport + ?Sized> Clone for SyncJob<T> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<T: Transport + ?Sized + 'static> SyncJob<T> {
    pub fn new(coordinator: &Arc<SyncCoordinator<T>>) -> Self {
        Self {
            coordinator: Arc::downgrade(coordinator),
        }
    }

    /// Run one session, or join the running one.
    pub async fn run(&self) -> JobOutcome {
        let Some(coordinator) = self.coordinator.upgrade() else {
            error!("Sync coordinator is gone, job cannot run");
            return JobOutcome::Failure;
        };
        match coordinator.sync().await {
            SyncOutcome::Succeeded => JobOutcome::Success,
            SyncOutcome::RetryNeeded => JobOutcome::Retry,
        }
    }
}
