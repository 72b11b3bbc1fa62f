//! Sync coordinator: runs single-flight sessions across all participants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{self, JoinError};
use tracing::{debug, error, info, warn};

use geosync_common::Result;

use crate::participant::{Participant, ParticipantFailure, SyncResult};
use crate::query::{BatchedQuery, SyncRequest};
use crate::registry::ParticipantRegistry;
use crate::response::{decode_document, DocumentError};
use crate::transport::{Transport, TransportOutcome};

/// Terminal result of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncOutcome {
    /// Every participant reached its last page, or dropped out after a
    /// contained storage failure.
    Succeeded,
    /// A round failed at the transport or document level. Already applied
    /// pages stay applied; the next session resumes from their cursors.
    RetryNeeded,
}

/// Counters over the coordinator's lifetime.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    pub sessions_started: u64,
    pub sessions_succeeded: u64,
    pub sessions_retry_needed: u64,
    /// Rounds executed across all sessions.
    pub rounds: u64,
    pub last_outcome: Option<SyncOutcome>,
    pub last_duration: Option<Duration>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

/// Why a round aborted its session.
#[derive(Debug, Error)]
enum RoundFailure {
    #[error("connection failure: {0}")]
    Connection(String),

    #[error("application error (HTTP {status}): {reason}")]
    Application { status: u16, reason: String },

    #[error("malformed response: {0}")]
    Malformed(#[from] DocumentError),
}

impl RoundFailure {
    fn is_client_error(&self) -> bool {
        matches!(self, RoundFailure::Application { status, .. } if (400..500).contains(status))
    }
}

/// Hand every participant its slice of the round's document.
///
/// Runs on the blocking pool since participants write to SQLite.
async fn apply_round(
    active: Vec<(Arc<dyn Participant>, SyncRequest)>,
    data: Map<String, Value>,
) -> std::result::Result<Vec<(Arc<dyn Participant>, SyncResult)>, JoinError> {
    task::spawn_blocking(move || {
        active
            .into_iter()
            .map(|(participant, _)| {
                let result = participant.save_response(&data);
                (participant, result)
            })
            .collect()
    })
    .await
}

/// Receiver of the in-flight session's outcome, if a session is running.
type SessionSlot = Option<watch::Receiver<Option<SyncOutcome>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Empties the session slot when the session ends, even by panic.
struct SlotRelease<'a>(&'a Mutex<SessionSlot>);

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        lock(self.0).take();
    }
}

/// Coordinates sync sessions for a set of participants.
///
/// At most one session runs at a time. Requests arriving while a session
/// runs join it instead of starting another: [`trigger_sync`] is dropped
/// and [`sync`] resolves with the running session's outcome.
///
/// [`trigger_sync`]: SyncCoordinator::trigger_sync
/// [`sync`]: SyncCoordinator::sync
pub struct SyncCoordinator<T: Transport + ?Sized> {
    transport: Arc<T>,
    registry: RwLock<ParticipantRegistry>,
    in_flight: Mutex<SessionSlot>,
    stats: Mutex<SyncStats>,
}

impl<T: Transport + 'static> SyncCoordinator<T> {
    /// Create a coordinator with no participants.
    pub fn new(transport: T) -> Self {
        Self::from_arc(Arc::new(transport))
    }
}

impl<T: Transport + ?Sized + 'static> SyncCoordinator<T> {
    /// Create a coordinator from an Arc-wrapped transport.
    pub fn from_arc(transport: Arc<T>) -> Self {
        Self {
            transport,
            registry: RwLock::new(ParticipantRegistry::new()),
            in_flight: Mutex::new(None),
            stats: Mutex::new(SyncStats::default()),
        }
    }

    /// Register a participant for the lifetime of the coordinator.
    ///
    /// A participant registered while a session runs joins from the next
    /// session on.
    ///
    /// # Errors
    /// - A participant with the same key is already registered
    pub fn register_participant(&self, participant: Arc<dyn Participant>) -> Result<()> {
        let key = participant.key().clone();
        self.registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(participant)?;
        if self.is_syncing() {
            warn!("Participant {} registered mid-session, joins the next session", key);
        } else {
            debug!("Registered participant {}", key);
        }
        Ok(())
    }

    /// Keys of all registered participants, in session order.
    pub fn participants(&self) -> Vec<String> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
    }

    /// Whether a session is currently running.
    pub fn is_syncing(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// Snapshot of the session counters.
    pub fn stats(&self) -> SyncStats {
        lock(&self.stats).clone()
    }

    /// Request a session without waiting for it.
    ///
    /// Returns `true` if a new session was started, `false` if the request
    /// was dropped because one is already running. Must be called within a
    /// tokio runtime.
    pub fn trigger_sync(self: &Arc<Self>) -> bool {
        let (_, started) = self.join_or_start();
        if !started {
            debug!("Sync already running, trigger dropped");
        }
        started
    }

    /// Request a session and wait for its outcome.
    ///
    /// If a session is already running, this waits for that session and
    /// returns its outcome without starting another.
    pub async fn sync(self: &Arc<Self>) -> SyncOutcome {
        let (mut outcome_rx, started) = self.join_or_start();
        if !started {
            debug!("Joining running sync session");
        }
        let outcome = match outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(SyncOutcome::RetryNeeded),
            Err(_) => {
                error!("Sync session ended without an outcome");
                SyncOutcome::RetryNeeded
            }
        };
        outcome
    }

    /// Join the running session, or start one on a new task.
    fn join_or_start(self: &Arc<Self>) -> (watch::Receiver<Option<SyncOutcome>>, bool) {
        let mut slot = lock(&self.in_flight);
        if let Some(running) = slot.as_ref() {
            return (running.clone(), false);
        }

        let (outcome_tx, outcome_rx) = watch::channel(None);
        *slot = Some(outcome_rx.clone());
        drop(slot);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = {
                let _release = SlotRelease(&this.in_flight);
                this.run_session().await
            };
            outcome_tx.send_replace(Some(outcome));
        });

        (outcome_rx, true)
    }

    /// Run one session to its terminal outcome.
    async fn run_session(&self) -> SyncOutcome {
        let started = Instant::now();
        let participants = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot();
        lock(&self.stats).sessions_started += 1;
        info!("Starting sync session with {} participants", participants.len());

        let mut active: Vec<(Arc<dyn Participant>, SyncRequest)> = participants
            .into_iter()
            .filter_map(|participant| match participant.initial_request() {
                Some(request) => Some((participant, request)),
                None => {
                    debug!("{} has nothing to sync", participant.key());
                    None
                }
            })
            .collect();

        let mut rounds = 0u64;
        let outcome = loop {
            if active.is_empty() {
                break SyncOutcome::Succeeded;
            }
            rounds += 1;

            let batch =
                BatchedQuery::compose(active.iter().map(|(p, request)| (p.key().as_str(), request)));
            debug!("Round {}: requesting {}", rounds, batch.aliases().join(", "));

            let data = match self.execute_round(&batch).await {
                Ok(data) => data,
                Err(failure) if failure.is_client_error() => {
                    warn!(
                        "Round {} rejected as a client error, probably a malformed request; retrying later: {}",
                        rounds, failure
                    );
                    break SyncOutcome::RetryNeeded;
                }
                Err(failure) => {
                    warn!("Round {} failed, retrying later: {}", rounds, failure);
                    break SyncOutcome::RetryNeeded;
                }
            };

            let applied = match apply_round(active, data).await {
                Ok(applied) => applied,
                Err(e) => {
                    error!("Round {} apply step aborted: {}", rounds, e);
                    break SyncOutcome::RetryNeeded;
                }
            };

            let mut next = Vec::with_capacity(applied.len());
            let mut malformed = false;
            for (participant, result) in applied {
                match result {
                    SyncResult::NewData(Some(request)) => next.push((participant, request)),
                    SyncResult::NewData(None) => debug!("{} is up to date", participant.key()),
                    SyncResult::NoData => debug!("{} had no new data", participant.key()),
                    SyncResult::Failed(ParticipantFailure::Decode(reason)) => {
                        warn!("Malformed page for {}: {}", participant.key(), reason);
                        malformed = true;
                    }
                    SyncResult::Failed(failure @ ParticipantFailure::Storage(_)) => {
                        warn!(
                            "{} leaves this session after a {}",
                            participant.key(),
                            failure
                        );
                    }
                }
            }
            if malformed {
                break SyncOutcome::RetryNeeded;
            }
            active = next;
        };

        let duration = started.elapsed();
        {
            let mut stats = lock(&self.stats);
            stats.rounds += rounds;
            match outcome {
                SyncOutcome::Succeeded => stats.sessions_succeeded += 1,
                SyncOutcome::RetryNeeded => stats.sessions_retry_needed += 1,
            }
            stats.last_outcome = Some(outcome);
            stats.last_duration = Some(duration);
            stats.last_completed_at = Some(Utc::now());
        }
        info!(
            "Sync session finished: {:?} after {} rounds in {:?}",
            outcome, rounds, duration
        );
        outcome
    }

    /// Execute one round and decode its data object.
    async fn execute_round(&self, batch: &BatchedQuery) -> std::result::Result<Map<String, Value>, RoundFailure> {
        match self.transport.execute(batch).await {
            TransportOutcome::ConnectionFailure(reason) => Err(RoundFailure::Connection(reason)),
            TransportOutcome::ApplicationError { status, reason } => {
                Err(RoundFailure::Application { status, reason })
            }
            TransportOutcome::Success(body) => Ok(decode_document(&body)?),
        }
    }
}
