//! Replication barrier.
//!
//! A single [`ReplicationPoller`] owns the [`BarrierWriter`] and moves the
//! shared [`BarrierState`] forward by polling the source cluster's
//! replication statuses. Workers hold cloned [`BarrierHandle`]s and wait for
//! a terminal state. The state only ever moves forward:
//!
//! ```text
//! Pending -> Syncing -> Synced
//!    |          |
//!    +----------+-----> TimedOut
//! ```
//!
//! `Pending -> Synced` is allowed because the poller sleeps a settle delay
//! before its first poll.

use std::fmt;
use std::time::Duration;

use qdemo_client::types::ReplicationSourceStatus;
use qdemo_client::ClusterApi;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared replication state observed by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrierState {
    /// Relationship not yet seen.
    Pending,
    /// Relationship seen, initial sync still in progress.
    Syncing,
    /// Relationship established with no replication job running.
    Synced,
    /// Poll attempts exhausted before reaching `Synced`.
    TimedOut,
}

impl BarrierState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BarrierState::Synced | BarrierState::TimedOut)
    }

    fn rank(&self) -> u8 {
        match self {
            BarrierState::Pending => 0,
            BarrierState::Syncing => 1,
            BarrierState::Synced | BarrierState::TimedOut => 2,
        }
    }
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BarrierState::Pending => "pending",
            BarrierState::Syncing => "syncing",
            BarrierState::Synced => "synced",
            BarrierState::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Create a barrier in the `Pending` state.
pub fn barrier() -> (BarrierWriter, BarrierHandle) {
    let (tx, rx) = watch::channel(BarrierState::Pending);
    (BarrierWriter { tx }, BarrierHandle { rx })
}

/// The single writer of the barrier state.
#[derive(Debug)]
pub struct BarrierWriter {
    tx: watch::Sender<BarrierState>,
}

impl BarrierWriter {
    /// Move to `next` if that is a forward transition. Returns whether the
    /// state changed.
    pub fn advance(&self, next: BarrierState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || next.rank() <= current.rank() {
                return false;
            }
            debug!(from = %current, to = %next, "barrier transition");
            *current = next;
            true
        })
    }

    /// Current state.
    pub fn state(&self) -> BarrierState {
        *self.tx.borrow()
    }

    /// A new read handle.
    pub fn subscribe(&self) -> BarrierHandle {
        BarrierHandle {
            rx: self.tx.subscribe(),
        }
    }
}

/// How a worker's wait on the barrier ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWait {
    /// The barrier reached `Synced`.
    Synced,
    /// The poller gave up.
    TimedOut,
    /// The worker's own wait budget ran out first.
    WaitExpired,
    /// The poller went away without reaching a terminal state.
    Abandoned,
}

/// Read-only view of the barrier state.
#[derive(Debug, Clone)]
pub struct BarrierHandle {
    rx: watch::Receiver<BarrierState>,
}

impl BarrierHandle {
    /// Current state.
    pub fn state(&self) -> BarrierState {
        *self.rx.borrow()
    }

    /// Wait up to `max_wait` for a terminal state.
    pub async fn wait(&mut self, max_wait: Duration) -> BarrierWait {
        match tokio::time::timeout(max_wait, self.rx.wait_for(BarrierState::is_terminal)).await {
            Err(_) => BarrierWait::WaitExpired,
            Ok(Err(_)) => BarrierWait::Abandoned,
            Ok(Ok(state)) => match *state {
                BarrierState::Synced => BarrierWait::Synced,
                _ => BarrierWait::TimedOut,
            },
        }
    }
}

/// Replication progress as reported by the relationship status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncProgress {
    /// Fraction complete in `0.0..=1.0`.
    Fraction(f64),
    /// No job status was reported.
    Unknown,
}

impl fmt::Display for SyncProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncProgress::Fraction(done) => write!(f, "{:.0}%", done * 100.0),
            SyncProgress::Unknown => f.write_str("unknown"),
        }
    }
}

/// What a single poll saw for the watched relationship.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// No relationship targets the watched path.
    NotFound,
    /// Relationship present but not steady.
    InProgress {
        /// Relationship id.
        id: String,
        /// Sync progress.
        progress: SyncProgress,
    },
    /// Relationship established and idle.
    Steady {
        /// Relationship id.
        id: String,
    },
}

impl Observation {
    /// Classify the statuses listed by the source cluster for `target_root_path`.
    pub fn from_statuses(statuses: &[ReplicationSourceStatus], target_root_path: &str) -> Self {
        let wanted = target_root_path.trim_end_matches('/');
        let Some(status) = statuses
            .iter()
            .find(|s| s.target_root_path.trim_end_matches('/') == wanted)
        else {
            return Observation::NotFound;
        };
        if status.is_steady() {
            Observation::Steady {
                id: status.id.clone(),
            }
        } else {
            Observation::InProgress {
                id: status.id.clone(),
                progress: status
                    .percent_complete()
                    .map_or(SyncProgress::Unknown, SyncProgress::Fraction),
            }
        }
    }

    fn next_state(&self) -> BarrierState {
        match self {
            Observation::NotFound => BarrierState::Pending,
            Observation::InProgress { .. } => BarrierState::Syncing,
            Observation::Steady { .. } => BarrierState::Synced,
        }
    }
}

/// Why the barrier timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeoutCause {
    /// No poll ever found the relationship.
    RelationshipNeverFound,
    /// The relationship was found but never became steady.
    NeverSynchronized,
}

impl fmt::Display for TimeoutCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutCause::RelationshipNeverFound => f.write_str("relationship never found"),
            TimeoutCause::NeverSynchronized => f.write_str("relationship never synchronized"),
        }
    }
}

/// Poller timing.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Target root path of the watched relationship, e.g. `/keyva_demo/`.
    pub target_root_path: String,
    /// Sleep before the first poll.
    pub settle_delay: Duration,
    /// Sleep between polls.
    pub poll_interval: Duration,
    /// Polls before giving up.
    pub max_attempts: u32,
}

/// What the poller did.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    /// Terminal state written.
    pub final_state: BarrierState,
    /// State after each poll, in order.
    pub trace: Vec<BarrierState>,
    /// Polls made, including failed listings.
    pub attempts: u32,
    /// Set when `final_state` is `TimedOut`.
    pub cause: Option<TimeoutCause>,
    /// Id of the watched relationship, if it was ever seen.
    pub relationship_id: Option<String>,
    /// Whether any poll saw the relationship mid-sync.
    pub observed_syncing: bool,
}

/// Polls replication status and drives the barrier.
pub struct ReplicationPoller {
    config: PollerConfig,
    api: Box<dyn ClusterApi>,
    writer: BarrierWriter,
}

impl ReplicationPoller {
    /// Create a poller over a session to the source cluster.
    pub fn new(config: PollerConfig, api: Box<dyn ClusterApi>, writer: BarrierWriter) -> Self {
        Self {
            config,
            api,
            writer,
        }
    }

    /// Spawn the poller on the runtime.
    pub fn start(self) -> JoinHandle<PollReport> {
        tokio::spawn(self.run())
    }

    /// Poll until `Synced` or the attempt budget is spent.
    pub async fn run(self) -> PollReport {
        let PollerConfig {
            target_root_path,
            settle_delay,
            poll_interval,
            max_attempts,
        } = &self.config;

        info!(path = %target_root_path, "Waiting on initial replication to finish...");
        tokio::time::sleep(*settle_delay).await;

        let mut trace = Vec::new();
        let mut relationship_id = None;
        let mut observed_syncing = false;
        let mut attempts = 0;

        while attempts < *max_attempts {
            if attempts > 0 {
                tokio::time::sleep(*poll_interval).await;
            }
            attempts += 1;

            match self.api.list_source_relationship_statuses().await {
                Ok(statuses) => {
                    let observation = Observation::from_statuses(&statuses, target_root_path);
                    match &observation {
                        Observation::NotFound => {
                            debug!(attempt = attempts, "relationship not found yet");
                        }
                        Observation::InProgress { id, progress } => {
                            relationship_id = Some(id.clone());
                            observed_syncing = true;
                            info!("Waiting for replication sync - {progress} done");
                        }
                        Observation::Steady { id } => {
                            relationship_id = Some(id.clone());
                        }
                    }
                    self.writer.advance(observation.next_state());
                }
                Err(err) => {
                    warn!(attempt = attempts, error = %err, "listing replication statuses failed");
                }
            }

            let state = self.writer.state();
            trace.push(state);
            if state == BarrierState::Synced {
                if !observed_syncing {
                    // Steady on sight: either already replicated or not started yet.
                    warn!(
                        attempts,
                        settle_delay_secs = settle_delay.as_secs(),
                        "relationship was steady without a running sync"
                    );
                }
                info!(attempts, "Initial replication complete");
                return PollReport {
                    final_state: state,
                    trace,
                    attempts,
                    cause: None,
                    relationship_id,
                    observed_syncing,
                };
            }
        }

        let cause = if relationship_id.is_some() {
            TimeoutCause::NeverSynchronized
        } else {
            TimeoutCause::RelationshipNeverFound
        };
        self.writer.advance(BarrierState::TimedOut);
        warn!(attempts, %cause, "replication barrier timed out");
        PollReport {
            final_state: BarrierState::TimedOut,
            trace,
            attempts,
            cause: Some(cause),
            relationship_id,
            observed_syncing,
        }
    }
}
