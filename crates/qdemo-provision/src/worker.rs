//! Pool worker.
//!
//! A [`Worker`] drains the queue of its first stage, optionally waits on the
//! replication barrier, then drains the queue of its second stage. A failed
//! task is recorded in the [`WorkerResult`] and the worker moves on. A worker
//! that never sees `Synced` records one run failure and stops without touching
//! the second queue, so other workers can still drain it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use qdemo_client::types::{NewSmbShare, SharePermission};
use qdemo_client::{ClusterApi, ClusterConnector, ClusterRole};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::barrier::{BarrierHandle, BarrierWait};
use crate::config::DemoConfig;
use crate::error::{ProvisionError, Result};
use crate::outcome;
use crate::queue::{Dequeued, TaskQueue};

/// Name of the file written into every provisioned directory.
pub const TEST_FILE: &str = "testfile";

/// One directory to provision or tear down.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirTask {
    /// Position in the seeded sequence.
    pub ordinal: usize,
    /// Directory name, `dir{ordinal:05}`.
    pub name: String,
}

impl DirTask {
    /// Task for directory number `ordinal`.
    pub fn new(ordinal: usize) -> Self {
        Self {
            ordinal,
            name: format!("dir{ordinal:05}"),
        }
    }

    /// The first `count` tasks in order.
    pub fn sequence(count: usize) -> impl Iterator<Item = DirTask> {
        (0..count).map(DirTask::new)
    }

    /// SMB share exporting this directory.
    pub fn share_name(&self) -> String {
        format!("test_{}", self.name)
    }

    /// Absolute path of the directory under `base_path`.
    pub fn path(&self, base_path: &str) -> String {
        format!("{}/{}", base_path.trim_end_matches('/'), self.name)
    }
}

/// Work applied to a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Create the directory on the source cluster.
    CreateDirectories,
    /// Share the directory on both clusters and write the test file on the source.
    PublishShares,
    /// Delete the directory's share on both clusters.
    RemoveShares,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::CreateDirectories => "create directories",
            Stage::PublishShares => "publish shares",
            Stage::RemoveShares => "remove shares",
        };
        f.write_str(s)
    }
}

/// A worker's private sessions.
pub struct Sessions {
    /// Session to cluster 1.
    pub source: Box<dyn ClusterApi>,
    /// Session to cluster 2.
    pub target: Box<dyn ClusterApi>,
}

impl Sessions {
    /// Open one session to each cluster.
    pub async fn open(connector: &dyn ClusterConnector) -> Result<Self> {
        let source = connector
            .connect(ClusterRole::Source)
            .await
            .map_err(|e| ProvisionError::api("login", e))?;
        let target = connector
            .connect(ClusterRole::Target)
            .await
            .map_err(|e| ProvisionError::api("login", e))?;
        Ok(Self { source, target })
    }
}

/// Settings every worker of a run shares.
#[derive(Debug, Clone)]
pub struct WorkSettings {
    /// Absolute base directory, e.g. `/keyva_demo`.
    pub base_path: String,
    /// Permissions given to every share.
    pub share_permissions: Vec<SharePermission>,
    /// Bound on a single dequeue wait.
    pub dequeue_timeout: Duration,
    /// Bound on the barrier wait.
    pub worker_wait: Duration,
}

impl From<&DemoConfig> for WorkSettings {
    fn from(config: &DemoConfig) -> Self {
        Self {
            base_path: config.base_path(),
            share_permissions: config.share_permissions.clone(),
            dequeue_timeout: config.dequeue_timeout(),
            worker_wait: config.barrier.worker_wait(),
        }
    }
}

impl Stage {
    /// Apply this stage to `task`. Stops at the first fatal error.
    pub async fn apply(
        &self,
        task: &DirTask,
        sessions: &Sessions,
        settings: &WorkSettings,
    ) -> Result<()> {
        let source = sessions.source.as_ref();
        let target = sessions.target.as_ref();
        match self {
            Stage::CreateDirectories => {
                outcome::create_directory(source, &task.name, &settings.base_path).await?;
            }
            Stage::PublishShares => {
                let dir_path = task.path(&settings.base_path);
                let share = NewSmbShare {
                    share_name: task.share_name(),
                    fs_path: dir_path.clone(),
                    description: String::new(),
                    permissions: settings.share_permissions.clone(),
                };
                outcome::create_share(source, &share).await?;
                outcome::create_share(target, &share).await?;
                outcome::create_file(source, TEST_FILE, &dir_path).await?;
                let file_path = format!("{dir_path}/{TEST_FILE}");
                let contents = Bytes::from(format!("File at: {file_path}\n"));
                outcome::write_file(source, &file_path, contents).await?;
            }
            Stage::RemoveShares => {
                let share_name = task.share_name();
                outcome::delete_share(source, &share_name).await?;
                outcome::delete_share(target, &share_name).await?;
            }
        }
        Ok(())
    }
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerPhase {
    /// Not started.
    Idle,
    /// Draining the first queue.
    DrainingPhase1,
    /// Waiting on the replication barrier.
    AwaitingBarrier,
    /// Draining the second queue.
    DrainingPhase2,
    /// Finished.
    Done,
}

/// Severity of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// One task failed; the rest of the run is unaffected.
    Task,
    /// A condition outside any single task, e.g. a barrier timeout.
    Run,
}

/// A failure recorded by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Task name, `None` for run-level failures.
    pub task: Option<String>,
    /// Stage the failure happened in.
    pub stage: Option<Stage>,
    /// Severity.
    pub kind: FailureKind,
    /// Error text.
    pub error: String,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FailureKind::Task => "task",
            FailureKind::Run => "run",
        };
        write!(f, "[{kind}]")?;
        if let Some(task) = &self.task {
            write!(f, " {task}")?;
        }
        if let Some(stage) = &self.stage {
            write!(f, " ({stage})")?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Outcome of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Worker index.
    pub worker_id: usize,
    /// Tasks taken from the first queue.
    pub stage1_processed: usize,
    /// Tasks attempted from the second queue.
    pub stage2_processed: usize,
    /// Everything that went wrong.
    pub failures: Vec<TaskFailure>,
    /// Whether the worker saw the barrier reach `Synced`.
    pub observed_synced: bool,
    /// Phase the worker ended in.
    pub phase: WorkerPhase,
}

impl WorkerResult {
    /// Empty result for worker `worker_id`.
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            stage1_processed: 0,
            stage2_processed: 0,
            failures: Vec::new(),
            observed_synced: false,
            phase: WorkerPhase::Idle,
        }
    }

    /// Failures of the given kind.
    pub fn count(&self, kind: FailureKind) -> usize {
        self.failures.iter().filter(|f| f.kind == kind).count()
    }

    pub(crate) fn fail_run(&mut self, error: impl Into<String>) {
        self.failures.push(TaskFailure {
            task: None,
            stage: None,
            kind: FailureKind::Run,
            error: error.into(),
        });
    }
}

/// A stage and the queue feeding it.
#[derive(Clone)]
pub struct StagePlan {
    /// Work applied to each task.
    pub stage: Stage,
    /// Task source shared with the other workers.
    pub queue: Arc<TaskQueue<DirTask>>,
}

/// What a worker does, in order.
#[derive(Clone)]
pub struct WorkerPlan {
    /// First stage.
    pub first: StagePlan,
    /// Barrier to wait on between the stages.
    pub barrier: Option<BarrierHandle>,
    /// Second stage, run once the barrier allows it.
    pub second: Option<StagePlan>,
}

/// One member of the pool.
pub struct Worker {
    id: usize,
    connector: Arc<dyn ClusterConnector>,
    plan: WorkerPlan,
    settings: Arc<WorkSettings>,
}

impl Worker {
    /// Create worker `id`.
    pub fn new(
        id: usize,
        connector: Arc<dyn ClusterConnector>,
        plan: WorkerPlan,
        settings: Arc<WorkSettings>,
    ) -> Self {
        Self {
            id,
            connector,
            plan,
            settings,
        }
    }

    /// Spawn the worker on the runtime.
    pub fn start(self) -> JoinHandle<WorkerResult> {
        tokio::spawn(self.run())
    }

    /// Run the plan to completion.
    pub async fn run(self) -> WorkerResult {
        let mut result = WorkerResult::new(self.id);
        info!(worker = self.id, "starting");

        let sessions = match Sessions::open(self.connector.as_ref()).await {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(worker = self.id, error = %err, "could not open cluster sessions");
                result.fail_run(err.to_string());
                result.phase = WorkerPhase::Done;
                return result;
            }
        };

        result.phase = WorkerPhase::DrainingPhase1;
        result.stage1_processed = self.drain(&self.plan.first, &sessions, &mut result).await;

        if let Some(second) = &self.plan.second {
            let cleared = match &self.plan.barrier {
                None => true,
                Some(handle) => {
                    result.phase = WorkerPhase::AwaitingBarrier;
                    self.await_barrier(handle.clone(), &mut result).await
                }
            };
            if cleared {
                result.phase = WorkerPhase::DrainingPhase2;
                result.stage2_processed = self.drain(second, &sessions, &mut result).await;
            }
        }

        result.phase = WorkerPhase::Done;
        info!(worker = self.id, failures = result.failures.len(), "complete");
        result
    }

    async fn drain(&self, plan: &StagePlan, sessions: &Sessions, result: &mut WorkerResult) -> usize {
        let mut processed = 0;
        loop {
            let task = match plan.queue.try_dequeue(self.settings.dequeue_timeout).await {
                Dequeued::Task(task) => task,
                Dequeued::Empty => continue,
                Dequeued::Drained => break,
            };
            if task.ordinal % 100 == 0 {
                debug!(worker = self.id, task = %task.name, stage = %plan.stage, "processing");
            }
            processed += 1;
            if let Err(err) = plan.stage.apply(&task, sessions, &self.settings).await {
                warn!(worker = self.id, task = %task.name, stage = %plan.stage, error = %err, "task failed");
                result.failures.push(TaskFailure {
                    task: Some(task.name),
                    stage: Some(plan.stage),
                    kind: FailureKind::Task,
                    error: err.to_string(),
                });
            }
        }
        processed
    }

    async fn await_barrier(&self, mut handle: BarrierHandle, result: &mut WorkerResult) -> bool {
        let reason = match handle.wait(self.settings.worker_wait).await {
            BarrierWait::Synced => {
                result.observed_synced = true;
                return true;
            }
            BarrierWait::TimedOut => "replication barrier timed out".to_string(),
            BarrierWait::WaitExpired => format!(
                "timed out waiting on replication sync after {}s",
                self.settings.worker_wait.as_secs()
            ),
            BarrierWait::Abandoned => "replication poller stopped before a result".to_string(),
        };
        warn!(worker = self.id, %reason, "skipping second stage");
        result.fail_run(reason);
        false
    }
}
