//! Worker pool orchestration.
//!
//! [`Orchestrator::deploy`] runs the two-stage provisioning pool: directory
//! creation, the replication barrier, then share and test file creation.
//! [`Orchestrator::run_pool`] runs any [`PoolPlan`] and is also used by
//! cleanup. Both return a [`RunResult`] that accounts for every seeded task.

use std::fmt;
use std::sync::Arc;

use qdemo_client::{ClusterConnector, ClusterRole};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::barrier::{barrier, BarrierHandle, BarrierState, PollReport, ReplicationPoller};
use crate::config::DemoConfig;
use crate::queue::{Dequeued, TaskQueue};
use crate::worker::{
    DirTask, FailureKind, Stage, StagePlan, WorkSettings, Worker, WorkerPlan, WorkerResult,
};

/// Stages a pool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolPlan {
    /// First stage.
    pub first: Stage,
    /// Second stage, gated by the replication barrier when `barrier` is set.
    pub second: Option<Stage>,
    /// Whether to poll replication between the stages.
    pub barrier: bool,
}

impl PoolPlan {
    /// Directory creation, barrier, share and file creation.
    pub fn deploy() -> Self {
        Self {
            first: Stage::CreateDirectories,
            second: Some(Stage::PublishShares),
            barrier: true,
        }
    }

    /// Share removal on both clusters.
    pub fn remove_shares() -> Self {
        Self {
            first: Stage::RemoveShares,
            second: None,
            barrier: false,
        }
    }
}

/// Aggregate outcome of a pool run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Per-worker results, by worker id.
    pub workers: Vec<WorkerResult>,
    /// Tasks seeded into each queue.
    pub tasks_seeded: usize,
    /// Tasks attempted by the last stage.
    pub tasks_processed: usize,
    /// Tasks that failed with a fatal error.
    pub fatal_failures: usize,
    /// Tasks still queued after every worker exited.
    pub abandoned_tasks: usize,
    /// Run-level failures, including `errors`.
    pub run_failures: usize,
    /// Run-level failures raised by the orchestrator itself.
    pub errors: Vec<String>,
    /// Final barrier state, when the plan uses one.
    pub barrier_state: Option<BarrierState>,
    /// Poller report, when the plan uses a barrier.
    #[serde(skip)]
    pub poll_report: Option<PollReport>,
}

impl RunResult {
    fn new(tasks_seeded: usize) -> Self {
        Self {
            workers: Vec::new(),
            tasks_seeded,
            tasks_processed: 0,
            fatal_failures: 0,
            abandoned_tasks: 0,
            run_failures: 0,
            errors: Vec::new(),
            barrier_state: None,
            poll_report: None,
        }
    }

    /// True iff nothing failed and the barrier, if any, reached `Synced`.
    pub fn overall_success(&self) -> bool {
        self.fatal_failures == 0
            && self.abandoned_tasks == 0
            && self.run_failures == 0
            && self
                .barrier_state
                .map_or(true, |state| state == BarrierState::Synced)
    }

    fn tally(&mut self, second_stage: bool) {
        let workers = &self.workers;
        self.tasks_processed = workers
            .iter()
            .map(|w| {
                if second_stage {
                    w.stage2_processed
                } else {
                    w.stage1_processed
                }
            })
            .sum();
        self.fatal_failures = workers.iter().map(|w| w.count(FailureKind::Task)).sum();
        self.run_failures =
            workers.iter().map(|w| w.count(FailureKind::Run)).sum::<usize>() + self.errors.len();
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "workers: {}, tasks seeded: {}, processed: {}, failed: {}, abandoned: {}, run failures: {}",
            self.workers.len(),
            self.tasks_seeded,
            self.tasks_processed,
            self.fatal_failures,
            self.abandoned_tasks,
            self.run_failures
        )?;
        if let Some(state) = self.barrier_state {
            write!(f, "replication: {state}")?;
            if let Some(cause) = self.poll_report.as_ref().and_then(|r| r.cause) {
                write!(f, " ({cause})")?;
            }
            writeln!(f)?;
        }
        for error in &self.errors {
            writeln!(f, "  [run] {error}")?;
        }
        for failure in self.workers.iter().flat_map(|w| &w.failures) {
            writeln!(f, "  {failure}")?;
        }
        write!(
            f,
            "{}",
            if self.overall_success() { "SUCCESS" } else { "FAILED" }
        )
    }
}

fn progress_label(stage: Stage) -> &'static str {
    match stage {
        Stage::CreateDirectories => "Directories left",
        Stage::PublishShares => "Items left",
        Stage::RemoveShares => "Shares left",
    }
}

/// Runs worker pools against a pair of clusters.
pub struct Orchestrator {
    connector: Arc<dyn ClusterConnector>,
    config: DemoConfig,
}

impl Orchestrator {
    /// Orchestrator over `connector` with `config`.
    pub fn new(connector: Arc<dyn ClusterConnector>, config: DemoConfig) -> Self {
        Self { connector, config }
    }

    /// Settings in use.
    pub fn config(&self) -> &DemoConfig {
        &self.config
    }

    /// Connector handing out cluster sessions.
    pub fn connector(&self) -> &dyn ClusterConnector {
        self.connector.as_ref()
    }

    /// Run the provisioning pool.
    pub async fn deploy(&self) -> RunResult {
        self.run_pool(PoolPlan::deploy()).await
    }

    /// Run `plan` over `dir_count` tasks.
    pub async fn run_pool(&self, plan: PoolPlan) -> RunResult {
        let total = self.config.dir_count;
        let mut result = RunResult::new(total);

        let first = StagePlan {
            stage: plan.first,
            queue: Arc::new(TaskQueue::seeded(DirTask::sequence(total))),
        };
        let second = plan.second.map(|stage| StagePlan {
            stage,
            queue: Arc::new(TaskQueue::seeded(DirTask::sequence(total))),
        });
        let (writer, handle) = if plan.barrier {
            let (writer, handle) = barrier();
            (Some(writer), Some(handle))
        } else {
            (None, None)
        };

        let worker_count = self.config.worker_count(total);
        info!(workers = worker_count, tasks = total, "spinning up workers");
        let settings = Arc::new(WorkSettings::from(&self.config));
        let workers: Vec<JoinHandle<WorkerResult>> = (0..worker_count)
            .map(|id| {
                let plan = WorkerPlan {
                    first: first.clone(),
                    barrier: handle.clone(),
                    second: second.clone(),
                };
                Worker::new(id, self.connector.clone(), plan, settings.clone()).start()
            })
            .collect();

        self.report_progress(&first, None, &workers).await;
        let stranded = !first.queue.is_drained().await;
        if !stranded {
            info!("{} done: queue drained", plan.first);
        }

        let poller = match writer {
            Some(writer) if stranded => {
                warn!("no worker finished the first stage, not polling replication");
                writer.advance(BarrierState::TimedOut);
                None
            }
            Some(writer) => match self.connector.connect(ClusterRole::Source).await {
                Ok(api) => Some(ReplicationPoller::new(self.config.poller(), api, writer).start()),
                Err(err) => {
                    error!(error = %err, "could not open a session for the replication poller");
                    result
                        .errors
                        .push(format!("replication poller could not start: {err}"));
                    writer.advance(BarrierState::TimedOut);
                    None
                }
            },
            None => None,
        };

        if let Some(second) = &second {
            self.report_progress(second, handle.as_ref(), &workers)
                .await;
        }

        for (id, joined) in workers.into_iter().enumerate() {
            match joined.await {
                Ok(worker) => result.workers.push(worker),
                Err(err) => {
                    error!(worker = id, error = %err, "worker crashed");
                    result.errors.push(format!("worker {id} crashed: {err}"));
                }
            }
        }

        if let Some(poller) = poller {
            match poller.await {
                Ok(report) => result.poll_report = Some(report),
                Err(err) => result.errors.push(format!("replication poller crashed: {err}")),
            }
        }
        result.barrier_state = handle.as_ref().map(BarrierHandle::state);

        // Second-stage leftovers are expected once the barrier has failed.
        let barrier_failed = result
            .barrier_state
            .is_some_and(|state| state != BarrierState::Synced);
        for (stage, expected) in [(Some(&first), false), (second.as_ref(), barrier_failed)] {
            let Some(stage) = stage else { continue };
            let leftover = drain_leftover(stage).await;
            if leftover == 0 {
                continue;
            }
            result.abandoned_tasks += leftover;
            if expected {
                warn!(tasks = leftover, stage = %stage.stage, "tasks abandoned behind the barrier");
            } else {
                result
                    .errors
                    .push(format!("{leftover} {} tasks were never taken", stage.stage));
            }
        }

        result.tally(second.is_some());
        if result.overall_success() {
            info!(processed = result.tasks_processed, "run complete");
        } else {
            error!(
                failed = result.fatal_failures,
                abandoned = result.abandoned_tasks,
                run_failures = result.run_failures,
                "run finished with failures"
            );
        }
        result
    }

    /// Log the queue length until it drains or every worker has exited.
    /// With a barrier, nothing is logged until it reaches `Synced`.
    async fn report_progress(
        &self,
        stage: &StagePlan,
        barrier: Option<&BarrierHandle>,
        workers: &[JoinHandle<WorkerResult>],
    ) {
        let label = progress_label(stage.stage);
        loop {
            if stage.queue.is_drained().await || workers.iter().all(JoinHandle::is_finished) {
                return;
            }
            if barrier.map_or(true, |b| b.state() == BarrierState::Synced) {
                info!("{label}: {:05}", stage.queue.len().await);
            } else if barrier.is_some_and(|b| b.state() == BarrierState::TimedOut) {
                return;
            }
            tokio::time::sleep(self.config.progress_interval()).await;
        }
    }
}

async fn drain_leftover(stage: &StagePlan) -> usize {
    let mut leftover = 0;
    while let Dequeued::Task(_) = stage.queue.try_dequeue(std::time::Duration::ZERO).await {
        leftover += 1;
    }
    leftover
}
