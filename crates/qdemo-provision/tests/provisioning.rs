//! End-to-end runs of the provisioning pool against in-memory clusters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qdemo_client::types::{ReplicationSourceStatus, JOB_NOT_RUNNING, JOB_RUNNING, STATE_ESTABLISHED};
use qdemo_client::{ApiError, ClusterApi, ClusterConnector, ClusterRole, ErrorClass, MemoryConnector};
use qdemo_provision::barrier::TimeoutCause;
use qdemo_provision::cleanup::cleanup;
use qdemo_provision::setup::prepare;
use qdemo_provision::worker::WorkerPhase;
use qdemo_provision::{BarrierState, DemoConfig, FailureKind, Orchestrator};

fn config(dir_count: usize, max_workers: usize) -> DemoConfig {
    let mut config = DemoConfig {
        dir_count,
        max_workers,
        dequeue_timeout_ms: 100,
        progress_interval_ms: 1000,
        ..DemoConfig::default()
    };
    config.barrier.settle_delay_secs = 0;
    config.barrier.poll_interval_ms = 1000;
    config.barrier.max_attempts = 10;
    config
}

fn status(state: &str, job_state: &str) -> ReplicationSourceStatus {
    ReplicationSourceStatus {
        id: "11".into(),
        source_root_path: "/keyva_demo/".into(),
        target_root_path: "/keyva_demo/".into(),
        target_address: "cluster2".into(),
        state: state.into(),
        job_state: job_state.into(),
        replication_job_status: None,
    }
}

async fn clusters(script: Vec<Vec<ReplicationSourceStatus>>) -> MemoryConnector {
    let connector = MemoryConnector::new();
    connector
        .source
        .create_directory("keyva_demo", "/")
        .await
        .unwrap();
    connector.source.script_source_statuses(script).await;
    connector
}

fn synced_after_three_polls() -> Vec<Vec<ReplicationSourceStatus>> {
    vec![
        vec![status(STATE_ESTABLISHED, JOB_RUNNING)],
        vec![status(STATE_ESTABLISHED, JOB_RUNNING)],
        vec![status(STATE_ESTABLISHED, JOB_NOT_RUNNING)],
    ]
}

#[tokio::test(start_paused = true)]
async fn test_five_tasks_two_workers_succeeds() {
    let connector = clusters(synced_after_three_polls()).await;
    let orchestrator = Orchestrator::new(Arc::new(connector.clone()), config(5, 2));

    let result = orchestrator.deploy().await;

    assert_eq!(result.workers.len(), 2);
    assert_eq!(result.tasks_seeded, 5);
    assert_eq!(result.tasks_processed, 5);
    assert_eq!(result.fatal_failures, 0);
    assert_eq!(result.barrier_state, Some(BarrierState::Synced));
    assert_eq!(result.poll_report.as_ref().unwrap().attempts, 3);
    assert!(result.overall_success());
    assert!(result.workers.iter().all(|w| w.observed_synced));

    for n in 0..5 {
        let dir = format!("/keyva_demo/dir{n:05}");
        assert!(connector.source.exists(&dir).await);
        let file = connector
            .source
            .read_file(&format!("{dir}/testfile"))
            .await
            .unwrap();
        assert_eq!(file, format!("File at: {dir}/testfile\n").into_bytes());
        let share = format!("test_dir{n:05}");
        assert!(connector.source.share(&share).await.is_some());
        assert!(connector.target.share(&share).await.is_some());
    }
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_share_error_fails_only_that_task() {
    let connector = clusters(synced_after_three_polls()).await;
    connector
        .source
        .inject_fault(
            "create_share",
            "test_dir00003",
            ErrorClass::Other("smb_share_path_error".into()),
        )
        .await;
    let orchestrator = Orchestrator::new(Arc::new(connector.clone()), config(5, 2));

    let result = orchestrator.deploy().await;

    assert_eq!(result.tasks_processed, 5);
    assert_eq!(result.fatal_failures, 1);
    assert!(!result.overall_success());
    let failure = result
        .workers
        .iter()
        .flat_map(|w| &w.failures)
        .find(|f| f.kind == FailureKind::Task)
        .unwrap();
    assert_eq!(failure.task.as_deref(), Some("dir00003"));
    assert!(failure.error.contains("smb_share_path_error"));

    assert_eq!(connector.target.share_names().await.len(), 4);
    assert!(connector.target.share("test_dir00003").await.is_none());
    assert!(!connector.source.exists("/keyva_demo/dir00003/testfile").await);
    assert!(connector.source.exists("/keyva_demo/dir00004/testfile").await);
}

#[tokio::test(start_paused = true)]
async fn test_barrier_timeout_unblocks_every_worker() {
    let connector = clusters(vec![vec![status(STATE_ESTABLISHED, JOB_RUNNING)]]).await;
    let mut config = config(12, 4);
    config.barrier.max_attempts = 5;
    let orchestrator = Orchestrator::new(Arc::new(connector.clone()), config);

    let result = orchestrator.deploy().await;

    assert_eq!(result.barrier_state, Some(BarrierState::TimedOut));
    assert_eq!(
        result.poll_report.as_ref().unwrap().cause,
        Some(TimeoutCause::NeverSynchronized)
    );
    assert_eq!(result.workers.len(), 4);
    assert!(result.workers.iter().all(|w| w.phase == WorkerPhase::Done));
    assert_eq!(result.run_failures, 4);
    assert_eq!(result.abandoned_tasks, 12);
    assert_eq!(result.tasks_processed, 0);
    assert!(!result.overall_success());
    assert!(connector.source.share_names().await.is_empty());
    assert!(connector.source.exists("/keyva_demo/dir00011").await);
}

#[tokio::test(start_paused = true)]
async fn test_missing_relationship_reports_never_found() {
    let connector = clusters(vec![vec![]]).await;
    let mut config = config(3, 2);
    config.barrier.max_attempts = 3;
    let orchestrator = Orchestrator::new(Arc::new(connector), config);

    let result = orchestrator.deploy().await;

    let report = result.poll_report.as_ref().unwrap();
    assert_eq!(report.trace, vec![BarrierState::Pending; 3]);
    assert_eq!(report.cause, Some(TimeoutCause::RelationshipNeverFound));
    assert!(result.to_string().contains("relationship never found"));
    assert!(!result.overall_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_thousand_tasks_fifty_workers_terminate() {
    let connector = clusters(vec![vec![status(STATE_ESTABLISHED, JOB_NOT_RUNNING)]]).await;
    let mut config = config(2000, 50);
    config.barrier.poll_interval_ms = 10;
    config.progress_interval_ms = 50;
    let orchestrator = Orchestrator::new(Arc::new(connector.clone()), config);

    let result = tokio::time::timeout(Duration::from_secs(120), orchestrator.deploy())
        .await
        .expect("run did not terminate");

    assert_eq!(result.workers.len(), 50);
    assert!(result.workers.iter().all(|w| w.phase == WorkerPhase::Done));
    let stage1: usize = result.workers.iter().map(|w| w.stage1_processed).sum();
    assert_eq!(stage1, 2000);
    assert_eq!(result.tasks_processed, 2000);
    assert!(result.overall_success());
    assert_eq!(connector.target.share_names().await.len(), 2000);
    assert_eq!(connector.source.call_count("create_directory").await, 2001);
}

#[tokio::test(start_paused = true)]
async fn test_rerun_is_idempotent() {
    let connector = clusters(synced_after_three_polls()).await;
    let orchestrator = Orchestrator::new(Arc::new(connector.clone()), config(6, 3));

    assert!(orchestrator.deploy().await.overall_success());
    let second = orchestrator.deploy().await;
    assert!(second.overall_success());
    assert_eq!(second.tasks_processed, 6);
    assert_eq!(connector.source.share_names().await.len(), 6);
}

#[tokio::test(start_paused = true)]
async fn test_zero_tasks_starts_no_workers() {
    let connector = clusters(synced_after_three_polls()).await;
    let orchestrator = Orchestrator::new(Arc::new(connector), config(0, 50));

    let result = orchestrator.deploy().await;

    assert!(result.workers.is_empty());
    assert_eq!(result.tasks_processed, 0);
    assert_eq!(result.barrier_state, Some(BarrierState::Synced));
    assert!(result.overall_success());
}

/// Refuses every session to cluster 2.
struct TargetDown(MemoryConnector);

#[async_trait]
impl ClusterConnector for TargetDown {
    async fn connect(&self, role: ClusterRole) -> qdemo_client::error::Result<Box<dyn ClusterApi>> {
        match role {
            ClusterRole::Source => self.0.connect(role).await,
            ClusterRole::Target => Err(ApiError::Auth {
                address: "cluster2".into(),
                msg: "login refused".into(),
            }),
        }
    }

    fn address(&self, role: ClusterRole) -> String {
        self.0.address(role)
    }
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_cluster_accounts_for_every_task() {
    let connector = clusters(synced_after_three_polls()).await;
    let orchestrator = Orchestrator::new(Arc::new(TargetDown(connector.clone())), config(8, 3));

    let result = orchestrator.deploy().await;

    assert_eq!(result.workers.len(), 3);
    assert_eq!(result.run_failures, 3 + 1);
    assert_eq!(result.abandoned_tasks, 16);
    assert!(!result.overall_success());
    assert_eq!(connector.source.call_count("create_directory").await, 1);
    assert_eq!(result.barrier_state, Some(BarrierState::TimedOut));
    assert!(result.poll_report.is_none());
    assert_eq!(
        connector
            .source
            .call_count("list_source_relationship_statuses")
            .await,
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_full_lifecycle_leaves_clusters_clean() {
    let connector = MemoryConnector::new();
    connector.source.set_sync_polls(2).await;
    let config = config(10, 4);

    prepare(&connector, &config).await.unwrap();
    let orchestrator = Orchestrator::new(Arc::new(connector.clone()), config);
    let deployed = orchestrator.deploy().await;
    assert!(deployed.overall_success(), "{deployed}");
    assert_eq!(connector.target.share_names().await.len(), 10);

    let report = cleanup(&orchestrator).await.unwrap();
    assert!(report.relationship_removed.is_some());
    assert_eq!(report.policies_removed, 4);
    assert!(report.shares.overall_success());
    assert!(connector.source.share_names().await.is_empty());
    assert!(connector.target.share_names().await.is_empty());
    assert!(!connector.source.exists("/keyva_demo").await);
    assert!(connector.source.policy_names().await.is_empty());
}
