//! Teardown of everything deploy created, on both clusters.

use qdemo_client::{ClusterApi, ClusterRole};
use tracing::info;

use crate::error::{ProvisionError, Result};
use crate::orchestrator::{Orchestrator, PoolPlan, RunResult};
use crate::outcome::{self, classify, Operation, TreeDeleteProgress};

/// Result of [`cleanup`].
#[derive(Debug, Clone)]
pub struct CleanupReport {
    /// Id of the deleted replication relationship, if there was one.
    pub relationship_removed: Option<String>,
    /// Snapshot policies deleted across both clusters.
    pub policies_removed: usize,
    /// Snapshots deleted across both clusters.
    pub snapshots_removed: usize,
    /// Share removal pool result.
    pub shares: RunResult,
}

/// Delete the relationship, snapshot policies, snapshots, base tree and
/// shares. Safe to repeat.
pub async fn cleanup(orchestrator: &Orchestrator) -> Result<CleanupReport> {
    let config = orchestrator.config();
    let connector = orchestrator.connector();
    let clusters = [
        (
            ClusterRole::Source,
            connector
                .connect(ClusterRole::Source)
                .await
                .map_err(|e| ProvisionError::api("login", e))?,
        ),
        (
            ClusterRole::Target,
            connector
                .connect(ClusterRole::Target)
                .await
                .map_err(|e| ProvisionError::api("login", e))?,
        ),
    ];
    let source = clusters[0].1.as_ref();

    info!("Removing replication relationship");
    let relationship_removed = match source
        .list_source_relationship_statuses()
        .await
        .map_err(|e| ProvisionError::api("list_source_relationship_statuses", e))?
        .into_iter()
        .find(|s| config.is_replication_root(&s.target_root_path))
    {
        Some(status) => {
            source
                .delete_source_relationship(&status.id)
                .await
                .map_err(|e| ProvisionError::api("delete_source_relationship", e))?;
            Some(status.id)
        }
        None => {
            info!(path = %config.replication_root(), "no replication relationship to remove");
            None
        }
    };

    info!("Removing snapshot policies");
    let mut policies_removed = 0;
    for (_, api) in &clusters {
        policies_removed += remove_policies(api.as_ref()).await?;
    }

    info!("Removing any created/replicated snapshots");
    let mut snapshots_removed = 0;
    for (_, api) in &clusters {
        snapshots_removed += remove_snapshots(api.as_ref(), &config.base_dir).await?;
    }

    tokio::time::sleep(config.cleanup_pause()).await;

    info!("Clearing directory tree");
    let base_path = config.base_path();
    for (_, api) in &clusters {
        outcome::delete_tree(api.as_ref(), &base_path).await?;
    }

    info!("Waiting on dir tree deletion");
    let status_path = config.replication_root();
    let mut done = [false; 2];
    let mut polls = 0;
    while !done.iter().all(|d| *d) {
        if polls == config.tree_delete_max_polls {
            let (role, _) = &clusters[done.iter().position(|d| !d).unwrap_or(0)];
            return Err(ProvisionError::TreeDeleteTimeout {
                path: base_path,
                cluster: role.to_string(),
                attempts: polls,
            });
        }
        if polls > 0 {
            tokio::time::sleep(config.tree_delete_poll()).await;
        }
        polls += 1;
        for ((role, api), finished) in clusters.iter().zip(done.iter_mut()) {
            if *finished {
                continue;
            }
            match outcome::tree_delete_progress(api.as_ref(), &status_path).await? {
                TreeDeleteProgress::Remaining(files) => info!("{role}: {files} files left"),
                TreeDeleteProgress::Finished => *finished = true,
            }
        }
    }

    let shares = orchestrator.run_pool(PoolPlan::remove_shares()).await;

    Ok(CleanupReport {
        relationship_removed,
        policies_removed,
        snapshots_removed,
        shares,
    })
}

async fn remove_policies(api: &dyn ClusterApi) -> Result<usize> {
    let policies = api
        .list_snapshot_policies()
        .await
        .map_err(|e| ProvisionError::api("list_snapshot_policies", e))?;
    for policy in &policies {
        classify(
            Operation::DeleteSnapshotPolicy,
            api.delete_snapshot_policy(policy.id).await,
        )?;
    }
    Ok(policies.len())
}

async fn remove_snapshots(api: &dyn ClusterApi, base_dir: &str) -> Result<usize> {
    let snapshots = api
        .list_snapshots()
        .await
        .map_err(|e| ProvisionError::api("list_snapshots", e))?;
    let mut removed = 0;
    for snapshot in snapshots.iter().filter(|s| s.name.contains(base_dir)) {
        outcome::delete_snapshot(api, snapshot.id).await?;
        removed += 1;
    }
    Ok(removed)
}
