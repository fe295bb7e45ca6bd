//! Replication status listing for operators.

use std::fmt;

use qdemo_client::types::ReplicationSourceStatus;
use qdemo_client::{ClusterConnector, ClusterRole};

use crate::barrier::SyncProgress;
use crate::error::{ProvisionError, Result};

/// One source relationship on cluster 1.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipSummary {
    /// Relationship id.
    pub id: String,
    /// Replicated directory on the source.
    pub source_root_path: String,
    /// Destination directory on the target.
    pub target_root_path: String,
    /// Relationship state.
    pub state: String,
    /// Replication job state.
    pub job_state: String,
    /// Progress of the running job.
    pub progress: SyncProgress,
}

impl From<ReplicationSourceStatus> for RelationshipSummary {
    fn from(status: ReplicationSourceStatus) -> Self {
        let progress = status
            .percent_complete()
            .map_or(SyncProgress::Unknown, SyncProgress::Fraction);
        Self {
            id: status.id,
            source_root_path: status.source_root_path,
            target_root_path: status.target_root_path,
            state: status.state,
            job_state: status.job_state,
            progress,
        }
    }
}

impl fmt::Display for RelationshipSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<6} {} -> {}  {}  {}  {}",
            self.id,
            self.source_root_path,
            self.target_root_path,
            self.state,
            self.job_state,
            self.progress
        )
    }
}

/// Source relationships of cluster 1.
pub async fn relationship_statuses(
    connector: &dyn ClusterConnector,
) -> Result<Vec<RelationshipSummary>> {
    let api = connector
        .connect(ClusterRole::Source)
        .await
        .map_err(|e| ProvisionError::api("login", e))?;
    let statuses = api
        .list_source_relationship_statuses()
        .await
        .map_err(|e| ProvisionError::api("list_source_relationship_statuses", e))?;
    Ok(statuses.into_iter().map(RelationshipSummary::from).collect())
}
