//! The operations the provisioning workflows need from a cluster.
//!
//! [`ClusterApi`] is the only seam between the workflows and a cluster. The
//! REST client and the in-memory cluster both implement it, and a
//! [`ClusterConnector`] hands out one independent session per caller.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    CreatedRelationship, FileAttributes, NewSmbShare, NewSnapshotPolicy, NewSourceRelationship,
    ReplicationSourceStatus, ReplicationTargetStatus, Snapshot, SnapshotPolicy,
    SourceRelationshipPatch, TreeDeleteStatus,
};

/// Which of the two clusters a session talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterRole {
    /// The replication source (cluster 1).
    Source,
    /// The replication target (cluster 2).
    Target,
}

impl std::fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterRole::Source => f.write_str("cluster1"),
            ClusterRole::Target => f.write_str("cluster2"),
        }
    }
}

/// An authenticated session against one cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create directory `name` inside `dir_path`.
    async fn create_directory(&self, name: &str, dir_path: &str) -> Result<FileAttributes>;

    /// Create empty file `name` inside `dir_path`.
    async fn create_file(&self, name: &str, dir_path: &str) -> Result<FileAttributes>;

    /// Replace the contents of the file at `path`.
    async fn write_file(&self, path: &str, data: Bytes) -> Result<()>;

    /// Look up the attributes of `path`.
    async fn file_attributes(&self, path: &str) -> Result<FileAttributes>;

    /// Start an asynchronous delete of the tree rooted at `path`.
    async fn delete_tree(&self, path: &str) -> Result<()>;

    /// Progress of the tree delete rooted at `path`.
    async fn tree_delete_status(&self, path: &str) -> Result<TreeDeleteStatus>;

    /// Create an SMB share.
    async fn create_share(&self, share: &NewSmbShare) -> Result<()>;

    /// Delete the SMB share called `name`.
    async fn delete_share(&self, name: &str) -> Result<()>;

    /// List relationships for which this cluster is the source.
    async fn list_source_relationship_statuses(&self) -> Result<Vec<ReplicationSourceStatus>>;

    /// List relationships for which this cluster is the target.
    async fn list_target_relationship_statuses(&self) -> Result<Vec<ReplicationTargetStatus>>;

    /// Create a relationship with this cluster as source.
    async fn create_source_relationship(
        &self,
        relationship: &NewSourceRelationship,
    ) -> Result<CreatedRelationship>;

    /// Authorize a relationship on the target cluster.
    async fn authorize_relationship(
        &self,
        relationship_id: &str,
        allow_non_empty_directory: bool,
        allow_fs_path_create: bool,
    ) -> Result<()>;

    /// Update a source relationship.
    async fn modify_source_relationship(
        &self,
        relationship_id: &str,
        patch: &SourceRelationshipPatch,
    ) -> Result<()>;

    /// Delete a source relationship.
    async fn delete_source_relationship(&self, relationship_id: &str) -> Result<()>;

    /// Disconnect a target relationship and make its directory writable.
    async fn make_target_writable(&self, relationship_id: &str) -> Result<()>;

    /// Reverse a target relationship so this cluster becomes the source.
    async fn reverse_target_relationship(
        &self,
        relationship_id: &str,
        source_address: &str,
    ) -> Result<()>;

    /// Reconnect a target relationship after a reversal.
    async fn reconnect_target_relationship(&self, relationship_id: &str) -> Result<()>;

    /// List snapshot policies.
    async fn list_snapshot_policies(&self) -> Result<Vec<SnapshotPolicy>>;

    /// Create a snapshot policy.
    async fn create_snapshot_policy(&self, policy: &NewSnapshotPolicy) -> Result<SnapshotPolicy>;

    /// Delete a snapshot policy.
    async fn delete_snapshot_policy(&self, policy_id: u64) -> Result<()>;

    /// List snapshots.
    async fn list_snapshots(&self) -> Result<Vec<Snapshot>>;

    /// Delete a snapshot.
    async fn delete_snapshot(&self, snapshot_id: u64) -> Result<()>;
}

/// Opens sessions. Every call returns a new session that the caller owns.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    /// Open and authenticate a session against `role`.
    async fn connect(&self, role: ClusterRole) -> Result<Box<dyn ClusterApi>>;

    /// Address of `role`, as the clusters know each other.
    fn address(&self, role: ClusterRole) -> String;
}
