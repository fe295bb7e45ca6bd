//! Wire types exchanged with the cluster REST API.

use serde::{Deserialize, Deserializer, Serialize};

/// Relationship state of a fully configured, connected relationship.
pub const STATE_ESTABLISHED: &str = "ESTABLISHED";
/// Job state while a replication job is running.
pub const JOB_RUNNING: &str = "REPLICATION_RUNNING";
/// Job state when no replication job is running.
pub const JOB_NOT_RUNNING: &str = "REPLICATION_NOT_RUNNING";

/// Progress of the replication job currently running on a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationJobStatus {
    /// Fraction of the job completed, in `0.0..=1.0`.
    #[serde(default)]
    pub percent_complete: f64,
}

/// Status of a replication relationship as seen from the source cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSourceStatus {
    /// Relationship id.
    pub id: String,
    /// Replicated directory on the source cluster.
    pub source_root_path: String,
    /// Directory on the target cluster.
    pub target_root_path: String,
    /// Target cluster address.
    #[serde(default)]
    pub target_address: String,
    /// Relationship state, e.g. `ESTABLISHED`.
    pub state: String,
    /// Job state, e.g. `REPLICATION_RUNNING`.
    pub job_state: String,
    /// Job progress; absent when no job is queued.
    #[serde(default)]
    pub replication_job_status: Option<ReplicationJobStatus>,
}

impl ReplicationSourceStatus {
    /// Established with no job running: the last triggered sync has completed.
    pub fn is_steady(&self) -> bool {
        self.state == STATE_ESTABLISHED && self.job_state == JOB_NOT_RUNNING
    }

    /// Job progress as a fraction, if the cluster reported one.
    pub fn percent_complete(&self) -> Option<f64> {
        self.replication_job_status
            .as_ref()
            .map(|status| status.percent_complete)
    }
}

/// Status of a replication relationship as seen from the target cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTargetStatus {
    /// Relationship id.
    pub id: String,
    /// Replicated directory on the source cluster.
    pub source_root_path: String,
    /// Directory on the target cluster.
    pub target_root_path: String,
    /// Source cluster address.
    #[serde(default)]
    pub source_address: String,
    /// Relationship state.
    pub state: String,
    /// Job state.
    #[serde(default)]
    pub job_state: String,
}

/// Snapshot policy attached to a new replication relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSnapshotPolicy {
    /// Snapshot policy id.
    pub id: u64,
    /// How replicated snapshots expire on the target.
    pub target_expiration: String,
}

/// Request body for creating a source relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSourceRelationship {
    /// Target cluster address.
    pub target_address: String,
    /// Directory to replicate on the source cluster.
    pub source_root_path: String,
    /// Directory on the target cluster.
    pub target_root_path: String,
    /// Replication mode, e.g. `REPLICATION_SNAPSHOT_POLICY_WITH_CONTINUOUS`.
    pub replication_mode: String,
    /// Whether replication starts enabled.
    pub replication_enabled: bool,
    /// Snapshot policies linked to the relationship.
    pub snapshot_policies: Vec<RelationshipSnapshotPolicy>,
}

/// Response to relationship creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedRelationship {
    /// Id of the new relationship.
    pub id: String,
}

/// Partial update of a source relationship.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRelationshipPatch {
    /// Make the source directory read-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_root_read_only: Option<bool>,
}

/// A snapshot policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPolicy {
    /// Policy id.
    pub id: u64,
    /// Policy name.
    pub name: String,
}

/// Request body for creating a snapshot policy. The schedule is opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshotPolicy {
    /// Policy name.
    pub name: String,
    /// Schedule document, passed through unchanged.
    pub schedule_info: serde_json::Value,
    /// Id of the directory the policy snapshots.
    pub directory_id: String,
}

/// A snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Snapshot id.
    pub id: u64,
    /// Snapshot name.
    pub name: String,
}

/// `{"entries": [...]}` list envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entries<T> {
    /// Listed items.
    pub entries: Vec<T>,
}

/// Attributes of a file system entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Entry id.
    pub id: String,
    /// File number; equals the id on current clusters.
    pub file_number: String,
    /// Absolute path.
    #[serde(default)]
    pub path: String,
    /// `FS_FILE_TYPE_DIRECTORY`, `FS_FILE_TYPE_FILE`, ...
    #[serde(rename = "type", default)]
    pub file_type: String,
}

/// Progress of an asynchronous tree delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeDeleteStatus {
    /// Files still to be removed.
    #[serde(deserialize_with = "number_or_string")]
    pub remaining_files: u64,
}

/// A trustee in a share permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trustee {
    /// User or group name.
    pub name: String,
}

/// One access control entry of an SMB share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharePermission {
    /// `ALLOWED` or `DENIED`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Who the entry applies to.
    pub trustee: Trustee,
    /// Rights such as `READ`, `WRITE`, `ALL`.
    pub rights: Vec<String>,
}

impl SharePermission {
    /// An `ALLOWED` entry for `name` with `rights`.
    pub fn allowed(name: &str, rights: &[&str]) -> Self {
        Self {
            kind: "ALLOWED".to_string(),
            trustee: Trustee {
                name: name.to_string(),
            },
            rights: rights.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Request body for creating an SMB share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSmbShare {
    /// Share name.
    pub share_name: String,
    /// Exported directory.
    pub fs_path: String,
    /// Free-form description.
    pub description: String,
    /// Share permissions.
    pub permissions: Vec<SharePermission>,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_status_without_job_progress() {
        let status: ReplicationSourceStatus = serde_json::from_str(
            r#"{
                "id": "7",
                "source_root_path": "/keyva_demo/",
                "target_root_path": "/keyva_demo/",
                "state": "ESTABLISHED",
                "job_state": "REPLICATION_NOT_RUNNING"
            }"#,
        )
        .unwrap();
        assert!(status.is_steady());
        assert_eq!(status.percent_complete(), None);
    }

    #[test]
    fn test_source_status_running_is_not_steady() {
        let status: ReplicationSourceStatus = serde_json::from_str(
            r#"{
                "id": "7",
                "source_root_path": "/keyva_demo/",
                "target_root_path": "/keyva_demo/",
                "state": "ESTABLISHED",
                "job_state": "REPLICATION_RUNNING",
                "replication_job_status": {"percent_complete": 0.25}
            }"#,
        )
        .unwrap();
        assert!(!status.is_steady());
        assert_eq!(status.percent_complete(), Some(0.25));
    }

    #[test]
    fn test_tree_delete_status_accepts_string_counts() {
        let status: TreeDeleteStatus =
            serde_json::from_str(r#"{"remaining_files": "1234"}"#).unwrap();
        assert_eq!(status.remaining_files, 1234);
        let status: TreeDeleteStatus = serde_json::from_str(r#"{"remaining_files": 5}"#).unwrap();
        assert_eq!(status.remaining_files, 5);
    }

    #[test]
    fn test_share_permission_serializes_type_field() {
        let perm = SharePermission::allowed("admin", &["ALL"]);
        let json = serde_json::to_value(&perm).unwrap();
        assert_eq!(json["type"], "ALLOWED");
        assert_eq!(json["trustee"]["name"], "admin");
        assert_eq!(json["rights"][0], "ALL");
    }
}
