//! Idempotent execution of single remote operations.
//!
//! Every remote mutation goes through [`classify`], which turns the client
//! result into [`Outcome::Success`], [`Outcome::AlreadySatisfied`], or a
//! fatal [`ProvisionError`]. The table of error classes that mean "the
//! desired state already holds" lives in [`Operation::is_already_satisfied`]
//! and nowhere else. Unknown classes are fatal.

use bytes::Bytes;
use qdemo_client::types::NewSmbShare;
use qdemo_client::{ApiError, ClusterApi, ErrorClass};
use tracing::debug;

use crate::error::{ProvisionError, Result};

/// Remote operations with idempotency handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Create a directory.
    CreateDirectory,
    /// Create an empty file.
    CreateFile,
    /// Overwrite file contents.
    WriteFile,
    /// Create an SMB share.
    CreateShare,
    /// Delete an SMB share.
    DeleteShare,
    /// Start a tree delete.
    DeleteTree,
    /// Query tree delete progress.
    TreeDeleteStatus,
    /// Delete a snapshot.
    DeleteSnapshot,
    /// Delete a snapshot policy.
    DeleteSnapshotPolicy,
    /// Create a snapshot policy.
    CreateSnapshotPolicy,
    /// Create a source replication relationship.
    CreateRelationship,
}

impl Operation {
    /// Operation name used in logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateDirectory => "create_directory",
            Operation::CreateFile => "create_file",
            Operation::WriteFile => "write_file",
            Operation::CreateShare => "create_share",
            Operation::DeleteShare => "delete_share",
            Operation::DeleteTree => "delete_tree",
            Operation::TreeDeleteStatus => "tree_delete_status",
            Operation::DeleteSnapshot => "delete_snapshot",
            Operation::DeleteSnapshotPolicy => "delete_snapshot_policy",
            Operation::CreateSnapshotPolicy => "create_snapshot_policy",
            Operation::CreateRelationship => "create_source_relationship",
        }
    }

    /// Whether `class` means the desired end state already holds for this operation.
    pub fn is_already_satisfied(&self, class: &ErrorClass) -> bool {
        matches!(
            (self, class),
            (Operation::CreateDirectory, ErrorClass::FsEntryExists)
                | (Operation::CreateFile, ErrorClass::FsEntryExists)
                | (Operation::CreateShare, ErrorClass::SmbShareAlreadyExists)
                | (Operation::DeleteShare, ErrorClass::SmbShareDoesntExist)
                | (Operation::DeleteTree, ErrorClass::FsNoSuchEntry)
                | (Operation::DeleteTree, ErrorClass::TreeDeleteAlreadyStarted)
                | (Operation::TreeDeleteStatus, ErrorClass::FsNoSuchEntry)
                | (Operation::CreateSnapshotPolicy, ErrorClass::SnapshotPolicyNameInUse)
                | (Operation::CreateRelationship, ErrorClass::TargetContainsAnotherRelationship)
        )
    }
}

/// Non-fatal result of an idempotent operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The call succeeded.
    Success,
    /// The cluster reported the desired state already holds.
    AlreadySatisfied,
}

/// Normalize the result of one remote call for `op`.
pub fn classify<T>(op: Operation, result: std::result::Result<T, ApiError>) -> Result<Outcome> {
    match result {
        Ok(_) => Ok(Outcome::Success),
        Err(err) => match err.class() {
            Some(class) if op.is_already_satisfied(class) => {
                debug!(op = op.name(), %class, "already satisfied");
                Ok(Outcome::AlreadySatisfied)
            }
            _ => Err(ProvisionError::api(op.name(), err)),
        },
    }
}

/// Create directory `name` in `dir_path`.
pub async fn create_directory(api: &dyn ClusterApi, name: &str, dir_path: &str) -> Result<Outcome> {
    classify(
        Operation::CreateDirectory,
        api.create_directory(name, dir_path).await,
    )
}

/// Create file `name` in `dir_path`.
pub async fn create_file(api: &dyn ClusterApi, name: &str, dir_path: &str) -> Result<Outcome> {
    classify(Operation::CreateFile, api.create_file(name, dir_path).await)
}

/// Overwrite the file at `path`.
pub async fn write_file(api: &dyn ClusterApi, path: &str, data: Bytes) -> Result<Outcome> {
    classify(Operation::WriteFile, api.write_file(path, data).await)
}

/// Create an SMB share.
pub async fn create_share(api: &dyn ClusterApi, share: &NewSmbShare) -> Result<Outcome> {
    classify(Operation::CreateShare, api.create_share(share).await)
}

/// Delete the SMB share `name`.
pub async fn delete_share(api: &dyn ClusterApi, name: &str) -> Result<Outcome> {
    classify(Operation::DeleteShare, api.delete_share(name).await)
}

/// Start deleting the tree at `path`.
pub async fn delete_tree(api: &dyn ClusterApi, path: &str) -> Result<Outcome> {
    classify(Operation::DeleteTree, api.delete_tree(path).await)
}

/// Delete a snapshot.
pub async fn delete_snapshot(api: &dyn ClusterApi, snapshot_id: u64) -> Result<Outcome> {
    classify(
        Operation::DeleteSnapshot,
        api.delete_snapshot(snapshot_id).await,
    )
}

/// Progress of a tree delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeDeleteProgress {
    /// Files still to be removed.
    Remaining(u64),
    /// The tree no longer exists.
    Finished,
}

/// Query tree delete progress; "no such entry" means the delete finished.
pub async fn tree_delete_progress(api: &dyn ClusterApi, path: &str) -> Result<TreeDeleteProgress> {
    match api.tree_delete_status(path).await {
        Ok(status) => Ok(TreeDeleteProgress::Remaining(status.remaining_files)),
        Err(err) => {
            classify::<()>(Operation::TreeDeleteStatus, Err(err))?;
            Ok(TreeDeleteProgress::Finished)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdemo_client::MemoryCluster;

    fn remote(class: ErrorClass) -> ApiError {
        ApiError::remote("POST", "/test", 409, class, "test")
    }

    #[test]
    fn test_success_is_success() {
        assert_eq!(
            classify(Operation::WriteFile, Ok::<(), ApiError>(())).unwrap(),
            Outcome::Success
        );
    }

    #[test]
    fn test_already_satisfied_table() {
        let cases = [
            (Operation::CreateDirectory, ErrorClass::FsEntryExists),
            (Operation::CreateFile, ErrorClass::FsEntryExists),
            (Operation::CreateShare, ErrorClass::SmbShareAlreadyExists),
            (Operation::DeleteShare, ErrorClass::SmbShareDoesntExist),
            (Operation::DeleteTree, ErrorClass::FsNoSuchEntry),
            (Operation::DeleteTree, ErrorClass::TreeDeleteAlreadyStarted),
            (Operation::TreeDeleteStatus, ErrorClass::FsNoSuchEntry),
            (
                Operation::CreateSnapshotPolicy,
                ErrorClass::SnapshotPolicyNameInUse,
            ),
            (
                Operation::CreateRelationship,
                ErrorClass::TargetContainsAnotherRelationship,
            ),
        ];
        for (op, class) in cases {
            let outcome = classify::<()>(op, Err(remote(class.clone())));
            assert_eq!(
                outcome.unwrap(),
                Outcome::AlreadySatisfied,
                "{} / {class}",
                op.name()
            );
        }
    }

    #[test]
    fn test_classes_are_not_interchangeable() {
        let fatal = [
            (Operation::CreateDirectory, ErrorClass::SmbShareAlreadyExists),
            (Operation::CreateShare, ErrorClass::FsEntryExists),
            (Operation::DeleteShare, ErrorClass::FsNoSuchEntry),
            (Operation::WriteFile, ErrorClass::FsEntryExists),
            (Operation::WriteFile, ErrorClass::FsNoSuchEntry),
            (Operation::DeleteSnapshot, ErrorClass::FsNoSuchEntry),
            (Operation::CreateFile, ErrorClass::TreeDeleteAlreadyStarted),
        ];
        for (op, class) in fatal {
            assert!(classify::<()>(op, Err(remote(class))).is_err());
        }
    }

    #[test]
    fn test_unknown_class_is_fatal() {
        let err = classify::<()>(
            Operation::CreateShare,
            Err(remote(ErrorClass::Other("smb_share_path_error".into()))),
        )
        .unwrap_err();
        assert!(err.to_string().contains("create_share"));
    }

    #[test]
    fn test_unclassified_error_is_fatal() {
        let err = ApiError::Status {
            method: "POST".into(),
            uri: "/v1/files/%2F/entries/".into(),
            status: 503,
        };
        assert!(classify::<()>(Operation::CreateDirectory, Err(err)).is_err());
    }

    #[tokio::test]
    async fn test_create_directory_twice_is_idempotent() {
        let cluster = MemoryCluster::new("c1");
        assert_eq!(
            create_directory(&cluster, "keyva_demo", "/").await.unwrap(),
            Outcome::Success
        );
        assert_eq!(
            create_directory(&cluster, "keyva_demo", "/").await.unwrap(),
            Outcome::AlreadySatisfied
        );
    }

    #[tokio::test]
    async fn test_tree_delete_progress_finishes_on_no_such_entry() {
        let cluster = MemoryCluster::new("c1");
        assert_eq!(
            tree_delete_progress(&cluster, "/keyva_demo/").await.unwrap(),
            TreeDeleteProgress::Finished
        );
        cluster.create_directory("keyva_demo", "/").await.unwrap();
        assert_eq!(
            delete_tree(&cluster, "/keyva_demo").await.unwrap(),
            Outcome::Success
        );
        assert_eq!(
            delete_tree(&cluster, "/keyva_demo").await.unwrap(),
            Outcome::AlreadySatisfied
        );
        assert_eq!(
            tree_delete_progress(&cluster, "/keyva_demo/").await.unwrap(),
            TreeDeleteProgress::Remaining(1)
        );
        assert_eq!(
            tree_delete_progress(&cluster, "/keyva_demo/").await.unwrap(),
            TreeDeleteProgress::Finished
        );
    }
}
