//! In-memory cluster implementing [`ClusterApi`].
//!
//! Used for `--simulate` runs of the CLI and by the test suites. It keeps a
//! file system tree, SMB shares, snapshot policies, snapshots and replication
//! relationships, reports the same error classes a real cluster does, and
//! supports injected faults and scripted replication status sequences.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use crate::api::{ClusterApi, ClusterConnector, ClusterRole};
use crate::error::{ApiError, ErrorClass, Result};
use crate::types::{
    CreatedRelationship, FileAttributes, NewSmbShare, NewSnapshotPolicy, NewSourceRelationship,
    ReplicationJobStatus, ReplicationSourceStatus, ReplicationTargetStatus, Snapshot,
    SnapshotPolicy, SourceRelationshipPatch, TreeDeleteStatus, JOB_NOT_RUNNING, JOB_RUNNING,
    STATE_ESTABLISHED,
};

const DIRECTORY: &str = "FS_FILE_TYPE_DIRECTORY";
const FILE: &str = "FS_FILE_TYPE_FILE";

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    file_type: &'static str,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct ClusterState {
    entries: HashMap<String, Entry>,
    next_id: u64,
    shares: HashMap<String, NewSmbShare>,
    policies: Vec<SnapshotPolicy>,
    snapshots: Vec<Snapshot>,
    source_relationships: Vec<ReplicationSourceStatus>,
    target_relationships: Vec<ReplicationTargetStatus>,
    authorized: HashSet<String>,
    read_only_sources: HashSet<String>,
    status_script: VecDeque<Vec<ReplicationSourceStatus>>,
    sync_polls: u32,
    sync_progress: HashMap<String, u32>,
    tree_deletes: HashMap<String, u32>,
    faults: HashMap<(&'static str, String), ErrorClass>,
    calls: HashMap<&'static str, u64>,
    journal: Vec<String>,
}

/// Normalize a path: leading slash, no trailing slash except for the root.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Directory form used in relationship statuses: always a trailing slash.
fn dir_form(path: &str) -> String {
    let normalized = normalize(path);
    if normalized == "/" {
        normalized
    } else {
        format!("{normalized}/")
    }
}

fn join(dir_path: &str, name: &str) -> String {
    let dir = normalize(dir_path);
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn error(method: &str, uri: &str, status: u16, class: ErrorClass) -> ApiError {
    let description = class.to_string();
    ApiError::remote(method, uri, status, class, description)
}

fn not_found(uri: &str) -> ApiError {
    error("GET", uri, 404, ErrorClass::FsNoSuchEntry)
}

impl ClusterState {
    fn new() -> Self {
        let mut state = Self {
            next_id: 2,
            ..Self::default()
        };
        state.entries.insert(
            "/".to_string(),
            Entry {
                id: 1,
                file_type: DIRECTORY,
                data: Vec::new(),
            },
        );
        state
    }

    fn count(&mut self, op: &'static str) {
        *self.calls.entry(op).or_insert(0) += 1;
    }

    fn fault(&self, op: &'static str, key: &str) -> Option<ErrorClass> {
        self.faults.get(&(op, key.to_string())).cloned()
    }

    fn attributes(&self, path: &str) -> Option<FileAttributes> {
        self.entries.get(path).map(|entry| FileAttributes {
            id: entry.id.to_string(),
            file_number: entry.id.to_string(),
            path: path.to_string(),
            file_type: entry.file_type.to_string(),
        })
    }

    fn create_entry(
        &mut self,
        op: &'static str,
        name: &str,
        dir_path: &str,
        file_type: &'static str,
    ) -> Result<FileAttributes> {
        let uri = format!("/v1/files/{}/entries/", normalize(dir_path));
        self.count(op);
        if let Some(class) = self.fault(op, name) {
            return Err(error("POST", &uri, 500, class));
        }
        let parent = normalize(dir_path);
        match self.entries.get(&parent) {
            Some(entry) if entry.file_type == DIRECTORY => {}
            _ => return Err(error("POST", &uri, 404, ErrorClass::FsNoSuchEntry)),
        }
        let path = join(dir_path, name);
        if self.entries.contains_key(&path) {
            return Err(error("POST", &uri, 409, ErrorClass::FsEntryExists));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            path.clone(),
            Entry {
                id,
                file_type,
                data: Vec::new(),
            },
        );
        self.journal.push(format!("{op} {path}"));
        self.attributes(&path)
            .ok_or_else(|| not_found(&uri))
    }

    fn remove_tree(&mut self, root: &str) {
        let prefix = format!("{root}/");
        self.entries
            .retain(|path, _| path != root && !path.starts_with(&prefix));
    }

    fn advance_statuses(&mut self) -> Vec<ReplicationSourceStatus> {
        if let Some(front) = self.status_script.front().cloned() {
            if self.status_script.len() > 1 {
                self.status_script.pop_front();
            }
            return front;
        }

        let sync_polls = self.sync_polls;
        for status in self.source_relationships.iter_mut() {
            if status.is_steady() {
                continue;
            }
            let done = self.sync_progress.entry(status.id.clone()).or_insert(0);
            *done += 1;
            if *done > sync_polls {
                status.state = STATE_ESTABLISHED.to_string();
                status.job_state = JOB_NOT_RUNNING.to_string();
                status.replication_job_status = None;
            } else {
                status.state = STATE_ESTABLISHED.to_string();
                status.job_state = JOB_RUNNING.to_string();
                status.replication_job_status = Some(ReplicationJobStatus {
                    percent_complete: f64::from(*done) / f64::from(sync_polls.max(1) + 1),
                });
            }
        }
        self.source_relationships.clone()
    }
}

/// A simulated cluster. Cloning yields another session onto the same cluster.
#[derive(Clone)]
pub struct MemoryCluster {
    name: String,
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    /// An empty cluster containing only the root directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(ClusterState::new())),
        }
    }

    /// Name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of status polls a new relationship reports as running before
    /// it becomes steady.
    pub async fn set_sync_polls(&self, polls: u32) {
        self.state.lock().await.sync_polls = polls;
    }

    /// Replace relationship statuses with a scripted sequence. Each listing
    /// returns the next element; the last element repeats forever.
    pub async fn script_source_statuses(&self, script: Vec<Vec<ReplicationSourceStatus>>) {
        self.state.lock().await.status_script = script.into();
    }

    /// Make `op` fail for `key` with `class`. `op` is the trait method name,
    /// `key` the entry name, share name or path the call is made with, or
    /// `""` for listings.
    pub async fn inject_fault(&self, op: &'static str, key: impl Into<String>, class: ErrorClass) {
        self.state
            .lock()
            .await
            .faults
            .insert((op, key.into()), class);
    }

    /// Register a target relationship on this cluster.
    pub async fn add_target_relationship(&self, status: ReplicationTargetStatus) {
        self.state.lock().await.target_relationships.push(status);
    }

    /// Register a source relationship on this cluster.
    pub async fn add_source_relationship(&self, status: ReplicationSourceStatus) {
        self.state.lock().await.source_relationships.push(status);
    }

    /// Register a snapshot on this cluster.
    pub async fn add_snapshot(&self, name: impl Into<String>) -> u64 {
        let mut state = self.state.lock().await;
        let id = state.next_id;
        state.next_id += 1;
        state.snapshots.push(Snapshot {
            id,
            name: name.into(),
        });
        id
    }

    /// Whether `path` exists.
    pub async fn exists(&self, path: &str) -> bool {
        self.state.lock().await.entries.contains_key(&normalize(path))
    }

    /// Contents of the file at `path`.
    pub async fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .entries
            .get(&normalize(path))
            .map(|entry| entry.data.clone())
    }

    /// Names of all shares.
    pub async fn share_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.shares.keys().cloned().collect();
        names.sort();
        names
    }

    /// The share called `name`.
    pub async fn share(&self, name: &str) -> Option<NewSmbShare> {
        self.state.lock().await.shares.get(name).cloned()
    }

    /// Names of all snapshot policies.
    pub async fn policy_names(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .policies
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }

    /// Number of snapshots.
    pub async fn snapshot_count(&self) -> usize {
        self.state.lock().await.snapshots.len()
    }

    /// Number of calls made to the trait method `op`.
    pub async fn call_count(&self, op: &str) -> u64 {
        self.state.lock().await.calls.get(op).copied().unwrap_or(0)
    }

    /// Ids of relationships authorized on this cluster.
    pub async fn authorized(&self) -> Vec<String> {
        self.state.lock().await.authorized.iter().cloned().collect()
    }

    /// Mutating calls in the order they succeeded, e.g. `make_target_writable 7`.
    pub async fn journal(&self) -> Vec<String> {
        self.state.lock().await.journal.clone()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn create_directory(&self, name: &str, dir_path: &str) -> Result<FileAttributes> {
        self.state
            .lock()
            .await
            .create_entry("create_directory", name, dir_path, DIRECTORY)
    }

    async fn create_file(&self, name: &str, dir_path: &str) -> Result<FileAttributes> {
        self.state
            .lock()
            .await
            .create_entry("create_file", name, dir_path, FILE)
    }

    async fn write_file(&self, path: &str, data: Bytes) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("write_file");
        let uri = format!("/v1/files/{}/data", normalize(path));
        if let Some(class) = state.fault("write_file", path) {
            return Err(error("PUT", &uri, 500, class));
        }
        match state.entries.get_mut(&normalize(path)) {
            Some(entry) if entry.file_type == FILE => {
                entry.data = data.to_vec();
                Ok(())
            }
            _ => Err(error("PUT", &uri, 404, ErrorClass::FsNoSuchEntry)),
        }
    }

    async fn file_attributes(&self, path: &str) -> Result<FileAttributes> {
        let mut state = self.state.lock().await;
        state.count("file_attributes");
        let path = normalize(path);
        state
            .attributes(&path)
            .ok_or_else(|| not_found(&format!("/v1/files/{path}/info/attributes")))
    }

    async fn delete_tree(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("delete_tree");
        let path = normalize(path);
        let uri = "/v1/tree-delete/jobs/";
        if !state.entries.contains_key(&path) {
            return Err(error("POST", uri, 404, ErrorClass::FsNoSuchEntry));
        }
        if state.tree_deletes.contains_key(&path) {
            return Err(error("POST", uri, 409, ErrorClass::TreeDeleteAlreadyStarted));
        }
        state.tree_deletes.insert(path.clone(), 1);
        state.journal.push(format!("delete_tree {path}"));
        Ok(())
    }

    async fn tree_delete_status(&self, path: &str) -> Result<TreeDeleteStatus> {
        let mut state = self.state.lock().await;
        state.count("tree_delete_status");
        let path = normalize(path);
        let uri = format!("/v1/files/{path}/info/attributes");
        if !state.entries.contains_key(&path) {
            return Err(not_found(&uri));
        }
        let prefix = format!("{path}/");
        let remaining = state
            .entries
            .keys()
            .filter(|p| p.starts_with(&prefix))
            .count() as u64
            + 1;
        match state.tree_deletes.get(&path).copied() {
            Some(0) => {
                state.tree_deletes.remove(&path);
                state.remove_tree(&path);
                Err(not_found(&uri))
            }
            Some(polls) => {
                state.tree_deletes.insert(path, polls - 1);
                Ok(TreeDeleteStatus {
                    remaining_files: remaining,
                })
            }
            None => Ok(TreeDeleteStatus {
                remaining_files: remaining,
            }),
        }
    }

    async fn create_share(&self, share: &NewSmbShare) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("create_share");
        let uri = "/v2/smb/shares/";
        if let Some(class) = state.fault("create_share", &share.share_name) {
            return Err(error("POST", uri, 500, class));
        }
        if state.shares.contains_key(&share.share_name) {
            return Err(error("POST", uri, 409, ErrorClass::SmbShareAlreadyExists));
        }
        state
            .shares
            .insert(share.share_name.clone(), share.clone());
        Ok(())
    }

    async fn delete_share(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("delete_share");
        let uri = format!("/v2/smb/shares/{name}");
        if let Some(class) = state.fault("delete_share", name) {
            return Err(error("DELETE", &uri, 500, class));
        }
        if state.shares.remove(name).is_none() {
            return Err(error("DELETE", &uri, 404, ErrorClass::SmbShareDoesntExist));
        }
        Ok(())
    }

    async fn list_source_relationship_statuses(&self) -> Result<Vec<ReplicationSourceStatus>> {
        let mut state = self.state.lock().await;
        state.count("list_source_relationship_statuses");
        if let Some(class) = state.fault("list_source_relationship_statuses", "") {
            return Err(error(
                "GET",
                "/v2/replication/source-relationships/status/",
                500,
                class,
            ));
        }
        Ok(state.advance_statuses())
    }

    async fn list_target_relationship_statuses(&self) -> Result<Vec<ReplicationTargetStatus>> {
        let mut state = self.state.lock().await;
        state.count("list_target_relationship_statuses");
        Ok(state.target_relationships.clone())
    }

    async fn create_source_relationship(
        &self,
        relationship: &NewSourceRelationship,
    ) -> Result<CreatedRelationship> {
        let mut state = self.state.lock().await;
        state.count("create_source_relationship");
        let target_root_path = dir_form(&relationship.target_root_path);
        if state
            .source_relationships
            .iter()
            .any(|r| r.target_root_path == target_root_path)
        {
            return Err(error(
                "POST",
                "/v2/replication/source-relationships/",
                409,
                ErrorClass::TargetContainsAnotherRelationship,
            ));
        }
        let id = state.next_id.to_string();
        state.next_id += 1;
        state.source_relationships.push(ReplicationSourceStatus {
            id: id.clone(),
            source_root_path: dir_form(&relationship.source_root_path),
            target_root_path,
            target_address: relationship.target_address.clone(),
            state: "AWAITING_AUTHORIZATION".to_string(),
            job_state: JOB_NOT_RUNNING.to_string(),
            replication_job_status: None,
        });
        state.journal.push(format!("create_source_relationship {id}"));
        Ok(CreatedRelationship { id })
    }

    async fn authorize_relationship(
        &self,
        relationship_id: &str,
        _allow_non_empty_directory: bool,
        _allow_fs_path_create: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("authorize_relationship");
        state.authorized.insert(relationship_id.to_string());
        state
            .journal
            .push(format!("authorize_relationship {relationship_id}"));
        Ok(())
    }

    async fn modify_source_relationship(
        &self,
        relationship_id: &str,
        patch: &SourceRelationshipPatch,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("modify_source_relationship");
        if patch.source_root_read_only == Some(true) {
            state.read_only_sources.insert(relationship_id.to_string());
        }
        state
            .journal
            .push(format!("modify_source_relationship {relationship_id}"));
        Ok(())
    }

    async fn delete_source_relationship(&self, relationship_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("delete_source_relationship");
        let before = state.source_relationships.len();
        state.source_relationships.retain(|r| r.id != relationship_id);
        if state.source_relationships.len() == before {
            return Err(error(
                "DELETE",
                &format!("/v2/replication/source-relationships/{relationship_id}"),
                404,
                ErrorClass::Other("replication_relationship_not_found_error".to_string()),
            ));
        }
        state
            .journal
            .push(format!("delete_source_relationship {relationship_id}"));
        Ok(())
    }

    async fn make_target_writable(&self, relationship_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("make_target_writable");
        state
            .journal
            .push(format!("make_target_writable {relationship_id}"));
        Ok(())
    }

    async fn reverse_target_relationship(
        &self,
        relationship_id: &str,
        source_address: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("reverse_target_relationship");
        state.journal.push(format!(
            "reverse_target_relationship {relationship_id} {source_address}"
        ));
        Ok(())
    }

    async fn reconnect_target_relationship(&self, relationship_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("reconnect_target_relationship");
        state
            .journal
            .push(format!("reconnect_target_relationship {relationship_id}"));
        Ok(())
    }

    async fn list_snapshot_policies(&self) -> Result<Vec<SnapshotPolicy>> {
        let mut state = self.state.lock().await;
        state.count("list_snapshot_policies");
        Ok(state.policies.clone())
    }

    async fn create_snapshot_policy(&self, policy: &NewSnapshotPolicy) -> Result<SnapshotPolicy> {
        let mut state = self.state.lock().await;
        state.count("create_snapshot_policy");
        if state.policies.iter().any(|p| p.name == policy.name) {
            return Err(error(
                "POST",
                "/v1/snapshots/policies/",
                409,
                ErrorClass::SnapshotPolicyNameInUse,
            ));
        }
        let created = SnapshotPolicy {
            id: state.next_id,
            name: policy.name.clone(),
        };
        state.next_id += 1;
        state.policies.push(created.clone());
        Ok(created)
    }

    async fn delete_snapshot_policy(&self, policy_id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("delete_snapshot_policy");
        let before = state.policies.len();
        state.policies.retain(|p| p.id != policy_id);
        if state.policies.len() == before {
            return Err(error(
                "DELETE",
                &format!("/v1/snapshots/policies/{policy_id}"),
                404,
                ErrorClass::Other("snapshot_policy_not_found_error".to_string()),
            ));
        }
        Ok(())
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut state = self.state.lock().await;
        state.count("list_snapshots");
        Ok(state.snapshots.clone())
    }

    async fn delete_snapshot(&self, snapshot_id: u64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.count("delete_snapshot");
        let before = state.snapshots.len();
        state.snapshots.retain(|s| s.id != snapshot_id);
        if state.snapshots.len() == before {
            return Err(error(
                "DELETE",
                &format!("/v2/snapshots/{snapshot_id}"),
                404,
                ErrorClass::Other("snapshot_not_found_error".to_string()),
            ));
        }
        Ok(())
    }
}

/// Connector handing out sessions onto two in-memory clusters.
#[derive(Clone)]
pub struct MemoryConnector {
    /// Cluster 1.
    pub source: MemoryCluster,
    /// Cluster 2.
    pub target: MemoryCluster,
}

impl MemoryConnector {
    /// Two fresh clusters named `cluster1` and `cluster2`.
    pub fn new() -> Self {
        Self {
            source: MemoryCluster::new("cluster1"),
            target: MemoryCluster::new("cluster2"),
        }
    }

    /// The cluster playing `role`.
    pub fn cluster(&self, role: ClusterRole) -> &MemoryCluster {
        match role {
            ClusterRole::Source => &self.source,
            ClusterRole::Target => &self.target,
        }
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterConnector for MemoryConnector {
    async fn connect(&self, role: ClusterRole) -> Result<Box<dyn ClusterApi>> {
        Ok(Box::new(self.cluster(role).clone()))
    }

    fn address(&self, role: ClusterRole) -> String {
        self.cluster(role).name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_paths() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/keyva_demo/"), "/keyva_demo");
        assert_eq!(normalize("keyva_demo"), "/keyva_demo");
        assert_eq!(dir_form("/keyva_demo"), "/keyva_demo/");
        assert_eq!(join("/", "keyva_demo"), "/keyva_demo");
        assert_eq!(join("/keyva_demo/", "dir00001"), "/keyva_demo/dir00001");
    }

    #[tokio::test]
    async fn test_create_directory_twice_reports_entry_exists() {
        let cluster = MemoryCluster::new("c1");
        cluster.create_directory("keyva_demo", "/").await.unwrap();
        let err = cluster.create_directory("keyva_demo", "/").await.unwrap_err();
        assert!(err.is_class(&ErrorClass::FsEntryExists));
        assert!(cluster.exists("/keyva_demo").await);
    }

    #[tokio::test]
    async fn test_create_directory_in_missing_parent() {
        let cluster = MemoryCluster::new("c1");
        let err = cluster.create_directory("dir00000", "/keyva_demo").await.unwrap_err();
        assert!(err.is_class(&ErrorClass::FsNoSuchEntry));
    }

    #[tokio::test]
    async fn test_write_file_replaces_contents() {
        let cluster = MemoryCluster::new("c1");
        cluster.create_file("testfile", "/").await.unwrap();
        cluster
            .write_file("/testfile", Bytes::from_static(b"one"))
            .await
            .unwrap();
        cluster
            .write_file("/testfile", Bytes::from_static(b"two"))
            .await
            .unwrap();
        assert_eq!(cluster.read_file("/testfile").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_share_lifecycle_error_classes() {
        let cluster = MemoryCluster::new("c1");
        let share = NewSmbShare {
            share_name: "test_dir00000".into(),
            fs_path: "/keyva_demo/dir00000".into(),
            description: String::new(),
            permissions: vec![],
        };
        cluster.create_share(&share).await.unwrap();
        let err = cluster.create_share(&share).await.unwrap_err();
        assert!(err.is_class(&ErrorClass::SmbShareAlreadyExists));
        cluster.delete_share("test_dir00000").await.unwrap();
        let err = cluster.delete_share("test_dir00000").await.unwrap_err();
        assert!(err.is_class(&ErrorClass::SmbShareDoesntExist));
    }

    #[tokio::test]
    async fn test_injected_fault_is_reported() {
        let cluster = MemoryCluster::new("c1");
        cluster
            .inject_fault(
                "create_share",
                "test_dir00003",
                ErrorClass::Other("smb_share_path_error".into()),
            )
            .await;
        let share = NewSmbShare {
            share_name: "test_dir00003".into(),
            fs_path: "/keyva_demo/dir00003".into(),
            description: String::new(),
            permissions: vec![],
        };
        let err = cluster.create_share(&share).await.unwrap_err();
        assert_eq!(
            err.class(),
            Some(&ErrorClass::Other("smb_share_path_error".into()))
        );
        assert_eq!(cluster.call_count("create_share").await, 1);
    }

    #[tokio::test]
    async fn test_tree_delete_progresses_to_no_such_entry() {
        let cluster = MemoryCluster::new("c1");
        cluster.create_directory("keyva_demo", "/").await.unwrap();
        cluster.create_directory("dir00000", "/keyva_demo").await.unwrap();
        cluster.delete_tree("/keyva_demo").await.unwrap();
        let err = cluster.delete_tree("/keyva_demo").await.unwrap_err();
        assert!(err.is_class(&ErrorClass::TreeDeleteAlreadyStarted));

        let status = cluster.tree_delete_status("/keyva_demo/").await.unwrap();
        assert_eq!(status.remaining_files, 2);
        let err = cluster.tree_delete_status("/keyva_demo/").await.unwrap_err();
        assert!(err.is_class(&ErrorClass::FsNoSuchEntry));
        assert!(!cluster.exists("/keyva_demo/dir00000").await);
        let err = cluster.delete_tree("/keyva_demo").await.unwrap_err();
        assert!(err.is_class(&ErrorClass::FsNoSuchEntry));
    }

    #[tokio::test]
    async fn test_relationship_becomes_steady_after_sync_polls() {
        let cluster = MemoryCluster::new("c1");
        cluster.set_sync_polls(2).await;
        cluster
            .create_source_relationship(&NewSourceRelationship {
                target_address: "c2".into(),
                source_root_path: "/keyva_demo".into(),
                target_root_path: "/keyva_demo".into(),
                replication_mode: "REPLICATION_SNAPSHOT_POLICY_WITH_CONTINUOUS".into(),
                replication_enabled: true,
                snapshot_policies: vec![],
            })
            .await
            .unwrap();

        let first = cluster.list_source_relationship_statuses().await.unwrap();
        assert_eq!(first[0].target_root_path, "/keyva_demo/");
        assert_eq!(first[0].job_state, JOB_RUNNING);
        assert!(first[0].percent_complete().is_some());
        let second = cluster.list_source_relationship_statuses().await.unwrap();
        assert!(!second[0].is_steady());
        let third = cluster.list_source_relationship_statuses().await.unwrap();
        assert!(third[0].is_steady());
    }

    #[tokio::test]
    async fn test_duplicate_relationship_rejected() {
        let cluster = MemoryCluster::new("c1");
        let rel = NewSourceRelationship {
            target_address: "c2".into(),
            source_root_path: "/keyva_demo".into(),
            target_root_path: "/keyva_demo".into(),
            replication_mode: "REPLICATION_CONTINUOUS".into(),
            replication_enabled: true,
            snapshot_policies: vec![],
        };
        cluster.create_source_relationship(&rel).await.unwrap();
        let err = cluster.create_source_relationship(&rel).await.unwrap_err();
        assert!(err.is_class(&ErrorClass::TargetContainsAnotherRelationship));
    }

    #[tokio::test]
    async fn test_scripted_statuses_repeat_last() {
        let cluster = MemoryCluster::new("c1");
        cluster.script_source_statuses(vec![vec![], vec![]]).await;
        for _ in 0..4 {
            assert!(cluster
                .list_source_relationship_statuses()
                .await
                .unwrap()
                .is_empty());
        }
    }

    #[tokio::test]
    async fn test_connector_sessions_share_cluster_state() {
        let connector = MemoryConnector::new();
        let a = connector.connect(ClusterRole::Source).await.unwrap();
        let b = connector.connect(ClusterRole::Source).await.unwrap();
        a.create_directory("keyva_demo", "/").await.unwrap();
        assert!(b.file_attributes("/keyva_demo").await.is_ok());
        let other = connector.connect(ClusterRole::Target).await.unwrap();
        assert!(other.file_attributes("/keyva_demo").await.is_err());
        assert_eq!(connector.address(ClusterRole::Target), "cluster2");
    }
}
