//! Demo configuration: cluster endpoints, pool sizing, barrier timing and
//! the objects setup creates.

use std::path::Path;
use std::time::Duration;

use qdemo_client::types::SharePermission;
use qdemo_client::ClusterEndpoint;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::barrier::PollerConfig;
use crate::error::ProvisionError;

/// Replication barrier timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    /// Sleep before the first replication status poll.
    pub settle_delay_secs: u64,
    /// Sleep between status polls.
    pub poll_interval_ms: u64,
    /// Status polls before the barrier times out.
    pub max_attempts: u32,
    /// How long a worker waits on the barrier before giving up on its own.
    pub worker_wait_secs: u64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            settle_delay_secs: 60,
            poll_interval_ms: 1000,
            max_attempts: 480,
            worker_wait_secs: 600,
        }
    }
}

impl BarrierConfig {
    /// Sleep before the first poll.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    /// Sleep between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Per-worker bound on the barrier wait.
    pub fn worker_wait(&self) -> Duration {
        Duration::from_secs(self.worker_wait_secs)
    }

    /// Longest the poller can run before it writes a terminal state.
    pub fn poller_budget(&self) -> Duration {
        self.settle_delay() + self.poll_interval() * self.max_attempts.saturating_sub(1)
    }
}

/// A snapshot policy created on the base directory. The schedule is passed
/// through to the cluster untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotPolicyTemplate {
    /// Policy name.
    pub name: String,
    /// `schedule_info` document.
    pub schedule: serde_json::Value,
}

/// Settings shared by every workflow. Missing keys take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Cluster 1, the replication source.
    pub source: ClusterEndpoint,
    /// Cluster 2, the replication target.
    pub target: ClusterEndpoint,
    /// Accept self-signed cluster certificates.
    pub insecure_tls: bool,
    /// Name of the base directory under the cluster root.
    pub base_dir: String,
    /// Number of `dirNNNNN` directories to provision.
    pub dir_count: usize,
    /// Upper bound on concurrent workers.
    pub max_workers: usize,
    /// Bound on a single wait for a queued task.
    pub dequeue_timeout_ms: u64,
    /// Interval between queue length log lines.
    pub progress_interval_ms: u64,
    /// Replication barrier timing.
    pub barrier: BarrierConfig,
    /// Permissions on every SMB share.
    pub share_permissions: Vec<SharePermission>,
    /// Snapshot policies created on the base directory.
    pub snapshot_policies: Vec<SnapshotPolicyTemplate>,
    /// Snapshot policy linked to the replication relationship.
    pub replication_policy: String,
    /// Replication mode of the relationship.
    pub replication_mode: String,
    /// Sleep between tree delete status polls.
    pub tree_delete_poll_secs: u64,
    /// Tree delete status polls before cleanup gives up.
    pub tree_delete_max_polls: u32,
    /// Pause between snapshot removal and tree deletion during cleanup.
    pub cleanup_pause_secs: u64,
    /// Pause between making the target writable and reversing the relationship.
    pub failback_settle_secs: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            source: ClusterEndpoint::new("mycluster1.local"),
            target: ClusterEndpoint::new("mycluster2.local"),
            insecure_tls: true,
            base_dir: String::from("keyva_demo"),
            dir_count: 2000,
            max_workers: 50,
            dequeue_timeout_ms: 30_000,
            progress_interval_ms: 1000,
            barrier: BarrierConfig::default(),
            share_permissions: default_share_permissions(),
            snapshot_policies: default_snapshot_policies(),
            replication_policy: String::from("keyva_demo_hourly"),
            replication_mode: String::from("REPLICATION_SNAPSHOT_POLICY_WITH_CONTINUOUS"),
            tree_delete_poll_secs: 5,
            tree_delete_max_polls: 600,
            cleanup_pause_secs: 5,
            failback_settle_secs: 15,
        }
    }
}

fn default_share_permissions() -> Vec<SharePermission> {
    vec![
        SharePermission::allowed("qumulo-grp2", &["READ"]),
        SharePermission::allowed("qumulo-grp1", &["READ", "WRITE"]),
        SharePermission::allowed("quser1", &["ALL"]),
        SharePermission::allowed("admin", &["ALL"]),
    ]
}

fn default_snapshot_policies() -> Vec<SnapshotPolicyTemplate> {
    let every_day = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];
    vec![
        SnapshotPolicyTemplate {
            name: String::from("keyva_demo_hourly"),
            schedule: json!({
                "creation_schedule": {
                    "fire_every_interval": "FIRE_IN_MINUTES",
                    "window_start_minute": 0,
                    "window_end_hour": 23,
                    "frequency": "SCHEDULE_HOURLY_OR_LESS",
                    "on_days": every_day,
                    "window_start_hour": 0,
                    "window_end_minute": 59,
                    "timezone": "America/Chicago",
                    "fire_every": 60
                },
                "expiration_time_to_live": "36hours"
            }),
        },
        SnapshotPolicyTemplate {
            name: String::from("keyva_demo_daily"),
            schedule: json!({
                "creation_schedule": {
                    "timezone": "America/Chicago",
                    "frequency": "SCHEDULE_DAILY_OR_WEEKLY",
                    "on_days": every_day,
                    "minute": 0,
                    "hour": 0
                },
                "expiration_time_to_live": "7days"
            }),
        },
        SnapshotPolicyTemplate {
            name: String::from("keyva_demo_weekly"),
            schedule: json!({
                "creation_schedule": {
                    "timezone": "America/Chicago",
                    "frequency": "SCHEDULE_DAILY_OR_WEEKLY",
                    "on_days": ["SUN"],
                    "minute": 0,
                    "hour": 1
                },
                "expiration_time_to_live": "4weeks"
            }),
        },
        SnapshotPolicyTemplate {
            name: String::from("keyva_demo_monthly"),
            schedule: json!({
                "creation_schedule": {
                    "timezone": "America/Chicago",
                    "frequency": "SCHEDULE_MONTHLY",
                    "minute": 0,
                    "hour": 2,
                    "day_of_month": 1
                },
                "expiration_time_to_live": "3months"
            }),
        },
    ]
}

impl DemoConfig {
    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: DemoConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: DemoConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Reject settings the workflows cannot run with.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.base_dir.is_empty() || self.base_dir.contains('/') {
            return Err(ProvisionError::Config {
                msg: format!("base_dir must be a single path component: {:?}", self.base_dir),
            });
        }
        if self.max_workers == 0 {
            return Err(ProvisionError::Config {
                msg: "max_workers must be at least 1".into(),
            });
        }
        if self.barrier.max_attempts == 0 {
            return Err(ProvisionError::Config {
                msg: "barrier.max_attempts must be at least 1".into(),
            });
        }
        if self.barrier.worker_wait() < self.barrier.poller_budget() {
            warn!(
                worker_wait_secs = self.barrier.worker_wait_secs,
                poller_budget_secs = self.barrier.poller_budget().as_secs(),
                "workers may give up on the barrier before the poller does"
            );
        }
        Ok(())
    }

    /// Absolute path of the base directory, e.g. `/keyva_demo`.
    pub fn base_path(&self) -> String {
        format!("/{}", self.base_dir)
    }

    /// Root path of the replication relationship, e.g. `/keyva_demo/`.
    pub fn replication_root(&self) -> String {
        format!("/{}/", self.base_dir)
    }

    /// Whether a relationship root path names the replicated base directory.
    pub fn is_replication_root(&self, path: &str) -> bool {
        path.trim_end_matches('/') == self.base_path()
    }

    /// See `dequeue_timeout_ms`.
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    /// See `progress_interval_ms`.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    /// See `tree_delete_poll_secs`.
    pub fn tree_delete_poll(&self) -> Duration {
        Duration::from_secs(self.tree_delete_poll_secs)
    }

    /// See `cleanup_pause_secs`.
    pub fn cleanup_pause(&self) -> Duration {
        Duration::from_secs(self.cleanup_pause_secs)
    }

    /// See `failback_settle_secs`.
    pub fn failback_settle(&self) -> Duration {
        Duration::from_secs(self.failback_settle_secs)
    }

    /// Workers actually started for `tasks` tasks.
    pub fn worker_count(&self, tasks: usize) -> usize {
        self.max_workers.min(tasks)
    }

    /// Poller settings for the replication barrier.
    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            target_root_path: self.replication_root(),
            settle_delay: self.barrier.settle_delay(),
            poll_interval: self.barrier.poll_interval(),
            max_attempts: self.barrier.max_attempts,
        }
    }
}
