//! Command line entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use qdemo_client::{ClusterConnector, MemoryConnector, RestConnector};
use tracing::{info, warn};

use crate::cleanup::cleanup;
use crate::config::DemoConfig;
use crate::failback::failback;
use crate::orchestrator::Orchestrator;
use crate::setup::{prepare, RelationshipSetup};
use crate::status::relationship_statuses;

/// Top-level arguments.
#[derive(Parser)]
#[command(name = "qdemo")]
#[command(about = "Two-cluster provisioning and replication demo", long_about = None)]
pub struct Cli {
    /// Config file (.toml or .json). Defaults apply when it does not exist.
    #[arg(short, long, default_value = "qdemo.toml")]
    pub config: PathBuf,

    /// Cluster 1 address.
    #[arg(long)]
    pub source: Option<String>,

    /// Cluster 2 address.
    #[arg(long)]
    pub target: Option<String>,

    /// API user on both clusters.
    #[arg(short, long)]
    pub username: Option<String>,

    /// API password on both clusters.
    #[arg(short, long, env = "QDEMO_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Number of directories.
    #[arg(long)]
    pub dir_count: Option<usize>,

    /// Upper bound on concurrent workers.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Run against two in-memory clusters instead of real ones.
    #[arg(long)]
    pub simulate: bool,

    /// Workflow to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Demo workflows.
#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create directories, wait for replication, then create shares and test files.
    Deploy {
        /// Skip base directory, snapshot policy and relationship setup.
        #[arg(long)]
        skip_setup: bool,
    },
    /// Remove everything deploy created.
    Cleanup,
    /// Fail replication back to cluster 1.
    Failback,
    /// Show replication relationships of cluster 1.
    Status,
}

impl Cli {
    /// Resolve the effective configuration: file, then command line overrides.
    pub fn load_config(&self) -> Result<DemoConfig> {
        let mut config = DemoConfig::load_or_default(&self.config)?;
        if let Some(address) = &self.source {
            config.source.address = address.clone();
        }
        if let Some(address) = &self.target {
            config.target.address = address.clone();
        }
        if let Some(username) = &self.username {
            config.source.username = username.clone();
            config.target.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.source.password = password.clone();
            config.target.password = password.clone();
        }
        if let Some(count) = self.dir_count {
            config.dir_count = count;
        }
        if let Some(workers) = self.max_workers {
            config.max_workers = workers;
        }
        if self.simulate {
            simulated_timing(&mut config);
        }
        config.validate()?;
        Ok(config)
    }

    /// Run the selected workflow against real or simulated clusters.
    pub async fn run(self) -> Result<()> {
        let config = self.load_config()?;
        let connector: Arc<dyn ClusterConnector> = if self.simulate {
            warn!("running against in-memory clusters");
            let connector = MemoryConnector::new();
            connector.source.set_sync_polls(3).await;
            Arc::new(connector)
        } else {
            Arc::new(RestConnector::new(
                config.source.clone(),
                config.target.clone(),
                config.insecure_tls,
            ))
        };

        match self.command {
            Command::Deploy { skip_setup } => deploy(connector, config, skip_setup).await,
            Command::Cleanup => self.cleanup(connector, config).await,
            Command::Failback => {
                let id = failback(connector.as_ref(), &config).await?;
                println!("Failback complete for relationship {id}");
                Ok(())
            }
            Command::Status => {
                let summaries = relationship_statuses(connector.as_ref()).await?;
                if summaries.is_empty() {
                    println!("No replication relationships on {}", config.source.address);
                }
                for summary in summaries {
                    println!("{summary}");
                }
                Ok(())
            }
        }
    }

    async fn cleanup(&self, connector: Arc<dyn ClusterConnector>, config: DemoConfig) -> Result<()> {
        let orchestrator = Orchestrator::new(connector, config);
        let report = cleanup(&orchestrator).await?;
        match &report.relationship_removed {
            Some(id) => println!("Removed replication relationship {id}"),
            None => println!("No replication relationship to remove"),
        }
        println!(
            "Removed {} snapshot policies and {} snapshots",
            report.policies_removed, report.snapshots_removed
        );
        println!("{}", report.shares);
        if !report.shares.overall_success() {
            anyhow::bail!("share removal finished with failures");
        }
        Ok(())
    }
}

async fn deploy(
    connector: Arc<dyn ClusterConnector>,
    config: DemoConfig,
    skip_setup: bool,
) -> Result<()> {
    if !skip_setup {
        let report = prepare(connector.as_ref(), &config).await?;
        if let RelationshipSetup::Created { id } = &report.relationship {
            info!(relationship = %id, "replication relationship ready");
        }
    }

    let orchestrator = Orchestrator::new(connector, config);
    let result = orchestrator.deploy().await;
    println!("{result}");
    if !result.overall_success() {
        let cause = match result.poll_report.as_ref().and_then(|r| r.cause) {
            Some(cause) => format!("replication {cause}"),
            None => format!(
                "{} failed, {} abandoned, {} run failures",
                result.fatal_failures, result.abandoned_tasks, result.run_failures
            ),
        };
        anyhow::bail!("deploy failed: {cause}");
    }
    Ok(())
}

fn simulated_timing(config: &mut DemoConfig) {
    config.barrier.settle_delay_secs = 0;
    config.barrier.poll_interval_ms = 100;
    config.progress_interval_ms = 100;
    config.dequeue_timeout_ms = 100;
    config.tree_delete_poll_secs = 0;
    config.cleanup_pause_secs = 0;
    config.failback_settle_secs = 0;
}
