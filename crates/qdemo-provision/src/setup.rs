//! Environment preparation before the provisioning pool runs: base
//! directory, snapshot policies and the replication relationship.

use qdemo_client::types::{NewSnapshotPolicy, NewSourceRelationship, RelationshipSnapshotPolicy};
use qdemo_client::{ClusterApi, ClusterConnector, ClusterRole};
use tracing::info;

use crate::config::DemoConfig;
use crate::error::{ProvisionError, Result};
use crate::outcome::{self, classify, Operation, Outcome};

/// What happened to the replication relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipSetup {
    /// Created and authorized on the target.
    Created {
        /// New relationship id.
        id: String,
    },
    /// A relationship for the base directory was already in place.
    AlreadyExists,
}

/// Result of [`prepare`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupReport {
    /// Snapshot policies created by this run.
    pub policies_created: Vec<String>,
    /// Snapshot policies that already existed.
    pub policies_existing: Vec<String>,
    /// Replication relationship outcome.
    pub relationship: RelationshipSetup,
}

/// Create the base directory, snapshot policies and replication
/// relationship. Safe to repeat.
pub async fn prepare(connector: &dyn ClusterConnector, config: &DemoConfig) -> Result<SetupReport> {
    let source = connector
        .connect(ClusterRole::Source)
        .await
        .map_err(|e| ProvisionError::api("login", e))?;
    let target = connector
        .connect(ClusterRole::Target)
        .await
        .map_err(|e| ProvisionError::api("login", e))?;

    if outcome::create_directory(source.as_ref(), &config.base_dir, "/").await? == Outcome::Success
    {
        info!(path = %config.base_path(), "created base directory");
    }

    let (policies_created, policies_existing) = create_policies(source.as_ref(), config).await?;
    let relationship = setup_replication(
        source.as_ref(),
        target.as_ref(),
        &connector.address(ClusterRole::Target),
        config,
    )
    .await?;

    Ok(SetupReport {
        policies_created,
        policies_existing,
        relationship,
    })
}

async fn create_policies(
    source: &dyn ClusterApi,
    config: &DemoConfig,
) -> Result<(Vec<String>, Vec<String>)> {
    let base_path = config.base_path();
    let directory_id = source
        .file_attributes(&base_path)
        .await
        .map_err(|e| ProvisionError::api("file_attributes", e))?
        .file_number;

    let mut created = Vec::new();
    let mut existing = Vec::new();
    for template in &config.snapshot_policies {
        let policy = NewSnapshotPolicy {
            name: template.name.clone(),
            schedule_info: template.schedule.clone(),
            directory_id: directory_id.clone(),
        };
        match classify(
            Operation::CreateSnapshotPolicy,
            source.create_snapshot_policy(&policy).await,
        )? {
            Outcome::Success => {
                info!(policy = %template.name, "Created snapshot policy");
                created.push(template.name.clone());
            }
            Outcome::AlreadySatisfied => {
                info!(policy = %template.name, "Snapshot policy exists");
                existing.push(template.name.clone());
            }
        }
    }
    Ok((created, existing))
}

/// Id of the snapshot policy called `name`.
pub async fn snapshot_policy_id(api: &dyn ClusterApi, name: &str) -> Result<u64> {
    api.list_snapshot_policies()
        .await
        .map_err(|e| ProvisionError::api("list_snapshot_policies", e))?
        .into_iter()
        .find(|p| p.name == name)
        .map(|p| p.id)
        .ok_or_else(|| ProvisionError::PolicyNotFound {
            name: name.to_string(),
        })
}

async fn setup_replication(
    source: &dyn ClusterApi,
    target: &dyn ClusterApi,
    target_address: &str,
    config: &DemoConfig,
) -> Result<RelationshipSetup> {
    info!("Setting up cluster replication");
    let statuses = source
        .list_source_relationship_statuses()
        .await
        .map_err(|e| ProvisionError::api("list_source_relationship_statuses", e))?;
    if statuses
        .iter()
        .any(|s| config.is_replication_root(&s.source_root_path))
    {
        info!(path = %config.replication_root(), "Source relationship already exists");
        return Ok(RelationshipSetup::AlreadyExists);
    }

    let policy_id = snapshot_policy_id(source, &config.replication_policy).await?;
    let base_path = config.base_path();
    let relationship = NewSourceRelationship {
        target_address: target_address.to_string(),
        source_root_path: base_path.clone(),
        target_root_path: base_path.clone(),
        replication_mode: config.replication_mode.clone(),
        replication_enabled: true,
        snapshot_policies: vec![RelationshipSnapshotPolicy {
            id: policy_id,
            target_expiration: "same_as_policy".to_string(),
        }],
    };

    let id = match source.create_source_relationship(&relationship).await {
        Ok(created) => created.id,
        Err(err) => {
            classify::<()>(Operation::CreateRelationship, Err(err))?;
            info!(path = %base_path, "Relationship already exists");
            return Ok(RelationshipSetup::AlreadyExists);
        }
    };

    target
        .authorize_relationship(&id, true, true)
        .await
        .map_err(|e| ProvisionError::api("authorize_relationship", e))?;
    info!(relationship = %id, "replication relationship created and authorized");
    Ok(RelationshipSetup::Created { id })
}
