//! Fail replication back from cluster 2 to cluster 1.
//!
//! Cluster 1 holds the target side of the relationship after failover. The
//! sequence is: make the target writable on cluster 1, make the source root
//! read-only on cluster 2, let it settle, reverse the relationship on
//! cluster 1 with cluster 2 as the new source, and reconnect on cluster 2.

use qdemo_client::types::SourceRelationshipPatch;
use qdemo_client::{ClusterApi, ClusterConnector, ClusterRole};
use tracing::info;

use crate::config::DemoConfig;
use crate::error::{ProvisionError, Result};

/// Id of the target relationship on `api` whose target root is the base directory.
pub async fn target_relationship_id(api: &dyn ClusterApi, config: &DemoConfig) -> Result<String> {
    api.list_target_relationship_statuses()
        .await
        .map_err(|e| ProvisionError::api("list_target_relationship_statuses", e))?
        .into_iter()
        .find(|s| config.is_replication_root(&s.target_root_path))
        .map(|s| s.id)
        .ok_or_else(|| ProvisionError::RelationshipNotFound {
            path: config.replication_root(),
        })
}

/// Run the failback sequence and return the relationship id.
pub async fn failback(connector: &dyn ClusterConnector, config: &DemoConfig) -> Result<String> {
    let rc1 = connector
        .connect(ClusterRole::Source)
        .await
        .map_err(|e| ProvisionError::api("login", e))?;
    let rc2 = connector
        .connect(ClusterRole::Target)
        .await
        .map_err(|e| ProvisionError::api("login", e))?;

    let id = target_relationship_id(rc1.as_ref(), config).await?;
    info!(relationship = %id, "failing back");

    rc1.make_target_writable(&id)
        .await
        .map_err(|e| ProvisionError::api("make_target_writable", e))?;
    rc2.modify_source_relationship(
        &id,
        &SourceRelationshipPatch {
            source_root_read_only: Some(true),
        },
    )
    .await
    .map_err(|e| ProvisionError::api("modify_source_relationship", e))?;

    tokio::time::sleep(config.failback_settle()).await;

    rc1.reverse_target_relationship(&id, &connector.address(ClusterRole::Target))
        .await
        .map_err(|e| ProvisionError::api("reverse_target_relationship", e))?;
    rc2.reconnect_target_relationship(&id)
        .await
        .map_err(|e| ProvisionError::api("reconnect_target_relationship", e))?;

    info!(relationship = %id, "failback complete");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qdemo_client::types::ReplicationTargetStatus;
    use qdemo_client::MemoryConnector;

    #[tokio::test(start_paused = true)]
    async fn test_failback_runs_in_order() {
        let connector = MemoryConnector::new();
        connector
            .source
            .add_target_relationship(ReplicationTargetStatus {
                id: "7".into(),
                source_root_path: "/keyva_demo/".into(),
                target_root_path: "/keyva_demo/".into(),
                source_address: "cluster2".into(),
                state: "ESTABLISHED".into(),
                job_state: "REPLICATION_NOT_RUNNING".into(),
            })
            .await;

        let id = failback(&connector, &DemoConfig::default()).await.unwrap();
        assert_eq!(id, "7");
        assert_eq!(
            connector.source.journal().await,
            vec![
                "make_target_writable 7".to_string(),
                "reverse_target_relationship 7 cluster2".to_string(),
            ]
        );
        assert_eq!(
            connector.target.journal().await,
            vec![
                "modify_source_relationship 7".to_string(),
                "reconnect_target_relationship 7".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_relationship_is_fatal() {
        let connector = MemoryConnector::new();
        let err = failback(&connector, &DemoConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::RelationshipNotFound { .. }));
        assert_eq!(connector.source.call_count("make_target_writable").await, 0);
    }
}
