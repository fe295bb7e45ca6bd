//! Error types for the provisioning workflows.

use qdemo_client::ApiError;
use thiserror::Error;

/// Errors that can occur while provisioning, cleaning up or failing back.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A remote operation failed with an error that is not already-satisfied.
    #[error("{op} failed: {source}")]
    Api {
        /// Operation that failed.
        op: &'static str,
        /// Underlying client error.
        #[source]
        source: ApiError,
    },

    /// A snapshot policy referenced by name does not exist.
    #[error("snapshot policy not found: {name}")]
    PolicyNotFound {
        /// Policy name.
        name: String,
    },

    /// No replication relationship exists for the given root path.
    #[error("replication relationship not found for root path: {path}")]
    RelationshipNotFound {
        /// Root path searched for.
        path: String,
    },

    /// Tree deletion did not finish within the attempt budget.
    #[error("tree delete of {path} on {cluster} did not finish after {attempts} polls")]
    TreeDeleteTimeout {
        /// Deleted path.
        path: String,
        /// Cluster the delete ran on.
        cluster: String,
        /// Status polls made.
        attempts: u32,
    },

    /// Invalid configuration.
    #[error("configuration error: {msg}")]
    Config {
        /// Error message.
        msg: String,
    },
}

impl ProvisionError {
    /// Wrap a client error raised by `op`.
    pub fn api(op: &'static str, source: ApiError) -> Self {
        ProvisionError::Api { op, source }
    }
}

/// Result alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;
