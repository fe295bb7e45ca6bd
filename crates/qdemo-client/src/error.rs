//! Error types for the cluster REST client.

use serde::Deserialize;
use thiserror::Error;

/// Error class reported by the cluster in the `error_class` field of a failed
/// response.
///
/// Only the classes the provisioning workflows react to get their own
/// variant; everything else is kept verbatim in [`ErrorClass::Other`] and is
/// always treated as fatal by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// `fs_entry_exists_error`
    FsEntryExists,
    /// `fs_no_such_entry_error`
    FsNoSuchEntry,
    /// `smb_share_already_exists_error`
    SmbShareAlreadyExists,
    /// `smb_share_doesnt_exist_error`
    SmbShareDoesntExist,
    /// `tree_delete_already_started_error`
    TreeDeleteAlreadyStarted,
    /// `snapshot_policy_name_in_use_error`
    SnapshotPolicyNameInUse,
    /// `relationship_manager_target_contains_another_relationship_error`
    TargetContainsAnotherRelationship,
    /// Any class without special handling.
    Other(String),
}

impl ErrorClass {
    /// Parse the wire name of an error class.
    pub fn from_wire(name: &str) -> Self {
        match name {
            "fs_entry_exists_error" => ErrorClass::FsEntryExists,
            "fs_no_such_entry_error" => ErrorClass::FsNoSuchEntry,
            "smb_share_already_exists_error" => ErrorClass::SmbShareAlreadyExists,
            "smb_share_doesnt_exist_error" => ErrorClass::SmbShareDoesntExist,
            "tree_delete_already_started_error" => ErrorClass::TreeDeleteAlreadyStarted,
            "snapshot_policy_name_in_use_error" => ErrorClass::SnapshotPolicyNameInUse,
            "relationship_manager_target_contains_another_relationship_error" => {
                ErrorClass::TargetContainsAnotherRelationship
            }
            other => ErrorClass::Other(other.to_string()),
        }
    }

    /// The wire name of this error class.
    pub fn as_wire(&self) -> &str {
        match self {
            ErrorClass::FsEntryExists => "fs_entry_exists_error",
            ErrorClass::FsNoSuchEntry => "fs_no_such_entry_error",
            ErrorClass::SmbShareAlreadyExists => "smb_share_already_exists_error",
            ErrorClass::SmbShareDoesntExist => "smb_share_doesnt_exist_error",
            ErrorClass::TreeDeleteAlreadyStarted => "tree_delete_already_started_error",
            ErrorClass::SnapshotPolicyNameInUse => "snapshot_policy_name_in_use_error",
            ErrorClass::TargetContainsAnotherRelationship => {
                "relationship_manager_target_contains_another_relationship_error"
            }
            ErrorClass::Other(name) => name,
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Body of a failed API response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ErrorBody {
    pub error_class: String,
    #[serde(default)]
    pub description: String,
}

/// Errors returned by [`crate::ClusterApi`] implementations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The cluster rejected the request with a classified error.
    #[error("{method} {uri} failed with HTTP {status} ({class}): {description}")]
    Remote {
        /// HTTP method of the failed request.
        method: String,
        /// Request URI.
        uri: String,
        /// HTTP status code.
        status: u16,
        /// Classified error kind.
        class: ErrorClass,
        /// Human-readable description sent by the cluster.
        description: String,
    },

    /// The cluster answered with an error status and no parseable error body.
    #[error("{method} {uri} failed with HTTP {status}")]
    Status {
        /// HTTP method of the failed request.
        method: String,
        /// Request URI.
        uri: String,
        /// HTTP status code.
        status: u16,
    },

    /// Login was refused or no session token was returned.
    #[error("authentication failed against {address}: {msg}")]
    Auth {
        /// Cluster address.
        address: String,
        /// Error message.
        msg: String,
    },

    /// Connection or protocol level failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Build a classified remote error.
    pub fn remote(
        method: impl Into<String>,
        uri: impl Into<String>,
        status: u16,
        class: ErrorClass,
        description: impl Into<String>,
    ) -> Self {
        ApiError::Remote {
            method: method.into(),
            uri: uri.into(),
            status,
            class,
            description: description.into(),
        }
    }

    /// The classified error kind, if the cluster sent one.
    pub fn class(&self) -> Option<&ErrorClass> {
        match self {
            ApiError::Remote { class, .. } => Some(class),
            _ => None,
        }
    }

    /// Whether the cluster reported exactly `class`.
    pub fn is_class(&self, class: &ErrorClass) -> bool {
        self.class() == Some(class)
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, ApiError>;
