#![warn(missing_docs)]

//! qdemo cluster client: the REST operations the provisioning workflows use,
//! the remote error taxonomy, and an in-memory cluster for simulation.

pub mod api;
pub mod error;
pub mod memory;
pub mod rest;
pub mod types;

pub use api::{ClusterApi, ClusterConnector, ClusterRole};
pub use error::{ApiError, ErrorClass};
pub use memory::{MemoryCluster, MemoryConnector};
pub use rest::{ClusterEndpoint, RestClient, RestConnector};
