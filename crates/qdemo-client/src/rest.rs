//! REST implementation of [`ClusterApi`].

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::api::{ClusterApi, ClusterConnector, ClusterRole};
use crate::error::{ApiError, ErrorBody, ErrorClass, Result};
use crate::types::{
    CreatedRelationship, Entries, FileAttributes, NewSmbShare, NewSnapshotPolicy,
    NewSourceRelationship, ReplicationSourceStatus, ReplicationTargetStatus, Snapshot,
    SnapshotPolicy, SourceRelationshipPatch, TreeDeleteStatus,
};

/// Default REST API port.
pub const DEFAULT_PORT: u16 = 8000;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_username() -> String {
    "admin".to_string()
}

/// Address and credentials of one cluster.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEndpoint {
    /// Host name or IP address.
    pub address: String,
    /// REST API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// API user.
    #[serde(default = "default_username")]
    pub username: String,
    /// API password.
    #[serde(default)]
    pub password: String,
}

impl ClusterEndpoint {
    /// Endpoint on the default port with the default user and no password.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_PORT,
            username: default_username(),
            password: String::new(),
        }
    }

    /// Base URL of the REST API.
    pub fn base_url(&self) -> String {
        format!("https://{}:{}", self.address, self.port)
    }
}

impl std::fmt::Debug for ClusterEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterEndpoint")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    bearer_token: String,
}

/// Percent-encode a file system path for use as a `{ref}` URL segment.
pub fn path_ref(path: &str) -> String {
    urlencoding::encode(path).into_owned()
}

/// An authenticated REST session against one cluster.
pub struct RestClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RestClient {
    /// Log in to `endpoint` and return a session holding the bearer token.
    pub async fn login(endpoint: &ClusterEndpoint, insecure_tls: bool) -> Result<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        let base_url = endpoint.base_url();
        let uri = "/v1/session/login";

        let response = http
            .post(format!("{base_url}{uri}"))
            .json(&json!({
                "username": endpoint.username,
                "password": endpoint.password,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Auth {
                address: endpoint.address.clone(),
                msg: format!("HTTP {}", response.status()),
            });
        }

        let login: LoginResponse = response.json().await.map_err(|e| ApiError::Auth {
            address: endpoint.address.clone(),
            msg: format!("no bearer token in login response: {e}"),
        })?;
        debug!(address = %endpoint.address, "logged in");

        Ok(Self {
            http,
            base_url,
            token: login.bearer_token,
        })
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let mut request = self
            .http
            .request(method.clone(), format!("{}{}", self.base_url, uri))
            .bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        check(method.as_str(), uri, response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, uri: &str) -> Result<T> {
        let response = self.send(Method::GET, uri, None).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        uri: &str,
        body: &B,
    ) -> Result<T> {
        let body = serde_json::to_value(body)?;
        let response = self.send(method, uri, Some(body)).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn send_unit(
        &self,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> Result<()> {
        self.send(method, uri, body).await?;
        Ok(())
    }
}

async fn check(method: &str, uri: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(ApiError::remote(
            method,
            uri,
            status.as_u16(),
            ErrorClass::from_wire(&body.error_class),
            body.description,
        )),
        Err(_) => Err(ApiError::Status {
            method: method.to_string(),
            uri: uri.to_string(),
            status: status.as_u16(),
        }),
    }
}

#[async_trait]
impl ClusterApi for RestClient {
    async fn create_directory(&self, name: &str, dir_path: &str) -> Result<FileAttributes> {
        let uri = format!("/v1/files/{}/entries/", path_ref(dir_path));
        self.send_json(
            Method::POST,
            &uri,
            &json!({ "name": name, "action": "CREATE_DIRECTORY" }),
        )
        .await
    }

    async fn create_file(&self, name: &str, dir_path: &str) -> Result<FileAttributes> {
        let uri = format!("/v1/files/{}/entries/", path_ref(dir_path));
        self.send_json(
            Method::POST,
            &uri,
            &json!({ "name": name, "action": "CREATE_FILE" }),
        )
        .await
    }

    async fn write_file(&self, path: &str, data: Bytes) -> Result<()> {
        let uri = format!("/v1/files/{}/data", path_ref(path));
        let response = self
            .http
            .put(format!("{}{}", self.base_url, uri))
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await?;
        check("PUT", &uri, response).await?;
        Ok(())
    }

    async fn file_attributes(&self, path: &str) -> Result<FileAttributes> {
        let uri = format!("/v1/files/{}/info/attributes", path_ref(path));
        self.get_json(&uri).await
    }

    async fn delete_tree(&self, path: &str) -> Result<()> {
        let attrs = self.file_attributes(path).await?;
        self.send_unit(
            Method::POST,
            "/v1/tree-delete/jobs/",
            Some(json!({ "id": attrs.id })),
        )
        .await
    }

    async fn tree_delete_status(&self, path: &str) -> Result<TreeDeleteStatus> {
        let attrs = self.file_attributes(path).await?;
        self.get_json(&format!("/v1/tree-delete/jobs/{}", attrs.id))
            .await
    }

    async fn create_share(&self, share: &NewSmbShare) -> Result<()> {
        let body = serde_json::to_value(share)?;
        self.send_unit(Method::POST, "/v2/smb/shares/", Some(body))
            .await
    }

    async fn delete_share(&self, name: &str) -> Result<()> {
        let uri = format!("/v2/smb/shares/{}", path_ref(name));
        self.send_unit(Method::DELETE, &uri, None).await
    }

    async fn list_source_relationship_statuses(&self) -> Result<Vec<ReplicationSourceStatus>> {
        self.get_json("/v2/replication/source-relationships/status/")
            .await
    }

    async fn list_target_relationship_statuses(&self) -> Result<Vec<ReplicationTargetStatus>> {
        self.get_json("/v2/replication/target-relationships/status/")
            .await
    }

    async fn create_source_relationship(
        &self,
        relationship: &NewSourceRelationship,
    ) -> Result<CreatedRelationship> {
        self.send_json(
            Method::POST,
            "/v2/replication/source-relationships/",
            relationship,
        )
        .await
    }

    async fn authorize_relationship(
        &self,
        relationship_id: &str,
        allow_non_empty_directory: bool,
        allow_fs_path_create: bool,
    ) -> Result<()> {
        let uri = format!(
            "/v2/replication/target-relationships/{}/authorize?allow-non-empty-directory={}&allow-fs-path-create={}",
            path_ref(relationship_id),
            allow_non_empty_directory,
            allow_fs_path_create
        );
        self.send_unit(Method::POST, &uri, None).await
    }

    async fn modify_source_relationship(
        &self,
        relationship_id: &str,
        patch: &SourceRelationshipPatch,
    ) -> Result<()> {
        let uri = format!(
            "/v2/replication/source-relationships/{}",
            path_ref(relationship_id)
        );
        let body = serde_json::to_value(patch)?;
        self.send_unit(Method::PATCH, &uri, Some(body)).await
    }

    async fn delete_source_relationship(&self, relationship_id: &str) -> Result<()> {
        let uri = format!(
            "/v2/replication/source-relationships/{}",
            path_ref(relationship_id)
        );
        self.send_unit(Method::DELETE, &uri, None).await
    }

    async fn make_target_writable(&self, relationship_id: &str) -> Result<()> {
        let uri = format!(
            "/v2/replication/target-relationships/{}/make-writable",
            path_ref(relationship_id)
        );
        self.send_unit(Method::POST, &uri, None).await
    }

    async fn reverse_target_relationship(
        &self,
        relationship_id: &str,
        source_address: &str,
    ) -> Result<()> {
        self.send_unit(
            Method::POST,
            "/v2/replication/source-relationships/reverse-target-relationship",
            Some(json!({
                "target_relationship_id": relationship_id,
                "source_address": source_address,
            })),
        )
        .await
    }

    async fn reconnect_target_relationship(&self, relationship_id: &str) -> Result<()> {
        let uri = format!(
            "/v2/replication/target-relationships/{}/reconnect",
            path_ref(relationship_id)
        );
        self.send_unit(Method::POST, &uri, None).await
    }

    async fn list_snapshot_policies(&self) -> Result<Vec<SnapshotPolicy>> {
        let list: Entries<SnapshotPolicy> = self.get_json("/v1/snapshots/policies/").await?;
        Ok(list.entries)
    }

    async fn create_snapshot_policy(&self, policy: &NewSnapshotPolicy) -> Result<SnapshotPolicy> {
        self.send_json(Method::POST, "/v1/snapshots/policies/", policy)
            .await
    }

    async fn delete_snapshot_policy(&self, policy_id: u64) -> Result<()> {
        let uri = format!("/v1/snapshots/policies/{policy_id}");
        self.send_unit(Method::DELETE, &uri, None).await
    }

    async fn list_snapshots(&self) -> Result<Vec<Snapshot>> {
        let list: Entries<Snapshot> = self.get_json("/v2/snapshots/").await?;
        Ok(list.entries)
    }

    async fn delete_snapshot(&self, snapshot_id: u64) -> Result<()> {
        let uri = format!("/v2/snapshots/{snapshot_id}");
        self.send_unit(Method::DELETE, &uri, None).await
    }
}

/// Opens a fresh [`RestClient`] session per call.
#[derive(Debug, Clone)]
pub struct RestConnector {
    source: ClusterEndpoint,
    target: ClusterEndpoint,
    insecure_tls: bool,
}

impl RestConnector {
    /// Connector for the two clusters.
    pub fn new(source: ClusterEndpoint, target: ClusterEndpoint, insecure_tls: bool) -> Self {
        Self {
            source,
            target,
            insecure_tls,
        }
    }

    fn endpoint(&self, role: ClusterRole) -> &ClusterEndpoint {
        match role {
            ClusterRole::Source => &self.source,
            ClusterRole::Target => &self.target,
        }
    }
}

#[async_trait]
impl ClusterConnector for RestConnector {
    async fn connect(&self, role: ClusterRole) -> Result<Box<dyn ClusterApi>> {
        let client = RestClient::login(self.endpoint(role), self.insecure_tls).await?;
        Ok(Box::new(client))
    }

    fn address(&self, role: ClusterRole) -> String {
        self.endpoint(role).address.clone()
    }
}
