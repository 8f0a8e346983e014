//! Concrete `ControlPlane` implementation against the real HTTP control
//! plane, built on `reqwest`.
//!
//! Idempotency note: a 409 response is surfaced here as `Error::Conflict`,
//! not silently swallowed. Per spec.md §4.4 the 409-as-success translation
//! is the Apply Engine's concern, not the client's — this type just reports
//! what the wire said.

use crate::credentials::{AuthMode, ResolvedEndpoint};
use async_trait::async_trait;
use reconciler_core::entity::{BlockSpec, McpServerSpec, ToolSpec};
use reconciler_core::{
    AgentPatch, BlockPatch, ControlPlane, Error, ListFilter, RemoteAgent, RemoteBlock, RemoteFolder, RemoteIdentity, RemoteTool, Result,
    ToolPatch,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

pub struct HttpControlPlane {
    client: Client,
    base_url: String,
    auth: AuthMode,
}

impl HttpControlPlane {
    pub fn new(endpoint: ResolvedEndpoint) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builder is infallible for this configuration");
        Self { client, base_url: endpoint.base_url, auth: endpoint.auth }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            AuthMode::ApiKey(key) => builder.header("Authorization", format!("Bearer {key}")),
            AuthMode::ServerPassword(password) => builder.basic_auth("letta", Some(password)),
            AuthMode::None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        self.authorize(self.client.request(method, url))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let response = builder.send().await.map_err(|e| Error::ControlPlane(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(Error::Conflict(response.text().await.unwrap_or_default()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found("resource", response.url().path()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ControlPlane(format!("{status}: {body}")));
        }
        response.json::<T>().await.map_err(|e| Error::ControlPlane(e.to_string()))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<()> {
        let response = builder.send().await.map_err(|e| Error::ControlPlane(e.to_string()))?;
        let status = response.status();
        if status == StatusCode::CONFLICT {
            return Err(Error::Conflict(response.text().await.unwrap_or_default()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(Error::not_found("resource", response.url().path()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ControlPlane(format!("{status}: {body}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn list_blocks(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteBlock>> {
        let mut req = self.request(Method::GET, &format!("/v1/agents/{agent_id}/core-memory/blocks"));
        if let Some(name) = &filter.name {
            req = req.query(&[("label", name)]);
        }
        self.send_json(req).await
    }

    async fn retrieve_block(&self, id: &str) -> Result<RemoteBlock> {
        self.send_json(self.request(Method::GET, &format!("/v1/blocks/{id}"))).await
    }

    async fn create_block(&self, spec: &BlockSpec, metadata: HashMap<String, String>) -> Result<RemoteBlock> {
        let body = json!({
            "label": spec.label,
            "value": spec.value,
            "limit": spec.limit,
            "read_only": spec.read_only,
            "metadata": metadata,
        });
        self.send_json(self.request(Method::POST, "/v1/blocks").json(&body)).await
    }

    async fn update_block(&self, id: &str, patch: &BlockPatch) -> Result<RemoteBlock> {
        self.send_json(self.request(Method::PATCH, &format!("/v1/blocks/{id}")).json(patch)).await
    }

    async fn delete_block(&self, id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/v1/blocks/{id}"))).await
    }

    async fn list_tools(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteTool>> {
        let mut req = self.request(Method::GET, &format!("/v1/agents/{agent_id}/tools"));
        if let Some(name) = &filter.name {
            req = req.query(&[("name", name)]);
        }
        self.send_json(req).await
    }

    async fn retrieve_tool(&self, id: &str) -> Result<RemoteTool> {
        self.send_json(self.request(Method::GET, &format!("/v1/tools/{id}"))).await
    }

    async fn create_tool(&self, name: &str, spec: &ToolSpec, tags: Vec<String>) -> Result<RemoteTool> {
        let body = json!({
            "name": name,
            "source_type": spec.source_type,
            "source_code": spec.source_code,
            "json_schema": spec.json_schema,
            "tool_type": spec.tool_type,
            "tags": tags,
        });
        self.send_json(self.request(Method::POST, "/v1/tools").json(&body)).await
    }

    async fn update_tool(&self, id: &str, patch: &ToolPatch) -> Result<RemoteTool> {
        self.send_json(self.request(Method::PATCH, &format!("/v1/tools/{id}")).json(patch)).await
    }

    async fn delete_tool(&self, id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/v1/tools/{id}"))).await
    }

    async fn list_folders(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteFolder>> {
        let mut req = self.request(Method::GET, &format!("/v1/agents/{agent_id}/folders"));
        if let Some(name) = &filter.name {
            req = req.query(&[("name", name)]);
        }
        self.send_json(req).await
    }

    async fn retrieve_folder(&self, id: &str) -> Result<RemoteFolder> {
        self.send_json(self.request(Method::GET, &format!("/v1/folders/{id}"))).await
    }

    async fn create_folder(&self, name: &str, metadata: HashMap<String, String>) -> Result<RemoteFolder> {
        let body = json!({ "name": name, "metadata": metadata });
        self.send_json(self.request(Method::POST, "/v1/folders").json(&body)).await
    }

    async fn update_folder(&self, id: &str, metadata: HashMap<String, String>) -> Result<RemoteFolder> {
        let body = json!({ "metadata": metadata });
        self.send_json(self.request(Method::PATCH, &format!("/v1/folders/{id}")).json(&body)).await
    }

    async fn delete_folder(&self, id: &str) -> Result<()> {
        self.send_empty(self.request(Method::DELETE, &format!("/v1/folders/{id}"))).await
    }

    async fn list_identities(&self, filter: ListFilter) -> Result<Vec<RemoteIdentity>> {
        let mut req = self.request(Method::GET, "/v1/identities");
        if let Some(name) = &filter.name {
            req = req.query(&[("identifier_key", name)]);
        }
        self.send_json(req).await
    }

    async fn create_identity(&self, identifier_key: &str, display_name: &str, metadata: HashMap<String, String>) -> Result<RemoteIdentity> {
        let body = json!({ "identifier_key": identifier_key, "display_name": display_name, "metadata": metadata });
        self.send_json(self.request(Method::POST, "/v1/identities").json(&body)).await
    }

    async fn upsert_identity(&self, identifier_key: &str, display_name: &str, metadata: HashMap<String, String>) -> Result<RemoteIdentity> {
        let body = json!({ "identifier_key": identifier_key, "display_name": display_name, "metadata": metadata });
        self.send_json(self.request(Method::PUT, "/v1/identities").json(&body)).await
    }

    async fn create_mcp_server(&self, name: &str, spec: &McpServerSpec) -> Result<String> {
        let body = json!({
            "name": name,
            "server_type": spec.server_type,
            "transport": spec.transport,
            "secret_refs": spec.secret_refs,
        });
        #[derive(serde::Deserialize)]
        struct Created {
            id: String,
        }
        let created: Created = self.send_json(self.request(Method::POST, "/v1/mcp-servers").json(&body)).await?;
        Ok(created.id)
    }

    async fn retrieve_agent(&self, id: &str) -> Result<RemoteAgent> {
        self.send_json(self.request(Method::GET, &format!("/v1/agents/{id}"))).await
    }

    async fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<RemoteAgent> {
        self.send_json(self.request(Method::PATCH, &format!("/v1/agents/{id}")).json(patch)).await
    }

    async fn list_agent_blocks(&self, id: &str) -> Result<Vec<RemoteBlock>> {
        self.list_blocks(id, ListFilter::default()).await
    }

    async fn attach_block(&self, agent_id: &str, block_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::PATCH, &format!("/v1/agents/{agent_id}/core-memory/blocks/attach/{block_id}")))
            .await
    }

    async fn detach_block(&self, agent_id: &str, block_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::PATCH, &format!("/v1/agents/{agent_id}/core-memory/blocks/detach/{block_id}")))
            .await
    }

    async fn attach_tool(&self, agent_id: &str, tool_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::PATCH, &format!("/v1/agents/{agent_id}/tools/attach/{tool_id}"))).await
    }

    async fn detach_tool(&self, agent_id: &str, tool_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::PATCH, &format!("/v1/agents/{agent_id}/tools/detach/{tool_id}"))).await
    }

    async fn attach_folder(&self, agent_id: &str, folder_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::PATCH, &format!("/v1/agents/{agent_id}/folders/attach/{folder_id}")))
            .await
    }

    async fn detach_folder(&self, agent_id: &str, folder_id: &str) -> Result<()> {
        self.send_empty(self.request(Method::PATCH, &format!("/v1/agents/{agent_id}/folders/detach/{folder_id}")))
            .await
    }
}
