//! The control-plane contract: typed methods per resource kind.
//!
//! The wire-level HTTP client is an external collaborator (spec.md §1); this
//! module specifies only the interface the core needs, as an async trait
//! object the rest of the engine depends on.

use crate::entity::{BlockSpec, McpServerSpec, ToolSpec};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteBlock {
    pub id: String,
    pub label: String,
    pub value: String,
    pub description: Option<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BlockPatch {
    pub value: Option<String>,
    pub description: Option<String>,
    pub limit: Option<usize>,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteTool {
    pub id: String,
    pub name: String,
    pub source_code: String,
    pub description: Option<String>,
    pub json_schema: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolPatch {
    pub source_code: Option<String>,
    pub description: Option<String>,
    pub json_schema: Option<serde_json::Value>,
    pub tags: Option<Vec<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteFolder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteIdentity {
    pub id: String,
    pub identifier_key: String,
    pub display_name: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RemoteAgent {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub identity_ids: Vec<String>,
    pub system: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentPatch {
    pub tags: Option<Vec<String>>,
    pub identity_ids: Option<Vec<String>>,
    pub system: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub name: Option<String>,
}

/// A typed capability surface over blocks, tools, folders, identities, and
/// agents, implemented concretely by `reconciler-client` against the real
/// HTTP control plane (or by a fake in tests).
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_blocks(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteBlock>>;
    async fn retrieve_block(&self, id: &str) -> Result<RemoteBlock>;
    async fn create_block(&self, spec: &BlockSpec, metadata: HashMap<String, String>) -> Result<RemoteBlock>;
    async fn update_block(&self, id: &str, patch: &BlockPatch) -> Result<RemoteBlock>;
    async fn delete_block(&self, id: &str) -> Result<()>;

    async fn list_tools(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteTool>>;
    async fn retrieve_tool(&self, id: &str) -> Result<RemoteTool>;
    async fn create_tool(&self, name: &str, spec: &ToolSpec, tags: Vec<String>) -> Result<RemoteTool>;
    async fn update_tool(&self, id: &str, patch: &ToolPatch) -> Result<RemoteTool>;
    async fn delete_tool(&self, id: &str) -> Result<()>;

    async fn list_folders(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteFolder>>;
    async fn retrieve_folder(&self, id: &str) -> Result<RemoteFolder>;
    async fn create_folder(&self, name: &str, metadata: HashMap<String, String>) -> Result<RemoteFolder>;
    async fn update_folder(&self, id: &str, metadata: HashMap<String, String>) -> Result<RemoteFolder>;
    async fn delete_folder(&self, id: &str) -> Result<()>;

    async fn list_identities(&self, filter: ListFilter) -> Result<Vec<RemoteIdentity>>;
    async fn create_identity(&self, identifier_key: &str, display_name: &str, metadata: HashMap<String, String>) -> Result<RemoteIdentity>;
    async fn upsert_identity(&self, identifier_key: &str, display_name: &str, metadata: HashMap<String, String>) -> Result<RemoteIdentity>;
    #[allow(clippy::too_many_arguments)]
    async fn create_mcp_server(&self, name: &str, spec: &McpServerSpec) -> Result<String>;

    async fn retrieve_agent(&self, id: &str) -> Result<RemoteAgent>;
    async fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<RemoteAgent>;
    async fn list_agent_blocks(&self, id: &str) -> Result<Vec<RemoteBlock>>;
    async fn attach_block(&self, agent_id: &str, block_id: &str) -> Result<()>;
    async fn detach_block(&self, agent_id: &str, block_id: &str) -> Result<()>;
    async fn attach_tool(&self, agent_id: &str, tool_id: &str) -> Result<()>;
    async fn detach_tool(&self, agent_id: &str, tool_id: &str) -> Result<()>;
    async fn attach_folder(&self, agent_id: &str, folder_id: &str) -> Result<()>;
    async fn detach_folder(&self, agent_id: &str, folder_id: &str) -> Result<()>;
}
