//! An in-memory `ControlPlane` double, shared by this crate's and
//! `reconciler-upgrade`'s integration tests.

use async_trait::async_trait;
use reconciler_core::entity::{BlockSpec, McpServerSpec, ToolSpec};
use reconciler_core::{
    AgentPatch, BlockPatch, ControlPlane, Error, ListFilter, RemoteAgent, RemoteBlock, RemoteFolder, RemoteIdentity, RemoteTool, Result,
    ToolPatch,
};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    next_id: u64,
    blocks: HashMap<String, RemoteBlock>,
    tools: HashMap<String, RemoteTool>,
    folders: HashMap<String, RemoteFolder>,
    identities: HashMap<String, RemoteIdentity>,
    agents: HashMap<String, RemoteAgent>,
    agent_blocks: HashMap<String, HashSet<String>>,
    agent_tools: HashMap<String, HashSet<String>>,
    agent_folders: HashMap<String, HashSet<String>>,
}

impl State {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

pub struct FakeControlPlane {
    state: Mutex<State>,
}

impl Default for FakeControlPlane {
    fn default() -> Self {
        Self { state: Mutex::new(State::default()) }
    }
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_agent(&self, agent: RemoteAgent) {
        let mut state = self.state.lock().unwrap();
        state.agents.insert(agent.id.clone(), agent);
    }

    pub fn seed_block(&self, agent_id: &str, block: RemoteBlock) {
        let mut state = self.state.lock().unwrap();
        state.agent_blocks.entry(agent_id.to_string()).or_default().insert(block.id.clone());
        state.blocks.insert(block.id.clone(), block);
    }

    pub fn seed_tool(&self, agent_id: &str, tool: RemoteTool) {
        let mut state = self.state.lock().unwrap();
        state.agent_tools.entry(agent_id.to_string()).or_default().insert(tool.id.clone());
        state.tools.insert(tool.id.clone(), tool);
    }

    pub fn seed_identity(&self, identity: RemoteIdentity) {
        let mut state = self.state.lock().unwrap();
        state.identities.insert(identity.id.clone(), identity);
    }

    pub fn agent_blocks(&self, agent_id: &str) -> Vec<RemoteBlock> {
        let state = self.state.lock().unwrap();
        state
            .agent_blocks
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.blocks.get(id).cloned())
            .collect()
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_blocks(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteBlock>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .agent_blocks
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.blocks.get(id).cloned())
            .filter(|b| filter.name.as_ref().map_or(true, |n| &b.label == n))
            .collect())
    }

    async fn retrieve_block(&self, id: &str) -> Result<RemoteBlock> {
        let state = self.state.lock().unwrap();
        state.blocks.get(id).cloned().ok_or_else(|| Error::not_found("block", id))
    }

    async fn create_block(&self, spec: &BlockSpec, metadata: HashMap<String, String>) -> Result<RemoteBlock> {
        let mut state = self.state.lock().unwrap();
        let id = state.fresh_id("block");
        let block = RemoteBlock { id: id.clone(), label: spec.label.clone(), value: spec.value.clone(), description: None, limit: spec.limit, metadata };
        state.blocks.insert(id, block.clone());
        Ok(block)
    }

    async fn update_block(&self, id: &str, patch: &BlockPatch) -> Result<RemoteBlock> {
        let mut state = self.state.lock().unwrap();
        let block = state.blocks.get_mut(id).ok_or_else(|| Error::not_found("block", id))?;
        if let Some(value) = &patch.value {
            block.value = value.clone();
        }
        if let Some(description) = &patch.description {
            block.description = Some(description.clone());
        }
        if patch.limit.is_some() {
            block.limit = patch.limit;
        }
        if let Some(metadata) = &patch.metadata {
            block.metadata = metadata.clone();
        }
        Ok(block.clone())
    }

    async fn delete_block(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.blocks.remove(id);
        Ok(())
    }

    async fn list_tools(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteTool>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .agent_tools
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.tools.get(id).cloned())
            .filter(|t| filter.name.as_ref().map_or(true, |n| &t.name == n))
            .collect())
    }

    async fn retrieve_tool(&self, id: &str) -> Result<RemoteTool> {
        let state = self.state.lock().unwrap();
        state.tools.get(id).cloned().ok_or_else(|| Error::not_found("tool", id))
    }

    async fn create_tool(&self, name: &str, spec: &ToolSpec, tags: Vec<String>) -> Result<RemoteTool> {
        let mut state = self.state.lock().unwrap();
        let id = state.fresh_id("tool");
        let tool = RemoteTool { id: id.clone(), name: name.to_string(), source_code: spec.source_code.clone(), description: None, json_schema: spec.json_schema.clone(), tags };
        state.tools.insert(id, tool.clone());
        Ok(tool)
    }

    async fn update_tool(&self, id: &str, patch: &ToolPatch) -> Result<RemoteTool> {
        let mut state = self.state.lock().unwrap();
        let tool = state.tools.get_mut(id).ok_or_else(|| Error::not_found("tool", id))?;
        if let Some(source_code) = &patch.source_code {
            tool.source_code = source_code.clone();
        }
        if let Some(description) = &patch.description {
            tool.description = Some(description.clone());
        }
        if let Some(json_schema) = &patch.json_schema {
            tool.json_schema = json_schema.clone();
        }
        if let Some(tags) = &patch.tags {
            tool.tags = tags.clone();
        }
        Ok(tool.clone())
    }

    async fn delete_tool(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.tools.remove(id);
        Ok(())
    }

    async fn list_folders(&self, agent_id: &str, filter: ListFilter) -> Result<Vec<RemoteFolder>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .agent_folders
            .get(agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.folders.get(id).cloned())
            .filter(|f| filter.name.as_ref().map_or(true, |n| &f.name == n))
            .collect())
    }

    async fn retrieve_folder(&self, id: &str) -> Result<RemoteFolder> {
        let state = self.state.lock().unwrap();
        state.folders.get(id).cloned().ok_or_else(|| Error::not_found("folder", id))
    }

    async fn create_folder(&self, name: &str, metadata: HashMap<String, String>) -> Result<RemoteFolder> {
        let mut state = self.state.lock().unwrap();
        let id = state.fresh_id("folder");
        let folder = RemoteFolder { id: id.clone(), name: name.to_string(), metadata };
        state.folders.insert(id, folder.clone());
        Ok(folder)
    }

    async fn update_folder(&self, id: &str, metadata: HashMap<String, String>) -> Result<RemoteFolder> {
        let mut state = self.state.lock().unwrap();
        let folder = state.folders.get_mut(id).ok_or_else(|| Error::not_found("folder", id))?;
        folder.metadata = metadata;
        Ok(folder.clone())
    }

    async fn delete_folder(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.folders.remove(id);
        Ok(())
    }

    async fn list_identities(&self, filter: ListFilter) -> Result<Vec<RemoteIdentity>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .identities
            .values()
            .cloned()
            .filter(|i| filter.name.as_ref().map_or(true, |n| &i.identifier_key == n))
            .collect())
    }

    async fn create_identity(&self, identifier_key: &str, display_name: &str, metadata: HashMap<String, String>) -> Result<RemoteIdentity> {
        let mut state = self.state.lock().unwrap();
        if state.identities.values().any(|i| i.identifier_key == identifier_key) {
            return Err(Error::Conflict(format!("identity '{identifier_key}' already exists")));
        }
        let id = state.fresh_id("identity");
        let identity = RemoteIdentity { id: id.clone(), identifier_key: identifier_key.to_string(), display_name: display_name.to_string(), metadata };
        state.identities.insert(id, identity.clone());
        Ok(identity)
    }

    async fn upsert_identity(&self, identifier_key: &str, display_name: &str, metadata: HashMap<String, String>) -> Result<RemoteIdentity> {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state.identities.values_mut().find(|i| i.identifier_key == identifier_key) {
            existing.display_name = display_name.to_string();
            existing.metadata = metadata;
            return Ok(existing.clone());
        }
        let id = state.fresh_id("identity");
        let identity = RemoteIdentity { id: id.clone(), identifier_key: identifier_key.to_string(), display_name: display_name.to_string(), metadata };
        state.identities.insert(id, identity.clone());
        Ok(identity)
    }

    async fn create_mcp_server(&self, _name: &str, _spec: &McpServerSpec) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        Ok(state.fresh_id("mcp"))
    }

    async fn retrieve_agent(&self, id: &str) -> Result<RemoteAgent> {
        let state = self.state.lock().unwrap();
        state.agents.get(id).cloned().ok_or_else(|| Error::not_found("agent", id))
    }

    async fn update_agent(&self, id: &str, patch: &AgentPatch) -> Result<RemoteAgent> {
        let mut state = self.state.lock().unwrap();
        let agent = state.agents.get_mut(id).ok_or_else(|| Error::not_found("agent", id))?;
        if let Some(tags) = &patch.tags {
            agent.tags = tags.clone();
        }
        if let Some(identity_ids) = &patch.identity_ids {
            agent.identity_ids = identity_ids.clone();
        }
        if let Some(system) = &patch.system {
            agent.system = Some(system.clone());
        }
        Ok(agent.clone())
    }

    async fn list_agent_blocks(&self, id: &str) -> Result<Vec<RemoteBlock>> {
        self.list_blocks(id, ListFilter::default()).await
    }

    async fn attach_block(&self, agent_id: &str, block_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let set = state.agent_blocks.entry(agent_id.to_string()).or_default();
        if !set.insert(block_id.to_string()) {
            return Err(Error::Conflict(format!("block '{block_id}' already attached to '{agent_id}'")));
        }
        Ok(())
    }

    async fn detach_block(&self, agent_id: &str, block_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.agent_blocks.get_mut(agent_id) {
            Some(set) if set.remove(block_id) => Ok(()),
            _ => Err(Error::Conflict(format!("block '{block_id}' was not attached to '{agent_id}'"))),
        }
    }

    async fn attach_tool(&self, agent_id: &str, tool_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let set = state.agent_tools.entry(agent_id.to_string()).or_default();
        if !set.insert(tool_id.to_string()) {
            return Err(Error::Conflict(format!("tool '{tool_id}' already attached to '{agent_id}'")));
        }
        Ok(())
    }

    async fn detach_tool(&self, agent_id: &str, tool_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.agent_tools.get_mut(agent_id) {
            Some(set) if set.remove(tool_id) => Ok(()),
            _ => Err(Error::Conflict(format!("tool '{tool_id}' was not attached to '{agent_id}'"))),
        }
    }

    async fn attach_folder(&self, agent_id: &str, folder_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let set = state.agent_folders.entry(agent_id.to_string()).or_default();
        if !set.insert(folder_id.to_string()) {
            return Err(Error::Conflict(format!("folder '{folder_id}' already attached to '{agent_id}'")));
        }
        Ok(())
    }

    async fn detach_folder(&self, agent_id: &str, folder_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.agent_folders.get_mut(agent_id) {
            Some(set) if set.remove(folder_id) => Ok(()),
            _ => Err(Error::Conflict(format!("folder '{folder_id}' was not attached to '{agent_id}'"))),
        }
    }
}
