//! Manifest entities: the resource descriptions loaded from disk.

use crate::layer::PackageLayer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The kind of a manifest entity.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum Kind {
    Block,
    Tool,
    Folder,
    Identity,
    #[serde(rename = "MCPServer")]
    McpServer,
    Template,
    Policy,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Block => "Block",
            Kind::Tool => "Tool",
            Kind::Folder => "Folder",
            Kind::Identity => "Identity",
            Kind::McpServer => "MCPServer",
            Kind::Template => "Template",
            Kind::Policy => "Policy",
        }
    }

    /// Kinds the Plan Builder currently classifies and diffs. Template and
    /// MCPServer are accepted in manifests but never planned against, per
    /// spec.md §9's deliberate deferral.
    pub fn is_plannable(&self) -> bool {
        !matches!(self, Kind::Template | Kind::McpServer | Kind::Policy)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// MCP server transport kind.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum McpServerType {
    Stdio,
    Sse,
    StreamableHttp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BlockSpec {
    pub label: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub read_only: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub source_type: String,
    pub source_code: String,
    pub json_schema: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
}

/// Folder specs carry no fields of their own at this revision — the
/// entity's canonical `name` *is* the folder name (existence-only diff,
/// see the Plan Builder).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FolderSpec {}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdentitySpec {
    /// The raw input as written in the manifest; resolved to an
    /// `IdentifierKey` by the identity sub-reconciler, not at load time.
    pub identifier: String,
    pub identity_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct McpServerSpec {
    pub server_type: McpServerType,
    #[serde(default)]
    pub transport: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_refs: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TemplateSpec {
    #[serde(default)]
    pub fields: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicySpec {
    #[serde(default)]
    pub rules: HashMap<String, String>,
}

/// Kind-specific inline spec, internally tagged by `kind`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum EntitySpec {
    Block(BlockSpec),
    Tool(ToolSpec),
    Folder(FolderSpec),
    Identity(IdentitySpec),
    #[serde(rename = "MCPServer")]
    McpServer(McpServerSpec),
    Template(TemplateSpec),
    Policy(PolicySpec),
}

impl EntitySpec {
    pub fn kind(&self) -> Kind {
        match self {
            EntitySpec::Block(_) => Kind::Block,
            EntitySpec::Tool(_) => Kind::Tool,
            EntitySpec::Folder(_) => Kind::Folder,
            EntitySpec::Identity(_) => Kind::Identity,
            EntitySpec::McpServer(_) => Kind::McpServer,
            EntitySpec::Template(_) => Kind::Template,
            EntitySpec::Policy(_) => Kind::Policy,
        }
    }
}

/// A resource description loaded from disk.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntity {
    pub name: String,
    pub description: String,
    #[serde(skip)]
    pub layer: Option<PackageLayer>,
    pub spec: EntitySpec,
}

impl ManifestEntity {
    pub fn kind(&self) -> Kind {
        self.spec.kind()
    }

    pub fn with_layer(mut self, layer: PackageLayer) -> Self {
        self.layer = Some(layer);
        self
    }
}
