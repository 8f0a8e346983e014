//! reconciler-core — data model, error types, and the control-plane contract
//! shared by every other reconciler crate.

pub mod control_plane;
pub mod entity;
pub mod error;
pub mod identity_key;
pub mod layer;
pub mod managed_state;
pub mod marker;
pub mod state;

pub use control_plane::{
    AgentPatch, BlockPatch, ControlPlane, ListFilter, RemoteAgent, RemoteBlock, RemoteFolder,
    RemoteIdentity, RemoteTool, ToolPatch,
};
pub use entity::{
    BlockSpec, EntitySpec, FolderSpec, IdentitySpec, Kind, ManifestEntity, McpServerSpec,
    McpServerType, PolicySpec, TemplateSpec, ToolSpec,
};
pub use error::{Error, Result};
pub use identity_key::{IdentifierKey, IdentityType};
pub use layer::{AgentRole, Lane, PackageLayer, ReleaseChannel};
pub use managed_state::{AppliedPackage, ManagedState, UpgradeType};
pub use marker::{marker_to_metadata, marker_to_tags, MarkerSource, ResourceMarker, MANAGED_STATE_LABEL, SYSTEM_NAME};
pub use state::{DesiredState, LayerTags, ObservedAgentState};

/// The engine version stamped into every `managed_state` record on write.
pub const RECONCILER_VERSION: &str = env!("CARGO_PKG_VERSION");
