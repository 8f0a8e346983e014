//! Pre-attachment resolution helpers: given a control-plane id already
//! selected by the Ownership Classifier's deterministic pruning, fetch the
//! full observed resource to diff against.

use reconciler_core::{ObservedAgentState, RemoteBlock, RemoteFolder, RemoteIdentity, RemoteTool};

pub fn block_by_id<'a>(observed: &'a ObservedAgentState, id: &str) -> Option<&'a RemoteBlock> {
    observed.blocks.iter().find(|b| b.id == id)
}

pub fn tool_by_id<'a>(observed: &'a ObservedAgentState, id: &str) -> Option<&'a RemoteTool> {
    observed.tools.iter().find(|t| t.id == id)
}

pub fn folder_by_id<'a>(observed: &'a ObservedAgentState, id: &str) -> Option<&'a RemoteFolder> {
    observed.folders.iter().find(|f| f.id == id)
}

pub fn identity_by_id<'a>(observed: &'a ObservedAgentState, id: &str) -> Option<&'a RemoteIdentity> {
    observed.identities.iter().find(|i| i.id == id)
}
