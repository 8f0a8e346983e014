//! reconciler-client — the concrete `ControlPlane` implementation against
//! the real HTTP control plane, plus environment/credential resolution
//! (spec.md §6).

pub mod credentials;
pub mod http;

pub use credentials::{resolve_endpoint, AuthMode, ResolvedEndpoint};
pub use http::HttpControlPlane;
