#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod compose;
mod env;
mod error;
mod route;
mod spec;
mod validate;

pub use compose::{discover_services, find_compose_file, service_names, ComposeServiceDescriptor};
pub use env::{missing_compose_vars, read_dotenv, required_compose_vars, RequiredVar};
pub use error::{ConfigError, Result};
pub use route::ProxyRoute;
pub use spec::{AccessMode, DeploySpec, IngressMode, MeshResolver, RawSpec, SourceKind, StateDir};

/// Resolve a raw spec into a fully validated `DeploySpec`.
///
/// Mesh access mode fails here unless a resolver is supplied via
/// [`resolve_with_mesh`].
pub fn resolve(raw: RawSpec) -> Result<DeploySpec> {
    validate::resolve(raw, None)
}

/// Resolve a raw spec, using `mesh` to look up the bind address when
/// `access_mode = mesh` and no explicit non-loopback bind address was given.
pub fn resolve_with_mesh(raw: RawSpec, mesh: &dyn MeshResolver) -> Result<DeploySpec> {
    validate::resolve(raw, Some(mesh))
}
