#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Turns a resolved deployment spec into ingress artifacts: nginx virtual
//! host configuration (managed container or host nginx) and the compose
//! overlays that run the workload and the managed proxy.

mod nginx;
mod overlay;
mod routes;

pub use nginx::{render_vhosts, TlsPhase, VhostParams};
pub use overlay::{render_proxy_overlay, render_workload_compose, CERTBOT_SERVICE, PROXY_SERVICE};
pub use routes::{
    group_by_host, suggest_path_routes, suggest_subdomain_routes, UpstreamCandidate,
};
