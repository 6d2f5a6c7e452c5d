use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use moor_config::{AccessMode, IngressMode, RawSpec, SourceKind};

#[derive(Parser)]
#[command(
    name = "moor",
    version,
    about = "Deploy a containerized microservice behind managed ingress"
)]
pub struct Cli {
    /// Deployment log file; falls back to ./moor.log when not writable.
    #[arg(long, global = true, default_value = "/var/log/moor.log")]
    pub log_file: PathBuf,

    /// Machine-readable JSON output.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate the spec and show what a deploy would do, without touching
    /// the host.
    Plan(SpecArgs),
    /// Validate and apply the deployment.
    Deploy(SpecArgs),
}

#[derive(Args, Clone)]
pub struct SpecArgs {
    /// Service name; also namespaces the compose project and state dir.
    #[arg(long)]
    pub name: String,

    /// Directory containing a compose file or Dockerfile.
    #[arg(long)]
    pub source: PathBuf,

    #[arg(long, value_enum, default_value_t = SourceKindArg::Auto)]
    pub kind: SourceKindArg,

    /// Where per-service state directories live.
    #[arg(long, default_value = "/opt/services")]
    pub base_dir: PathBuf,

    /// Published host port (Dockerfile sources).
    #[arg(long)]
    pub host_port: Option<u16>,

    /// Port the container listens on (Dockerfile sources).
    #[arg(long)]
    pub container_port: Option<u16>,

    /// Explicit bind address; access mode may override it.
    #[arg(long, default_value = "127.0.0.1")]
    pub bind_host: String,

    #[arg(long, value_enum, default_value_t = AccessArg::Loopback)]
    pub access: AccessArg,

    #[arg(long, value_enum, default_value_t = IngressArg::Managed)]
    pub ingress: IngressArg,

    /// Attempts for registry-touching commands (pull, build, certbot).
    #[arg(long, default_value_t = 4)]
    pub registry_retries: u32,

    /// Base backoff in seconds; doubles after each failed attempt.
    #[arg(long, default_value_t = 5)]
    pub retry_backoff: u64,

    /// Leave /etc/docker/daemon.json alone.
    #[arg(long)]
    pub no_docker_tuning: bool,

    /// Compose services to bring up (repeatable); default is all of them.
    #[arg(long = "compose-service")]
    pub compose_services: Vec<String>,

    /// Public domain; enables TLS via ACME.
    #[arg(long)]
    pub domain: Option<String>,

    /// ACME contact email, required with --domain.
    #[arg(long)]
    pub acme_email: Option<String>,

    /// Bearer token the proxy requires on every request.
    #[arg(long)]
    pub auth_token: Option<String>,

    /// Managed proxy HTTP port (default 80).
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Managed proxy HTTPS port (default 443).
    #[arg(long)]
    pub https_port: Option<u16>,

    /// Route as '<host>[/path]=<upstream>:<port>' (repeatable).
    #[arg(long = "route")]
    pub routes: Vec<String>,

    /// Compose service the proxy forwards to by default.
    #[arg(long)]
    pub upstream_service: Option<String>,

    /// Port the default upstream listens on.
    #[arg(long)]
    pub upstream_port: Option<u16>,
}

impl SpecArgs {
    pub fn to_raw(&self) -> RawSpec {
        RawSpec {
            service_name: self.name.clone(),
            source_dir: self.source.clone(),
            source_kind: self.kind.into(),
            base_dir: self.base_dir.clone(),
            host_port: self.host_port,
            container_port: self.container_port,
            bind_host: self.bind_host.clone(),
            access_mode: self.access.into(),
            ingress_mode: self.ingress.into(),
            registry_retries: self.registry_retries,
            retry_backoff_seconds: self.retry_backoff,
            tune_docker_daemon: !self.no_docker_tuning,
            compose_services: none_if_empty(&self.compose_services),
            domain: self.domain.clone(),
            acme_email: self.acme_email.clone(),
            auth_token: self.auth_token.clone(),
            proxy_http_port: self.http_port,
            proxy_https_port: self.https_port,
            proxy_routes: none_if_empty(&self.routes),
            proxy_upstream_service: self.upstream_service.clone(),
            proxy_upstream_port: self.upstream_port,
        }
    }
}

fn none_if_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum SourceKindArg {
    Auto,
    Compose,
    Dockerfile,
}

impl From<SourceKindArg> for SourceKind {
    fn from(value: SourceKindArg) -> Self {
        match value {
            SourceKindArg::Auto => SourceKind::Auto,
            SourceKindArg::Compose => SourceKind::Compose,
            SourceKindArg::Dockerfile => SourceKind::Dockerfile,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum AccessArg {
    /// Loopback only (default).
    Loopback,
    /// Bind to this host's mesh interface address.
    Mesh,
    /// Bind to all interfaces.
    Public,
}

impl From<AccessArg> for AccessMode {
    fn from(value: AccessArg) -> Self {
        match value {
            AccessArg::Loopback => AccessMode::Loopback,
            AccessArg::Mesh => AccessMode::Mesh,
            AccessArg::Public => AccessMode::Public,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum IngressArg {
    /// Proxy container managed end-to-end by moor.
    Managed,
    /// Reconfigure a pre-existing host nginx.
    External,
    /// Stop and restart a pre-existing host nginx around reconfiguration.
    Takeover,
}

impl From<IngressArg> for IngressMode {
    fn from(value: IngressArg) -> Self {
        match value {
            IngressArg::Managed => IngressMode::Managed,
            IngressArg::External => IngressMode::External,
            IngressArg::Takeover => IngressMode::Takeover,
        }
    }
}
