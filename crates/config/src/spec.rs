use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::compose;
use crate::route::ProxyRoute;

/// How the source directory builds into containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Detect from the directory contents; resolved exactly once.
    #[default]
    Auto,
    Compose,
    Dockerfile,
}

/// Network visibility of the deployed workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    Loopback,
    /// Bind to this host's private mesh interface address.
    Mesh,
    /// Bind to all interfaces.
    Public,
}

/// Who owns the reverse-proxy process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngressMode {
    /// A proxy container this tool manages end-to-end.
    #[default]
    Managed,
    /// A pre-existing host nginx this tool only reconfigures.
    External,
    /// A pre-existing host nginx this tool stops and restarts around
    /// reconfiguration.
    Takeover,
}

/// Looks up the address of this host's mesh-network interface.
///
/// Production code shells out to the mesh client; tests substitute a fixed
/// address. Resolution failure is fatal for mesh access mode.
pub trait MeshResolver {
    fn interface_ip(&self) -> std::result::Result<String, String>;
}

/// Unvalidated deployment inputs, exactly as a CLI or wizard collected them.
///
/// Feed to [`crate::resolve`] to obtain a validated [`DeploySpec`]; there is
/// no other way to construct one.
#[derive(Debug, Clone)]
pub struct RawSpec {
    pub service_name: String,
    pub source_dir: PathBuf,
    pub source_kind: SourceKind,
    pub base_dir: PathBuf,
    pub host_port: Option<u16>,
    pub container_port: Option<u16>,
    pub bind_host: String,
    pub access_mode: AccessMode,
    pub ingress_mode: IngressMode,
    pub registry_retries: u32,
    pub retry_backoff_seconds: u64,
    pub tune_docker_daemon: bool,
    pub compose_services: Option<Vec<String>>,
    pub domain: Option<String>,
    pub acme_email: Option<String>,
    pub auth_token: Option<String>,
    pub proxy_http_port: Option<u16>,
    pub proxy_https_port: Option<u16>,
    pub proxy_routes: Option<Vec<String>>,
    pub proxy_upstream_service: Option<String>,
    pub proxy_upstream_port: Option<u16>,
}

impl Default for RawSpec {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            source_dir: PathBuf::new(),
            source_kind: SourceKind::Auto,
            base_dir: PathBuf::from("/opt/services"),
            host_port: None,
            container_port: None,
            bind_host: "127.0.0.1".to_owned(),
            access_mode: AccessMode::Loopback,
            ingress_mode: IngressMode::Managed,
            registry_retries: 4,
            retry_backoff_seconds: 5,
            tune_docker_daemon: true,
            compose_services: None,
            domain: None,
            acme_email: None,
            auth_token: None,
            proxy_http_port: None,
            proxy_https_port: None,
            proxy_routes: None,
            proxy_upstream_service: None,
            proxy_upstream_port: None,
        }
    }
}

/// Per-service state directory holding every generated artifact.
///
/// Layout under `<base_dir>/<service_name>`:
/// - `docker-compose.generated.yml` — overlay for Dockerfile sources
/// - `docker-compose.proxy.yml` — managed proxy overlay
/// - `nginx/default.conf` — managed proxy virtual hosts
/// - `certbot-www/` — ACME webroot (managed ingress)
/// - `certbot-www-host/` — ACME webroot (host nginx ingress)
/// - `letsencrypt/` — certificate store mounted into the proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(base_dir: &Path, service_name: &str) -> Self {
        Self { root: base_dir.join(service_name) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn generated_compose_path(&self) -> PathBuf {
        self.root.join("docker-compose.generated.yml")
    }

    pub fn proxy_overlay_path(&self) -> PathBuf {
        self.root.join("docker-compose.proxy.yml")
    }

    pub fn nginx_conf_path(&self) -> PathBuf {
        self.root.join("nginx").join("default.conf")
    }

    pub fn certbot_webroot_path(&self) -> PathBuf {
        self.root.join("certbot-www")
    }

    pub fn host_certbot_webroot_path(&self) -> PathBuf {
        self.root.join("certbot-www-host")
    }

    pub fn letsencrypt_dir(&self) -> PathBuf {
        self.root.join("letsencrypt")
    }
}

/// A validated, immutable deployment plan for one microservice.
///
/// Constructed only by [`crate::resolve`]; every cross-field invariant has
/// been checked and every derived value (effective bind address, route set,
/// upstream, proxy ports, certificate domains) computed exactly once.
#[derive(Clone, Serialize)]
pub struct DeploySpec {
    pub(crate) service_name: String,
    pub(crate) source_dir: PathBuf,
    pub(crate) source_kind: SourceKind,
    pub(crate) base_dir: PathBuf,
    pub(crate) host_port: Option<u16>,
    pub(crate) container_port: Option<u16>,
    pub(crate) access_mode: AccessMode,
    pub(crate) ingress_mode: IngressMode,
    pub(crate) registry_retries: u32,
    pub(crate) retry_backoff_seconds: u64,
    pub(crate) tune_docker_daemon: bool,
    pub(crate) compose_services: Option<Vec<String>>,
    pub(crate) domain: Option<String>,
    pub(crate) acme_email: Option<String>,
    #[serde(skip_serializing)]
    pub(crate) auth_token: Option<String>,
    pub(crate) explicit_routes: Option<Vec<ProxyRoute>>,

    // Derived during resolution.
    pub(crate) project_name: String,
    pub(crate) state_dir: StateDir,
    pub(crate) effective_bind_host: String,
    pub(crate) effective_routes: Vec<ProxyRoute>,
    pub(crate) effective_upstream: Option<(String, u16)>,
    pub(crate) effective_http_port: Option<u16>,
    pub(crate) effective_https_port: Option<u16>,
    pub(crate) cert_domains: Vec<String>,
}

impl DeploySpec {
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    pub fn ingress_mode(&self) -> IngressMode {
        self.ingress_mode
    }

    pub fn host_port(&self) -> Option<u16> {
        self.host_port
    }

    pub fn container_port(&self) -> Option<u16> {
        self.container_port
    }

    pub fn registry_retries(&self) -> u32 {
        self.registry_retries
    }

    pub fn retry_backoff_seconds(&self) -> u64 {
        self.retry_backoff_seconds
    }

    pub fn tune_docker_daemon(&self) -> bool {
        self.tune_docker_daemon
    }

    pub fn compose_services(&self) -> Option<&[String]> {
        self.compose_services.as_deref()
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn acme_email(&self) -> Option<&str> {
        self.acme_email.as_deref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    /// Routes exactly as the user supplied them, if any.
    pub fn explicit_routes(&self) -> Option<&[ProxyRoute]> {
        self.explicit_routes.as_deref()
    }

    /// Compose-project-safe identifier derived from the service name.
    /// Namespaces generated artifacts and container names.
    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn state_dir(&self) -> &StateDir {
        &self.state_dir
    }

    /// The compose file inside the source directory, re-discovered on each
    /// call: the file on disk is the source of truth.
    pub fn source_compose_path(&self) -> Option<PathBuf> {
        compose::find_compose_file(&self.source_dir)
    }

    pub fn source_dockerfile_path(&self) -> PathBuf {
        self.source_dir.join("Dockerfile")
    }

    pub fn tls_enabled(&self) -> bool {
        self.domain.is_some()
    }

    /// TLS, bearer auth or explicit routes all imply a reverse proxy.
    pub fn proxy_enabled(&self) -> bool {
        self.tls_enabled() || self.auth_token.is_some() || self.explicit_routes.is_some()
    }

    pub fn uses_managed_ingress(&self) -> bool {
        self.proxy_enabled() && self.ingress_mode == IngressMode::Managed
    }

    /// Bind address after access-mode resolution: public access forces the
    /// wildcard address, mesh access resolved a mesh interface address.
    pub fn effective_bind_host(&self) -> &str {
        &self.effective_bind_host
    }

    /// The authoritative route set. Empty iff the proxy is disabled.
    pub fn routes(&self) -> &[ProxyRoute] {
        &self.effective_routes
    }

    /// Upstream `(host, port)` the proxy forwards to by default.
    pub fn upstream(&self) -> Option<(&str, u16)> {
        self.effective_upstream.as_ref().map(|(host, port)| (host.as_str(), *port))
    }

    /// Host port the proxy serves HTTP on. `None` when no proxy.
    pub fn http_port(&self) -> Option<u16> {
        self.effective_http_port
    }

    /// Host port the proxy terminates TLS on. `None` without TLS.
    pub fn https_port(&self) -> Option<u16> {
        self.effective_https_port
    }

    /// Certificate domain list: primary domain first, then every distinct
    /// DNS-valid route host in first-seen order.
    pub fn cert_domains(&self) -> &[String] {
        &self.cert_domains
    }

    /// Site file name for host-nginx ingress modes.
    pub fn host_site_name(&self) -> String {
        format!("moor_{}.conf", self.project_name)
    }

    /// Dotenv side-file next to the compose file, when one exists there.
    pub fn dotenv_path(&self) -> Option<PathBuf> {
        self.source_compose_path().map(|p| {
            p.parent().unwrap_or_else(|| Path::new(".")).join(".env")
        })
    }

    /// Dotenv values not overridden by the live environment, for compose
    /// variable interpolation. Environment wins over the side-file.
    pub fn extra_env(&self, live: &HashMap<String, String>) -> HashMap<String, String> {
        let Some(dotenv) = self.dotenv_path() else {
            return HashMap::new();
        };
        let mut values = crate::env::read_dotenv(&dotenv);
        values.retain(|key, _| !live.contains_key(key));
        values
    }
}

impl fmt::Debug for DeploySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Redact the bearer token — specs get logged.
        f.debug_struct("DeploySpec")
            .field("service_name", &self.service_name)
            .field("source_dir", &self.source_dir)
            .field("source_kind", &self.source_kind)
            .field("access_mode", &self.access_mode)
            .field("ingress_mode", &self.ingress_mode)
            .field("domain", &self.domain)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("routes", &self.effective_routes)
            .field("bind_host", &self.effective_bind_host)
            .finish_non_exhaustive()
    }
}

/// Lowercase the service name and replace anything outside `[a-z0-9_-]`,
/// the way compose project names are restricted.
pub(crate) fn project_name_for(service_name: &str) -> String {
    let mut normalized: String = service_name
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    while normalized.starts_with(['-', '_']) {
        normalized.remove(0);
    }
    while normalized.ends_with(['-', '_']) {
        normalized.pop();
    }
    if normalized.is_empty() {
        "service".to_owned()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_name_is_normalized() {
        assert_eq!(project_name_for("My Service!"), "my-service");
        assert_eq!(project_name_for("api_v2"), "api_v2");
        assert_eq!(project_name_for("---"), "service");
        assert_eq!(project_name_for("_x_"), "x");
    }

    #[test]
    fn state_dir_layout() {
        let dir = StateDir::new(Path::new("/opt/services"), "demo");
        assert_eq!(dir.root(), Path::new("/opt/services/demo"));
        assert_eq!(
            dir.nginx_conf_path(),
            Path::new("/opt/services/demo/nginx/default.conf")
        );
        assert_eq!(
            dir.generated_compose_path(),
            Path::new("/opt/services/demo/docker-compose.generated.yml")
        );
    }
}
