//! Staged deployment execution.
//!
//! Every external effect goes through the [`CommandRunner`] seam and every
//! generated file lands in the spec's state directory (or the nginx root,
//! which tests point at a scratch directory). The stage order is fixed:
//! validation artifacts are written before any command runs, the workload
//! comes up behind the bootstrap ingress, certificates are issued against
//! the running bootstrap, and only then does the final TLS config go live.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use moor_config::{missing_compose_vars, DeploySpec, IngressMode, SourceKind};
use moor_ingress::{
    render_proxy_overlay, render_vhosts, render_workload_compose, TlsPhase, VhostParams,
    CERTBOT_SERVICE, PROXY_SERVICE,
};

use crate::error::{DeployError, Result};
use crate::ports::{self, PortProber, TcpProber};
use crate::retry::{run_with_retry, RetryPolicy, Sleeper, ThreadSleeper};
use crate::runner::{CommandRequest, CommandRunner};

/// Webroot path as the managed proxy container sees it.
const MANAGED_ACME_WEBROOT: &str = "/var/www/certbot";

static THREAD_SLEEPER: ThreadSleeper = ThreadSleeper;
static TCP_PROBER: TcpProber = TcpProber;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validate,
    Ports,
    Artifacts,
    Workload,
    Certificate,
    FinalizeIngress,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validate => "validate",
            Stage::Ports => "ports",
            Stage::Artifacts => "artifacts",
            Stage::Workload => "workload",
            Stage::Certificate => "certificate",
            Stage::FinalizeIngress => "finalize-ingress",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub stages: Vec<Stage>,
    /// Files written during the run, in order.
    pub artifacts: Vec<PathBuf>,
    /// Human-readable service endpoints.
    pub endpoints: Vec<String>,
    /// Copy-pasteable commands for managing the deployed stack.
    pub followups: Vec<String>,
}

pub struct Executor<'a> {
    spec: &'a DeploySpec,
    runner: &'a dyn CommandRunner,
    sleeper: &'a dyn Sleeper,
    prober: &'a dyn PortProber,
    env: HashMap<String, String>,
    nginx_root: PathBuf,
}

impl<'a> Executor<'a> {
    pub fn new(spec: &'a DeploySpec, runner: &'a dyn CommandRunner) -> Self {
        Self {
            spec,
            runner,
            sleeper: &THREAD_SLEEPER,
            prober: &TCP_PROBER,
            env: std::env::vars().collect(),
            nginx_root: PathBuf::from("/etc/nginx"),
        }
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_prober(mut self, prober: &'a dyn PortProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_nginx_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.nginx_root = root.into();
        self
    }

    pub fn apply(&self) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();

        self.check_compose_vars()?;
        self.enter(&mut report, Stage::Validate);

        self.check_ports()?;
        self.enter(&mut report, Stage::Ports);

        self.write_artifacts(&mut report, self.bootstrap_phase())?;
        self.enter(&mut report, Stage::Artifacts);

        if self.host_ingress() && self.spec.ingress_mode() == IngressMode::Takeover {
            self.runner.run(&CommandRequest::new("stop nginx", "systemctl stop nginx"))?;
        }
        self.compose_up()?;
        if self.host_ingress() {
            self.install_host_site()?;
        }
        self.enter(&mut report, Stage::Workload);

        if self.spec.tls_enabled() {
            self.issue_certificate()?;
            self.enter(&mut report, Stage::Certificate);

            if self.host_ingress() {
                self.finalize_host_site(&mut report)?;
            } else {
                self.write_vhosts(&mut report, self.issued_phase())?;
                self.reload_managed_proxy()?;
            }
            self.enter(&mut report, Stage::FinalizeIngress);
        }

        report.endpoints = self.endpoints();
        report.followups = self.followups();
        self.enter(&mut report, Stage::Done);
        Ok(report)
    }

    fn enter(&self, report: &mut ApplyReport, stage: Stage) {
        tracing::info!(stage = %stage, "stage complete");
        report.stages.push(stage);
    }

    fn host_ingress(&self) -> bool {
        self.spec.proxy_enabled() && self.spec.ingress_mode() != IngressMode::Managed
    }

    fn bootstrap_phase(&self) -> TlsPhase<'_> {
        if self.spec.tls_enabled() {
            TlsPhase::Bootstrap
        } else {
            TlsPhase::Disabled
        }
    }

    fn issued_phase(&self) -> TlsPhase<'_> {
        match self.spec.domain() {
            Some(primary) => TlsPhase::Issued { primary_domain: primary },
            None => TlsPhase::Disabled,
        }
    }

    /// A compose source whose interpolation variables are unset would come
    /// up half-configured; refuse before running anything.
    fn check_compose_vars(&self) -> Result<()> {
        let Some(compose_path) = self.spec.source_compose_path() else {
            return Ok(());
        };
        let dotenv = self.spec.dotenv_path();
        let missing = missing_compose_vars(&compose_path, dotenv.as_deref(), &self.env);
        if missing.is_empty() {
            return Ok(());
        }
        let names: Vec<&str> = missing.iter().map(|v| v.name.as_str()).collect();
        Err(DeployError::Preflight(format!(
            "compose file requires unset variables: {} (set them in the environment or {})",
            names.join(", "),
            dotenv
                .as_deref()
                .unwrap_or_else(|| Path::new(".env"))
                .display()
        )))
    }

    fn check_ports(&self) -> Result<()> {
        let bind = self.spec.effective_bind_host();
        let mut required: Vec<u16> = Vec::new();
        if self.spec.source_kind() == SourceKind::Dockerfile {
            if let Some(port) = self.spec.host_port() {
                required.push(port);
            }
        }
        if self.spec.uses_managed_ingress() {
            required.extend(self.spec.http_port());
            required.extend(self.spec.https_port());
        }
        ports::ensure_available(self.prober, bind, &required)
    }

    fn write_artifacts(&self, report: &mut ApplyReport, phase: TlsPhase<'_>) -> Result<()> {
        let state = self.spec.state_dir();
        for dir in [
            state.root().to_path_buf(),
            state.root().join("nginx"),
            state.certbot_webroot_path(),
            state.host_certbot_webroot_path(),
            state.letsencrypt_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(DeployError::io(format!("creating {}", dir.display())))?;
        }

        if let Some(compose) = render_workload_compose(self.spec) {
            let path = state.generated_compose_path();
            self.write_file(report, &path, &compose)?;
        }
        if let Some(overlay) = render_proxy_overlay(self.spec) {
            let path = state.proxy_overlay_path();
            self.write_file(report, &path, &overlay)?;
        }
        if self.spec.proxy_enabled() {
            self.write_vhosts(report, phase)?;
        }
        Ok(())
    }

    fn write_vhosts(&self, report: &mut ApplyReport, phase: TlsPhase<'_>) -> Result<()> {
        let webroot = if self.host_ingress() {
            self.spec.state_dir().host_certbot_webroot_path().display().to_string()
        } else {
            MANAGED_ACME_WEBROOT.to_owned()
        };
        let conf = render_vhosts(&VhostParams {
            project_name: self.spec.project_name(),
            routes: self.spec.routes(),
            auth_token: self.spec.auth_token(),
            tls: phase,
            acme_webroot: &webroot,
            cert_hosts: self.spec.cert_domains(),
        });
        let path = if self.host_ingress() {
            self.host_site_available()
        } else {
            self.spec.state_dir().nginx_conf_path()
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(DeployError::io(format!("creating {}", parent.display())))?;
        }
        self.write_file(report, &path, &conf)
    }

    fn write_file(&self, report: &mut ApplyReport, path: &Path, content: &str) -> Result<()> {
        std::fs::write(path, content)
            .map_err(DeployError::io(format!("writing {}", path.display())))?;
        tracing::debug!(path = %path.display(), "artifact written");
        report.artifacts.push(path.to_path_buf());
        Ok(())
    }

    fn compose_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        match self.spec.source_kind() {
            SourceKind::Dockerfile => files.push(self.spec.state_dir().generated_compose_path()),
            _ => files.extend(self.spec.source_compose_path()),
        }
        if self.spec.uses_managed_ingress() {
            files.push(self.spec.state_dir().proxy_overlay_path());
        }
        files
    }

    fn compose_base(&self) -> String {
        let mut command = format!("docker compose -p {}", sh_quote(self.spec.project_name()));
        for file in self.compose_files() {
            command.push_str(" -f ");
            command.push_str(&sh_quote(&file.display().to_string()));
        }
        command
    }

    fn compose_request(&self, label: &str, suffix: &str) -> CommandRequest {
        let mut request =
            CommandRequest::new(label, format!("{} {suffix}", self.compose_base()));
        if let Some(compose) = self.spec.source_compose_path() {
            if let Some(dir) = compose.parent() {
                request = request.cwd(dir);
            }
        }
        for (key, value) in self.spec.extra_env(&self.env) {
            request = request.env(key, value);
        }
        request
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.spec.registry_retries(), self.spec.retry_backoff_seconds())
    }

    fn compose_up(&self) -> Result<()> {
        let mut suffix = "up -d --build --remove-orphans".to_owned();
        if let Some(services) = self.spec.compose_services() {
            for service in services {
                suffix.push(' ');
                suffix.push_str(&sh_quote(service));
            }
            if self.spec.uses_managed_ingress() {
                suffix.push(' ');
                suffix.push_str(PROXY_SERVICE);
            }
        }
        let request = self.compose_request("compose up", &suffix);
        run_with_retry("compose up", &self.retry_policy(), self.sleeper, |_| {
            self.runner.run(&request).map(|_| ())
        })
    }

    fn issue_certificate(&self) -> Result<()> {
        let mut domain_args = String::new();
        for domain in self.spec.cert_domains() {
            domain_args.push_str(" -d ");
            domain_args.push_str(&sh_quote(domain));
        }
        let email = self.spec.acme_email().unwrap_or_default();
        let request = if self.host_ingress() {
            let webroot = self.spec.state_dir().host_certbot_webroot_path();
            CommandRequest::new(
                "certbot",
                format!(
                    "certbot certonly --webroot -w {} --email {} --agree-tos \
                     --non-interactive --keep-until-expiring{domain_args}",
                    sh_quote(&webroot.display().to_string()),
                    sh_quote(email)
                ),
            )
        } else {
            self.compose_request(
                "certbot",
                &format!(
                    "run --rm {CERTBOT_SERVICE} certonly --webroot -w {MANAGED_ACME_WEBROOT} \
                     --email {} --agree-tos --non-interactive --keep-until-expiring{domain_args}",
                    sh_quote(email)
                ),
            )
        };
        run_with_retry("certbot", &self.retry_policy(), self.sleeper, |_| {
            self.runner.run(&request).map(|_| ())
        })
    }

    fn reload_managed_proxy(&self) -> Result<()> {
        let reload =
            self.compose_request("proxy reload", &format!("exec -T {PROXY_SERVICE} nginx -s reload"));
        if self.runner.run(&reload).is_ok() {
            return Ok(());
        }
        // The proxy may not be running yet; bringing it up loads the new
        // config on start.
        let up = self.compose_request("proxy up", &format!("up -d {PROXY_SERVICE}"));
        self.runner.run(&up).map(|_| ()).map_err(|err| DeployError::ReloadFailed {
            detail: err.to_string(),
        })
    }

    // Host nginx handling: the site file lives in sites-available and goes
    // live through an atomic symlink swap in sites-enabled.

    fn host_site_available(&self) -> PathBuf {
        self.nginx_root.join("sites-available").join(self.spec.host_site_name())
    }

    fn host_site_enabled(&self) -> PathBuf {
        self.nginx_root.join("sites-enabled").join(self.spec.host_site_name())
    }

    fn install_host_site(&self) -> Result<()> {
        let available = self.host_site_available();
        let enabled = self.host_site_enabled();
        if let Some(parent) = enabled.parent() {
            std::fs::create_dir_all(parent)
                .map_err(DeployError::io(format!("creating {}", parent.display())))?;
        }
        let staging = enabled.with_extension("conf.next");
        let _ = std::fs::remove_file(&staging);
        std::os::unix::fs::symlink(&available, &staging)
            .map_err(DeployError::io(format!("linking {}", staging.display())))?;
        std::fs::rename(&staging, &enabled)
            .map_err(DeployError::io(format!("enabling {}", enabled.display())))?;

        if let Err(err) = self.test_host_config() {
            // Leave nothing half-enabled behind a failed config test.
            let _ = std::fs::remove_file(&enabled);
            return Err(err);
        }
        match self.spec.ingress_mode() {
            IngressMode::Takeover => self
                .runner
                .run(&CommandRequest::new("start nginx", "systemctl start nginx"))
                .map(|_| ()),
            _ => self.reload_host_nginx(),
        }
    }

    /// The bootstrap site already passed `nginx -t` and is symlinked live;
    /// if the issued config is rejected, put the bootstrap content back so
    /// the enabled site stays valid.
    fn finalize_host_site(&self, report: &mut ApplyReport) -> Result<()> {
        let available = self.host_site_available();
        let previous = std::fs::read_to_string(&available)
            .map_err(DeployError::io(format!("reading {}", available.display())))?;
        self.write_vhosts(report, self.issued_phase())?;
        if let Err(err) = self.test_host_config() {
            let _ = std::fs::write(&available, previous);
            return Err(err);
        }
        self.reload_host_nginx()
    }

    fn test_host_config(&self) -> Result<()> {
        match self.runner.run(&CommandRequest::new("nginx -t", "nginx -t")) {
            Ok(_) => Ok(()),
            Err(DeployError::CommandFailed { detail, .. }) => {
                Err(DeployError::NginxConfigRejected { detail })
            }
            Err(other) => Err(other),
        }
    }

    fn reload_host_nginx(&self) -> Result<()> {
        let reload = CommandRequest::new("reload nginx", "systemctl reload nginx");
        if self.runner.run(&reload).is_ok() {
            return Ok(());
        }
        let restart = CommandRequest::new("restart nginx", "systemctl restart nginx");
        self.runner.run(&restart).map(|_| ()).map_err(|err| DeployError::ReloadFailed {
            detail: err.to_string(),
        })
    }

    fn followups(&self) -> Vec<String> {
        let base = self.compose_base();
        let mut commands = vec![format!("{base} ps"), format!("{base} logs -f --tail 100")];
        if self.spec.tls_enabled() {
            if self.host_ingress() {
                commands.push("certbot renew --quiet && systemctl reload nginx".to_owned());
            } else {
                commands.push(format!(
                    "{base} run --rm {CERTBOT_SERVICE} renew --quiet && \
                     {base} exec -T {PROXY_SERVICE} nginx -s reload"
                ));
            }
        }
        commands
    }

    fn endpoints(&self) -> Vec<String> {
        let mut endpoints = Vec::new();
        if self.spec.proxy_enabled() {
            let (scheme, port) = if self.spec.tls_enabled() {
                ("https", self.spec.https_port().unwrap_or(443))
            } else {
                ("http", self.spec.http_port().unwrap_or(80))
            };
            let default = if scheme == "https" { 443 } else { 80 };
            for (host, routes) in moor_ingress::group_by_host(self.spec.routes()) {
                let shown = if host == "_" {
                    self.spec.effective_bind_host().to_owned()
                } else {
                    host
                };
                let authority = if port == default {
                    shown
                } else {
                    format!("{shown}:{port}")
                };
                for route in routes {
                    let path = if route.is_root() {
                        "/".to_owned()
                    } else {
                        format!("{}/", route.path_prefix)
                    };
                    endpoints.push(format!("{scheme}://{authority}{path}"));
                }
            }
        } else if let Some(port) = self.spec.host_port() {
            endpoints.push(format!("http://{}:{port}/", self.spec.effective_bind_host()));
        }
        endpoints
    }
}

/// Minimal POSIX shell quoting for generated command lines.
fn sh_quote(text: &str) -> String {
    let safe = !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | ':' | '=' | '@' | '%' | '+' | '-'));
    if safe {
        text.to_owned()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_leaves_safe_strings_alone() {
        assert_eq!(sh_quote("demo-api_1"), "demo-api_1");
        assert_eq!(sh_quote("/opt/services/demo/a.yml"), "/opt/services/demo/a.yml");
        assert_eq!(sh_quote("has space"), "'has space'");
        assert_eq!(sh_quote("it's"), r"'it'\''s'");
        assert_eq!(sh_quote(""), "''");
    }
}
