//! Generated compose files: the workload wrapper for Dockerfile sources and
//! the managed proxy overlay. Both are passed to `docker compose` with `-f`
//! under one project name, so every service shares the default network.

use std::fmt::Write;

use moor_config::{DeploySpec, SourceKind};

pub const PROXY_SERVICE: &str = "moor-proxy";
pub const CERTBOT_SERVICE: &str = "moor-certbot";

/// Compose wrapper that builds and runs a Dockerfile source. `None` for
/// compose sources, which ship their own file.
pub fn render_workload_compose(spec: &DeploySpec) -> Option<String> {
    if spec.source_kind() != SourceKind::Dockerfile {
        return None;
    }
    let mut out = String::new();
    let _ = writeln!(out, "# generated for {}; do not edit by hand", spec.project_name());
    let _ = writeln!(out, "services:");
    let _ = writeln!(out, "  {}:", spec.project_name());
    let _ = writeln!(out, "    build:");
    let _ = writeln!(out, "      context: {}", spec.source_dir().display());
    let _ = writeln!(out, "    image: {}:local", spec.project_name());
    let _ = writeln!(out, "    restart: unless-stopped");
    if let (Some(host), Some(container)) = (spec.host_port(), spec.container_port()) {
        let _ = writeln!(out, "    ports:");
        let _ = writeln!(
            out,
            "      - \"{}:{host}:{container}\"",
            spec.effective_bind_host()
        );
    }
    Some(out)
}

/// Overlay running the managed proxy (and, with TLS, a certbot service for
/// one-shot `compose run` issuance). `None` when ingress is not managed.
pub fn render_proxy_overlay(spec: &DeploySpec) -> Option<String> {
    if !spec.uses_managed_ingress() {
        return None;
    }
    let state = spec.state_dir();
    let nginx_dir = state.root().join("nginx");
    let webroot = state.certbot_webroot_path();
    let letsencrypt = state.letsencrypt_dir();
    let bind = spec.effective_bind_host();

    let mut out = String::new();
    let _ = writeln!(out, "# generated for {}; do not edit by hand", spec.project_name());
    let _ = writeln!(out, "services:");
    let _ = writeln!(out, "  {PROXY_SERVICE}:");
    let _ = writeln!(out, "    image: nginx:1.27-alpine");
    let _ = writeln!(out, "    restart: unless-stopped");
    let _ = writeln!(out, "    ports:");
    if let Some(http) = spec.http_port() {
        let _ = writeln!(out, "      - \"{bind}:{http}:80\"");
    }
    if let Some(https) = spec.https_port() {
        let _ = writeln!(out, "      - \"{bind}:{https}:443\"");
    }
    let _ = writeln!(out, "    volumes:");
    let _ = writeln!(out, "      - {}:/etc/nginx/conf.d:ro", nginx_dir.display());
    let _ = writeln!(out, "      - {}:/var/www/certbot:ro", webroot.display());
    let _ = writeln!(out, "      - {}:/etc/letsencrypt:ro", letsencrypt.display());

    if spec.tls_enabled() {
        let _ = writeln!(out, "  {CERTBOT_SERVICE}:");
        let _ = writeln!(out, "    image: certbot/certbot:latest");
        let _ = writeln!(out, "    profiles: [\"ops\"]");
        let _ = writeln!(out, "    volumes:");
        let _ = writeln!(out, "      - {}:/var/www/certbot", webroot.display());
        let _ = writeln!(out, "      - {}:/etc/letsencrypt", letsencrypt.display());
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use moor_config::{resolve, AccessMode, RawSpec};

    fn dockerfile_spec(configure: impl FnOnce(&mut RawSpec)) -> (tempfile::TempDir, DeploySpec) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let mut raw = RawSpec {
            service_name: "demo".to_owned(),
            source_dir: dir.path().to_path_buf(),
            base_dir: "/opt/services".into(),
            host_port: Some(8080),
            container_port: Some(8000),
            ..RawSpec::default()
        };
        configure(&mut raw);
        let spec = resolve(raw).unwrap();
        (dir, spec)
    }

    #[test]
    fn workload_compose_publishes_on_the_bind_host() {
        let (_dir, spec) = dockerfile_spec(|_| {});
        let compose = render_workload_compose(&spec).unwrap();
        assert!(compose.contains("  demo:"));
        assert!(compose.contains("image: demo:local"));
        assert!(compose.contains("- \"127.0.0.1:8080:8000\""));
    }

    #[test]
    fn compose_sources_get_no_workload_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("docker-compose.yml"),
            "services:\n  api:\n    image: x\n    ports:\n      - \"8080:8000\"\n",
        )
        .unwrap();
        let raw = RawSpec {
            service_name: "demo".to_owned(),
            source_dir: dir.path().to_path_buf(),
            ..RawSpec::default()
        };
        let spec = resolve(raw).unwrap();
        assert!(render_workload_compose(&spec).is_none());
        assert!(render_proxy_overlay(&spec).is_none(), "no proxy requested");
    }

    #[test]
    fn proxy_overlay_mounts_state_and_publishes_proxy_ports() {
        let (_dir, spec) = dockerfile_spec(|raw| {
            raw.access_mode = AccessMode::Public;
            raw.domain = Some("app.example.com".to_owned());
            raw.acme_email = Some("ops@example.com".to_owned());
        });
        let overlay = render_proxy_overlay(&spec).unwrap();
        assert!(overlay.contains("  moor-proxy:"));
        assert!(overlay.contains("- \"0.0.0.0:80:80\""));
        assert!(overlay.contains("- \"0.0.0.0:443:443\""));
        assert!(overlay.contains("/opt/services/demo/nginx:/etc/nginx/conf.d:ro"));
        assert!(overlay.contains("  moor-certbot:"));
        assert!(overlay.contains("profiles: [\"ops\"]"));
    }

    #[test]
    fn token_only_proxy_skips_certbot() {
        let (_dir, spec) = dockerfile_spec(|raw| {
            raw.auth_token = Some("secret-token.01".to_owned());
        });
        let overlay = render_proxy_overlay(&spec).unwrap();
        assert!(overlay.contains("- \"127.0.0.1:80:80\""));
        assert!(!overlay.contains("moor-certbot"));
        assert!(!overlay.contains(":443"));
    }
}
