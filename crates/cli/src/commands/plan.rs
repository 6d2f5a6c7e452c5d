//! `moor plan`: resolve the spec and describe the deployment without
//! touching the host.

use moor_config::{DeploySpec, IngressMode, SourceKind};

use crate::args::{Cli, SpecArgs};
use crate::error::{CliError, Result};

pub fn run(cli: &Cli, args: &SpecArgs) -> Result<()> {
    let spec = super::resolve_spec(args)?;
    if cli.json {
        let text = serde_json::to_string_pretty(&spec)
            .map_err(|err| CliError::Output(format!("serializing plan: {err}")))?;
        println!("{text}");
        return Ok(());
    }
    for line in describe(&spec) {
        println!("{line}");
    }
    Ok(())
}

fn describe(spec: &DeploySpec) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!("service:    {}", spec.service_name()));
    lines.push(format!(
        "source:     {} ({})",
        spec.source_dir().display(),
        match spec.source_kind() {
            SourceKind::Compose => "compose",
            SourceKind::Dockerfile => "dockerfile",
            SourceKind::Auto => "auto",
        }
    ));
    lines.push(format!("bind:       {}", spec.effective_bind_host()));
    lines.push(format!("state dir:  {}", spec.state_dir().root().display()));

    if let Some(services) = spec.compose_services() {
        lines.push(format!("services:   {}", services.join(", ")));
    }

    if spec.proxy_enabled() {
        let owner = match spec.ingress_mode() {
            IngressMode::Managed => "managed proxy container",
            IngressMode::External => "host nginx (reload)",
            IngressMode::Takeover => "host nginx (takeover)",
        };
        lines.push(format!("ingress:    {owner}"));
        for route in spec.routes() {
            lines.push(format!("  route:    {}", route.summary()));
        }
        if let Some(http) = spec.http_port() {
            lines.push(format!("  http:     {http}"));
        }
        if let Some(https) = spec.https_port() {
            lines.push(format!("  https:    {https}"));
        }
        if !spec.cert_domains().is_empty() {
            lines.push(format!("  tls for:  {}", spec.cert_domains().join(", ")));
        }
        if spec.auth_token().is_some() {
            lines.push("  auth:     bearer token required".to_owned());
        }
    } else {
        lines.push("ingress:    none".to_owned());
    }

    lines.push(format!(
        "docker:     daemon tuning {}",
        if spec.tune_docker_daemon() { "on" } else { "off" }
    ));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use moor_config::{resolve, AccessMode, RawSpec};

    #[test]
    fn description_covers_ingress_and_tls() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();
        let spec = resolve(RawSpec {
            service_name: "demo".to_owned(),
            source_dir: dir.path().to_path_buf(),
            host_port: Some(8080),
            container_port: Some(8000),
            access_mode: AccessMode::Public,
            domain: Some("app.example.com".to_owned()),
            acme_email: Some("ops@example.com".to_owned()),
            ..RawSpec::default()
        })
        .unwrap();

        let text = describe(&spec).join("\n");
        assert!(text.contains("managed proxy container"));
        assert!(text.contains("app.example.com/->demo:8000"));
        assert!(text.contains("tls for:  app.example.com"));
        assert!(text.contains("https:    443"));
    }
}
