//! Raw-to-resolved spec validation.
//!
//! [`resolve`] is the only constructor for [`DeploySpec`]. It collects every
//! field and cross-field failure into one [`ConfigError::Multiple`] instead
//! of stopping at the first, then derives the effective values (bind
//! address, route set, upstream, proxy ports, certificate domains) exactly
//! once.

pub(crate) mod constraints;
mod refs;

use std::collections::HashSet;
use std::net::IpAddr;

use crate::compose::{self, ComposeServiceDescriptor};
use crate::error::{ConfigError, Result};
use crate::route::ProxyRoute;
use crate::spec::{
    self, AccessMode, DeploySpec, IngressMode, MeshResolver, RawSpec, SourceKind, StateDir,
};

pub(crate) fn resolve(raw: RawSpec, mesh: Option<&dyn MeshResolver>) -> Result<DeploySpec> {
    let mut errors: Vec<ConfigError> = Vec::new();

    let service_name = raw.service_name.trim().to_owned();
    if service_name.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "service_name".to_owned(),
            message: "must not be empty".to_owned(),
        });
    } else {
        constraints::check_service_name("service_name", &service_name, &mut errors);
    }

    let source_dir = raw.source_dir.clone();
    let dir_ok = source_dir.is_dir();
    if !dir_ok {
        errors.push(ConfigError::InvalidField {
            field: "source_dir".to_owned(),
            message: format!("'{}' is not a directory", source_dir.display()),
        });
    }

    let compose_path = compose::find_compose_file(&source_dir);
    let has_dockerfile = source_dir.join("Dockerfile").is_file();
    let source_kind = match raw.source_kind {
        SourceKind::Auto => {
            if compose_path.is_some() {
                SourceKind::Compose
            } else if has_dockerfile {
                SourceKind::Dockerfile
            } else {
                if dir_ok {
                    errors.push(ConfigError::NoSource { dir: source_dir.display().to_string() });
                }
                SourceKind::Auto
            }
        }
        SourceKind::Compose => {
            if dir_ok && compose_path.is_none() {
                errors.push(ConfigError::InvalidField {
                    field: "source_kind".to_owned(),
                    message: format!(
                        "compose requested but '{}' contains no compose file",
                        source_dir.display()
                    ),
                });
            }
            SourceKind::Compose
        }
        SourceKind::Dockerfile => {
            if dir_ok && !has_dockerfile {
                errors.push(ConfigError::InvalidField {
                    field: "source_kind".to_owned(),
                    message: format!(
                        "dockerfile requested but '{}' contains no Dockerfile",
                        source_dir.display()
                    ),
                });
            }
            SourceKind::Dockerfile
        }
    };

    match (raw.host_port, raw.container_port) {
        (Some(host), Some(container)) => {
            constraints::check_port("host_port", host, &mut errors);
            constraints::check_port("container_port", container, &mut errors);
        }
        (None, None) => {}
        (Some(_), None) => errors.push(ConfigError::Conflict {
            field: "container_port".to_owned(),
            message: "host_port was given without container_port".to_owned(),
        }),
        (None, Some(_)) => errors.push(ConfigError::Conflict {
            field: "host_port".to_owned(),
            message: "container_port was given without host_port".to_owned(),
        }),
    }
    let bind_host = raw.bind_host.trim().to_owned();
    if bind_host.is_empty() {
        errors.push(ConfigError::InvalidField {
            field: "bind_host".to_owned(),
            message: "must not be empty".to_owned(),
        });
    }

    if raw.registry_retries == 0 {
        errors.push(ConfigError::InvalidField {
            field: "registry_retries".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }
    if raw.retry_backoff_seconds == 0 {
        errors.push(ConfigError::InvalidField {
            field: "retry_backoff_seconds".to_owned(),
            message: "must be at least 1".to_owned(),
        });
    }

    let compose_services = normalize_service_list(raw.compose_services.as_deref(), &mut errors);
    if compose_services.is_some() && source_kind != SourceKind::Compose {
        errors.push(ConfigError::Conflict {
            field: "compose_services".to_owned(),
            message: "only compose sources have selectable services".to_owned(),
        });
    }

    let discovered: Vec<ComposeServiceDescriptor> = match (&compose_path, source_kind) {
        (Some(path), SourceKind::Compose) => compose::discover_services(path),
        _ => Vec::new(),
    };
    refs::check_known_services(compose_services.as_deref(), &discovered, &mut errors);

    let domain = normalize_opt(raw.domain.as_deref()).map(|d| d.to_ascii_lowercase());
    if let Some(domain) = &domain {
        constraints::check_domain("domain", domain, &mut errors);
    }
    let acme_email = normalize_opt(raw.acme_email.as_deref()).map(|e| e.to_ascii_lowercase());
    match (&domain, &acme_email) {
        (Some(_), None) => errors.push(ConfigError::Conflict {
            field: "acme_email".to_owned(),
            message: "certificate issuance needs an ACME contact email".to_owned(),
        }),
        (None, Some(_)) => errors.push(ConfigError::Conflict {
            field: "acme_email".to_owned(),
            message: "only used together with domain".to_owned(),
        }),
        _ => {}
    }
    if let Some(email) = &acme_email {
        constraints::check_email("acme_email", email, &mut errors);
    }

    let auth_token = normalize_opt(raw.auth_token.as_deref()).map(str::to_owned);
    if let Some(token) = &auth_token {
        constraints::check_auth_token("auth_token", token, &mut errors);
    }

    let explicit_routes = parse_routes(raw.proxy_routes.as_deref(), &mut errors);

    let proxy_upstream_service =
        normalize_opt(raw.proxy_upstream_service.as_deref()).map(str::to_owned);
    if let Some(name) = &proxy_upstream_service {
        constraints::check_service_name("proxy_upstream_service", name, &mut errors);
    }
    if let Some(port) = raw.proxy_upstream_port {
        constraints::check_port("proxy_upstream_port", port, &mut errors);
    }
    if explicit_routes.is_some()
        && (proxy_upstream_service.is_some() || raw.proxy_upstream_port.is_some())
    {
        errors.push(ConfigError::Conflict {
            field: "proxy_routes".to_owned(),
            message: "explicit routes already name their upstreams; drop \
                      proxy_upstream_service/proxy_upstream_port"
                .to_owned(),
        });
    }

    let tls = domain.is_some();
    let proxy_enabled = tls || auth_token.is_some() || explicit_routes.is_some();
    if !proxy_enabled {
        for (set, field) in [
            (raw.proxy_http_port.is_some(), "proxy_http_port"),
            (raw.proxy_https_port.is_some(), "proxy_https_port"),
            (proxy_upstream_service.is_some(), "proxy_upstream_service"),
            (raw.proxy_upstream_port.is_some(), "proxy_upstream_port"),
        ] {
            if set {
                errors.push(ConfigError::Conflict {
                    field: field.to_owned(),
                    message: "only used with a reverse proxy (domain, auth_token or proxy_routes)"
                        .to_owned(),
                });
            }
        }
    }

    if tls && raw.access_mode != AccessMode::Public {
        errors.push(ConfigError::Conflict {
            field: "access_mode".to_owned(),
            message: "certificate issuance requires public access".to_owned(),
        });
    }
    if source_kind == SourceKind::Compose
        && raw.access_mode != AccessMode::Loopback
        && !proxy_enabled
    {
        errors.push(ConfigError::Conflict {
            field: "access_mode".to_owned(),
            message: "compose sources keep their own port bindings; non-loopback access \
                      needs a proxy in front"
                .to_owned(),
        });
    }

    if let Some(port) = raw.proxy_http_port {
        constraints::check_port("proxy_http_port", port, &mut errors);
    }
    if let Some(port) = raw.proxy_https_port {
        constraints::check_port("proxy_https_port", port, &mut errors);
    }
    if raw.proxy_https_port.is_some() && !tls {
        errors.push(ConfigError::Conflict {
            field: "proxy_https_port".to_owned(),
            message: "only used with a domain (TLS)".to_owned(),
        });
    }

    let managed = raw.ingress_mode == IngressMode::Managed;
    if !managed {
        if !proxy_enabled {
            errors.push(ConfigError::Conflict {
                field: "ingress_mode".to_owned(),
                message: "host nginx ingress needs a proxy (domain, auth_token or proxy_routes)"
                    .to_owned(),
            });
        }
        if raw.access_mode != AccessMode::Public {
            errors.push(ConfigError::Conflict {
                field: "ingress_mode".to_owned(),
                message: "host nginx ingress requires public access".to_owned(),
            });
        }
        if raw.proxy_http_port.is_some() || raw.proxy_https_port.is_some() {
            errors.push(ConfigError::Conflict {
                field: "proxy_http_port".to_owned(),
                message: "host nginx owns its listen ports; proxy ports apply to managed \
                          ingress only"
                    .to_owned(),
            });
        }
        if proxy_upstream_service.is_some() {
            errors.push(ConfigError::Conflict {
                field: "proxy_upstream_service".to_owned(),
                message: "host nginx cannot resolve compose service names; use explicit \
                          proxy_routes"
                    .to_owned(),
            });
        }
        if source_kind == SourceKind::Compose {
            match &explicit_routes {
                None => errors.push(ConfigError::Conflict {
                    field: "proxy_routes".to_owned(),
                    message: "host nginx in front of a compose source needs explicit routes \
                              to host-published ports"
                        .to_owned(),
                }),
                Some(routes) => {
                    refs::check_host_reachable_upstreams(routes, &discovered, &mut errors)
                }
            }
        }
    }

    if source_kind == SourceKind::Dockerfile && proxy_upstream_service.is_some() {
        errors.push(ConfigError::Conflict {
            field: "proxy_upstream_service".to_owned(),
            message: "dockerfile sources build a single container; applies to compose sources"
                .to_owned(),
        });
    }
    if managed && source_kind == SourceKind::Compose {
        refs::check_upstream_service(
            proxy_upstream_service.as_deref(),
            compose_services.as_deref(),
            &discovered,
            &mut errors,
        );
        if let Some(routes) = &explicit_routes {
            refs::check_route_upstreams(
                routes,
                compose_services.as_deref(),
                &discovered,
                &mut errors,
            );
        }
    }

    if tls {
        if let Some(routes) = &explicit_routes {
            for route in routes {
                if !constraints::is_dns_name(&route.host) {
                    errors.push(ConfigError::Conflict {
                        field: "proxy_routes".to_owned(),
                        message: format!(
                            "host '{}' cannot receive a certificate; use DNS names under TLS",
                            route.host
                        ),
                    });
                }
            }
        }
    }

    let effective_http_port =
        (proxy_enabled && managed).then(|| raw.proxy_http_port.unwrap_or(80));
    let effective_https_port = (tls && managed).then(|| raw.proxy_https_port.unwrap_or(443));
    if let (Some(http), Some(https)) = (effective_http_port, effective_https_port) {
        if http == https {
            errors.push(ConfigError::Conflict {
                field: "proxy_https_port".to_owned(),
                message: "must differ from the HTTP port".to_owned(),
            });
        }
    }

    if let Some(err) = collapse(errors) {
        return Err(err);
    }

    // Validation passed; derive effective values. Failures from here on are
    // single errors, not batches.
    let effective_bind_host = resolve_bind_host(raw.access_mode, &bind_host, mesh)?;
    let project_name = spec::project_name_for(&service_name);

    let (effective_routes, effective_upstream) = if !proxy_enabled {
        (Vec::new(), None)
    } else if let Some(routes) = &explicit_routes {
        let first = &routes[0];
        (routes.clone(), Some((first.upstream_host.clone(), first.upstream_port)))
    } else {
        let upstream = derive_upstream(
            source_kind,
            managed,
            &project_name,
            raw.host_port,
            raw.container_port,
            proxy_upstream_service.as_deref(),
            raw.proxy_upstream_port,
            compose_services.as_deref(),
            &discovered,
        )?;
        let host = domain.clone().unwrap_or_else(|| "_".to_owned());
        let route = ProxyRoute::new(host, upstream.0.clone(), upstream.1);
        (vec![route], Some(upstream))
    };

    let cert_domains = match &domain {
        None => Vec::new(),
        Some(primary) => {
            let mut domains = vec![primary.clone()];
            for route in &effective_routes {
                if constraints::is_dns_name(&route.host) && !domains.contains(&route.host) {
                    domains.push(route.host.clone());
                }
            }
            domains
        }
    };

    let state_dir = StateDir::new(&raw.base_dir, &project_name);
    Ok(DeploySpec {
        service_name,
        source_dir,
        source_kind,
        base_dir: raw.base_dir,
        host_port: raw.host_port,
        container_port: raw.container_port,
        access_mode: raw.access_mode,
        ingress_mode: raw.ingress_mode,
        registry_retries: raw.registry_retries,
        retry_backoff_seconds: raw.retry_backoff_seconds,
        tune_docker_daemon: raw.tune_docker_daemon,
        compose_services,
        domain,
        acme_email,
        auth_token,
        explicit_routes,
        project_name,
        state_dir,
        effective_bind_host,
        effective_routes,
        effective_upstream,
        effective_http_port,
        effective_https_port,
        cert_domains,
    })
}

fn collapse(mut errors: Vec<ConfigError>) -> Option<ConfigError> {
    match errors.len() {
        0 => None,
        1 => errors.pop(),
        _ => Some(ConfigError::Multiple(errors)),
    }
}

fn normalize_opt(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn normalize_service_list(
    raw: Option<&[String]>,
    errors: &mut Vec<ConfigError>,
) -> Option<Vec<String>> {
    let raw = raw?;
    let mut services: Vec<String> = Vec::new();
    for entry in raw {
        let name = entry.trim();
        if name.is_empty() {
            errors.push(ConfigError::InvalidField {
                field: "compose_services".to_owned(),
                message: "must not contain empty names".to_owned(),
            });
            continue;
        }
        constraints::check_service_name("compose_services", name, errors);
        if !services.iter().any(|s| s == name) {
            services.push(name.to_owned());
        }
    }
    if services.is_empty() {
        None
    } else {
        Some(services)
    }
}

fn parse_routes(raw: Option<&[String]>, errors: &mut Vec<ConfigError>) -> Option<Vec<ProxyRoute>> {
    let raw = raw?;
    let mut routes: Vec<ProxyRoute> = Vec::with_capacity(raw.len());
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for text in raw {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match text.parse::<ProxyRoute>() {
            Ok(route) => {
                if seen.insert((route.host.clone(), route.path_prefix.clone())) {
                    routes.push(route);
                } else {
                    errors.push(ConfigError::Conflict {
                        field: "proxy_routes".to_owned(),
                        message: format!(
                            "duplicate route for {}{}",
                            route.host, route.path_prefix
                        ),
                    });
                }
            }
            Err(err) => errors.push(err),
        }
    }
    if routes.is_empty() {
        None
    } else {
        Some(routes)
    }
}

fn resolve_bind_host(
    mode: AccessMode,
    bind_host: &str,
    mesh: Option<&dyn MeshResolver>,
) -> Result<String> {
    match mode {
        AccessMode::Loopback => Ok(bind_host.to_owned()),
        AccessMode::Public => Ok("0.0.0.0".to_owned()),
        AccessMode::Mesh => {
            // An explicit non-loopback bind address overrides resolution.
            if !matches!(bind_host, "127.0.0.1" | "localhost" | "::1") {
                return Ok(bind_host.to_owned());
            }
            let resolver = mesh.ok_or_else(|| ConfigError::MeshUnavailable {
                message: "no resolver configured; pass an explicit bind address".to_owned(),
            })?;
            let ip = resolver
                .interface_ip()
                .map_err(|message| ConfigError::MeshUnavailable { message })?;
            let ip = ip.trim().to_owned();
            if ip.parse::<IpAddr>().is_err() {
                return Err(ConfigError::MeshUnavailable {
                    message: format!("resolver returned '{ip}', not an IP address"),
                });
            }
            Ok(ip)
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn derive_upstream(
    source_kind: SourceKind,
    managed: bool,
    project_name: &str,
    host_port: Option<u16>,
    container_port: Option<u16>,
    requested_service: Option<&str>,
    requested_port: Option<u16>,
    subset: Option<&[String]>,
    discovered: &[ComposeServiceDescriptor],
) -> Result<(String, u16)> {
    if !managed {
        // Validation already restricted this to Dockerfile sources.
        let port = host_port.ok_or_else(|| ConfigError::Unresolvable {
            field: "host_port".to_owned(),
            message: "host nginx forwards to a published host port; set host_port and \
                      container_port"
                .to_owned(),
        })?;
        return Ok(("127.0.0.1".to_owned(), port));
    }
    match source_kind {
        SourceKind::Dockerfile => {
            let port = container_port.ok_or_else(|| ConfigError::Unresolvable {
                field: "container_port".to_owned(),
                message: "a proxy in front of a Dockerfile build needs host_port and \
                          container_port"
                    .to_owned(),
            })?;
            Ok((project_name.to_owned(), port))
        }
        _ => refs::derive_compose_upstream(requested_service, requested_port, subset, discovered),
    }
}
