//! Cross-checks between spec fields and what compose discovery found.
//!
//! Discovery is best-effort, so an empty discovery result never blocks: the
//! checks here only fire when the compose file was actually readable.

use crate::compose::ComposeServiceDescriptor;
use crate::error::{ConfigError, Result};
use crate::route::ProxyRoute;

pub(super) fn check_known_services(
    requested: Option<&[String]>,
    discovered: &[ComposeServiceDescriptor],
    errors: &mut Vec<ConfigError>,
) {
    let Some(requested) = requested else {
        return;
    };
    if discovered.is_empty() {
        return;
    }
    for name in requested {
        if !discovered.iter().any(|d| &d.name == name) {
            let known: Vec<&str> = discovered.iter().map(|d| d.name.as_str()).collect();
            errors.push(ConfigError::InvalidField {
                field: "compose_services".to_owned(),
                message: format!(
                    "'{name}' is not defined in the compose file (known: {})",
                    known.join(", ")
                ),
            });
        }
    }
}

pub(super) fn check_upstream_service(
    requested: Option<&str>,
    subset: Option<&[String]>,
    discovered: &[ComposeServiceDescriptor],
    errors: &mut Vec<ConfigError>,
) {
    let Some(name) = requested else {
        return;
    };
    if let Some(subset) = subset {
        if !subset.iter().any(|s| s == name) {
            errors.push(ConfigError::Conflict {
                field: "proxy_upstream_service".to_owned(),
                message: format!("'{name}' is not among the selected compose_services"),
            });
            return;
        }
    }
    if !discovered.is_empty() && !discovered.iter().any(|d| d.name == name) {
        errors.push(ConfigError::InvalidField {
            field: "proxy_upstream_service".to_owned(),
            message: format!("'{name}' is not defined in the compose file"),
        });
    }
}

/// A route upstream that names a compose service outside the selected
/// subset would point at a container that never starts.
pub(super) fn check_route_upstreams(
    routes: &[ProxyRoute],
    subset: Option<&[String]>,
    discovered: &[ComposeServiceDescriptor],
    errors: &mut Vec<ConfigError>,
) {
    let Some(subset) = subset else {
        return;
    };
    for route in routes {
        if discovered.iter().any(|d| d.name == route.upstream_host)
            && !subset.iter().any(|s| s == &route.upstream_host)
        {
            errors.push(ConfigError::Conflict {
                field: "proxy_routes".to_owned(),
                message: format!(
                    "upstream '{}' is not among the selected compose_services",
                    route.upstream_host
                ),
            });
        }
    }
}

/// Host nginx forwards over the host network; a route upstream that names a
/// compose service would never resolve there.
pub(super) fn check_host_reachable_upstreams(
    routes: &[ProxyRoute],
    discovered: &[ComposeServiceDescriptor],
    errors: &mut Vec<ConfigError>,
) {
    for route in routes {
        if discovered.iter().any(|d| d.name == route.upstream_host) {
            errors.push(ConfigError::Conflict {
                field: "proxy_routes".to_owned(),
                message: format!(
                    "upstream '{}' is a compose service name; host nginx reaches only \
                     host-published addresses like 127.0.0.1",
                    route.upstream_host
                ),
            });
        }
    }
}

/// Pick the managed-proxy upstream for a compose source: an explicit
/// request wins, then the first selected service, then the first discovered
/// one. The port falls back to the service's discovered container port.
pub(super) fn derive_compose_upstream(
    requested: Option<&str>,
    requested_port: Option<u16>,
    subset: Option<&[String]>,
    discovered: &[ComposeServiceDescriptor],
) -> Result<(String, u16)> {
    let service = if let Some(name) = requested {
        name.to_owned()
    } else if let Some(first) = subset.and_then(|s| s.first()) {
        first.clone()
    } else if let Some(first) = discovered.first() {
        first.name.clone()
    } else {
        return Err(ConfigError::Unresolvable {
            field: "proxy_upstream_service".to_owned(),
            message: "no compose services discovered; name the upstream explicitly".to_owned(),
        });
    };
    let port = match requested_port {
        Some(port) => port,
        None => discovered
            .iter()
            .find(|d| d.name == service)
            .and_then(|d| d.container_port)
            .ok_or_else(|| ConfigError::Unresolvable {
                field: "proxy_upstream_port".to_owned(),
                message: format!(
                    "service '{service}' declares no container port; set proxy_upstream_port"
                ),
            })?,
    };
    Ok((service, port))
}
