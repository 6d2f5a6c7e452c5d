//! Two-phase nginx virtual-host rendering.
//!
//! TLS deployments cannot start with certificates they do not have yet, so
//! rendering happens in phases: a bootstrap config serves the ACME webroot
//! (and the routes, over plain HTTP) so issuance can succeed, then the
//! issued config redirects HTTP to HTTPS and terminates TLS. The same
//! renderer serves both the managed proxy container and host nginx site
//! files; only the webroot path and the surrounding install differ.

use std::fmt::Write;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use moor_config::ProxyRoute;

use crate::routes::group_by_host;

/// Which certificate phase to render for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPhase<'a> {
    /// Plain HTTP only, no ACME plumbing.
    Disabled,
    /// HTTP with the ACME webroot exposed; certificates not yet issued.
    Bootstrap,
    /// Certificates live under `/etc/letsencrypt/live/<primary_domain>/`.
    Issued { primary_domain: &'a str },
}

#[derive(Debug, Clone)]
pub struct VhostParams<'a> {
    /// Scopes nginx variable names so several generated sites can coexist
    /// in one host nginx.
    pub project_name: &'a str,
    pub routes: &'a [ProxyRoute],
    pub auth_token: Option<&'a str>,
    pub tls: TlsPhase<'a>,
    /// Webroot directory the serving nginx resolves ACME challenges from.
    pub acme_webroot: &'a str,
    /// Certificate hosts that must answer even when no route targets them:
    /// the ACME challenge during issuance, a 404 afterwards.
    pub cert_hosts: &'a [String],
}

/// Render the complete vhost file for every host in the route set, plus
/// ACME/404 servers for certificate hosts the routes never mention.
pub fn render_vhosts(params: &VhostParams<'_>) -> String {
    let var = var_prefix(params.project_name);
    let mut out = String::new();
    let _ = writeln!(out, "# generated for {}; do not edit by hand", params.project_name);

    let _ = writeln!(out, "map $http_upgrade ${var}_connection {{");
    let _ = writeln!(out, "    default upgrade;");
    let _ = writeln!(out, "    \"\" close;");
    let _ = writeln!(out, "}}");
    if let Some(token) = params.auth_token {
        render_auth_map(&mut out, &var, token);
    }

    let groups = group_by_host(params.routes);
    for (host, routes) in &groups {
        out.push('\n');
        match params.tls {
            TlsPhase::Disabled => {
                render_http_server(&mut out, params, &var, host, routes, false);
            }
            TlsPhase::Bootstrap => {
                render_http_server(&mut out, params, &var, host, routes, true);
            }
            TlsPhase::Issued { primary_domain } => {
                render_redirect_server(&mut out, params, host);
                render_tls_server(&mut out, params, &var, host, routes, primary_domain);
            }
        }
    }
    for host in params.cert_hosts {
        if groups.iter().any(|(covered, _)| covered == host) {
            continue;
        }
        match params.tls {
            TlsPhase::Disabled => {}
            TlsPhase::Bootstrap => {
                out.push('\n');
                render_http_server(&mut out, params, &var, host, &[], true);
            }
            TlsPhase::Issued { primary_domain } => {
                out.push('\n');
                render_redirect_server(&mut out, params, host);
                render_tls_server(&mut out, params, &var, host, &[], primary_domain);
            }
        }
    }
    out
}

/// Accept `Authorization: Bearer <token>` or HTTP basic auth with the
/// synthetic user `token`, for clients that cannot set arbitrary headers.
fn render_auth_map(out: &mut String, var: &str, token: &str) {
    let basic = BASE64.encode(format!("token:{token}"));
    let _ = writeln!(out, "map $http_authorization ${var}_authorized {{");
    let _ = writeln!(out, "    default 0;");
    let _ = writeln!(out, "    \"Bearer {token}\" 1;");
    let _ = writeln!(out, "    \"Basic {basic}\" 1;");
    let _ = writeln!(out, "}}");
}

fn render_http_server(
    out: &mut String,
    params: &VhostParams<'_>,
    var: &str,
    host: &str,
    routes: &[ProxyRoute],
    acme: bool,
) {
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen 80;");
    let _ = writeln!(out, "    server_name {host};");
    if acme {
        render_acme_location(out, params.acme_webroot);
    }
    render_auth_error_page(out, params);
    for route in routes {
        render_route_locations(out, params, var, route);
    }
    if routes.is_empty() {
        render_not_found_location(out);
    }
    let _ = writeln!(out, "}}");
}

fn render_redirect_server(out: &mut String, params: &VhostParams<'_>, host: &str) {
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen 80;");
    let _ = writeln!(out, "    server_name {host};");
    render_acme_location(out, params.acme_webroot);
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        return 301 https://$host$request_uri;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
}

fn render_tls_server(
    out: &mut String,
    params: &VhostParams<'_>,
    var: &str,
    host: &str,
    routes: &[ProxyRoute],
    primary_domain: &str,
) {
    let _ = writeln!(out, "server {{");
    let _ = writeln!(out, "    listen 443 ssl;");
    let _ = writeln!(out, "    http2 on;");
    let _ = writeln!(out, "    server_name {host};");
    let _ = writeln!(
        out,
        "    ssl_certificate /etc/letsencrypt/live/{primary_domain}/fullchain.pem;"
    );
    let _ = writeln!(
        out,
        "    ssl_certificate_key /etc/letsencrypt/live/{primary_domain}/privkey.pem;"
    );
    render_auth_error_page(out, params);
    for route in routes {
        render_route_locations(out, params, var, route);
    }
    if routes.is_empty() {
        render_not_found_location(out);
    }
    let _ = writeln!(out, "}}");
}

/// Unexpected Host headers land on an explicit 404, not a default server.
fn render_not_found_location(out: &mut String) {
    let _ = writeln!(out, "    location / {{");
    let _ = writeln!(out, "        return 404;");
    let _ = writeln!(out, "    }}");
}

fn render_acme_location(out: &mut String, webroot: &str) {
    let _ = writeln!(out, "    location ^~ /.well-known/acme-challenge/ {{");
    let _ = writeln!(out, "        root {webroot};");
    let _ = writeln!(out, "        default_type text/plain;");
    let _ = writeln!(out, "    }}");
}

fn render_auth_error_page(out: &mut String, params: &VhostParams<'_>) {
    if params.auth_token.is_none() {
        return;
    }
    let _ = writeln!(out, "    error_page 401 = @unauthorized;");
    let _ = writeln!(out, "    location @unauthorized {{");
    let _ = writeln!(
        out,
        "        add_header WWW-Authenticate 'Basic realm=\"restricted\"' always;"
    );
    let _ = writeln!(out, "        return 401 \"unauthorized\\n\";");
    let _ = writeln!(out, "    }}");
}

fn render_route_locations(
    out: &mut String,
    params: &VhostParams<'_>,
    var: &str,
    route: &ProxyRoute,
) {
    if route.is_root() {
        let _ = writeln!(out, "    location / {{");
        render_proxy_body(out, params, var, route, None);
        let _ = writeln!(out, "    }}");
        return;
    }
    let prefix = &route.path_prefix;
    let _ = writeln!(out, "    location = {prefix} {{");
    let _ = writeln!(out, "        return 301 {prefix}/;");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "    location {prefix}/ {{");
    render_proxy_body(out, params, var, route, Some(prefix));
    let _ = writeln!(out, "    }}");
}

fn render_proxy_body(
    out: &mut String,
    params: &VhostParams<'_>,
    var: &str,
    route: &ProxyRoute,
    prefix: Option<&str>,
) {
    if params.auth_token.is_some() {
        let _ = writeln!(out, "        if (${var}_authorized = 0) {{");
        let _ = writeln!(out, "            return 401;");
        let _ = writeln!(out, "        }}");
    }
    let _ = writeln!(
        out,
        "        proxy_pass http://{}:{};",
        route.upstream_host, route.upstream_port
    );
    let _ = writeln!(out, "        proxy_http_version 1.1;");
    let _ = writeln!(out, "        proxy_set_header Host $host;");
    let _ = writeln!(out, "        proxy_set_header X-Real-IP $remote_addr;");
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;");
    let _ = writeln!(out, "        proxy_set_header X-Forwarded-Proto $scheme;");
    if let Some(prefix) = prefix {
        let _ = writeln!(out, "        proxy_set_header X-Forwarded-Prefix {prefix};");
    }
    let _ = writeln!(out, "        proxy_set_header Upgrade $http_upgrade;");
    let _ = writeln!(out, "        proxy_set_header Connection ${var}_connection;");
}

/// nginx variable names only allow `[A-Za-z0-9_]`.
fn var_prefix(project_name: &str) -> String {
    let cleaned: String = project_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("moor_{cleaned}")
}
