use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::validate::constraints;

/// One `(host, path-prefix) → (upstream, port)` mapping used to render
/// virtual-host configuration.
///
/// `host` is a DNS name or a wildcard-style server identifier (`_`). The
/// path prefix always starts with `/` and never ends with a trailing slash
/// except for the root route. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyRoute {
    pub host: String,
    pub upstream_host: String,
    pub upstream_port: u16,
    pub path_prefix: String,
}

impl ProxyRoute {
    /// Root route (`/`) for the given host and upstream.
    pub fn new(
        host: impl Into<String>,
        upstream_host: impl Into<String>,
        upstream_port: u16,
    ) -> Self {
        Self {
            host: host.into(),
            upstream_host: upstream_host.into(),
            upstream_port,
            path_prefix: "/".to_owned(),
        }
    }

    pub fn with_path(mut self, path_prefix: impl Into<String>) -> Self {
        self.path_prefix = path_prefix.into();
        self
    }

    pub fn is_root(&self) -> bool {
        self.path_prefix == "/"
    }

    /// Human summary, e.g. `app.example.com/api->api:8080`.
    pub fn summary(&self) -> String {
        format!(
            "{}{}->{}:{}",
            self.host, self.path_prefix, self.upstream_host, self.upstream_port
        )
    }
}

/// Normalize a raw path token into a canonical prefix: leading slash added,
/// repeated slashes collapsed, trailing slash stripped (except root).
pub(crate) fn normalize_path_prefix(raw: &str) -> Result<String, ConfigError> {
    let text = raw.trim();
    if text.is_empty() {
        return Ok("/".to_owned());
    }

    let mut out = String::with_capacity(text.len() + 1);
    if !text.starts_with('/') {
        out.push('/');
    }
    let mut prev_slash = out.ends_with('/');
    for c in text.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }

    if !out.chars().skip(1).all(constraints::is_path_prefix_char) {
        return Err(ConfigError::InvalidField {
            field: "proxy_route".to_owned(),
            message: format!(
                "path '{raw}' is invalid; use URL path prefixes like /service or /api/v1"
            ),
        });
    }
    Ok(out)
}

impl FromStr for ProxyRoute {
    type Err = ConfigError;

    /// Parse `host[/path]=upstream:port`, e.g.
    /// `wiki.example.com/docs=docs:8090`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: String| ConfigError::InvalidField {
            field: "proxy_route".to_owned(),
            message,
        };

        let text = s.trim();
        if text.is_empty() {
            return Err(invalid("must not be empty".to_owned()));
        }
        let (host_part, target_part) = text
            .split_once('=')
            .ok_or_else(|| invalid("format must be '<host>[/path]=<upstream-host>:<port>'".to_owned()))?;

        let host_field = host_part.trim().to_ascii_lowercase();
        let (host, path_prefix) = match host_field.split_once('/') {
            Some((host, path)) => (host.trim().to_owned(), normalize_path_prefix(path)?),
            None => (host_field, "/".to_owned()),
        };

        let target = target_part.trim();
        let (upstream_host, port_text) = target
            .rsplit_once(':')
            .ok_or_else(|| invalid("target must include a port, e.g. api:8080".to_owned()))?;
        let upstream_host = upstream_host.trim();

        if host.is_empty() {
            return Err(invalid("host must not be empty".to_owned()));
        }
        if !constraints::is_server_name(&host) {
            return Err(invalid(format!(
                "host '{host}' is invalid; use a hostname/wildcard server name like app.example.com"
            )));
        }
        if upstream_host.is_empty() || !constraints::is_upstream_host(upstream_host) {
            return Err(invalid(format!(
                "upstream host '{upstream_host}' is invalid; use letters, numbers, '.', '_', '-'"
            )));
        }
        let upstream_port: u16 = port_text
            .trim()
            .parse()
            .map_err(|_| invalid(format!("upstream port '{}' must be an integer", port_text.trim())))?;
        if upstream_port == 0 {
            return Err(invalid("upstream port must be between 1 and 65535".to_owned()));
        }

        Ok(ProxyRoute {
            host,
            upstream_host: upstream_host.to_owned(),
            upstream_port,
            path_prefix,
        })
    }
}

impl fmt::Display for ProxyRoute {
    /// Left inverse of parsing: `Display` output re-parses to an equal route.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "{}={}:{}", self.host, self.upstream_host, self.upstream_port)
        } else {
            write!(
                f,
                "{}{}={}:{}",
                self.host, self.path_prefix, self.upstream_host, self.upstream_port
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[test]
    fn parses_root_route() {
        let route: ProxyRoute = "App.Example.com=api:8080".parse().unwrap();
        assert_eq!(route.host, "app.example.com");
        assert_eq!(route.upstream_host, "api");
        assert_eq!(route.upstream_port, 8080);
        assert_eq!(route.path_prefix, "/");
    }

    #[test]
    fn parses_path_route() {
        let route: ProxyRoute = "wiki.example.com/docs/v1=docs:8090".parse().unwrap();
        assert_eq!(route.host, "wiki.example.com");
        assert_eq!(route.path_prefix, "/docs/v1");
    }

    #[parameterized(
        empty_path = { "a.example.com//=x:1", "/" },
        collapsed = { "a.example.com//api///v2=x:1", "/api/v2" },
        trailing = { "a.example.com/api/=x:1", "/api" },
    )]
    fn normalizes_path_prefixes(raw: &str, expected: &str) {
        let route: ProxyRoute = raw.parse().unwrap();
        assert_eq!(route.path_prefix, expected);
    }

    #[parameterized(
        missing_eq = { "app.example.com" },
        missing_port = { "app.example.com=api" },
        bad_port = { "app.example.com=api:http" },
        zero_port = { "app.example.com=api:0" },
        empty_host = { "=api:8080" },
        bad_host = { "bad host=api:8080" },
        bad_upstream = { "app.example.com=bad host:8080" },
        bad_path = { "app.example.com/a b=api:8080" },
    )]
    fn rejects_malformed_routes(raw: &str) {
        assert!(raw.parse::<ProxyRoute>().is_err(), "accepted {raw:?}");
    }

    #[parameterized(
        root = { "app.example.com=api:8080" },
        path = { "app.example.com/api=api:8080" },
        wildcard = { "_=api:8080" },
        deep = { "a.b.example.com/api/v1=backend-2:9000" },
    )]
    fn format_then_parse_is_identity(raw: &str) {
        let route: ProxyRoute = raw.parse().unwrap();
        let reparsed: ProxyRoute = route.to_string().parse().unwrap();
        assert_eq!(route, reparsed);
    }

    #[test]
    fn summary_is_readable() {
        let route = ProxyRoute::new("app.example.com", "api", 8080).with_path("/v1".to_owned());
        assert_eq!(route.summary(), "app.example.com/v1->api:8080");
    }
}
