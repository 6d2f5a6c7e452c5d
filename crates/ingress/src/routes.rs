//! Route planning helpers: host grouping for rendering and route suggestion
//! for multi-service compose projects.

use moor_config::ProxyRoute;

/// A discoverable service a suggestion can route to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCandidate {
    /// Display name, usually the compose service name.
    pub service: String,
    /// Host the proxy forwards to (compose service name or host address).
    pub upstream_host: String,
    pub port: u16,
}

impl UpstreamCandidate {
    pub fn new(service: impl Into<String>, port: u16) -> Self {
        let service = service.into();
        Self { upstream_host: service.clone(), service, port }
    }
}

/// Group routes by host, preserving first-seen host order and the input
/// order of routes within each host.
pub fn group_by_host(routes: &[ProxyRoute]) -> Vec<(String, Vec<ProxyRoute>)> {
    let mut groups: Vec<(String, Vec<ProxyRoute>)> = Vec::new();
    for route in routes {
        match groups.iter_mut().find(|(host, _)| *host == route.host) {
            Some((_, members)) => members.push(route.clone()),
            None => groups.push((route.host.clone(), vec![route.clone()])),
        }
    }
    groups
}

/// Suggest one-host routing for several services: each candidate gets a
/// path prefix derived from its name, in candidate order. Colliding
/// prefixes get a numeric suffix.
pub fn suggest_path_routes(host: &str, candidates: &[UpstreamCandidate]) -> Vec<ProxyRoute> {
    let mut routes = Vec::with_capacity(candidates.len());
    let mut used: Vec<String> = Vec::new();
    for candidate in candidates {
        let slug = disambiguate(path_slug(&candidate.service), &mut used);
        routes.push(
            ProxyRoute::new(host, candidate.upstream_host.clone(), candidate.port)
                .with_path(format!("/{slug}")),
        );
    }
    routes
}

/// Suggest subdomain routing under a parent domain: each candidate gets a
/// `<slug>.<domain>` host, in candidate order.
pub fn suggest_subdomain_routes(
    domain: &str,
    candidates: &[UpstreamCandidate],
) -> Vec<ProxyRoute> {
    let mut routes = Vec::with_capacity(candidates.len());
    let mut used: Vec<String> = Vec::new();
    for candidate in candidates {
        let slug = disambiguate(subdomain_slug(&candidate.service), &mut used);
        routes.push(ProxyRoute::new(
            format!("{slug}.{domain}"),
            candidate.upstream_host.clone(),
            candidate.port,
        ));
    }
    routes
}

fn disambiguate(slug: String, used: &mut Vec<String>) -> String {
    if !used.contains(&slug) {
        used.push(slug.clone());
        return slug;
    }
    let mut counter = 2usize;
    loop {
        let candidate = format!("{slug}-{counter}");
        if !used.contains(&candidate) {
            used.push(candidate.clone());
            return candidate;
        }
        counter += 1;
    }
}

fn path_slug(service: &str) -> String {
    let slug: String = service
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_owned();
    if slug.is_empty() {
        "svc".to_owned()
    } else {
        slug
    }
}

/// DNS label: at most 63 chars of `[a-z0-9-]`, no leading/trailing `-`.
fn subdomain_slug(service: &str) -> String {
    let mut slug = path_slug(service);
    slug.truncate(63);
    let slug = slug.trim_matches('-').to_owned();
    if slug.is_empty() {
        "svc".to_owned()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        plain = { "api", "api" },
        underscore = { "web_ui", "web-ui" },
        dotted = { "web.ui", "web-ui" },
        uppercase = { "WebUI", "webui" },
        all_symbols = { "---", "svc" },
    )]
    fn path_slugs(input: &str, expected: &str) {
        assert_eq!(path_slug(input), expected);
    }

    fn candidates() -> Vec<UpstreamCandidate> {
        vec![
            UpstreamCandidate::new("api", 8000),
            UpstreamCandidate::new("web_ui", 3000),
            UpstreamCandidate::new("web.ui", 3001),
        ]
    }

    #[test]
    fn grouping_preserves_first_seen_order() {
        let routes = vec![
            ProxyRoute::new("b.example.com", "api", 1),
            ProxyRoute::new("a.example.com", "api", 2),
            ProxyRoute::new("b.example.com", "api", 3).with_path("/x".to_owned()),
        ];
        let groups = group_by_host(&routes);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "b.example.com");
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, "a.example.com");
    }

    #[test]
    fn path_suggestions_follow_service_order() {
        let routes = suggest_path_routes("apps.example.org", &candidates());
        assert_eq!(routes[0].path_prefix, "/api");
        assert_eq!(routes[0].upstream_host, "api");
        assert_eq!(routes[1].path_prefix, "/web-ui");
        assert_eq!(routes[2].path_prefix, "/web-ui-2", "collision gets a suffix");
        assert!(routes.iter().all(|r| r.host == "apps.example.org"));
    }

    #[test]
    fn subdomain_suggestions_slugify_each_service() {
        let routes = suggest_subdomain_routes("example.com", &candidates());
        assert_eq!(routes[0].host, "api.example.com");
        assert_eq!(routes[1].host, "web-ui.example.com");
        assert_eq!(routes[2].host, "web-ui-2.example.com");
        assert!(routes.iter().all(ProxyRoute::is_root));
    }

    #[test]
    fn suggestions_are_deterministic() {
        let first = suggest_subdomain_routes("example.com", &candidates());
        let second = suggest_subdomain_routes("example.com", &candidates());
        assert_eq!(first, second);
    }

    #[test]
    fn slugs_never_come_out_empty() {
        let routes = suggest_path_routes(
            "app.example.com",
            &[UpstreamCandidate::new("api", 1), UpstreamCandidate::new("---", 2)],
        );
        assert_eq!(routes[1].path_prefix, "/svc");
    }
}
