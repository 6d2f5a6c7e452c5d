//! Best-effort discovery of compose service names and ports.
//!
//! This is deliberately not a YAML parser. It tracks indentation columns
//! only: the line introducing the top-level `services:` block fixes a
//! threshold, the first child key fixes the service-name column, and
//! `ports:`/`expose:` blocks inside a service body are bounded the same
//! way. That tolerates nested maps and lists without structural parsing,
//! which is all this narrow extraction task needs. Discovery is always
//! best-effort: a missing file or missing `services:` key yields empty
//! results, never an error.

use std::path::{Path, PathBuf};

/// What discovery found for one top-level compose service.
///
/// Ephemeral: recomputed on each call since the compose file is the source
/// of truth. Only the first port match per service is kept; duplicates are
/// ignored (a documented simplification).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeServiceDescriptor {
    pub name: String,
    /// First container (or `expose`d) port.
    pub container_port: Option<u16>,
    /// First published host port from a `ports:` entry.
    pub host_port: Option<u16>,
}

const COMPOSE_FILE_NAMES: [&str; 4] =
    ["docker-compose.yml", "docker-compose.yaml", "compose.yml", "compose.yaml"];

/// Locate the compose file in a source directory, by conventional name.
pub fn find_compose_file(source_dir: &Path) -> Option<PathBuf> {
    COMPOSE_FILE_NAMES.iter().map(|name| source_dir.join(name)).find(|path| path.is_file())
}

/// Ordered top-level service names, without port scanning.
pub fn service_names(compose_path: &Path) -> Vec<String> {
    discover_services(compose_path).into_iter().map(|d| d.name).collect()
}

/// Scan a compose file for service names and their first ports.
pub fn discover_services(compose_path: &Path) -> Vec<ComposeServiceDescriptor> {
    match std::fs::read_to_string(compose_path) {
        Ok(content) => discover_in(&content),
        Err(_) => Vec::new(),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Ports,
    Expose,
}

fn discover_in(content: &str) -> Vec<ComposeServiceDescriptor> {
    let mut services: Vec<ComposeServiceDescriptor> = Vec::new();
    let mut services_indent: Option<usize> = None;
    let mut name_indent: Option<usize> = None;
    let mut current: Option<(usize, usize)> = None; // (services index, key indent)
    let mut section: Option<(Section, usize)> = None;

    for raw_line in content.lines() {
        let trimmed = raw_line.trim_end();
        if trimmed.trim_start().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }
        let indent = indent_of(raw_line);

        let top = match services_indent {
            None => {
                if let Some((key_indent, key)) = parse_key_line(trimmed) {
                    if key == "services" {
                        services_indent = Some(key_indent);
                    }
                }
                continue;
            }
            Some(top) => top,
        };
        if indent <= top {
            break;
        }

        if let Some((key_indent, key)) = parse_key_line(trimmed) {
            let expected = *name_indent.get_or_insert(key_indent);
            if key_indent == expected {
                let idx = match services.iter().position(|d| d.name == key) {
                    Some(idx) => idx,
                    None => {
                        services.push(ComposeServiceDescriptor {
                            name: key.to_owned(),
                            container_port: None,
                            host_port: None,
                        });
                        services.len() - 1
                    }
                };
                current = Some((idx, key_indent));
                section = None;
                continue;
            }
        }

        let Some((idx, service_indent)) = current else {
            continue;
        };
        if indent <= service_indent {
            current = None;
            section = None;
            continue;
        }

        if let Some((key_indent, key)) = parse_key_line(trimmed) {
            match key {
                "ports" => {
                    section = Some((Section::Ports, key_indent));
                    continue;
                }
                "expose" => {
                    section = Some((Section::Expose, key_indent));
                    continue;
                }
                _ => {}
            }
        }

        if let Some((_, section_indent)) = section {
            if indent <= section_indent {
                section = None;
            }
        }

        if let Some((kind, section_indent)) = section {
            if indent > section_indent {
                if let Some(item) = parse_list_item(trimmed) {
                    let (host, container) = parse_port_mapping(item);
                    let entry = &mut services[idx];
                    if entry.container_port.is_none() {
                        entry.container_port = container;
                    }
                    if kind == Section::Ports && entry.host_port.is_none() {
                        entry.host_port = host;
                    }
                }
            }
        }
    }

    services
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Match `key:` lines, tolerating quoted keys and trailing comments.
/// Returns `(indent, key)` or `None` for anything else (values, list items).
fn parse_key_line(line: &str) -> Option<(usize, &str)> {
    let indent = indent_of(line);
    let rest = &line[indent..];

    let (key, after) = if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        (&stripped[..end], &stripped[end + 1..])
    } else if let Some(stripped) = rest.strip_prefix('\'') {
        let end = stripped.find('\'')?;
        (&stripped[..end], &stripped[end + 1..])
    } else {
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
            .unwrap_or(rest.len());
        (&rest[..end], &rest[end..])
    };

    if key.is_empty() {
        return None;
    }
    let after = after.trim_start();
    let after = after.strip_prefix(':')?;
    let after = after.trim_start();
    if after.is_empty() || after.starts_with('#') {
        Some((indent, key))
    } else {
        None
    }
}

/// Match `- value` list items, tolerating quotes and trailing comments.
fn parse_list_item(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix('-')?.trim_start();
    if let Some(stripped) = rest.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(&stripped[..end]);
    }
    if let Some(stripped) = rest.strip_prefix('\'') {
        let end = stripped.find('\'')?;
        return Some(&stripped[..end]);
    }
    let end = rest.find('#').unwrap_or(rest.len());
    let value = rest[..end].trim();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Split a compose port token into `(host_port, container_port)`.
///
/// Handles `container`, `container/protocol`, `host:container` and
/// `addr:host:container` forms. Non-numeric groups (bind addresses,
/// variable interpolations) come back as `None`.
fn parse_port_mapping(token: &str) -> (Option<u16>, Option<u16>) {
    let text = token.trim().trim_matches('"').trim_matches('\'');
    let text = text.split('/').next().unwrap_or(text).trim();
    if text.is_empty() {
        return (None, None);
    }

    let parts: Vec<&str> = text.split(':').map(str::trim).collect();
    let to_port = |raw: &str| -> Option<u16> {
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        raw.parse::<u16>().ok().filter(|p| *p >= 1)
    };

    match parts.len() {
        1 => (None, to_port(parts[0])),
        2 => (to_port(parts[0]), to_port(parts[1])),
        n => (to_port(parts[n - 2]), to_port(parts[n - 1])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
version: \"3.9\"
x-defaults: &defaults
  restart: unless-stopped
services:
  api:
    image: example/api:1
    ports:
      - \"127.0.0.1:8080:8000\"
      - \"9090:9000\"  # only the first mapping counts
  worker:
    image: example/worker:1
    expose:
      - 9100
  'quoted-svc':
    build: .
    environment:
      ports: ignored
volumes:
  data: {}
";

    #[test]
    fn discovers_services_in_order() {
        let found = discover_in(SAMPLE);
        let names: Vec<&str> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["api", "worker", "quoted-svc"]);
    }

    #[test]
    fn first_port_match_wins() {
        let found = discover_in(SAMPLE);
        assert_eq!(found[0].container_port, Some(8000));
        assert_eq!(found[0].host_port, Some(8080));
    }

    #[test]
    fn expose_counts_for_container_port_only() {
        let found = discover_in(SAMPLE);
        assert_eq!(found[1].container_port, Some(9100));
        assert_eq!(found[1].host_port, None);
    }

    #[test]
    fn nested_keys_are_not_services() {
        let found = discover_in(SAMPLE);
        assert!(found.iter().all(|d| d.name != "environment" && d.name != "ports"));
    }

    #[test]
    fn missing_services_key_yields_empty() {
        assert!(discover_in("name: demo\n").is_empty());
        assert!(discover_services(Path::new("/nonexistent/compose.yml")).is_empty());
    }

    #[test]
    fn stops_at_end_of_services_block() {
        let found = discover_in(SAMPLE);
        assert!(found.iter().all(|d| d.name != "data"));
    }

    #[test]
    fn port_mapping_forms() {
        assert_eq!(parse_port_mapping("8080"), (None, Some(8080)));
        assert_eq!(parse_port_mapping("8080/udp"), (None, Some(8080)));
        assert_eq!(parse_port_mapping("80:8080"), (Some(80), Some(8080)));
        assert_eq!(parse_port_mapping("0.0.0.0:80:8080"), (Some(80), Some(8080)));
        assert_eq!(parse_port_mapping("${PORT}:8080"), (None, Some(8080)));
        assert_eq!(parse_port_mapping(""), (None, None));
    }
}
