//! Compose interpolation variables and `.env` side-files.
//!
//! Compose files may reference `$VAR` / `${VAR}` / `${VAR:?err}` variables
//! that must be supplied at `docker compose` time. This module discovers
//! which of them require user-provided values and which are still unset
//! after merging a `.env` side-file under the live environment.

use std::collections::HashMap;
use std::path::Path;

use crate::validate::constraints::is_env_name;

/// An interpolation variable a compose file expects the caller to provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredVar {
    pub name: String,
    /// `${VAR:?err}` form: an empty value is as bad as a missing one.
    pub require_non_empty: bool,
}

/// Scan compose content for interpolation variables that require values.
///
/// Variables carrying a default or alternative (`-`, `:-`, `+`, `:+`) need
/// nothing from the caller and are skipped. `$$` escapes a literal dollar.
/// First-seen order is preserved; a `:?` occurrence upgrades an earlier
/// plain requirement to required-non-empty.
pub fn required_compose_vars(content: &str) -> Vec<RequiredVar> {
    let mut order: Vec<String> = Vec::new();
    let mut non_empty: HashMap<String, bool> = HashMap::new();
    let bytes = content.as_bytes();
    let mut idx = 0;

    let mut record = |name: &str, strict: bool| {
        if !is_env_name(name) {
            return;
        }
        match non_empty.get_mut(name) {
            Some(level) => *level = *level || strict,
            None => {
                order.push(name.to_owned());
                non_empty.insert(name.to_owned(), strict);
            }
        }
    };

    while idx < bytes.len() {
        if bytes[idx] != b'$' {
            idx += 1;
            continue;
        }
        let Some(&next) = bytes.get(idx + 1) else {
            break;
        };
        match next {
            b'$' => idx += 2,
            b'{' => {
                let Some(end) = content[idx + 2..].find('}') else {
                    idx += 1;
                    continue;
                };
                let expr = content[idx + 2..idx + 2 + end].trim();
                if let Some((name, strict)) = parse_braced_requirement(expr) {
                    record(name, strict);
                }
                idx += 2 + end + 1;
            }
            _ => {
                let rest = &content[idx + 1..];
                let len = bare_name_len(rest);
                if len > 0 {
                    record(&rest[..len], false);
                    idx += 1 + len;
                } else {
                    idx += 1;
                }
            }
        }
    }

    order
        .into_iter()
        .map(|name| {
            let strict = non_empty[&name];
            RequiredVar { name, require_non_empty: strict }
        })
        .collect()
}

/// Parse the inside of `${...}`. Returns `(name, require_non_empty)` when a
/// value is required, `None` when the expression carries its own default.
fn parse_braced_requirement(expr: &str) -> Option<(&str, bool)> {
    if expr.is_empty() {
        return None;
    }
    let len = bare_name_len(expr);
    if len == 0 {
        return None;
    }
    let (name, op) = expr.split_at(len);
    let op = if op.starts_with(':') { &op[..2.min(op.len())] } else { &op[..1.min(op.len())] };
    match op {
        "-" | ":-" | "+" | ":+" => None,
        ":?" => Some((name, true)),
        _ => Some((name, false)),
    }
}

fn bare_name_len(s: &str) -> usize {
    let mut chars = s.char_indices();
    match chars.next() {
        Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return 0,
    }
    for (pos, c) in chars {
        if !(c.is_ascii_alphanumeric() || c == '_') {
            return pos;
        }
    }
    s.len()
}

/// Read `KEY=VALUE` entries from a `.env`-style file.
///
/// Comments and malformed lines are skipped, an `export ` prefix is
/// tolerated, and symmetric single/double quotes are stripped. A missing
/// file reads as empty.
pub fn read_dotenv(dotenv_path: &Path) -> HashMap<String, String> {
    let Ok(content) = std::fs::read_to_string(dotenv_path) else {
        return HashMap::new();
    };

    let mut values = HashMap::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").map(str::trim).unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if !is_env_name(key) {
            continue;
        }
        let value = value.trim();
        let value = if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            &value[1..value.len() - 1]
        } else {
            value
        };
        values.insert(key.to_owned(), value.to_owned());
    }
    values
}

/// Required compose variables still unset (or empty) after merging the
/// dotenv side-file under the live environment. Environment wins.
pub fn missing_compose_vars(
    compose_path: &Path,
    dotenv_path: Option<&Path>,
    env: &HashMap<String, String>,
) -> Vec<RequiredVar> {
    let Ok(content) = std::fs::read_to_string(compose_path) else {
        return Vec::new();
    };
    let required = required_compose_vars(&content);
    if required.is_empty() {
        return Vec::new();
    }

    let mut merged: HashMap<String, String> = HashMap::new();
    if let Some(path) = dotenv_path {
        merged.extend(read_dotenv(path));
    }
    merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));

    required
        .into_iter()
        .filter(|var| merged.get(&var.name).map(String::is_empty).unwrap_or(true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn detects_required_vars_only() {
        let content = "\
services:
  api:
    image: example/api:${TAG}
    environment:
      - TOKEN=${API_TOKEN:?token required}
      - OPT=${OPTIONAL:-fallback}
      - ALT=${ALT_VALUE:+set}
      - COST=$$5
      - PLAIN=$PLAIN_VAR
      - AGAIN=${API_TOKEN}
";
        let vars = required_compose_vars(content);
        let names: Vec<&str> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, ["TAG", "API_TOKEN", "PLAIN_VAR"]);
        assert!(!vars[0].require_non_empty);
        assert!(vars[1].require_non_empty, ":? upgrade must stick");
    }

    #[test]
    fn escaped_dollar_is_not_a_var() {
        assert!(required_compose_vars("price: $$HOME").is_empty());
    }

    #[test]
    fn unclosed_brace_is_skipped() {
        assert!(required_compose_vars("broken: ${OOPS").is_empty());
    }

    #[test]
    fn dotenv_supports_export_and_quotes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "# comment\nexport TOKEN=\"abc def\"\nNAME='single'\nBARE=plain\n1BAD=skip\nnoequals"
        )
        .unwrap();
        let values = read_dotenv(file.path());
        assert_eq!(values.get("TOKEN").map(String::as_str), Some("abc def"));
        assert_eq!(values.get("NAME").map(String::as_str), Some("single"));
        assert_eq!(values.get("BARE").map(String::as_str), Some("plain"));
        assert!(!values.contains_key("1BAD"));
    }

    #[test]
    fn missing_vars_respect_dotenv_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let compose = dir.path().join("compose.yml");
        std::fs::write(&compose, "image: x:${TAG}\ntoken: ${TOKEN:?required}\n").unwrap();
        let dotenv = dir.path().join(".env");
        std::fs::write(&dotenv, "TAG=1.0\n").unwrap();

        let env = HashMap::new();
        let missing = missing_compose_vars(&compose, Some(&dotenv), &env);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "TOKEN");

        let env: HashMap<String, String> = [("TOKEN".to_owned(), "secret".to_owned())].into();
        assert!(missing_compose_vars(&compose, Some(&dotenv), &env).is_empty());

        // An empty env value does not satisfy the requirement.
        let env: HashMap<String, String> = [("TOKEN".to_owned(), String::new())].into();
        assert_eq!(missing_compose_vars(&compose, Some(&dotenv), &env).len(), 1);
    }
}
