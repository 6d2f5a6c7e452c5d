use crate::error::ConfigError;

/// Service names: `[A-Za-z0-9][A-Za-z0-9_.-]*`.
pub(crate) fn is_service_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// nginx `server_name` tokens: hostname characters plus the `*`/`_` wildcards.
pub(crate) fn is_server_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '*' | '_' | '.' | '-'))
}

pub(crate) fn is_upstream_host(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Strict-enough DNS name check: dotted labels, 253 chars total, each label
/// 1-63 chars of `[A-Za-z0-9-]` not starting/ending with `-`, and an
/// alphabetic top-level label. Wildcards are not DNS names.
pub(crate) fn is_dns_name(s: &str) -> bool {
    if s.is_empty() || s.len() > 253 || !s.contains('.') {
        return false;
    }
    let labels: Vec<&str> = s.split('.').collect();
    for label in &labels {
        if label.is_empty() || label.len() > 63 {
            return false;
        }
        if label.starts_with('-') || label.ends_with('-') {
            return false;
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }
    let tld = labels[labels.len() - 1];
    tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic())
}

/// Minimal sanity check: one `@`, no whitespace, dotted domain part.
pub(crate) fn is_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    let (head, tail) = match domain.rsplit_once('.') {
        Some(parts) => parts,
        None => return false,
    };
    !local.is_empty() && !head.is_empty() && !tail.is_empty() && !domain.contains('@')
}

/// Bearer tokens: at least 8 chars of `[A-Za-z0-9._~+-]`.
pub(crate) fn is_auth_token(s: &str) -> bool {
    s.len() >= 8 && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '~' | '+' | '-'))
}

pub(crate) fn is_env_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Characters allowed after the leading slash of a route path prefix.
pub(crate) fn is_path_prefix_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '.' | '_' | '~' | '!' | '$' | '&' | '\'' | '(' | ')' | '*' | '+' | ',' | ':' | '@' | '%' | '/' | '-'
        )
}

pub(crate) fn check_service_name(field: &str, name: &str, errors: &mut Vec<ConfigError>) {
    if !is_service_name(name) {
        errors.push(ConfigError::InvalidField {
            field: field.to_owned(),
            message: format!("'{name}' is invalid; use letters, numbers, '.', '_', '-' (e.g. my-api)"),
        });
    }
}

/// Ports arrive as `u16`, so only the zero value can be out of range.
pub(crate) fn check_port(field: &str, port: u16, errors: &mut Vec<ConfigError>) {
    if port == 0 {
        errors.push(ConfigError::InvalidField {
            field: field.to_owned(),
            message: "must be between 1 and 65535".to_owned(),
        });
    }
}

pub(crate) fn check_domain(field: &str, domain: &str, errors: &mut Vec<ConfigError>) {
    if !is_dns_name(domain) {
        errors.push(ConfigError::InvalidField {
            field: field.to_owned(),
            message: format!("'{domain}' must be a valid DNS name, e.g. api.example.com"),
        });
    }
}

pub(crate) fn check_email(field: &str, email: &str, errors: &mut Vec<ConfigError>) {
    if !is_email(email) {
        errors.push(ConfigError::InvalidField {
            field: field.to_owned(),
            message: format!("'{email}' must be a valid email address, e.g. ops@example.com"),
        });
    }
}

pub(crate) fn check_auth_token(field: &str, token: &str, errors: &mut Vec<ConfigError>) {
    if !is_auth_token(token) {
        errors.push(ConfigError::InvalidField {
            field: field.to_owned(),
            message: "must be >= 8 chars and only contain [A-Za-z0-9._~+-]".to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        simple = { "example.com", true },
        subdomain = { "a-1.api.example.org", true },
        bare = { "localhost", false },
        wildcard = { "_", false },
        numeric_tld = { "example.123", false },
        leading_dash = { "-bad.example.com", false },
        trailing_dot = { "example.com.", false },
    )]
    fn dns_names(input: &str, expected: bool) {
        assert_eq!(is_dns_name(input), expected);
    }

    #[parameterized(
        ok = { "ops@example.com", true },
        no_at = { "ops.example.com", false },
        no_dot = { "ops@example", false },
        spaced = { "o ps@example.com", false },
    )]
    fn emails(input: &str, expected: bool) {
        assert_eq!(is_email(input), expected);
    }

    #[parameterized(
        ok = { "secret-token.01", true },
        short = { "short", false },
        bad_char = { "secret token", false },
    )]
    fn tokens(input: &str, expected: bool) {
        assert_eq!(is_auth_token(input), expected);
    }

    #[test]
    fn service_names_must_start_alphanumeric() {
        assert!(is_service_name("my-api.v2"));
        assert!(!is_service_name("-api"));
        assert!(!is_service_name(""));
        assert!(!is_service_name("my api"));
    }
}
