//! Host checks and docker daemon tuning performed before any deploy step.

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::error::{DeployError, Result};
use crate::runner::{CommandRequest, CommandRunner};

const DAEMON_JSON: &str = "/etc/docker/daemon.json";

/// Deployment writes under `/opt`, `/etc/nginx` and the docker socket.
pub fn require_root() -> Result<()> {
    if nix::unistd::geteuid().is_root() {
        Ok(())
    } else {
        Err(DeployError::Preflight("must run as root (try sudo)".to_owned()))
    }
}

/// Non-fatal: warn when the host is not a debian-family distribution, the
/// only family the nginx/systemctl handling is exercised on.
pub fn check_host_os() {
    let Ok(content) = std::fs::read_to_string("/etc/os-release") else {
        tracing::warn!("/etc/os-release missing, cannot verify host distribution");
        return;
    };
    if !os_release_is_debian_family(&content) {
        tracing::warn!("untested host distribution, expecting debian/ubuntu behavior");
    }
}

fn os_release_is_debian_family(content: &str) -> bool {
    for line in content.lines() {
        if let Some(value) = line.strip_prefix("ID=").or_else(|| line.strip_prefix("ID_LIKE=")) {
            let value = value.trim_matches('"');
            if value.split_whitespace().any(|id| id == "debian" || id == "ubuntu") {
                return true;
            }
        }
    }
    false
}

/// Serialize registry transfers and pin fallback DNS in the docker daemon
/// config; flaky registries and resolver failures are the dominant cause of
/// failed pulls on small hosts. Restarts the daemon only when the file
/// actually changed. Returns whether a restart happened.
pub fn tune_docker_daemon(runner: &dyn CommandRunner) -> Result<bool> {
    tune_docker_daemon_at(runner, Path::new(DAEMON_JSON))
}

fn tune_docker_daemon_at(runner: &dyn CommandRunner, path: &Path) -> Result<bool> {
    let original = match std::fs::read_to_string(path) {
        Ok(content) => Some(content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(DeployError::io(format!("reading {}", path.display()))(err)),
    };

    let mut root: Map<String, Value> = match &original {
        None => Map::new(),
        Some(content) => match serde_json::from_str::<Value>(content) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(DeployError::Preflight(format!(
                    "{} exists but is not a JSON object; fix it manually",
                    path.display()
                )))
            }
        },
    };

    let mut changed = false;
    for (key, value) in [
        ("max-concurrent-downloads", json!(1)),
        ("max-concurrent-uploads", json!(1)),
        ("dns", json!(["1.1.1.1", "8.8.8.8"])),
    ] {
        if !root.contains_key(key) {
            root.insert(key.to_owned(), value);
            changed = true;
        }
    }
    if !changed {
        return Ok(false);
    }

    if let Some(content) = &original {
        let backup = path.with_extension("json.bak");
        std::fs::write(&backup, content)
            .map_err(DeployError::io(format!("backing up to {}", backup.display())))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(DeployError::io(format!("creating {}", parent.display())))?;
    }
    let rendered = serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|err| DeployError::Preflight(format!("serializing daemon config: {err}")))?;
    std::fs::write(path, rendered)
        .map_err(DeployError::io(format!("writing {}", path.display())))?;

    tracing::info!(path = %path.display(), "docker daemon config updated, restarting docker");
    runner.run(&CommandRequest::new("restart docker", "systemctl restart docker"))?;
    Ok(true)
}
