//! Mesh bind-address resolution via the tailscale client.

use std::process::Command;

use moor_config::MeshResolver;

pub struct TailscaleMesh;

impl MeshResolver for TailscaleMesh {
    fn interface_ip(&self) -> std::result::Result<String, String> {
        let output = Command::new("tailscale")
            .args(["ip", "--4"])
            .output()
            .map_err(|err| format!("could not run tailscale: {err}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("tailscale ip failed: {}", stderr.trim()));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| "tailscale reported no IPv4 address".to_owned())
    }
}
