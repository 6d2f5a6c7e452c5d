//! Host port availability probing and free-port suggestion.
//!
//! Probing binds a listener and immediately drops it. That is inherently
//! racy against other processes, so availability here means "free at check
//! time"; `docker compose up` remains the final arbiter.

use std::net::TcpListener;

use crate::error::{DeployError, Result};

/// Conventional service ports tried before a linear scan.
pub const PRESET_PORTS: [u16; 6] = [8080, 8081, 8088, 8888, 9000, 9443];

/// How far past the requested port the linear scan looks.
const SCAN_SPAN: u16 = 500;

/// Answers whether `bind:port` can be bound right now, with the bind error
/// on failure. The executor takes this as a seam so tests can fake
/// occupancy.
pub trait PortProber {
    fn probe(&self, bind: &str, port: u16) -> std::result::Result<(), String>;

    fn is_free(&self, bind: &str, port: u16) -> bool {
        self.probe(bind, port).is_ok()
    }
}

pub struct TcpProber;

impl PortProber for TcpProber {
    fn probe(&self, bind: &str, port: u16) -> std::result::Result<(), String> {
        match TcpListener::bind((bind, port)) {
            Ok(listener) => {
                drop(listener);
                Ok(())
            }
            Err(err) => Err(err.to_string()),
        }
    }
}

/// Suggest a free port near `taken`: presets first, then a bounded scan
/// upward from `max(taken, 1024)`. Ports in `avoid` are never suggested.
pub fn suggest_port(
    prober: &dyn PortProber,
    bind: &str,
    taken: u16,
    avoid: &[u16],
) -> Option<u16> {
    let blocked = |port: u16| port == taken || avoid.contains(&port);
    for port in PRESET_PORTS {
        if !blocked(port) && prober.is_free(bind, port) {
            return Some(port);
        }
    }
    let start = taken.max(1024);
    let end = start.saturating_add(SCAN_SPAN).min(65535);
    (start..=end).find(|&port| !blocked(port) && prober.is_free(bind, port))
}

/// Fail with the bind error and a suggestion if any required port cannot
/// be bound. The other required ports are excluded from suggestions.
pub fn ensure_available(prober: &dyn PortProber, bind: &str, ports: &[u16]) -> Result<()> {
    for &port in ports {
        if let Err(reason) = prober.probe(bind, port) {
            return Err(DeployError::PortConflict {
                bind: bind.to_owned(),
                port,
                reason,
                suggestion: suggest_port(prober, bind, port, ports),
            });
        }
    }
    Ok(())
}
