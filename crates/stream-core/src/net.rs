//! Peer target resolution glue.
//!
//! Targets are `host:port` strings. Hosts ending in `.local` are resolved
//! through the system resolver first; the multicast-DNS fallback lives in an
//! external helper, so an unresolved name is passed through unchanged with a
//! warning and the dial is left to fail on its own.

use tokio::net::lookup_host;
use tracing::{debug, warn};

/// Split `target` into host and optional port, tolerating IPv6 literals.
pub fn split_host_port(target: &str) -> (&str, Option<&str>) {
    match target.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            (host, Some(port))
        }
        _ => (target, None),
    }
}

/// Normalize `target` to `host:port`, resolving `.local` names when the
/// system resolver knows them.
pub async fn resolve_target(target: &str, default_port: u16) -> String {
    let (host, port) = split_host_port(target);
    let port = port.map(str::to_string).unwrap_or_else(|| default_port.to_string());

    let trimmed = host.trim_end_matches('.');
    if !trimmed.ends_with(".local") {
        return format!("{host}:{port}");
    }

    match lookup_host(format!("{trimmed}:{port}")).await {
        Ok(addrs) => {
            let mut fallback = None;
            for addr in addrs {
                if addr.is_ipv4() {
                    debug!(%host, ip = %addr.ip(), "resolved .local peer");
                    return format!("{}:{port}", addr.ip());
                }
                fallback.get_or_insert(addr);
            }
            match fallback {
                Some(addr) => format!("{}:{port}", addr.ip()),
                None => format!("{host}:{port}"),
            }
        }
        Err(err) => {
            warn!(%host, %err, "system resolver failed for .local peer; passing through");
            format!("{host}:{port}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_port() {
        assert_eq!(split_host_port("cam.local:50051"), ("cam.local", Some("50051")));
        assert_eq!(split_host_port("cam.local"), ("cam.local", None));
        assert_eq!(split_host_port("192.168.0.9:50050"), ("192.168.0.9", Some("50050")));
    }

    #[tokio::test]
    async fn plain_hosts_pass_through() {
        assert_eq!(resolve_target("127.0.0.1:50051", 50051).await, "127.0.0.1:50051");
        assert_eq!(resolve_target("compute-host", 50051).await, "compute-host:50051");
    }
}
