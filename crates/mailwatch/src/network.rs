//! Best-effort network reachability.

use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};

use async_trait::async_trait;
use log::debug;

/// Answers whether checking mail is worth attempting right now.
///
/// Implementations fail open: when reachability cannot be determined they
/// report the network as available and let the real check surface errors.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn is_network_available(&self) -> bool;
}

/// Answer for one probe target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Available,
    Unreachable,
    Unknown,
}

/// Asks the OS for a route to public addresses, one per address family.
///
/// Connecting a UDP socket only selects a route; no packet is sent. The
/// network counts as offline only when every target answers "network
/// unreachable", so IPv4-only and IPv6-only hosts both stay online.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    targets: Vec<SocketAddr>,
}

impl SystemProbe {
    pub fn new() -> Self {
        Self {
            targets: vec![
                SocketAddr::from(([1, 1, 1, 1], 53)),
                SocketAddr::from(([0x2606, 0x4700, 0x4700, 0, 0, 0, 0, 0x1111], 53)),
            ],
        }
    }

    pub fn with_target(target: SocketAddr) -> Self {
        Self::with_targets(vec![target])
    }

    pub fn with_targets(targets: Vec<SocketAddr>) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }

    fn route_to(target: SocketAddr) -> Route {
        let bind_addr: SocketAddr = if target.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let result = UdpSocket::bind(bind_addr).and_then(|socket| socket.connect(target));
        match result {
            Ok(()) => Route::Available,
            Err(e) if e.kind() == ErrorKind::NetworkUnreachable => {
                debug!("No route to {}: {}", target, e);
                Route::Unreachable
            }
            Err(e) => {
                debug!("Route to {} unknown: {}", target, e);
                Route::Unknown
            }
        }
    }

    fn probe_blocking(targets: &[SocketAddr]) -> bool {
        is_online(targets.iter().map(|target| Self::route_to(*target)))
    }
}

/// Offline only when at least one target was probed and all of them were
/// unreachable.
fn is_online(routes: impl IntoIterator<Item = Route>) -> bool {
    let mut probed = false;
    for route in routes {
        if route != Route::Unreachable {
            return true;
        }
        probed = true;
    }
    !probed
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReachabilityProbe for SystemProbe {
    async fn is_network_available(&self) -> bool {
        let targets = self.targets.clone();
        tokio::task::spawn_blocking(move || Self::probe_blocking(&targets))
            .await
            .unwrap_or(true)
    }
}

/// Probe that always reports the network as available.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

#[async_trait]
impl ReachabilityProbe for AlwaysOnline {
    async fn is_network_available(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_is_reachable() {
        let probe = SystemProbe::with_target(SocketAddr::from(([127, 0, 0, 1], 9)));
        assert!(probe.is_network_available().await);
    }

    #[test]
    fn test_default_targets_cover_both_families() {
        let probe = SystemProbe::new();
        assert!(probe.targets().iter().any(SocketAddr::is_ipv4));
        assert!(probe.targets().iter().any(SocketAddr::is_ipv6));
    }

    #[test]
    fn test_offline_only_when_every_family_unreachable() {
        use Route::*;

        // IPv6-only host
        assert!(is_online([Unreachable, Available]));
        // IPv4-only host
        assert!(is_online([Available, Unreachable]));
        assert!(is_online([Unreachable, Unknown]));
        assert!(!is_online([Unreachable, Unreachable]));
        assert!(is_online(Vec::<Route>::new()));
    }

    #[tokio::test]
    async fn test_always_online() {
        assert!(AlwaysOnline.is_network_available().await);
    }
}
