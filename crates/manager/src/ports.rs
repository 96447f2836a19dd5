// SPDX-FileCopyrightText: 2026 Aaron Dewes <aaron@nirvati.org>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;

use crate::settings::PortRange;

/// Maximum number of concurrent bind probes while summarizing port usage
pub const PROBE_CONCURRENCY: usize = 40;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PortError {
    #[error("No free port left in the configured port ranges")]
    Exhausted,
}

/// Checks whether the OS would currently let us listen on a port.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Any failure to bind counts as "not free".
    async fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding (and immediately releasing) a listener on loopback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProbe;

#[async_trait]
impl PortProbe for TcpPortProbe {
    async fn is_free(&self, port: u16) -> bool {
        match tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, port)).await {
            Ok(listener) => {
                drop(listener);
                true
            }
            Err(e) => {
                tracing::debug!("Port {port} is not bindable: {e}");
                false
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortSummary {
    pub free: usize,
    pub total: usize,
}

/// Returns the first port, in configured range order, that is neither reserved nor held by
/// anything else on this host. Nothing is reserved by this call.
pub async fn find_available_port(
    ranges: &[PortRange],
    reserved: &HashSet<u16>,
    probe: &dyn PortProbe,
) -> Result<u16, PortError> {
    // Overlapping ranges would otherwise probe the same port twice
    let mut tried = HashSet::new();
    for range in ranges {
        for port in range.ports() {
            if reserved.contains(&port) || !tried.insert(port) {
                continue;
            }
            if probe.is_free(port).await {
                return Ok(port);
            }
        }
    }
    Err(PortError::Exhausted)
}

/// Counts free ports across all ranges. Ports covered by several ranges are counted once.
pub async fn port_summary(ranges: &[PortRange], probe: &dyn PortProbe) -> PortSummary {
    let ports: BTreeSet<u16> = ranges.iter().flat_map(|range| range.ports()).collect();
    let total = ports.len();
    let free = futures_util::stream::iter(ports)
        .map(|port| probe.is_free(port))
        .buffer_unordered(PROBE_CONCURRENCY)
        .filter(|free| futures_util::future::ready(*free))
        .count()
        .await;
    PortSummary { free, total }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Treats every port in `busy` as held by a foreign process and records probe order.
    #[derive(Default)]
    struct FakeProbe {
        busy: HashSet<u16>,
        probed: Mutex<Vec<u16>>,
    }

    impl FakeProbe {
        fn busy(ports: &[u16]) -> Self {
            FakeProbe {
                busy: ports.iter().copied().collect(),
                probed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PortProbe for FakeProbe {
        async fn is_free(&self, port: u16) -> bool {
            self.probed.lock().unwrap().push(port);
            !self.busy.contains(&port)
        }
    }

    fn range(start: u32, end: u32) -> PortRange {
        PortRange::new(start, end).unwrap()
    }

    #[tokio::test]
    async fn test_first_free_port_in_range_order() {
        let probe = FakeProbe::default();
        let ranges = [range(9000, 9005), range(8000, 8005)];
        let port = find_available_port(&ranges, &HashSet::new(), &probe)
            .await
            .unwrap();
        assert_eq!(port, 9000);
    }

    #[tokio::test]
    async fn test_skips_reserved_without_probing() {
        let probe = FakeProbe::default();
        let reserved: HashSet<u16> = [8000, 8001].into_iter().collect();
        let port = find_available_port(&[range(8000, 8005)], &reserved, &probe)
            .await
            .unwrap();
        assert_eq!(port, 8002);
        assert_eq!(*probe.probed.lock().unwrap(), vec![8002]);
    }

    #[tokio::test]
    async fn test_skips_ports_held_outside() {
        let probe = FakeProbe::busy(&[8000, 8001, 8002]);
        let ranges = [range(8000, 8002), range(8500, 8501)];
        let port = find_available_port(&ranges, &HashSet::new(), &probe)
            .await
            .unwrap();
        assert_eq!(port, 8500);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let probe = FakeProbe::busy(&[8002]);
        let reserved: HashSet<u16> = [8000, 8001].into_iter().collect();
        let result = find_available_port(&[range(8000, 8002)], &reserved, &probe).await;
        assert_eq!(result, Err(PortError::Exhausted));
    }

    #[tokio::test]
    async fn test_overlapping_ranges_probe_each_port_once() {
        let probe = FakeProbe::busy(&[8000, 8001, 8002, 8003]);
        let result = find_available_port(&[range(8000, 8002), range(8001, 8003)], &HashSet::new(), &probe).await;
        assert_eq!(result, Err(PortError::Exhausted));
        assert_eq!(probe.probed.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_never_returns_reserved_or_out_of_range() {
        let ranges = [range(8000, 8009), range(8100, 8104)];
        for reserved_count in 0..15u16 {
            let reserved: HashSet<u16> = ranges
                .iter()
                .flat_map(|r| r.ports())
                .take(reserved_count as usize)
                .collect();
            let probe = FakeProbe::busy(&[8003, 8101]);
            match find_available_port(&ranges, &reserved, &probe).await {
                Ok(port) => {
                    assert!(!reserved.contains(&port));
                    assert!(!probe.busy.contains(&port));
                    assert!(ranges.iter().any(|r| r.contains(port)));
                }
                Err(PortError::Exhausted) => {
                    assert!(ranges
                        .iter()
                        .flat_map(|r| r.ports())
                        .all(|p| reserved.contains(&p) || probe.busy.contains(&p)));
                }
            }
        }
    }

    #[tokio::test]
    async fn test_summary_counts_unique_ports() {
        let probe = FakeProbe::busy(&[8001, 8004]);
        let summary = port_summary(&[range(8000, 8004), range(8003, 8005)], &probe).await;
        assert_eq!(summary, PortSummary { free: 4, total: 6 });
    }

    #[tokio::test]
    async fn test_tcp_probe_detects_bound_port() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!TcpPortProbe.is_free(port).await);
        drop(listener);
    }
}
