//! Resource monitor
//!
//! Samples the process resident-set size on an interval and, when a
//! configured absolute or relative threshold is crossed, runs an
//! out-of-cycle cleanup pass that expires idle sessions and streams at half
//! their normal windows, ahead of the scheduled sweeps.
//!
//! Sampling reads `/proc/self/statm`; on platforms without procfs the
//! monitor logs once and idles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::registry::ClientRegistry;
use crate::stream::StreamManager;

use super::shutdown::Shutdown;

/// Assumed page size for `/proc/self/statm` resident pages
const PAGE_SIZE: u64 = 4096;

/// Memory-pressure watcher with early-cleanup side effects
pub struct ResourceMonitor {
    interval: Duration,
    max_rss_bytes: Option<u64>,
    max_rss_ratio: Option<f64>,
    client_timeout: Duration,
    stream_window: Duration,
    registry: Arc<ClientRegistry>,
    streams: Arc<StreamManager>,
}

impl ResourceMonitor {
    /// Create a monitor over the registry and stream manager
    pub fn new(
        interval: Duration,
        max_rss_bytes: Option<u64>,
        max_rss_ratio: Option<f64>,
        client_timeout: Duration,
        stream_window: Duration,
        registry: Arc<ClientRegistry>,
        streams: Arc<StreamManager>,
    ) -> Self {
        Self {
            interval,
            max_rss_bytes,
            max_rss_ratio,
            client_timeout,
            stream_window,
            registry,
            streams,
        }
    }

    /// True when no threshold is configured; the loop still runs but only
    /// logs samples at trace level
    pub fn is_passive(&self) -> bool {
        self.max_rss_bytes.is_none() && self.max_rss_ratio.is_none()
    }

    /// Sampling loop; exits on shutdown
    pub async fn run(self, shutdown: Shutdown) {
        let total = total_memory_bytes();
        if sample_rss_bytes().is_none() {
            tracing::warn!("Resident-set sampling unavailable, resource monitor idle");
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.wait() => break,
            }

            let rss = match sample_rss_bytes() {
                Some(rss) => rss,
                None => continue,
            };
            tracing::trace!(rss_bytes = rss, "Memory sample");

            if self.over_threshold(rss, total) {
                self.early_cleanup(rss).await;
            }
        }
        tracing::debug!("Resource monitor stopped");
    }

    /// One immediate check, bypassing the interval (tests, embedders)
    pub async fn check_now(&self) -> bool {
        let rss = match sample_rss_bytes() {
            Some(rss) => rss,
            None => return false,
        };
        if self.over_threshold(rss, total_memory_bytes()) {
            self.early_cleanup(rss).await;
            return true;
        }
        false
    }

    fn over_threshold(&self, rss: u64, total: Option<u64>) -> bool {
        if let Some(limit) = self.max_rss_bytes {
            if rss > limit {
                return true;
            }
        }
        if let (Some(ratio), Some(total)) = (self.max_rss_ratio, total) {
            if total > 0 && (rss as f64) / (total as f64) > ratio {
                return true;
            }
        }
        false
    }

    async fn early_cleanup(&self, rss: u64) {
        let now = Instant::now();
        let expired = self
            .registry
            .sweep_expired(self.client_timeout / 2, now)
            .await
            .len();
        let closed = self.streams.sweep_with_window(self.stream_window / 2, now).await;

        tracing::warn!(
            rss_bytes = rss,
            sessions_expired = expired,
            streams_closed = closed,
            "Memory pressure, ran early cleanup"
        );
    }
}

/// Resident-set size of this process, if procfs is available
pub fn sample_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    parse_statm_rss(&statm).map(|pages| pages * PAGE_SIZE)
}

/// Total system memory, if procfs is available
pub fn total_memory_bytes() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_total(&meminfo)
}

/// Second field of statm is the resident page count
fn parse_statm_rss(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}

/// `MemTotal:` line of meminfo, reported in kB
fn parse_meminfo_total(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AccessControl;
    use crate::queue::SocketId;
    use crate::stats::ReflectorStats;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    #[test]
    fn statm_parsing() {
        assert_eq!(parse_statm_rss("12345 678 90 1 0 2 0\n"), Some(678));
        assert_eq!(parse_statm_rss(""), None);
        assert_eq!(parse_statm_rss("garbage"), None);
    }

    #[test]
    fn meminfo_parsing() {
        let meminfo = "MemTotal:       16313528 kB\nMemFree:         1829748 kB\n";
        assert_eq!(parse_meminfo_total(meminfo), Some(16313528 * 1024));
        assert_eq!(parse_meminfo_total("MemFree: 5 kB\n"), None);
    }

    fn monitor(
        max_rss_bytes: Option<u64>,
        max_rss_ratio: Option<f64>,
    ) -> (ResourceMonitor, Arc<ClientRegistry>, Arc<StreamManager>) {
        let stats = Arc::new(ReflectorStats::new());
        let registry = Arc::new(ClientRegistry::new(
            16,
            Arc::new(AccessControl::new()),
            Arc::clone(&stats),
        ));
        let streams = Arc::new(StreamManager::new(
            8,
            Duration::from_millis(2000),
            Arc::clone(&stats),
        ));
        let mon = ResourceMonitor::new(
            Duration::from_secs(10),
            max_rss_bytes,
            max_rss_ratio,
            Duration::from_secs(60),
            Duration::from_millis(2000),
            Arc::clone(&registry),
            Arc::clone(&streams),
        );
        (mon, registry, streams)
    }

    #[test]
    fn threshold_logic() {
        let (mon, _, _) = monitor(Some(1_000_000), None);
        assert!(mon.over_threshold(2_000_000, None));
        assert!(!mon.over_threshold(500_000, None));

        let (mon, _, _) = monitor(None, Some(0.5));
        assert!(mon.over_threshold(600, Some(1000)));
        assert!(!mon.over_threshold(400, Some(1000)));
        // No total available: ratio check cannot fire
        assert!(!mon.over_threshold(600, None));
    }

    #[test]
    fn passive_without_limits() {
        let (mon, _, _) = monitor(None, None);
        assert!(mon.is_passive());
        assert!(!mon.over_threshold(u64::MAX, Some(1)));
    }

    #[tokio::test]
    async fn early_cleanup_tightens_the_windows() {
        let (mon, registry, streams) = monitor(Some(1), None);
        let start = Instant::now();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 50000);

        registry
            .register(addr, "N0CALL", 1, SocketId(0), start)
            .await
            .unwrap();
        streams
            .begin_or_reject(1, addr, "N0CALL", 7, std::sync::Weak::new(), start)
            .await
            .unwrap();

        // Idle for more than half of each window but less than the full one:
        // the normal sweeps would keep both, early cleanup removes both.
        // early_cleanup uses Instant::now(), so make "half windows" tiny by
        // exercising the sweep directly with a forged now.
        let forged_now = start + Duration::from_secs(31);
        let expired = registry.sweep_expired(Duration::from_secs(30), forged_now).await;
        assert_eq!(expired.len(), 1);
        let closed = streams
            .sweep_with_window(Duration::from_millis(1000), forged_now)
            .await;
        assert_eq!(closed, 1);

        // check_now on the emptied state is harmless regardless of platform
        let _ = mon.check_now().await;
    }
}
