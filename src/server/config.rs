//! Reflector configuration
//!
//! An immutable snapshot consumed at startup. Parsing a configuration file
//! into this struct is the embedding application's concern; access-control
//! list files are the one reloadable input and are re-read at runtime.

use std::net::SocketAddr;
use std::time::Duration;

use crate::acl::AclPaths;

/// Reflector configuration options
#[derive(Debug, Clone)]
pub struct ReflectorConfig {
    /// Addresses to bind; one ingestion loop runs per socket
    pub bind_addrs: Vec<SocketAddr>,

    /// Reflector callsign, echoed in poll/unlink acknowledgements
    pub callsign: String,

    /// Reflector name, reported in status replies (16-byte field)
    pub name: String,

    /// Description, reported in status replies (14-byte field)
    pub description: String,

    /// Maximum registered sessions; overflow is rejected, never evicted
    pub max_clients: usize,

    /// Maximum concurrently tracked transmissions
    pub max_streams: usize,

    /// Maximum scheduler table entries
    pub max_scheduled_tasks: usize,

    /// Capacity of each worker's ingestion queue
    pub queue_capacity: usize,

    /// Worker pool size; ingestion shards across workers by sender address
    pub workers: usize,

    /// Session inactivity window before the sweep expires it
    pub client_timeout: Duration,

    /// Stream inactivity window before the sweep closes it
    pub stream_inactivity: Duration,

    /// Bound on every socket receive wait
    pub recv_timeout: Duration,

    /// Bound on every socket send
    pub send_timeout: Duration,

    /// Queue-drain budget during shutdown
    pub drain_deadline: Duration,

    /// Worker-join budget during shutdown, after the drain
    pub join_deadline: Duration,

    /// Longest the scheduler waits on one task before detaching it
    pub task_slice: Duration,

    /// Client timeout sweep cadence
    pub client_sweep_interval: Duration,

    /// Stream timeout sweep cadence
    pub stream_sweep_interval: Duration,

    /// Access-control list reload cadence
    pub acl_reload_interval: Duration,

    /// Directory refresh cadence
    pub directory_refresh_interval: Duration,

    /// Resource monitor sampling cadence
    pub memory_check_interval: Duration,

    /// Absolute resident-set limit; crossing it triggers early cleanup
    pub max_rss_bytes: Option<u64>,

    /// Resident-set limit as a fraction of total system memory
    pub max_rss_ratio: Option<f64>,

    /// Access-control list file paths
    pub acl_paths: AclPaths,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            bind_addrs: vec!["0.0.0.0:42000".parse().unwrap()],
            callsign: "YSFR".to_string(),
            name: "YSFR Reflector".to_string(),
            description: "ysfr-rs".to_string(),
            max_clients: 200,
            max_streams: 64,
            max_scheduled_tasks: 16,
            queue_capacity: 256,
            workers: 4,
            client_timeout: Duration::from_secs(60),
            stream_inactivity: Duration::from_millis(2000),
            recv_timeout: Duration::from_millis(500),
            send_timeout: Duration::from_millis(500),
            drain_deadline: Duration::from_secs(3),
            join_deadline: Duration::from_secs(2),
            task_slice: Duration::from_secs(1),
            client_sweep_interval: Duration::from_secs(10),
            stream_sweep_interval: Duration::from_millis(500),
            acl_reload_interval: Duration::from_secs(300),
            directory_refresh_interval: Duration::from_secs(60),
            memory_check_interval: Duration::from_secs(10),
            max_rss_bytes: None,
            max_rss_ratio: None,
            acl_paths: AclPaths::default(),
        }
    }
}

impl ReflectorConfig {
    /// Create a config bound to one address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addrs: vec![addr],
            ..Default::default()
        }
    }

    /// Replace the bind addresses
    pub fn bind(mut self, addrs: Vec<SocketAddr>) -> Self {
        self.bind_addrs = addrs;
        self
    }

    /// Set the reflector callsign
    pub fn callsign(mut self, callsign: impl Into<String>) -> Self {
        self.callsign = callsign.into();
        self
    }

    /// Set the reflector name and description
    pub fn identity(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.name = name.into();
        self.description = description.into();
        self
    }

    /// Set the session capacity
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Set the stream capacity
    pub fn max_streams(mut self, max: usize) -> Self {
        self.max_streams = max;
        self
    }

    /// Set the worker pool size
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the per-worker queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the session inactivity window
    pub fn client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Set the stream inactivity window
    pub fn stream_inactivity(mut self, window: Duration) -> Self {
        self.stream_inactivity = window;
        self
    }

    /// Set the shutdown drain budget
    pub fn drain_deadline(mut self, deadline: Duration) -> Self {
        self.drain_deadline = deadline;
        self
    }

    /// Set the access-control list paths
    pub fn acl_paths(mut self, paths: AclPaths) -> Self {
        self.acl_paths = paths;
        self
    }

    /// Set the memory thresholds for early cleanup
    pub fn memory_limits(mut self, max_rss_bytes: Option<u64>, max_rss_ratio: Option<f64>) -> Self {
        self.max_rss_bytes = max_rss_bytes;
        self.max_rss_ratio = max_rss_ratio;
        self
    }

    /// Check the snapshot for values the reflector cannot start with
    pub fn validate(&self) -> Result<(), String> {
        if self.bind_addrs.is_empty() {
            return Err("at least one bind address is required".into());
        }
        if self.max_clients == 0 {
            return Err("max_clients must be at least 1".into());
        }
        if self.max_streams == 0 {
            return Err("max_streams must be at least 1".into());
        }
        if self.workers == 0 {
            return Err("workers must be at least 1".into());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".into());
        }
        if self.callsign.trim().is_empty() {
            return Err("callsign must not be empty".into());
        }
        if let Some(ratio) = self.max_rss_ratio {
            if !(0.0..=1.0).contains(&ratio) {
                return Err("max_rss_ratio must be within 0.0..=1.0".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReflectorConfig::default();

        assert_eq!(config.bind_addrs.len(), 1);
        assert_eq!(config.bind_addrs[0].port(), 42000);
        assert_eq!(config.max_clients, 200);
        assert_eq!(config.max_streams, 64);
        assert_eq!(config.workers, 4);
        assert_eq!(config.stream_inactivity, Duration::from_millis(2000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:43000".parse().unwrap();
        let config = ReflectorConfig::with_addr(addr);

        assert_eq!(config.bind_addrs, vec![addr]);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:43001".parse().unwrap();
        let config = ReflectorConfig::with_addr(addr)
            .callsign("W1AW")
            .identity("Test Reflector", "unit test")
            .max_clients(50)
            .max_streams(8)
            .workers(2)
            .queue_capacity(32)
            .client_timeout(Duration::from_secs(30))
            .stream_inactivity(Duration::from_millis(1500));

        assert_eq!(config.callsign, "W1AW");
        assert_eq!(config.max_clients, 50);
        assert_eq!(config.max_streams, 8);
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 32);
        assert_eq!(config.client_timeout, Duration::from_secs(30));
        assert_eq!(config.stream_inactivity, Duration::from_millis(1500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_workers_floor_at_one() {
        let config = ReflectorConfig::default().workers(0);
        assert_eq!(config.workers, 1);
    }

    #[test]
    fn test_validate_rejects_empty_binds() {
        let config = ReflectorConfig::default().bind(Vec::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let config = ReflectorConfig::default().memory_limits(None, Some(1.5));
        assert!(config.validate().is_err());
    }
}
