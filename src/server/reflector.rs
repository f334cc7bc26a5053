//! Reflector server
//!
//! Binds the UDP sockets and wires the pipeline together:
//!
//! ```text
//! UdpSocket (one ingestion loop per socket)
//!     |  address gate (ACL), the cheapest rejection, before any queueing
//!     v
//! BoundedQueue (one per worker, sharded by sender address)
//!     |
//!     v
//! worker: Packet::decode() -> dispatch
//!     |         Poll/Login/Unlink/Status -> registry + acks
//!     |         Data -> StreamManager -> fan-out via registry
//!     v
//! send_to on the session's owning socket (no lock held across a send)
//! ```
//!
//! The scheduler and resource monitor run alongside; every loop observes
//! the shared shutdown flag and every wait is bounded.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::acl::AccessControl;
use crate::directory::{DirectoryEntry, DirectoryStore};
use crate::error::{Error, Result};
use crate::protocol::{
    encode_poll_ack, encode_status_reply, encode_unlink_ack, DataFrame, FramePosition, Packet,
};
use crate::queue::{self, BoundedQueue, Pop, QueueReceiver, RawDatagram, SocketId};
use crate::registry::{ClientRegistry, RegistryError, SharedSession};
use crate::sched::{Scheduler, TaskId};
use crate::stats::{ReflectorStats, StatsSnapshot};
use crate::stream::{StreamError, StreamManager};

use super::config::ReflectorConfig;
use super::monitor::ResourceMonitor;
use super::shutdown::{Shutdown, WorkerSet};

/// Receive buffer; anything longer than the longest defined packet decodes
/// as malformed rather than being silently truncated
const RECV_BUFFER_SIZE: usize = 2048;

/// UDP digital-voice reflector
pub struct Reflector {
    shared: Arc<Shared>,
    scheduler: Arc<Scheduler>,
    acl_reload_task: TaskId,
}

struct Shared {
    config: ReflectorConfig,
    sockets: Vec<Arc<UdpSocket>>,
    acl: Arc<AccessControl>,
    stats: Arc<ReflectorStats>,
    registry: Arc<ClientRegistry>,
    streams: Arc<StreamManager>,
    directory: Arc<dyn DirectoryStore>,
    shutdown: Shutdown,
}

impl Reflector {
    /// Bind all configured sockets and assemble the engine
    ///
    /// Fatal-startup failures (invalid config, unbindable address,
    /// unreadable ACL file) are returned; nothing is spawned yet.
    pub async fn bind(
        config: ReflectorConfig,
        directory: Arc<dyn DirectoryStore>,
    ) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let acl = Arc::new(AccessControl::from_paths(config.acl_paths.clone())?);
        let stats = Arc::new(ReflectorStats::new());
        let registry = Arc::new(ClientRegistry::new(
            config.max_clients,
            Arc::clone(&acl),
            Arc::clone(&stats),
        ));
        let streams = Arc::new(StreamManager::new(
            config.max_streams,
            config.stream_inactivity,
            Arc::clone(&stats),
        ));

        let mut sockets = Vec::with_capacity(config.bind_addrs.len());
        for addr in &config.bind_addrs {
            let socket = UdpSocket::bind(addr).await?;
            tracing::info!(addr = %socket.local_addr()?, "Reflector socket bound");
            sockets.push(Arc::new(socket));
        }

        let scheduler = Arc::new(Scheduler::new(config.max_scheduled_tasks, config.task_slice));
        let shutdown = Shutdown::new();

        let shared = Arc::new(Shared {
            config,
            sockets,
            acl,
            stats,
            registry,
            streams,
            directory,
            shutdown,
        });

        let acl_reload_task = register_maintenance_tasks(&scheduler, &shared)?;

        Ok(Self {
            shared,
            scheduler,
            acl_reload_task,
        })
    }

    /// Addresses the reflector actually bound (resolves port 0)
    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.shared
            .sockets
            .iter()
            .map(|s| s.local_addr().map_err(Error::from))
            .collect()
    }

    /// Handle for triggering shutdown from outside
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shared.shutdown.clone()
    }

    /// Counter snapshot
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// The session registry
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.shared.registry
    }

    /// The stream manager
    pub fn streams(&self) -> &Arc<StreamManager> {
        &self.shared.streams
    }

    /// The access-control sets
    pub fn access_control(&self) -> &Arc<AccessControl> {
        &self.shared.acl
    }

    /// Re-read the ACL list files immediately (reload signal)
    ///
    /// Runs through the scheduler so a slow filesystem cannot stall the
    /// caller past the task slice.
    pub async fn reload_acl(&self) {
        tracing::info!("Reload requested");
        if let Err(e) = self.scheduler.run_now(self.acl_reload_task).await {
            tracing::error!(error = %e, "ACL reload task missing");
        }
    }

    /// Run until the internal shutdown flag is triggered
    ///
    /// Spawns the ingestion loops, worker pool, scheduler, and resource
    /// monitor, then performs the ordered teardown: ingestion stops on the
    /// flag, queues drain, workers are joined within the configured
    /// deadlines, stragglers are logged and abandoned.
    pub async fn run(&self) -> Result<()> {
        let shared = &self.shared;
        let config = &shared.config;
        let mut workers = WorkerSet::new();

        // One bounded queue per worker; ingestion shards by sender address
        // so frames from one origin stay in arrival order.
        let mut producers = Vec::with_capacity(config.workers);
        let mut receivers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let (tx, rx) = queue::channel(config.queue_capacity);
            producers.push(tx);
            receivers.push(rx);
        }

        for (index, receiver) in receivers.into_iter().enumerate() {
            workers.spawn(
                format!("worker-{}", index),
                worker_loop(Arc::clone(shared), receiver),
            );
        }
        for index in 0..shared.sockets.len() {
            workers.spawn(
                format!("ingest-{}", index),
                ingestion_loop(Arc::clone(shared), index, producers.clone()),
            );
        }
        workers.spawn(
            "scheduler",
            Arc::clone(&self.scheduler).run(shared.shutdown.clone()),
        );

        let monitor = ResourceMonitor::new(
            config.memory_check_interval,
            config.max_rss_bytes,
            config.max_rss_ratio,
            config.client_timeout,
            config.stream_inactivity,
            Arc::clone(&shared.registry),
            Arc::clone(&shared.streams),
        );
        workers.spawn("resource-monitor", monitor.run(shared.shutdown.clone()));

        // Our producer handles must drop so queues close once ingestion
        // loops (holding the remaining clones) exit.
        drop(producers);

        tracing::info!(
            sockets = shared.sockets.len(),
            workers = config.workers,
            "Reflector running"
        );

        shared.shutdown.wait().await;
        tracing::info!("Reflector draining");

        let budget = config.drain_deadline + config.join_deadline;
        let stragglers = workers.join_all(budget).await;
        if stragglers > 0 {
            tracing::warn!(stragglers = stragglers, "Shutdown proceeded past stuck workers");
        }

        tracing::info!(stats = %shared.stats.snapshot(), "Reflector stopped");
        Ok(())
    }

    /// Run until `signal` completes, then shut down gracefully
    pub async fn run_until<F>(&self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shared.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = signal => shutdown.trigger(),
                _ = shutdown.wait() => {}
            }
        });
        self.run().await
    }
}

/// Register the periodic maintenance tasks; returns the ACL reload task id
fn register_maintenance_tasks(
    scheduler: &Arc<Scheduler>,
    shared: &Arc<Shared>,
) -> Result<TaskId> {
    let config = &shared.config;

    {
        let registry = Arc::clone(&shared.registry);
        let directory = Arc::clone(&shared.directory);
        let timeout = config.client_timeout;
        scheduler.add("client-sweep", config.client_sweep_interval, move || {
            let registry = Arc::clone(&registry);
            let directory = Arc::clone(&directory);
            Box::pin(async move {
                let removed = registry.sweep_expired(timeout, Instant::now()).await;
                for session in removed {
                    let callsign = session.read().await.callsign.clone();
                    if let Err(e) = directory.remove(&callsign) {
                        tracing::warn!(callsign = %callsign, error = %e, "Directory removal failed");
                    }
                }
                Ok(())
            })
        })?;
    }

    {
        let streams = Arc::clone(&shared.streams);
        scheduler.add("stream-sweep", config.stream_sweep_interval, move || {
            let streams = Arc::clone(&streams);
            Box::pin(async move {
                streams.sweep_timeouts(Instant::now()).await;
                Ok(())
            })
        })?;
    }

    let acl_reload_task = {
        let acl = Arc::clone(&shared.acl);
        scheduler.add("acl-reload", config.acl_reload_interval, move || {
            let acl = Arc::clone(&acl);
            Box::pin(async move {
                acl.reload_from_files().map_err(|e| e.into())
            })
        })?
    };

    {
        let registry = Arc::clone(&shared.registry);
        let directory = Arc::clone(&shared.directory);
        scheduler.add(
            "directory-refresh",
            config.directory_refresh_interval,
            move || {
                let registry = Arc::clone(&registry);
                let directory = Arc::clone(&directory);
                Box::pin(async move {
                    let now = Instant::now();
                    for session in registry.all_sessions().await {
                        let guard = session.read().await;
                        let entry = DirectoryEntry {
                            callsign: guard.callsign.clone(),
                            addr: guard.addr.to_string(),
                            talkgroup: guard.tgid,
                            idle_secs: now
                                .saturating_duration_since(guard.last_activity())
                                .as_secs(),
                        };
                        drop(guard);
                        if let Err(e) = directory.put(entry) {
                            tracing::warn!(error = %e, "Directory refresh write failed");
                        }
                    }
                    Ok(())
                })
            },
        )?;
    }

    Ok(acl_reload_task)
}

/// Per-socket receive loop: gate by address, stamp, shard, enqueue
///
/// Never blocks on processing and never sends; a full queue drops the
/// datagram with a counter.
async fn ingestion_loop(shared: Arc<Shared>, socket_index: usize, queues: Vec<BoundedQueue>) {
    let socket = Arc::clone(&shared.sockets[socket_index]);
    let mut buf = [0u8; RECV_BUFFER_SIZE];

    while !shared.shutdown.is_triggered() {
        let received = tokio::time::timeout(shared.config.recv_timeout, socket.recv_from(&mut buf)).await;
        match received {
            // A timed-out receive is a retry of the wait, not an error
            Err(_) => continue,
            Ok(Err(e)) => {
                tracing::error!(socket = socket_index, error = %e, "Receive failed");
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok(Ok((len, sender))) => {
                shared.stats.bump(&shared.stats.packets_received);

                if shared.acl.addr_blocked(sender.ip()) {
                    shared.stats.bump(&shared.stats.acl_dropped);
                    tracing::trace!(sender = %sender, "Blocked address dropped before queueing");
                    continue;
                }

                let shard = shard_for(&sender, queues.len());
                let entry = RawDatagram {
                    data: Bytes::copy_from_slice(&buf[..len]),
                    sender,
                    received_at: Instant::now(),
                    socket: SocketId(socket_index),
                };
                if !queues[shard].push(entry) {
                    shared.stats.bump(&shared.stats.queue_dropped);
                }
            }
        }
    }
    tracing::debug!(socket = socket_index, "Ingestion loop stopped");
}

/// Worker loop: drain the shard queue, decode, dispatch
async fn worker_loop(shared: Arc<Shared>, mut receiver: QueueReceiver) {
    loop {
        match receiver.pop(shared.config.recv_timeout).await {
            Pop::Entry(datagram) => shared.handle_datagram(datagram).await,
            Pop::Empty => {
                if shared.shutdown.is_triggered() {
                    break;
                }
            }
            Pop::Closed => break,
        }
    }
    tracing::debug!("Worker loop stopped");
}

fn shard_for(sender: &SocketAddr, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    sender.hash(&mut hasher);
    (hasher.finish() as usize) % shards.max(1)
}

impl Shared {
    async fn handle_datagram(&self, datagram: RawDatagram) {
        let packet = match Packet::decode(&datagram.data) {
            Ok(packet) => packet,
            Err(e) => {
                self.stats.bump(&self.stats.malformed);
                tracing::trace!(sender = %datagram.sender, error = %e, "Malformed datagram dropped");
                return;
            }
        };

        match packet {
            Packet::Poll { callsign } => self.handle_poll(&datagram, &callsign).await,
            Packet::Login { callsign, tgid } => self.handle_login(&datagram, &callsign, tgid).await,
            Packet::Unlink { callsign } => self.handle_unlink(&datagram, &callsign).await,
            Packet::StatusQuery => self.handle_status(&datagram).await,
            Packet::Data(frame) => self.handle_data(&datagram, frame).await,
        }
    }

    async fn handle_poll(&self, datagram: &RawDatagram, callsign: &str) {
        if self.acl.gateway_blocked(callsign) {
            self.stats.bump(&self.stats.acl_dropped);
            return;
        }
        if self.registry.touch(datagram.sender, Instant::now()).await {
            self.send_ack(
                encode_poll_ack(&self.config.callsign),
                datagram.sender,
                datagram.socket,
            )
            .await;
        } else {
            self.stats.bump(&self.stats.unroutable);
            tracing::debug!(sender = %datagram.sender, callsign = callsign, "Poll from unregistered address");
        }
    }

    async fn handle_login(&self, datagram: &RawDatagram, callsign: &str, tgid: u16) {
        if self.shutdown.is_triggered() {
            // No new sessions once shutdown has begun
            self.stats.bump(&self.stats.unroutable);
            return;
        }
        if self.acl.gateway_blocked(callsign) {
            self.stats.bump(&self.stats.acl_dropped);
            return;
        }

        let now = Instant::now();
        if self.registry.find(datagram.sender).await.is_some() {
            // Re-login refreshes, possibly moving the talk-group
            match self.registry.move_talkgroup(datagram.sender, tgid, now).await {
                Ok(_) => {
                    self.send_ack(
                        encode_poll_ack(&self.config.callsign),
                        datagram.sender,
                        datagram.socket,
                    )
                    .await;
                }
                Err(_) => self.stats.bump(&self.stats.acl_dropped),
            }
            return;
        }

        match self
            .registry
            .register(datagram.sender, callsign, tgid, datagram.socket, now)
            .await
        {
            Ok(session) => {
                self.publish_session(&session).await;
                self.send_ack(
                    encode_poll_ack(&self.config.callsign),
                    datagram.sender,
                    datagram.socket,
                )
                .await;
            }
            Err(RegistryError::AlreadyExists(_)) => {
                // Lost a race with a concurrent login from the same address
                self.registry.touch(datagram.sender, now).await;
            }
            Err(RegistryError::LimitReached { max_clients }) => {
                // Counter bumped by the registry; the client simply gets no ack
                tracing::info!(
                    sender = %datagram.sender,
                    callsign = callsign,
                    max_clients = max_clients,
                    "Registration rejected at capacity"
                );
            }
            Err(RegistryError::Blacklisted { .. }) => {
                self.stats.bump(&self.stats.acl_dropped);
            }
        }
    }

    async fn handle_unlink(&self, datagram: &RawDatagram, callsign: &str) {
        match self.registry.remove(datagram.sender).await {
            Some(session) => {
                let registered_callsign = session.read().await.callsign.clone();
                if let Err(e) = self.directory.remove(&registered_callsign) {
                    tracing::warn!(callsign = %registered_callsign, error = %e, "Directory removal failed");
                }
                self.send_ack(
                    encode_unlink_ack(&self.config.callsign),
                    datagram.sender,
                    datagram.socket,
                )
                .await;
            }
            None => {
                self.stats.bump(&self.stats.unroutable);
                tracing::debug!(sender = %datagram.sender, callsign = callsign, "Unlink from unknown address");
            }
        }
    }

    async fn handle_status(&self, datagram: &RawDatagram) {
        let reply = encode_status_reply(
            &self.config.name,
            &self.config.description,
            self.registry.len().await,
        );
        self.send_ack(reply, datagram.sender, datagram.socket).await;
    }

    async fn handle_data(&self, datagram: &RawDatagram, frame: DataFrame) {
        let session = match self.registry.find(datagram.sender).await {
            Some(session) => session,
            None => {
                self.stats.bump(&self.stats.unroutable);
                tracing::debug!(sender = %datagram.sender, "Data frame from unregistered address");
                return;
            }
        };

        let now = Instant::now();
        let session_tgid = {
            let mut guard = session.write().await;
            guard.touch(now);
            guard.tgid
        };

        if session_tgid != frame.tgid {
            self.stats.bump(&self.stats.unroutable);
            tracing::debug!(
                sender = %datagram.sender,
                session_tgid = session_tgid,
                frame_tgid = frame.tgid,
                "Data frame for a talk-group the session is not in"
            );
            return;
        }
        if self.acl.callsign_blocked(&frame.callsign) || !self.acl.talkgroup_allowed(frame.tgid) {
            self.stats.bump(&self.stats.acl_dropped);
            return;
        }

        match frame.position {
            FramePosition::Header => {
                if self.shutdown.is_triggered() {
                    // No new streams once shutdown has begun
                    self.stats.bump(&self.stats.unroutable);
                    return;
                }
                let opened = self
                    .streams
                    .begin_or_reject(
                        frame.tgid,
                        datagram.sender,
                        &frame.callsign,
                        frame.token,
                        Arc::downgrade(&session),
                        now,
                    )
                    .await;
                match opened {
                    Ok(()) => {
                        self.relay(&frame.raw, frame.tgid, datagram.sender).await;
                    }
                    Err(StreamError::Collision { .. }) | Err(StreamError::LimitReached { .. }) => {
                        // Counted by the manager; the header is not relayed
                    }
                    Err(StreamError::Stale { .. }) => {
                        self.stats.bump(&self.stats.invariant_violations);
                        tracing::error!("begin_or_reject returned Stale");
                    }
                }
            }
            FramePosition::Data => {
                match self.streams.advance(frame.token, datagram.sender, now).await {
                    Ok(forwarded) => {
                        self.relay(&frame.raw, forwarded.tgid, forwarded.origin_addr)
                            .await;
                    }
                    Err(_) => {
                        // Stale: counted by the manager, frame dropped
                    }
                }
            }
            FramePosition::Terminator => {
                // The stream closes and the terminator is delivered in the
                // same processing step
                if let Some(closed) = self
                    .streams
                    .terminate(frame.token, datagram.sender, now)
                    .await
                {
                    self.relay(&frame.raw, closed.tgid, closed.origin_addr).await;
                }
            }
        }
    }

    /// Fan one frame out to every session in the talk-group except the origin
    ///
    /// Targets are collected first; all session and registry locks are
    /// released before the first send.
    async fn relay(&self, data: &Bytes, tgid: u16, origin: SocketAddr) {
        let sessions = self.registry.list_by_talkgroup(tgid).await;
        let mut targets = Vec::with_capacity(sessions.len());
        for session in &sessions {
            let guard = session.read().await;
            if guard.addr == origin {
                continue;
            }
            targets.push((guard.addr, guard.socket));
        }

        for (addr, socket) in targets {
            if self.send_datagram(data, addr, socket).await {
                self.stats.bump(&self.stats.frames_relayed);
                self.stats
                    .bytes_relayed
                    .fetch_add(data.len() as u64, std::sync::atomic::Ordering::Relaxed);
            } else {
                self.stats.bump(&self.stats.send_errors);
            }
        }
    }

    /// Send an acknowledgement or reply; one bounded retry
    async fn send_ack(&self, data: Bytes, addr: SocketAddr, socket: SocketId) {
        if self.send_datagram(&data, addr, socket).await {
            return;
        }
        if !self.send_datagram(&data, addr, socket).await {
            self.stats.bump(&self.stats.send_errors);
            tracing::debug!(target = %addr, "Ack dropped after retry");
        }
    }

    /// One bounded-timeout send; false on failure or timeout
    async fn send_datagram(&self, data: &Bytes, addr: SocketAddr, socket: SocketId) -> bool {
        let socket = match self.sockets.get(socket.0) {
            Some(socket) => socket,
            None => {
                self.stats.bump(&self.stats.invariant_violations);
                tracing::error!(socket = socket.0, "Session references an unknown socket");
                return false;
            }
        };
        match tokio::time::timeout(self.config.send_timeout, socket.send_to(data, addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(target = %addr, error = %e, "Send failed");
                false
            }
            Err(_) => {
                tracing::debug!(target = %addr, "Send timed out");
                false
            }
        }
    }

    async fn publish_session(&self, session: &SharedSession) {
        let guard = session.read().await;
        let entry = DirectoryEntry {
            callsign: guard.callsign.clone(),
            addr: guard.addr.to_string(),
            talkgroup: guard.tgid,
            idle_secs: 0,
        };
        drop(guard);
        if let Err(e) = self.directory.put(entry) {
            tracing::warn!(error = %e, "Directory publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclCategory;
    use crate::directory::MemoryDirectory;
    use crate::protocol::{self, constants::DATA_PAYLOAD_LEN};

    async fn start_reflector(config: ReflectorConfig) -> (Arc<Reflector>, SocketAddr, Arc<MemoryDirectory>) {
        let directory = Arc::new(MemoryDirectory::new());
        let reflector = Arc::new(
            Reflector::bind(config, Arc::clone(&directory) as Arc<dyn DirectoryStore>)
                .await
                .expect("bind must succeed"),
        );
        let addr = reflector.local_addrs().unwrap()[0];

        let runner = Arc::clone(&reflector);
        tokio::spawn(async move {
            let _ = runner.run().await;
        });
        // Let the loops come up
        tokio::time::sleep(Duration::from_millis(20)).await;
        (reflector, addr, directory)
    }

    fn test_config() -> ReflectorConfig {
        ReflectorConfig::with_addr("127.0.0.1:0".parse().unwrap())
            .callsign("REFTEST")
            .identity("Test Reflector", "unit test")
            .workers(2)
            .queue_capacity(64)
    }

    async fn client() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    async fn recv_with_timeout(socket: &UdpSocket) -> Option<Vec<u8>> {
        let mut buf = [0u8; 256];
        match tokio::time::timeout(Duration::from_millis(300), socket.recv(&mut buf)).await {
            Ok(Ok(len)) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    #[tokio::test]
    async fn login_then_poll_refreshes_single_session() {
        let (reflector, addr, directory) = start_reflector(test_config()).await;
        let client = client().await;
        client.connect(addr).await.unwrap();

        client.send(&protocol::encode_login("N0CALL", 1)).await.unwrap();
        let ack = recv_with_timeout(&client).await.expect("login ack");
        assert_eq!(&ack[..4], b"YSFP");
        assert_eq!(reflector.registry().len().await, 1);

        // Duplicate poll refreshes, no second session
        client.send(&protocol::encode_poll("N0CALL")).await.unwrap();
        recv_with_timeout(&client).await.expect("poll ack");
        assert_eq!(reflector.registry().len().await, 1);

        // Session was published to the directory
        assert!(directory.get("N0CALL").unwrap().is_some());

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn poll_from_unknown_address_is_dropped() {
        let (reflector, addr, _) = start_reflector(test_config()).await;
        let client = client().await;
        client.connect(addr).await.unwrap();

        client.send(&protocol::encode_poll("N0CALL")).await.unwrap();
        assert!(recv_with_timeout(&client).await.is_none(), "no ack expected");
        assert_eq!(reflector.registry().len().await, 0);
        assert!(reflector.stats().unroutable >= 1);

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn data_fans_out_within_talkgroup_only() {
        let (reflector, addr, _) = start_reflector(test_config()).await;

        let sender = client().await;
        let same_group = client().await;
        let other_group = client().await;
        for socket in [&sender, &same_group, &other_group] {
            socket.connect(addr).await.unwrap();
        }

        sender.send(&protocol::encode_login("AA1AA", 1)).await.unwrap();
        recv_with_timeout(&sender).await.expect("ack");
        same_group.send(&protocol::encode_login("BB2BB", 1)).await.unwrap();
        recv_with_timeout(&same_group).await.expect("ack");
        other_group.send(&protocol::encode_login("CC3CC", 2)).await.unwrap();
        recv_with_timeout(&other_group).await.expect("ack");

        let payload = [0x55u8; DATA_PAYLOAD_LEN];
        let header =
            protocol::encode_data_frame("AA1AA", 1, 0xC0FFEE, FramePosition::Header, &payload);
        let voice = protocol::encode_data_frame("AA1AA", 1, 0xC0FFEE, FramePosition::Data, &payload);

        sender.send(&header).await.unwrap();
        sender.send(&voice).await.unwrap();

        // Same talk-group receives header and voice frame
        let first = recv_with_timeout(&same_group).await.expect("header relay");
        assert_eq!(&first[..4], b"YSFD");
        let second = recv_with_timeout(&same_group).await.expect("voice relay");
        assert_eq!(second, voice.to_vec());

        // Other talk-group receives nothing, sender gets no echo
        assert!(recv_with_timeout(&other_group).await.is_none());
        assert!(recv_with_timeout(&sender).await.is_none());

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn terminator_frees_the_talkgroup_in_one_step() {
        let (reflector, addr, _) = start_reflector(test_config()).await;

        let sender = client().await;
        let listener = client().await;
        for socket in [&sender, &listener] {
            socket.connect(addr).await.unwrap();
        }
        sender.send(&protocol::encode_login("AA1AA", 1)).await.unwrap();
        recv_with_timeout(&sender).await.unwrap();
        listener.send(&protocol::encode_login("BB2BB", 1)).await.unwrap();
        recv_with_timeout(&listener).await.unwrap();

        let payload = [0u8; DATA_PAYLOAD_LEN];
        sender
            .send(&protocol::encode_data_frame("AA1AA", 1, 0x01, FramePosition::Header, &payload))
            .await
            .unwrap();
        recv_with_timeout(&listener).await.expect("header relay");

        sender
            .send(&protocol::encode_data_frame(
                "AA1AA",
                1,
                0x01,
                FramePosition::Terminator,
                &payload,
            ))
            .await
            .unwrap();
        let relayed = recv_with_timeout(&listener).await.expect("terminator relay");
        assert_eq!(relayed[20], 0x02);

        // Stream is closed in the same step: the listener can open a new one
        assert_eq!(reflector.streams().active_count().await, 0);
        listener
            .send(&protocol::encode_data_frame("BB2BB", 1, 0x02, FramePosition::Header, &payload))
            .await
            .unwrap();
        recv_with_timeout(&sender).await.expect("new header relayed");

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn competing_header_is_rejected_not_mixed() {
        let (reflector, addr, _) = start_reflector(test_config()).await;

        let first = client().await;
        let second = client().await;
        for socket in [&first, &second] {
            socket.connect(addr).await.unwrap();
        }
        first.send(&protocol::encode_login("AA1AA", 1)).await.unwrap();
        recv_with_timeout(&first).await.unwrap();
        second.send(&protocol::encode_login("BB2BB", 1)).await.unwrap();
        recv_with_timeout(&second).await.unwrap();

        let payload = [0u8; DATA_PAYLOAD_LEN];
        first
            .send(&protocol::encode_data_frame("AA1AA", 1, 0x0A, FramePosition::Header, &payload))
            .await
            .unwrap();
        recv_with_timeout(&second).await.expect("winning header relay");

        second
            .send(&protocol::encode_data_frame("BB2BB", 1, 0x0B, FramePosition::Header, &payload))
            .await
            .unwrap();
        // The losing header is not relayed to the first client
        assert!(recv_with_timeout(&first).await.is_none());
        assert_eq!(reflector.stats().collisions, 1);
        assert_eq!(reflector.streams().active_count().await, 1);

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn blacklisted_address_never_reaches_the_registry() {
        let (reflector, addr, _) = start_reflector(test_config()).await;
        reflector
            .access_control()
            .install(AclCategory::AddressBlacklist, ["127.0.0.1"]);

        let client = client().await;
        client.connect(addr).await.unwrap();
        client.send(&protocol::encode_login("N0CALL", 1)).await.unwrap();

        assert!(recv_with_timeout(&client).await.is_none());
        assert_eq!(reflector.registry().len().await, 0);
        assert!(reflector.stats().acl_dropped >= 1);

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn capacity_rejection_leaves_existing_sessions_intact() {
        let config = test_config().max_clients(1);
        let (reflector, addr, _) = start_reflector(config).await;

        let first = client().await;
        first.connect(addr).await.unwrap();
        first.send(&protocol::encode_login("AA1AA", 1)).await.unwrap();
        recv_with_timeout(&first).await.expect("first login ack");

        let second = client().await;
        second.connect(addr).await.unwrap();
        second.send(&protocol::encode_login("BB2BB", 1)).await.unwrap();
        assert!(recv_with_timeout(&second).await.is_none(), "no ack at capacity");

        assert_eq!(reflector.registry().len().await, 1);
        assert_eq!(reflector.stats().capacity_rejections, 1);
        // First session unaffected
        first.send(&protocol::encode_poll("AA1AA")).await.unwrap();
        assert!(recv_with_timeout(&first).await.is_some());

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn status_query_reports_client_count() {
        let (reflector, addr, _) = start_reflector(test_config()).await;

        let member = client().await;
        member.connect(addr).await.unwrap();
        member.send(&protocol::encode_login("AA1AA", 1)).await.unwrap();
        recv_with_timeout(&member).await.unwrap();

        let probe = client().await;
        probe.connect(addr).await.unwrap();
        probe.send(b"YSFS").await.unwrap();
        let reply = recv_with_timeout(&probe).await.expect("status reply");
        assert_eq!(reply.len(), 42);
        assert_eq!(&reply[..4], b"YSFS");
        assert_eq!(&reply[39..], b"001");

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn unlink_removes_session_and_directory_entry() {
        let (reflector, addr, directory) = start_reflector(test_config()).await;
        let client = client().await;
        client.connect(addr).await.unwrap();

        client.send(&protocol::encode_login("N0CALL", 1)).await.unwrap();
        recv_with_timeout(&client).await.unwrap();
        assert!(directory.get("N0CALL").unwrap().is_some());

        client.send(&protocol::encode_unlink("N0CALL")).await.unwrap();
        let ack = recv_with_timeout(&client).await.expect("unlink ack");
        assert_eq!(&ack[..4], b"YSFU");
        assert_eq!(reflector.registry().len().await, 0);
        assert!(directory.get("N0CALL").unwrap().is_none());

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn malformed_datagrams_are_counted_not_fatal() {
        let (reflector, addr, _) = start_reflector(test_config()).await;
        let client = client().await;
        client.connect(addr).await.unwrap();

        client.send(b"JUNKJUNKJUNK").await.unwrap();
        client.send(b"YS").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(reflector.stats().malformed >= 2);

        // The reflector still works afterwards
        client.send(&protocol::encode_login("N0CALL", 1)).await.unwrap();
        assert!(recv_with_timeout(&client).await.is_some());

        reflector.shutdown_handle().trigger();
    }

    #[tokio::test]
    async fn shutdown_rejects_new_sessions_and_exits_within_deadline() {
        let config = test_config()
            .drain_deadline(Duration::from_millis(500));
        let directory = Arc::new(MemoryDirectory::new());
        let reflector = Arc::new(
            Reflector::bind(config, directory as Arc<dyn DirectoryStore>)
                .await
                .unwrap(),
        );
        let addr = reflector.local_addrs().unwrap()[0];

        let runner = Arc::clone(&reflector);
        let run_handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        reflector.shutdown_handle().trigger();

        // A login after the flag flips must not create a session
        let late = client().await;
        late.connect(addr).await.unwrap();
        let _ = late.send(&protocol::encode_login("LATE", 1)).await;

        // run() must return within drain + join budget (plus slack)
        let result = tokio::time::timeout(Duration::from_secs(5), run_handle).await;
        assert!(result.is_ok(), "run() must exit within the deadline");
        assert_eq!(reflector.registry().len().await, 0);
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let config = ReflectorConfig::default().bind(Vec::new());
        let directory = Arc::new(MemoryDirectory::new());
        let result = Reflector::bind(config, directory as Arc<dyn DirectoryStore>).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
