//! Client registry implementation
//!
//! The session store keyed by network address, with a talk-group grouping
//! index for O(members) fan-out lookup. Both indices live under one
//! `RwLock`, so no reader can ever observe them out of sync; individual
//! sessions sit behind their own `Arc<RwLock>` so refreshes do not contend
//! on the store lock.
//!
//! Lock order is store → session. The sweep uses `try_read`/`try_write` on
//! sessions and skips a busy one for the cycle rather than waiting.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::acl::AccessControl;
use crate::queue::SocketId;
use crate::stats::ReflectorStats;

use super::error::RegistryError;
use super::session::{ClientSession, SessionState};

/// Shared handle to one session
pub type SharedSession = Arc<RwLock<ClientSession>>;

struct Inner {
    by_addr: HashMap<SocketAddr, SharedSession>,
    by_talkgroup: HashMap<u16, HashSet<SocketAddr>>,
}

/// Session store with capacity enforcement and ACL gating
pub struct ClientRegistry {
    inner: RwLock<Inner>,
    max_clients: usize,
    acl: Arc<AccessControl>,
    stats: Arc<ReflectorStats>,
}

impl ClientRegistry {
    /// Create a registry bounded at `max_clients`
    pub fn new(max_clients: usize, acl: Arc<AccessControl>, stats: Arc<ReflectorStats>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_addr: HashMap::new(),
                by_talkgroup: HashMap::new(),
            }),
            max_clients,
            acl,
            stats,
        }
    }

    /// Register a new session
    ///
    /// Deterministic rejections: `AlreadyExists` for a known address,
    /// `LimitReached` at capacity (nothing is evicted), `Blacklisted` when
    /// access control refuses the callsign or talk-group. The session is
    /// created `Pending` and promoted on its first refresh.
    pub async fn register(
        &self,
        addr: SocketAddr,
        callsign: &str,
        tgid: u16,
        socket: SocketId,
        now: Instant,
    ) -> Result<SharedSession, RegistryError> {
        if self.acl.callsign_blocked(callsign) || !self.acl.talkgroup_allowed(tgid) {
            return Err(RegistryError::Blacklisted {
                callsign: callsign.to_string(),
            });
        }

        let mut inner = self.inner.write().await;

        if inner.by_addr.contains_key(&addr) {
            return Err(RegistryError::AlreadyExists(addr));
        }
        if inner.by_addr.len() >= self.max_clients {
            self.stats.bump(&self.stats.capacity_rejections);
            return Err(RegistryError::LimitReached {
                max_clients: self.max_clients,
            });
        }

        let session = Arc::new(RwLock::new(ClientSession::new(
            addr,
            callsign.to_string(),
            tgid,
            socket,
            now,
        )));
        inner.by_addr.insert(addr, Arc::clone(&session));
        inner.by_talkgroup.entry(tgid).or_default().insert(addr);

        tracing::info!(
            addr = %addr,
            callsign = callsign,
            tgid = tgid,
            clients = inner.by_addr.len(),
            "Session registered"
        );
        Ok(session)
    }

    /// Look up the session for an address
    pub async fn find(&self, addr: SocketAddr) -> Option<SharedSession> {
        self.inner.read().await.by_addr.get(&addr).cloned()
    }

    /// Remove a session, clearing both indices in one step
    pub async fn remove(&self, addr: SocketAddr) -> Option<SharedSession> {
        let mut inner = self.inner.write().await;
        let session = inner.by_addr.remove(&addr)?;

        // The grouping index entry must exist; a miss is an invariant breach
        let tgid_direct = match session.try_read() {
            Ok(guard) => Some(guard.tgid),
            Err(_) => None,
        };
        let tgid = match tgid_direct {
            Some(tgid) => tgid,
            None => {
                // Session lock busy: scan the grouping index instead
                let found = inner
                    .by_talkgroup
                    .iter()
                    .find(|(_, members)| members.contains(&addr))
                    .map(|(tgid, _)| *tgid);
                match found {
                    Some(tgid) => tgid,
                    None => {
                        self.stats.bump(&self.stats.invariant_violations);
                        tracing::error!(addr = %addr, "Removed session missing from talk-group index");
                        return Some(session);
                    }
                }
            }
        };

        if let Some(members) = inner.by_talkgroup.get_mut(&tgid) {
            if !members.remove(&addr) {
                self.stats.bump(&self.stats.invariant_violations);
                tracing::error!(addr = %addr, tgid = tgid, "Talk-group index out of sync on remove");
            }
            if members.is_empty() {
                inner.by_talkgroup.remove(&tgid);
            }
        } else {
            self.stats.bump(&self.stats.invariant_violations);
            tracing::error!(addr = %addr, tgid = tgid, "Talk-group index missing on remove");
        }

        tracing::info!(addr = %addr, tgid = tgid, "Session removed");
        Some(session)
    }

    /// Refresh a session's activity clock; true when the address was known
    pub async fn touch(&self, addr: SocketAddr, now: Instant) -> bool {
        let session = match self.find(addr).await {
            Some(s) => s,
            None => return false,
        };
        session.write().await.touch(now);
        true
    }

    /// Move a session to another talk-group (re-login with a new group)
    ///
    /// Returns `false` when the address is unknown; rejected when the
    /// target group fails the allow-list.
    pub async fn move_talkgroup(
        &self,
        addr: SocketAddr,
        new_tgid: u16,
        now: Instant,
    ) -> Result<bool, RegistryError> {
        if !self.acl.talkgroup_allowed(new_tgid) {
            return Err(RegistryError::Blacklisted {
                callsign: String::new(),
            });
        }

        let mut inner = self.inner.write().await;
        let session = match inner.by_addr.get(&addr).cloned() {
            Some(s) => s,
            None => return Ok(false),
        };

        let mut guard = session.write().await;
        let old_tgid = guard.tgid;
        guard.touch(now);
        if old_tgid == new_tgid {
            return Ok(true);
        }
        guard.tgid = new_tgid;
        drop(guard);

        if let Some(members) = inner.by_talkgroup.get_mut(&old_tgid) {
            members.remove(&addr);
            if members.is_empty() {
                inner.by_talkgroup.remove(&old_tgid);
            }
        }
        inner.by_talkgroup.entry(new_tgid).or_default().insert(addr);

        tracing::info!(addr = %addr, from = old_tgid, to = new_tgid, "Session moved talk-group");
        Ok(true)
    }

    /// All sessions in one talk-group
    pub async fn list_by_talkgroup(&self, tgid: u16) -> Vec<SharedSession> {
        let inner = self.inner.read().await;
        let members = match inner.by_talkgroup.get(&tgid) {
            Some(m) => m,
            None => return Vec::new(),
        };

        let mut sessions = Vec::with_capacity(members.len());
        for addr in members {
            match inner.by_addr.get(addr) {
                Some(session) => sessions.push(Arc::clone(session)),
                None => {
                    // Index names an address the store no longer holds
                    self.stats.bump(&self.stats.invariant_violations);
                    tracing::error!(addr = %addr, tgid = tgid, "Stale talk-group index entry");
                }
            }
        }
        sessions
    }

    /// Remove every session idle past `timeout`
    ///
    /// Sessions are marked `Expired` before removal. A session whose lock is
    /// busy is skipped this cycle.
    pub async fn sweep_expired(&self, timeout: Duration, now: Instant) -> Vec<SharedSession> {
        let mut inner = self.inner.write().await;

        let idle: Vec<(SocketAddr, u16)> = inner
            .by_addr
            .iter()
            .filter_map(|(addr, session)| match session.try_write() {
                Ok(mut guard) => {
                    if guard.is_idle(timeout, now) {
                        guard.state = SessionState::Expired;
                        Some((*addr, guard.tgid))
                    } else {
                        None
                    }
                }
                Err(_) => {
                    tracing::debug!(addr = %addr, "Session busy, skipping this sweep cycle");
                    None
                }
            })
            .collect();

        let mut removed = Vec::with_capacity(idle.len());
        for (addr, tgid) in idle {
            if let Some(session) = inner.by_addr.remove(&addr) {
                if let Some(members) = inner.by_talkgroup.get_mut(&tgid) {
                    members.remove(&addr);
                    if members.is_empty() {
                        inner.by_talkgroup.remove(&tgid);
                    }
                }
                self.stats.bump(&self.stats.sessions_expired);
                tracing::info!(addr = %addr, tgid = tgid, "Session expired");
                removed.push(session);
            }
        }
        removed
    }

    /// Current session count
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_addr.len()
    }

    /// True when no session is registered
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_addr.is_empty()
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.max_clients
    }

    /// Snapshot of every session handle (directory refresh)
    pub async fn all_sessions(&self) -> Vec<SharedSession> {
        self.inner.read().await.by_addr.values().cloned().collect()
    }

    /// Verify the talk-group index against the address map
    ///
    /// Returns the number of inconsistencies found (each already logged and
    /// counted). Repairs nothing by itself; callers decide.
    pub async fn check_indices(&self) -> usize {
        let inner = self.inner.read().await;
        let mut breaches = 0;
        for (tgid, members) in &inner.by_talkgroup {
            for addr in members {
                if !inner.by_addr.contains_key(addr) {
                    breaches += 1;
                    self.stats.bump(&self.stats.invariant_violations);
                    tracing::error!(addr = %addr, tgid = tgid, "Talk-group index entry with no session");
                }
            }
        }
        breaches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclCategory;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn registry(max_clients: usize) -> ClientRegistry {
        ClientRegistry::new(
            max_clients,
            Arc::new(AccessControl::new()),
            Arc::new(ReflectorStats::new()),
        )
    }

    #[tokio::test]
    async fn register_find_remove() {
        let reg = registry(8);
        let now = Instant::now();

        let session = reg
            .register(addr(1), "N0CALL", 1, SocketId(0), now)
            .await
            .unwrap();
        assert_eq!(session.read().await.callsign, "N0CALL");
        assert_eq!(reg.len().await, 1);
        assert!(reg.find(addr(1)).await.is_some());

        reg.remove(addr(1)).await.unwrap();
        assert!(reg.find(addr(1)).await.is_none());
        assert!(reg.is_empty().await);
        assert_eq!(reg.check_indices().await, 0);
    }

    #[tokio::test]
    async fn duplicate_address_rejected() {
        let reg = registry(8);
        let now = Instant::now();
        reg.register(addr(1), "N0CALL", 1, SocketId(0), now)
            .await
            .unwrap();

        let second = reg.register(addr(1), "N0CALL", 1, SocketId(0), now).await;
        assert_eq!(second.unwrap_err(), RegistryError::AlreadyExists(addr(1)));
        assert_eq!(reg.len().await, 1);
    }

    #[tokio::test]
    async fn limit_reached_is_deterministic() {
        let reg = registry(2);
        let now = Instant::now();
        reg.register(addr(1), "AA1AA", 1, SocketId(0), now).await.unwrap();
        reg.register(addr(2), "BB2BB", 1, SocketId(0), now).await.unwrap();

        let third = reg.register(addr(3), "CC3CC", 1, SocketId(0), now).await;
        assert_eq!(
            third.unwrap_err(),
            RegistryError::LimitReached { max_clients: 2 }
        );
        // Existing sessions untouched
        assert_eq!(reg.len().await, 2);
        assert!(reg.find(addr(1)).await.is_some());
        assert!(reg.find(addr(2)).await.is_some());
    }

    #[tokio::test]
    async fn blacklisted_callsign_rejected() {
        let acl = Arc::new(AccessControl::new());
        acl.install(AclCategory::CallsignBlacklist, ["N0CALL"]);
        let reg = ClientRegistry::new(8, acl, Arc::new(ReflectorStats::new()));

        let result = reg
            .register(addr(1), "N0CALL", 1, SocketId(0), Instant::now())
            .await;
        assert!(matches!(result, Err(RegistryError::Blacklisted { .. })));
        assert!(reg.is_empty().await);
    }

    #[tokio::test]
    async fn talkgroup_listing_and_isolation() {
        let reg = registry(8);
        let now = Instant::now();
        reg.register(addr(1), "AA1AA", 1, SocketId(0), now).await.unwrap();
        reg.register(addr(2), "BB2BB", 1, SocketId(0), now).await.unwrap();
        reg.register(addr(3), "CC3CC", 2, SocketId(0), now).await.unwrap();

        assert_eq!(reg.list_by_talkgroup(1).await.len(), 2);
        assert_eq!(reg.list_by_talkgroup(2).await.len(), 1);
        assert!(reg.list_by_talkgroup(3).await.is_empty());
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_sessions() {
        let reg = registry(8);
        let start = Instant::now();
        reg.register(addr(1), "AA1AA", 1, SocketId(0), start).await.unwrap();
        reg.register(addr(2), "BB2BB", 1, SocketId(0), start).await.unwrap();

        // Keep session 2 fresh
        let later = start + Duration::from_secs(100);
        reg.touch(addr(2), later).await;

        let removed = reg.sweep_expired(Duration::from_secs(60), later).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].read().await.addr, addr(1));
        assert_eq!(removed[0].read().await.state, SessionState::Expired);
        assert!(reg.find(addr(1)).await.is_none());
        assert!(reg.find(addr(2)).await.is_some());
        assert_eq!(reg.check_indices().await, 0);
    }

    #[tokio::test]
    async fn move_talkgroup_updates_index() {
        let reg = registry(8);
        let now = Instant::now();
        reg.register(addr(1), "AA1AA", 1, SocketId(0), now).await.unwrap();

        assert!(reg.move_talkgroup(addr(1), 2, now).await.unwrap());
        assert!(reg.list_by_talkgroup(1).await.is_empty());
        assert_eq!(reg.list_by_talkgroup(2).await.len(), 1);
        assert_eq!(reg.check_indices().await, 0);
    }

    #[tokio::test]
    async fn concurrent_register_remove_keeps_indices_consistent() {
        let reg = Arc::new(registry(512));
        let mut handles = Vec::new();

        for worker in 0..4u16 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                let base = 1000 + worker * 100;
                for i in 0..50 {
                    let port = base + i;
                    let now = Instant::now();
                    let _ = reg
                        .register(addr(port), &format!("CALL{}", port), worker % 3, SocketId(0), now)
                        .await;
                    if i % 2 == 0 {
                        reg.remove(addr(port)).await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(reg.check_indices().await, 0);
        // Every remaining session is reachable through its talk-group
        let mut via_groups = 0;
        for tgid in 0..3 {
            via_groups += reg.list_by_talkgroup(tgid).await.len();
        }
        assert_eq!(via_groups, reg.len().await);
    }
}
