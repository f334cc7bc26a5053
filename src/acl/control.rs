//! Access control: category sets and gating policy
//!
//! Two gates use these sets: the address gate on the ingestion path (before
//! any queueing, the cheapest possible rejection) and the identity gate
//! (callsign/gateway, talk-group) during registration and relay admission.
//!
//! List files hold one entry per line; blank lines and `#` comments are
//! ignored. Whitelists admit everything while empty.

use std::io::{self, BufRead};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use super::set::FastLookupSet;

/// Access-control category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclCategory {
    AddressBlacklist,
    GatewayBlacklist,
    GatewayWhitelist,
    CallsignBlacklist,
    CallsignWhitelist,
    TalkgroupAllowlist,
}

/// Paths to the authoritative list files, one per category
///
/// A `None` path leaves the category empty (blacklists block nothing,
/// whitelists admit everything).
#[derive(Debug, Clone, Default)]
pub struct AclPaths {
    pub address_blacklist: Option<PathBuf>,
    pub gateway_blacklist: Option<PathBuf>,
    pub gateway_whitelist: Option<PathBuf>,
    pub callsign_blacklist: Option<PathBuf>,
    pub callsign_whitelist: Option<PathBuf>,
    pub talkgroup_allowlist: Option<PathBuf>,
}

impl AclPaths {
    /// True when no list file is configured at all
    pub fn is_empty(&self) -> bool {
        self.address_blacklist.is_none()
            && self.gateway_blacklist.is_none()
            && self.gateway_whitelist.is_none()
            && self.callsign_blacklist.is_none()
            && self.callsign_whitelist.is_none()
            && self.talkgroup_allowlist.is_none()
    }
}

/// All category sets behind atomic-swap reloads
#[derive(Debug, Default)]
pub struct AccessControl {
    address_blacklist: FastLookupSet<IpAddr>,
    gateway_blacklist: FastLookupSet<String>,
    gateway_whitelist: FastLookupSet<String>,
    callsign_blacklist: FastLookupSet<String>,
    callsign_whitelist: FastLookupSet<String>,
    talkgroup_allowlist: FastLookupSet<u16>,
    paths: AclPaths,
}

impl AccessControl {
    /// Create with no lists configured; everything is admitted
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with list-file paths and perform the initial load
    ///
    /// A configured path that cannot be read is a startup error; missing
    /// entries inside a readable file are skipped with a warning.
    pub fn from_paths(paths: AclPaths) -> io::Result<Self> {
        let acl = Self {
            paths,
            ..Self::default()
        };
        acl.reload_from_files()?;
        Ok(acl)
    }

    /// Re-read every configured list file and swap the sets
    ///
    /// Driven by the scheduled reload task and by the reload signal.
    pub fn reload_from_files(&self) -> io::Result<()> {
        if let Some(path) = &self.paths.address_blacklist {
            let mut addrs = Vec::new();
            for line in read_list(path)? {
                match line.parse::<IpAddr>() {
                    Ok(addr) => addrs.push(addr),
                    Err(_) => {
                        tracing::warn!(file = %path.display(), entry = %line, "Skipping unparsable address entry");
                    }
                }
            }
            self.address_blacklist.reload(addrs);
        }
        if let Some(path) = &self.paths.gateway_blacklist {
            self.gateway_blacklist.reload(read_callsigns(path)?);
        }
        if let Some(path) = &self.paths.gateway_whitelist {
            self.gateway_whitelist.reload(read_callsigns(path)?);
        }
        if let Some(path) = &self.paths.callsign_blacklist {
            self.callsign_blacklist.reload(read_callsigns(path)?);
        }
        if let Some(path) = &self.paths.callsign_whitelist {
            self.callsign_whitelist.reload(read_callsigns(path)?);
        }
        if let Some(path) = &self.paths.talkgroup_allowlist {
            let mut groups = Vec::new();
            for line in read_list(path)? {
                match line.parse::<u16>() {
                    Ok(tg) => groups.push(tg),
                    Err(_) => {
                        tracing::warn!(file = %path.display(), entry = %line, "Skipping unparsable talk-group entry");
                    }
                }
            }
            self.talkgroup_allowlist.reload(groups);
        }
        tracing::debug!(
            addresses = self.address_blacklist.len(),
            callsigns_black = self.callsign_blacklist.len(),
            callsigns_white = self.callsign_whitelist.len(),
            talkgroups = self.talkgroup_allowlist.len(),
            "Access-control sets reloaded"
        );
        Ok(())
    }

    /// Replace one category directly (tests, embedders without list files)
    pub fn install<I, S>(&self, category: AclCategory, entries: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match category {
            AclCategory::AddressBlacklist => {
                let addrs: Vec<IpAddr> = entries
                    .into_iter()
                    .filter_map(|s| s.into().parse().ok())
                    .collect();
                self.address_blacklist.reload(addrs);
            }
            AclCategory::GatewayBlacklist => {
                self.gateway_blacklist
                    .reload(entries.into_iter().map(normalize));
            }
            AclCategory::GatewayWhitelist => {
                self.gateway_whitelist
                    .reload(entries.into_iter().map(normalize));
            }
            AclCategory::CallsignBlacklist => {
                self.callsign_blacklist
                    .reload(entries.into_iter().map(normalize));
            }
            AclCategory::CallsignWhitelist => {
                self.callsign_whitelist
                    .reload(entries.into_iter().map(normalize));
            }
            AclCategory::TalkgroupAllowlist => {
                let groups: Vec<u16> = entries
                    .into_iter()
                    .filter_map(|s| s.into().parse().ok())
                    .collect();
                self.talkgroup_allowlist.reload(groups);
            }
        }
    }

    /// Address gate, applied before queueing
    pub fn addr_blocked(&self, addr: IpAddr) -> bool {
        self.address_blacklist.contains(&addr)
    }

    /// Callsign gate: blacklisted, or absent from a non-empty whitelist
    pub fn callsign_blocked(&self, callsign: &str) -> bool {
        let key = callsign.trim().to_ascii_uppercase();
        if self.callsign_blacklist.contains(&key) {
            return true;
        }
        !self.callsign_whitelist.is_empty() && !self.callsign_whitelist.contains(&key)
    }

    /// Gateway gate, same policy as the callsign gate
    pub fn gateway_blocked(&self, gateway: &str) -> bool {
        let key = gateway.trim().to_ascii_uppercase();
        if self.gateway_blacklist.contains(&key) {
            return true;
        }
        !self.gateway_whitelist.is_empty() && !self.gateway_whitelist.contains(&key)
    }

    /// Talk-group gate: an empty allow-list admits every group
    pub fn talkgroup_allowed(&self, tgid: u16) -> bool {
        self.talkgroup_allowlist.is_empty() || self.talkgroup_allowlist.contains(&tgid)
    }
}

fn normalize<S: Into<String>>(s: S) -> String {
    s.into().trim().to_ascii_uppercase()
}

fn read_callsigns(path: &Path) -> io::Result<Vec<String>> {
    Ok(read_list(path)?.into_iter().map(normalize).collect())
}

fn read_list(path: &Path) -> io::Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let mut entries = Vec::new();
    for line in io::BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        entries.push(trimmed.to_string());
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_acl_admits_everything() {
        let acl = AccessControl::new();
        assert!(!acl.addr_blocked("203.0.113.9".parse().unwrap()));
        assert!(!acl.callsign_blocked("N0CALL"));
        assert!(acl.talkgroup_allowed(99));
    }

    #[test]
    fn address_blacklist_blocks() {
        let acl = AccessControl::new();
        acl.install(AclCategory::AddressBlacklist, ["203.0.113.9"]);
        assert!(acl.addr_blocked("203.0.113.9".parse().unwrap()));
        assert!(!acl.addr_blocked("203.0.113.10".parse().unwrap()));
    }

    #[test]
    fn callsign_whitelist_excludes_unlisted() {
        let acl = AccessControl::new();
        acl.install(AclCategory::CallsignWhitelist, ["N0CALL"]);
        assert!(!acl.callsign_blocked("N0CALL"));
        assert!(!acl.callsign_blocked("n0call "), "matching is case/pad insensitive");
        assert!(acl.callsign_blocked("W1AW"));
    }

    #[test]
    fn blacklist_wins_over_whitelist() {
        let acl = AccessControl::new();
        acl.install(AclCategory::CallsignWhitelist, ["N0CALL"]);
        acl.install(AclCategory::CallsignBlacklist, ["N0CALL"]);
        assert!(acl.callsign_blocked("N0CALL"));
    }

    #[test]
    fn talkgroup_allowlist_restricts() {
        let acl = AccessControl::new();
        acl.install(AclCategory::TalkgroupAllowlist, ["1", "2"]);
        assert!(acl.talkgroup_allowed(1));
        assert!(!acl.talkgroup_allowed(3));
    }

    #[test]
    fn list_files_skip_comments_and_blanks() {
        let dir = std::env::temp_dir().join("ysfr-acl-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("blacklist.txt");
        std::fs::write(&path, "# banned stations\n\n n0call \nW1AW\n").unwrap();

        let paths = AclPaths {
            callsign_blacklist: Some(path),
            ..AclPaths::default()
        };
        let acl = AccessControl::from_paths(paths).unwrap();
        assert!(acl.callsign_blocked("N0CALL"));
        assert!(acl.callsign_blocked("W1AW"));
        assert!(!acl.callsign_blocked("K1TTT"));
    }

    #[test]
    fn missing_configured_file_is_startup_error() {
        let paths = AclPaths {
            callsign_blacklist: Some(PathBuf::from("/nonexistent/ysfr/blacklist.txt")),
            ..AclPaths::default()
        };
        assert!(AccessControl::from_paths(paths).is_err());
    }
}
