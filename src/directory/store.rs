//! Directory store trait and in-memory implementation

use std::collections::HashMap;
use std::sync::Mutex;

/// One published directory record, keyed by callsign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub callsign: String,
    /// Rendered address, `ip:port`
    pub addr: String,
    pub talkgroup: u16,
    /// Seconds since the session's last refresh at publish time
    pub idle_secs: u64,
}

/// Error type for directory operations
#[derive(Debug)]
pub enum DirectoryError {
    /// The backing store refused or failed the operation
    Backend(String),
}

impl std::fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DirectoryError::Backend(msg) => write!(f, "directory backend: {}", msg),
        }
    }
}

impl std::error::Error for DirectoryError {}

/// Narrow key-value interface to the persisted directory
///
/// Implementations must be cheap and non-blocking enough to call from the
/// directory-refresh task; engines with real I/O should buffer internally.
pub trait DirectoryStore: Send + Sync {
    /// Insert or replace the record for a callsign
    fn put(&self, entry: DirectoryEntry) -> Result<(), DirectoryError>;
    /// Fetch one record
    fn get(&self, callsign: &str) -> Result<Option<DirectoryEntry>, DirectoryError>;
    /// Delete one record; absent is not an error
    fn remove(&self, callsign: &str) -> Result<(), DirectoryError>;
    /// Every stored record
    fn list(&self) -> Result<Vec<DirectoryEntry>, DirectoryError>;
}

/// HashMap-backed store for tests and demos
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    entries: Mutex<HashMap<String, DirectoryEntry>>,
}

impl MemoryDirectory {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl DirectoryStore for MemoryDirectory {
    fn put(&self, entry: DirectoryEntry) -> Result<(), DirectoryError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DirectoryError::Backend("poisoned lock".into()))?;
        entries.insert(entry.callsign.clone(), entry);
        Ok(())
    }

    fn get(&self, callsign: &str) -> Result<Option<DirectoryEntry>, DirectoryError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| DirectoryError::Backend("poisoned lock".into()))?;
        Ok(entries.get(callsign).cloned())
    }

    fn remove(&self, callsign: &str) -> Result<(), DirectoryError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| DirectoryError::Backend("poisoned lock".into()))?;
        entries.remove(callsign);
        Ok(())
    }

    fn list(&self) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| DirectoryError::Backend("poisoned lock".into()))?;
        Ok(entries.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(callsign: &str, talkgroup: u16) -> DirectoryEntry {
        DirectoryEntry {
            callsign: callsign.to_string(),
            addr: "127.0.0.1:42000".to_string(),
            talkgroup,
            idle_secs: 0,
        }
    }

    #[test]
    fn put_get_remove() {
        let dir = MemoryDirectory::new();
        dir.put(entry("N0CALL", 1)).unwrap();

        let fetched = dir.get("N0CALL").unwrap().unwrap();
        assert_eq!(fetched.talkgroup, 1);

        dir.remove("N0CALL").unwrap();
        assert!(dir.get("N0CALL").unwrap().is_none());
        // Removing again is not an error
        dir.remove("N0CALL").unwrap();
    }

    #[test]
    fn put_replaces_existing() {
        let dir = MemoryDirectory::new();
        dir.put(entry("N0CALL", 1)).unwrap();
        dir.put(entry("N0CALL", 2)).unwrap();

        assert_eq!(dir.list().unwrap().len(), 1);
        assert_eq!(dir.get("N0CALL").unwrap().unwrap().talkgroup, 2);
    }
}
