//! Registry error types

use std::net::SocketAddr;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A session already exists for this address
    AlreadyExists(SocketAddr),
    /// The registry is at `max_clients`; nothing was evicted
    LimitReached { max_clients: usize },
    /// Access control rejected the callsign or talk-group
    Blacklisted { callsign: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::AlreadyExists(addr) => {
                write!(f, "session already registered for {}", addr)
            }
            RegistryError::LimitReached { max_clients } => {
                write!(f, "client limit reached ({})", max_clients)
            }
            RegistryError::Blacklisted { callsign } => {
                write!(f, "registration blocked by access control: {}", callsign)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
