//! Client-session registry
//!
//! Hash-indexed session store keyed by network address, with a talk-group
//! grouping index maintained under the same lock for relay fan-out.
//! Capacity overflow is a deterministic rejection, never an eviction.

pub mod error;
pub mod session;
pub mod store;

pub use error::RegistryError;
pub use session::{ClientSession, SessionState};
pub use store::{ClientRegistry, SharedSession};
