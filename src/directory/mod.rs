//! Persisted session-directory boundary
//!
//! The reflector publishes who is connected through this narrow key-value
//! interface; the storage engine behind it is an external collaborator. The
//! in-memory implementation here backs tests and the demos.

pub mod store;

pub use store::{DirectoryEntry, DirectoryError, DirectoryStore, MemoryDirectory};
