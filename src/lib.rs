//! # ysfr-rs
//!
//! UDP digital-voice reflector (YSF-style): clients register with a callsign
//! and talk-group, transmit framed voice streams, and the reflector fans
//! each stream out to every other client on the same talk-group.
//!
//! The crate is the routing and session engine: wire decoding, the
//! client-session registry, the one-stream-per-talk-group multiplexer,
//! periodic maintenance, bounded queues and capacities, and graceful
//! shutdown. Voice payloads are never interpreted.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use ysfr_rs::directory::MemoryDirectory;
//! use ysfr_rs::{Reflector, ReflectorConfig};
//!
//! #[tokio::main]
//! async fn main() -> ysfr_rs::Result<()> {
//!     let config = ReflectorConfig::with_addr("0.0.0.0:42000".parse().unwrap())
//!         .callsign("N0CALL")
//!         .identity("My Reflector", "clubhouse");
//!
//!     let reflector = Reflector::bind(config, Arc::new(MemoryDirectory::new())).await?;
//!     reflector.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```

pub mod acl;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod sched;
pub mod server;
pub mod stats;
pub mod stream;

pub use error::{Error, Result};
pub use server::{Reflector, ReflectorConfig, Shutdown};
pub use stats::StatsSnapshot;
