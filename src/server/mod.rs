//! Reflector server wiring
//!
//! Configuration snapshot, the lifecycle coordinator (shutdown flag and
//! managed worker set), the resource monitor, and the [`Reflector`] itself.

pub mod config;
pub mod monitor;
pub mod reflector;
pub mod shutdown;

pub use config::ReflectorConfig;
pub use monitor::ResourceMonitor;
pub use reflector::Reflector;
pub use shutdown::{Shutdown, WorkerSet};
