//! Access control and fast lookup sets
//!
//! Membership caches rebuilt wholesale from authoritative lists and swapped
//! atomically, so readers never observe a partially populated set. See
//! [`control::AccessControl`] for the gating policy.

pub mod control;
pub mod set;

pub use control::{AccessControl, AclCategory, AclPaths};
pub use set::FastLookupSet;
