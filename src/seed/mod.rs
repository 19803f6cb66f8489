//! Seeding: placing a snapshot into a store directory and gating startup
//! on identity compatibility.
//!
//! ## Module Structure
//!
//! - `placer`: snapshot file placement and file identity helpers
//! - `verifier`: the startup identity gate

mod placer;
mod verifier;

pub use placer::{file_identities, place, FileIdentity, PlacementReport};
pub use verifier::{verify, Verified};
