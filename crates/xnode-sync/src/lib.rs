//! Configuration-synchronization core.
//!
//! The panel and the node both track "which users exist in which inbound"
//! as a cheap per-inbound fingerprint instead of exchanging member lists.
//! This crate holds the fingerprint type ([`HashedSet`]) and the mirror
//! that decides whether an incoming configuration push requires an engine
//! restart ([`ConfigManager`]).

mod hashset;
mod manager;

pub use hashset::HashedSet;
pub use manager::{ConfigManager, Hashes, InboundHash, Internals, SyncError};
