//! Engine lifecycle and user synchronization.
//!
//! The node embeds a proxying engine behind a small capability surface:
//! a backend loads a configuration into a running instance, and the
//! instance answers capability queries for per-inbound user registries, a
//! dynamic routing-rule table and a statistics registry. [`EngineHandle`]
//! owns zero-or-one running instance; [`UserSync`] applies protocol account
//! changes to the live registries without a restart.

pub mod account;
pub mod assets;
pub mod config;
mod error;
pub mod features;
mod handle;
pub mod memory;
mod users;

pub use account::{build_user_for_inbound, Account, CipherType, EngineUser, InboundProfile, UserData};
pub use error::EngineError;
pub use features::{EngineBackend, EngineInstance, RoutingRule, RuleRouter, StatsRegistry, UserRegistry};
pub use handle::EngineHandle;
pub use memory::InProcessEngine;
pub use users::UserSync;
