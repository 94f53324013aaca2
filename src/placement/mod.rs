//! # Agent placement
//!
//! Pure, infrastructure-independent placement logic. A deployment run flows
//! through the stages in order:
//!
//! 1. [`normalize_accommodation`] folds scenario directives and process
//!    overrides into one [`Accommodation`]
//! 2. [`generate_agents`] places agents on compute nodes
//! 3. the stack is created from the agents (see `crate::deployment`)
//! 4. [`filter_agents`] keeps agents whose stack outputs appeared
//! 5. [`distribute_agents`] re-homes agents onto discovered hosts when the
//!    hosts were not known up front
//!
//! Nothing in this module performs I/O.

pub mod accommodation;
pub mod agent;
pub mod distribute;
pub mod filter;
pub mod generator;

pub use accommodation::{
    normalize_accommodation, Accommodation, AccommodationDirective, AccommodationOverrides,
};
pub use agent::{Agent, AgentMap, AgentMode, AgentRole, ComputeNode};
pub use distribute::{distribute_agents, HostResolver};
pub use filter::{filter_agents, AgentOverride, OutputFields};
pub use generator::{generate_agents, prepare_for_cross_az};

use thiserror::Error;

/// Errors raised while computing a placement
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementError {
    #[error("Insufficient capacity: {0}")]
    InsufficientCapacity(String),
}
