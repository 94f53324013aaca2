//! testvnf: deploy OpenStack test topologies for network benchmarking
//!
//! A scenario names a Heat template and an accommodation (how agents are
//! spread over compute nodes). Playing it generates agent placements, creates
//! the stack, keeps the agents that actually came up and reports them.

pub mod cli;
pub mod conffile;
pub mod config;
pub mod deployment;
pub mod infra;
pub mod placement;
pub mod report;
pub mod scenario;
pub mod template;
