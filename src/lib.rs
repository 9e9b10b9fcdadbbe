//! Rolling engine upgrades for a replica set of state servers.

pub mod config;
pub mod error;
pub mod output;
pub mod remote;
pub mod topology;
pub mod upgrade;
