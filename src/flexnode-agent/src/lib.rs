//! flex-node front end: argument parsing, logging setup and the step lists
//! each subcommand runs.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod plan;

pub use cli::{Cli, Command};
pub use plan::Clients;
