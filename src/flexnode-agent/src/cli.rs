use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "flex-node",
    version,
    about = "Turn this machine into a managed cluster worker node and keep it healthy"
)]
pub struct Cli {
    /// Configuration file (default: /etc/flex-node/config.toml, then ./flex-node.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Provision the node once and exit
    Bootstrap,
    /// Provision the node, then supervise and self-heal until stopped
    Agent,
    /// Remove the node's services, files and cloud registration (best-effort)
    Unbootstrap,
    /// Print the last status snapshot
    Status,
    /// Print version information
    Version,
}

impl Command {
    /// Everything but `version` needs a loaded configuration.
    pub fn needs_config(self) -> bool {
        !matches!(self, Command::Version)
    }
}
