use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod handlers;
pub mod parser;
pub mod types;

pub use handlers::{CommandContext, handle_command};
pub use parser::parse_command;
pub use types::{Command, CommandResult, ControlAction};

/// `revenant` - a self-persisting, self-updating agent runtime.
#[derive(Parser, Debug)]
#[command(name = "revenant")]
#[command(version)]
#[command(about = "A self-persisting, self-updating agent runtime.", long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the agent with its interactive console (default)
    Run,

    /// Print state, lock and artifact status without taking the lock
    Status,

    /// Print the signature value for a candidate artifact
    ///
    /// The key is read from the REVENANT_UPDATE_KEY environment variable.
    Sign {
        /// Candidate artifact file
        file: PathBuf,
    },

    /// Restore the backup artifact without starting the agent
    Rollback,
}
