//! Command-line interface.

use clap::{Parser, Subcommand};
use eventide_core::id::AggregateId;

use crate::config::Config;

/// Operator tool for Eventide event logs.
#[derive(Debug, Parser)]
#[command(name = "eventide-admin", version)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Create the `stored_events` table.
    Migrate,
    /// Print a stream as JSON lines, snapshots included.
    Stream {
        /// Aggregate whose stream is printed.
        id: AggregateId,
    },
}
