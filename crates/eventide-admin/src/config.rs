//! Database configuration, read from flags or the environment.

use clap::Args;

/// Connection settings for the event log database.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct Config {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Upper bound on pooled connections.
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub max_connections: u32,
}
