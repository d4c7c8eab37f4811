//! Eventide admin entry point.

use std::io::Write;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use eventide_pg_store::pg_event_store::read_stream;
use eventide_pg_store::schema;

mod command;
mod config;
mod error;

use command::{Cli, Command};
use error::AdminError;

#[tokio::main]
async fn main() -> Result<(), AdminError> {
    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .with_writer(std::io::stderr)
        .init();

    let Cli { config, command } = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await?;

    match command {
        Command::Migrate => {
            schema::migrate(&pool).await?;
            tracing::info!("stored_events schema is up to date");
        }
        Command::Stream { id } => {
            let entries = read_stream(&pool, id).await?;
            let mut out = std::io::stdout().lock();
            for entry in &entries {
                serde_json::to_writer(&mut out, entry)?;
                writeln!(out)?;
            }
            tracing::info!(aggregate_id = %id, count = entries.len(), "stream printed");
        }
    }

    Ok(())
}
