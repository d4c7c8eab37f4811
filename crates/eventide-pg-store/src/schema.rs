//! Event store database schema.

use sqlx::PgPool;

/// SQL to create the event log table and its indexes.
pub const CREATE_STORED_EVENTS_TABLE: &str =
    include_str!("../../../migrations/20191026000000_create_stored_events.sql");

/// Creates the table and indexes if they do not exist yet.
///
/// # Errors
///
/// Returns the driver error if any statement fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(CREATE_STORED_EVENTS_TABLE).execute(pool).await?;
    Ok(())
}
