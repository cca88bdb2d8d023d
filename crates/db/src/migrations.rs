use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

/// Reversible migrations for the PRD store and the conversation checkpoints.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
