use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

/// Storage and checkpoint databases share one migration set; each table is
/// created with `IF NOT EXISTS`, so pointing both URLs at one file is valid.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}
