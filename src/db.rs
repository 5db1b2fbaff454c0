//! Database bootstrap (§10.4): connect and run migrations. Both failures
//! are fatal at startup per §7's "migration failure" row.

use anyhow::Context;
use sqlx::postgres::{PgPoolOptions, PgPool};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run database migrations")?;

    Ok(pool)
}
