use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::limits::DB_STATEMENT_TIMEOUT;

pub async fn create_pool(database_url: &str) -> PgPool {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(DB_STATEMENT_TIMEOUT)
        .connect(database_url)
        .await
        .expect("failed to connect to Postgres")
}

pub async fn run_migrations(pool: &PgPool) {
    sqlx::migrate!("./migrations").run(pool).await.expect("failed to run database migrations")
}
