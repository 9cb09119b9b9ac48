use sqlx::{Executor, PgPool, Row};
use tracing::{error, info};

const SCHEMA: &str = include_str!("schema.sql");

/// Applies the embedded schema. Every statement is `IF NOT EXISTS`, so this is safe
/// to run against an initialized database.
pub async fn init_db(pool: &PgPool) -> Result<(), sqlx::Error> {
    info!("Initializing database schema...");

    match pool.execute(SCHEMA).await {
        Ok(_) => {
            info!("Database schema initialized successfully");
            Ok(())
        }
        Err(e) => {
            error!("Failed to initialize database schema: {}", e);
            Err(e)
        }
    }
}

/// Check if the notifications table exists
pub async fn check_db_initialized(pool: &PgPool) -> bool {
    let result = sqlx::query(
        "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = 'global' AND table_name = 'notifications')",
    )
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => row.try_get::<bool, _>(0).unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_declares_uniqueness_constraints() {
        let compact: String = SCHEMA.split_whitespace().collect::<Vec<_>>().join(" ");
        assert!(compact.contains("UNIQUE (event_id, recipient_id)"));
        assert!(compact.contains("UNIQUE (recipient_id, period_key)"));
        assert!(compact.contains("UNIQUE (user_id, endpoint)"));
    }
}
