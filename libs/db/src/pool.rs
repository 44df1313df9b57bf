//! Connection pool construction.

use std::time::Duration;

use sqlx::mysql::{MySqlPoolOptions, MySqlPool};

use crate::error::DbError;

/// Max 100 open, 5-minute connection lifetime. sqlx has no direct
/// idle-count knob; `min_connections` is the closest equivalent to a
/// 10-connection idle floor and is used instead (see DESIGN.md).
pub async fn connect(dsn: &str) -> Result<MySqlPool, DbError> {
    MySqlPoolOptions::new()
        .max_connections(100)
        .min_connections(10)
        .max_lifetime(Duration::from_secs(300))
        .connect(dsn)
        .await
        .map_err(DbError::from)
}
