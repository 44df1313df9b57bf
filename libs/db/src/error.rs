//! Persistence error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("STAN file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("STAN file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("required row missing from table {0}")]
    RowMissing(&'static str),
}
