use thiserror::Error;

/// Errors from the storage backends
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl DatabaseError {
    pub fn status_code(&self) -> u16 {
        match self {
            DatabaseError::NotFound(_) => 404,
            DatabaseError::Conflict(_) => 409,
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut)
            | DatabaseError::Sqlx(sqlx::Error::PoolClosed)
            | DatabaseError::Sqlx(sqlx::Error::Io(_)) => 503,
            DatabaseError::ConfigMissing(_) | DatabaseError::Corrupt(_) | DatabaseError::Sqlx(_) => 500,
        }
    }
}
