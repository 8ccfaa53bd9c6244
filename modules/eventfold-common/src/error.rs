/// Result type alias for eventfold operations.
pub type Result<T> = std::result::Result<T, EventfoldError>;

#[derive(Debug, thiserror::Error)]
pub enum EventfoldError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invariant breach: {0}")]
    InvariantBreach(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
