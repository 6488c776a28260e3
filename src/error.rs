use thiserror::Error;

/// Errors returned by the tree strategies and repositories.
#[derive(Debug, Error)]
pub enum TreeError {
    /// The mapping is unusable: a required column is missing or has the wrong type.
    #[error("invalid tree mapping: {0}")]
    Configuration(String),

    /// The caller handed over a node or option this repository cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// A statement failed inside a structural transaction. The transaction was rolled back
    /// and any in-memory copy of the tree must be reloaded before retrying.
    #[error("tree transaction failed and was rolled back: {0}")]
    Transaction(#[source] sea_orm::DbErr),

    #[error("tree with root [{0}] is locked")]
    Locked(String),

    #[error("invalid tree mapping document: {0}")]
    Mapping(#[from] serde_json::Error),

    #[error("tree invariant violation: {0}")]
    Invariant(String),
}

impl TreeError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        Self::Configuration(detail.into())
    }

    pub fn invalid(detail: impl Into<String>) -> Self {
        Self::InvalidArgument(detail.into())
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::Invariant(detail.into())
    }
}
