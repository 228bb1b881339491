use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid event envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),

    #[error("Training run not found: {0}")]
    TrainingRunNotFound(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
