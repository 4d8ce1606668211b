use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Illegal mapping: {0}")]
    IllegalMapping(String),

    #[error("Entity '{0}' is not a known persistent type")]
    NonPersistentType(String),

    #[error("Property '{0}' not found in entity '{1}'")]
    PropertyNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Cannot use [{0}] projection. [{0}] projections are not supported by this backend")]
    UnsupportedProjection(String),

    #[error("Optimistic locking failure: {0}")]
    OptimisticLocking(String),

    #[error("Could not acquire lock: {0}")]
    CannotAcquireLock(String),

    #[error("Data integrity violation: {0}")]
    DataIntegrityViolation(String),

    #[error("Could not retrieve data: {0}")]
    DataRetrievalFailure(String),

    #[error("Invalid resource usage: {0}")]
    InvalidResourceUsage(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
