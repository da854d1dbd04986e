use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("Unknown entity set '{0}'")]
    UnknownSet(String),

    #[error("Key field '{0}' not found on key object for set '{1}'")]
    KeyFieldMissing(String, String),

    #[error("Entity set '{0}' declares an empty primary key")]
    EmptyKey(String),

    #[error("Unknown navigation '{0}' on set '{1}'")]
    UnknownNavigation(String, String),

    #[error("Invalid include path: {0}")]
    InvalidIncludePath(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Multiple results: {0}")]
    MultipleResults(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Transaction has been disposed")]
    TransactionDisposed,

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Engine failure: {0}")]
    Engine(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RepoError>;

impl<T> From<std::sync::PoisonError<T>> for RepoError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}
