use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpsellError {
    #[error("Storage error: {0}")]
    Storage(#[from] shared_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Send failed: {0}")]
    Send(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}
