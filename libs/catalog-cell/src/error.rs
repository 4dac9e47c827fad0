use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Sync already in progress for tenant {0}")]
    SyncInProgress(String),

    #[error("Provider error: {0}")]
    Provider(#[from] booking_cell::BookingError),

    #[error("Storage error: {0}")]
    Storage(#[from] shared_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
