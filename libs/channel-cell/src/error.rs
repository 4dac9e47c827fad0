use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Send failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Send rejected ({status}): {body}")]
    SendRejected { status: u16, body: String },

    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    #[error("Send retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("Storage error: {0}")]
    Storage(#[from] shared_storage::StorageError),
}
