use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookingError {
    #[error("Provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider rejected the request ({status}): {body}")]
    ProviderRejected { status: u16, body: String },

    #[error("Provider temporarily unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Circuit open for {0}")]
    CircuitOpen(String),

    #[error("Appointment must be created with confirmed=true")]
    UnconfirmedAppointment,

    #[error("Storage error: {0}")]
    Storage(#[from] shared_storage::StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
