use conduit_core::{ClassifiedError, ErrorKind};

/// Config store and change listener errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Query against the backing database failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row could not be turned into a record
    #[error("invalid {resource} record: {message}")]
    InvalidRecord {
        /// Relation the row came from
        resource: &'static str,
        message: String,
    },

    /// Notification payload is not `<resource>:<OPERATION>`
    #[error("invalid change notification payload: {0:?}")]
    InvalidPayload(String),

    /// Backing store or notification channel cannot be reached
    #[error("config source unavailable: {0}")]
    Unavailable(String),

    #[error("provider not found: {0}")]
    ProviderNotFound(String),

    #[error("virtual key not found")]
    VirtualKeyNotFound,
}

impl ClassifiedError for StoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::ProviderNotFound(_) | Self::VirtualKeyNotFound => ErrorKind::NotFound,
            Self::Database(_) | Self::InvalidRecord { .. } | Self::InvalidPayload(_) | Self::Unavailable(_) => {
                ErrorKind::Internal
            }
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::ProviderNotFound(_) | Self::VirtualKeyNotFound => self.to_string(),
            _ => "configuration store unavailable".to_string(),
        }
    }
}
