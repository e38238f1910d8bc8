use thiserror::Error;

/// Failure of a single call to the market-data provider.
///
/// The caller logs it and abandons that unit of work; the next tick retries.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint} reported an error: {message}")]
    Api { endpoint: String, message: String },

    #[error("Failed to decode {endpoint} response: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("No usable data from {endpoint}: {what}")]
    MissingData { endpoint: String, what: String },
}

impl ProviderError {
    pub fn endpoint(&self) -> &str {
        match self {
            ProviderError::Transport { endpoint, .. }
            | ProviderError::Status { endpoint, .. }
            | ProviderError::Api { endpoint, .. }
            | ProviderError::Decode { endpoint, .. }
            | ProviderError::MissingData { endpoint, .. } => endpoint,
        }
    }
}
