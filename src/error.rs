use crate::config::ConfigError;

/// Errors surfaced by the widget side of the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The keyed persistence layer failed to read or write.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// The persisted chat history could not be decoded.
    #[error("stored chat history is corrupt: {0}")]
    CorruptHistory(#[source] serde_json::Error),

    /// The request never produced a usable response.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered but refused the request.
    #[error("backend rejected the request: {0}")]
    Backend(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
