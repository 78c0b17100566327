//! Error types for the retrieval core.
//!
//! Four failure kinds cross the crate boundary: configuration (fatal at
//! construction time), transport (remote listing/fetch/embedding/rerank
//! calls), parse (bytes that cannot be turned into text), and data (a stored
//! row whose payload cannot be decoded). Database errors are carried as-is.

#[derive(Debug, thiserror::Error)]
pub enum KbError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("data error: {0}")]
    Data(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl From<reqwest::Error> for KbError {
    fn from(e: reqwest::Error) -> Self {
        KbError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KbError>;
