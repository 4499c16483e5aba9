use thiserror::Error;

#[derive(Error, Debug)]
pub enum WhisperError {
    /// The node no longer knows the filter. Filters expire on the node side,
    /// so callers treat this as the end of the session, not as a failure.
    #[error("Whisper filter [{0}] not found.")]
    FilterNotFound(String),
    #[error("Whisper RPC [{method}] failed: {message} (code {code}).")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("Whisper node unreachable while calling [{method}]: {error}")]
    Http {
        method: String,
        error: reqwest::Error,
    },
    #[error("Can't decode Whisper response for [{method}]: {error}")]
    Decode { method: String, error: String },
}

impl WhisperError {
    pub fn is_filter_not_found(&self) -> bool {
        matches!(self, WhisperError::FilterNotFound(_))
    }
}
