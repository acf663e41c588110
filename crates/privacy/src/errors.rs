use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrivacyError {
    #[error("invalid redaction pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },
}

pub type PrivacyResult<T> = Result<T, PrivacyError>;
