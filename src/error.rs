use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("detection source error: {0}")]
    Source(String),
    #[error("malformed tracker record on line {line}: {reason}")]
    SourceParse { line: u64, reason: String },
    #[error("state lock poisoned")]
    StateLock,
}
