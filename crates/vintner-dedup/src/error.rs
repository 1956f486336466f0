use thiserror::Error;
use vintner_core::CoreError;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("threshold {name} must be within [0, 1], got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("resolution sink error: {0}")]
    Sink(String),
}

pub type Result<T> = std::result::Result<T, DedupError>;
