use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("missing mandatory header: {0}")]
    MissingHeader(&'static str),

    #[error("header {0} must be an array of strings")]
    InvalidKeys(&'static str),

    #[error("unknown action: {0}")]
    UnknownAction(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
