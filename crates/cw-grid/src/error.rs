use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing mandatory header: {0}")]
    MissingHeader(&'static str),

    #[error("exchange has no body")]
    MissingBody,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown map event kind: {0}")]
    UnknownEventKind(String),

    #[error("registry error: {0}")]
    Registry(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GridError>;
