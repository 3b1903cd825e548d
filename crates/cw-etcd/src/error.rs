use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtcdError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing mandatory header: {0}")]
    MissingHeader(&'static str),

    #[error("exchange has no body")]
    MissingBody,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Watch(#[from] cw_watch::WatchError),
}

pub type Result<T> = std::result::Result<T, EtcdError>;
