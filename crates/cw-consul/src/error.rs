use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsulError {
    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing mandatory header: {0}")]
    MissingHeader(&'static str),

    #[error("exchange has no body")]
    MissingBody,

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("invalid value encoding: {0}")]
    Encoding(String),

    #[error("leader election already running")]
    AlreadyRunning,

    #[error(transparent)]
    Watch(#[from] cw_watch::WatchError),
}

pub type Result<T> = std::result::Result<T, ConsulError>;
