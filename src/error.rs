use thiserror::Error;

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("function name must not be empty")]
    InvalidName,
    #[error("function name `{0}` is reserved by the script-side bridge object")]
    ReservedName(String),
    #[error("bridge has been destroyed")]
    Destroyed,
    #[error("bridge runtime already initialized")]
    AlreadyInitialized,
    #[error("platform backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid URI `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("failed to fetch content: {0}")]
    Fetch(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("failed to parse config: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
