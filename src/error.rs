use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpeedTestError {
    /// Connection, DNS or timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Cooperative abort. Not a real failure.
    #[error("cancelled")]
    Cancelled,

    /// The remote answered with a non-success status.
    #[error("unexpected status {status}")]
    Protocol { status: u16 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("a measurement session is already running")]
    AlreadyRunning,
}

impl From<reqwest::Error> for SpeedTestError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if !status.is_success() => SpeedTestError::Protocol {
                status: status.as_u16(),
            },
            _ => SpeedTestError::Transport(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SpeedTestError>;
