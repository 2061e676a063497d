// Application error taxonomy
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    /// A received payload failed structural or numeric validation during
    /// decode. Non-fatal: the frame is counted and discarded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("not connected to the broker")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
