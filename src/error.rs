use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("Launch failed for agent {agent}: {reason}")]
    LaunchFailed { agent: String, reason: String },

    #[error("A launch attempt is already in flight for agent {0}")]
    LaunchInFlight(String),

    #[error("Channel is closed")]
    ChannelClosed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote call failed on the agent: {0}")]
    Remote(String),

    #[error("Clock difference unavailable: {0}")]
    ClockUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FleetError>;
