use crate::track::StreamType;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Join failed: {0}")]
    Join(TransportError),

    #[error("Republish failed")]
    Republish(#[source] TransportError),

    #[error("Republish superseded by a newer publish request")]
    RepublishSuperseded,

    #[error("Session closed while an operation was pending")]
    SessionClosed,

    #[error("Policy is not bound to a session")]
    Detached,

    #[error("Publisher capacity reached")]
    CapacityReached,

    #[error("No local {0} track")]
    NoLocalTrack(StreamType),

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// Whether a newer request took over instead of this one failing
    #[must_use]
    pub const fn is_superseded(&self) -> bool {
        matches!(self, Self::RepublishSuperseded)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
