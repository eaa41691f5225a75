//! Error types for the signaling core

/// Result type alias using the signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during session negotiation
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Router has not been created yet
    #[error("Router not ready: {0}")]
    NotReady(String),

    /// Media engine call failed or timed out
    #[error("Media engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Media engine worker has exited; unrecoverable for this process
    #[error("Media engine fatal: {0}")]
    EngineFatal(String),

    /// Operation attempted on an entity in an incompatible state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Conflicting parameters across retries of the same operation
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Operation referenced an unknown entity id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Capability mismatch between a peer and a producer; an expected outcome
    #[error("Cannot consume: {0}")]
    CannotConsume(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Wire error codes, JSON-RPC style: the -32600 range for envelope problems,
/// -32000 and below for domain errors.
pub mod codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// Internal server error
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Unknown entity id
    pub const NOT_FOUND: i32 = -32000;

    /// Entity is in an incompatible state for the operation
    pub const INVALID_STATE: i32 = -32001;

    /// Conflicting parameters across retries
    pub const PROTOCOL_VIOLATION: i32 = -32002;

    /// Capability mismatch
    pub const CANNOT_CONSUME: i32 = -32003;

    /// Media engine call failed
    pub const ENGINE_UNAVAILABLE: i32 = -32004;

    /// Router does not exist yet
    pub const NOT_READY: i32 = -32005;

    /// Media engine worker has died
    pub const ENGINE_FATAL: i32 = -32010;
}

impl Error {
    /// Wire error code delivered to the requesting peer
    pub fn code(&self) -> i32 {
        match self {
            Error::NotFound(_) => codes::NOT_FOUND,
            Error::InvalidState(_) => codes::INVALID_STATE,
            Error::ProtocolViolation(_) => codes::PROTOCOL_VIOLATION,
            Error::CannotConsume(_) => codes::CANNOT_CONSUME,
            Error::EngineUnavailable(_) => codes::ENGINE_UNAVAILABLE,
            Error::NotReady(_) => codes::NOT_READY,
            Error::EngineFatal(_) => codes::ENGINE_FATAL,
            Error::Serialization(_) => codes::PARSE_ERROR,
            _ => codes::INTERNAL_ERROR,
        }
    }

    /// Check if this error terminates the whole signaling domain
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::EngineFatal(_))
    }

    /// Check if this error is an expected per-request outcome rather than a
    /// failure of the system
    pub fn is_request_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::InvalidState(_)
                | Error::ProtocolViolation(_)
                | Error::CannotConsume(_)
                | Error::NotReady(_)
                | Error::EngineUnavailable(_)
        )
    }
}
