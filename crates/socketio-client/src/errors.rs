use engineio_client::EngineError;

pub use socketio_client_core::{EncodeError, ParseError};

/// Error type for emit operations
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    /// An error occurred while encoding the packet. The emit is dropped,
    /// not retried.
    #[error("error serializing packet: {0}")]
    Encode(#[from] EncodeError),

    /// Error sending data through the engine.io connection
    #[error("error sending data through the engine.io connection: {0}")]
    Engine(#[from] EngineError),

    /// The socket is not connected
    #[error("socket is not connected")]
    NotConnected,
}

/// Error type for ack operations
#[derive(thiserror::Error, Debug)]
pub enum AckError {
    /// The ack response timed out
    #[error("ack timeout")]
    Timeout,

    /// The emit carrying the ack request failed
    #[error(transparent)]
    Send(#[from] SendError),

    /// The connection closed before the ack could be resolved
    #[error("connection closed before the ack resolved")]
    Closed,
}

/// Error type for connection attempts
#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    /// The engine handshake failed
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The namespace did not reach the connected state in time
    #[error("connection attempt timed out")]
    Timeout,

    /// The client is already closed
    #[error("client was deliberately disconnected")]
    Disconnected,
}

/// Error type for the client builder
#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
    /// The server url could not be parsed
    #[error("invalid server url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// An extra header name or value is invalid
    #[error("invalid header: {0}")]
    InvalidHeader(String),
}
