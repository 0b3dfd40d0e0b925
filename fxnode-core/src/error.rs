use thiserror::Error;

/// Errors raised by the wire codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The bytes do not form a valid message, or a message exceeds the size limit.
    #[error("Malformed message: {0}")]
    Malformed(#[from] bincode::Error),

    /// A tagged map carried a tag this codec does not know.
    #[error("Unknown tagged value '{0}'")]
    UnknownTag(String),

    /// A `__datetime__` tag whose payload is not a timestamp string.
    #[error("Invalid datetime payload: {0}")]
    InvalidDatetime(String),
}

/// Errors surfaced to RPC callers and method handlers.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Underlying socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer sent bytes that could not be decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The peer closed the connection before replying.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The connection was left mid-request and can no longer be used.
    #[error("Connection is no longer usable")]
    Unusable,

    /// The remote method failed; carries the server-side message.
    #[error("{0}")]
    Remote(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// A handler rejected its arguments.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A message did not follow the request/reply layout.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A handler failed for a domain reason.
    #[error("{0}")]
    Application(String),
}

impl RpcError {
    pub fn invalid_arguments(reason: impl Into<String>) -> Self {
        Self::InvalidArguments(reason.into())
    }

    pub fn application(reason: impl Into<String>) -> Self {
        Self::Application(reason.into())
    }
}

impl From<fxnode::RecordError> for RpcError {
    fn from(err: fxnode::RecordError) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

/// Errors raised by node construction and lifecycle operations.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Binding or sending on a socket failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Pushing data requires at least one hub address.
    #[error("No hub address configured for node '{0}'")]
    NoHubAddress(String),

    /// A host name did not resolve to any socket address.
    #[error("Cannot resolve address {0}")]
    Unresolved(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A specialized Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;
