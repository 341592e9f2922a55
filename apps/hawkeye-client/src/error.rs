use hawkeye_proto::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler rejected message: {0}")]
    Rejected(String),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Malformed(#[from] ProtocolError),
    #[error("unknown change type: {0:?}")]
    UnrecognizedChange(String),
    #[error("message processing panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("property {0} is read-only")]
    ReadOnly(String),
    #[error("container has not been configured")]
    NotConfigured,
    #[error("no field {name:?} at index {index}")]
    UnknownField { index: usize, name: String },
}

/// The initial websocket handshake did not complete.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to connect to {url}: {source}")]
    Handshake {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("failed to connect to {url}: timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u128 },
}
