use thiserror::Error;

/// Every failure a brevrpc call or connection can surface.
///
/// The first seven variants are the error kinds callers branch on; the
/// remaining ones carry lower level causes and are folded into those kinds
/// where the invoker reports them.
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Connect failure to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Call timeout after {0}ms")]
    Timeout(u64),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Call failure: {0}")]
    CallFailure(String),

    #[error("Remote invocation failed: {0}")]
    Invoke(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Unknown serialization tag: {0:#04x}")]
    UnknownSerialization(u8),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    pub fn connect(addr: impl Into<String>, reason: impl ToString) -> Self {
        RpcError::Connect {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for transport level failures where another endpoint
    /// (or a later attempt) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RpcError::Connect { .. } | RpcError::CallFailure(_) | RpcError::Io(_)
        )
    }

    /// Returns `true` for errors after which the connection must be closed.
    pub fn is_fatal_for_connection(&self) -> bool {
        matches!(
            self,
            RpcError::Protocol(_) | RpcError::UnknownSerialization(_) | RpcError::Io(_)
        )
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::Serialization(format!("json: {}", err))
    }
}

impl From<postcard::Error> for RpcError {
    fn from(err: postcard::Error) -> Self {
        RpcError::Serialization(format!("postcard: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for RpcError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        RpcError::Serialization(format!("msgpack: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for RpcError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        RpcError::Serialization(format!("msgpack: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
