use thiserror::Error;
use tonic::{Code, Status};

/// Errors surfaced by the client. Variants are kept semantically distinct
/// from the underlying transport so callers can match on them without
/// depending on `tonic` directly.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The underlying duplex stream or a unary call failed at the
    /// transport layer, outside of a clean `close()`.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// A request's configured per-call deadline elapsed before its ack
    /// arrived.
    #[error("request timed out waiting for ack")]
    Timeout,

    /// Surfaced after `close()`; expected, but still represented so a
    /// caller that raced a request against `close()` can tell the two
    /// apart from a live failure.
    #[error("operation cancelled")]
    Cancelled,

    /// A message arrived that did not match any variant the client knows
    /// how to handle, or a page's envelope was malformed (e.g. an entry in
    /// the position reserved for the cookie).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Raised by operations this client deliberately does not support:
    /// synchronous iteration, `add`, synchronous `has` on Remote Set
    /// Views, and `delete` on `RemoteValueSet`.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    /// TLS was requested without the required cert paths, or an operation
    /// was attempted on a closed session/map.
    #[error("precondition failed: {0}")]
    PreconditionFailure(String),

    /// The configured serializer failed to encode or decode a value.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("bad grpc transport: {0}")]
    GrpcTransport(#[from] tonic::transport::Error),
}

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::DeadlineExceeded => ClientError::Timeout,
            Code::Cancelled => ClientError::Cancelled,
            Code::Unavailable | Code::Unknown | Code::Internal => {
                ClientError::TransportFailure(status.message().to_string())
            }
            Code::FailedPrecondition => {
                ClientError::PreconditionFailure(status.message().to_string())
            }
            c => ClientError::Protocol(format!("{c:?}: {}", status.message())),
        }
    }
}
