use thiserror::Error;

use crate::types::RequestKind;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("server answered with HTTP {0}")]
    Status(u16),
    #[error("connection dropped while reading body: {0}")]
    Read(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("{kind:?} payload is not valid JSON: {reason}")]
    Malformed { kind: RequestKind, reason: String },
    #[error("{kind:?} payload has no numeric `{field}`")]
    MissingField {
        kind: RequestKind,
        field: &'static str,
    },
    #[error("unknown request kind `{0}`")]
    UnknownKind(String),
}
