use thiserror::Error;

/// Errors raised while encoding or interpreting wire frames.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode frame: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("unexpected payload: expected {expected}")]
    UnexpectedPayload { expected: &'static str },
}
