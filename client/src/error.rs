use thiserror::Error;

/// Failures surfaced by the data layer and the screens built on it.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
    #[error("server error: {0}")]
    Server(String),
    #[error("unexpected response: expected {0}")]
    UnexpectedResponse(&'static str),
    #[error("{0} {1} not found")]
    NotFound(&'static str, i64),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("not signed in")]
    NotSignedIn,
    #[error(transparent)]
    Protocol(#[from] chatty_common::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        match e {
            tokio_tungstenite::tungstenite::Error::ConnectionClosed
            | tokio_tungstenite::tungstenite::Error::AlreadyClosed => ClientError::Closed,
            other => ClientError::Transport(other.to_string()),
        }
    }
}
