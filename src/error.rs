//! Error types for the QuestDB client.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Caller-supplied data cannot be encoded as a line. The transport was not contacted.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The server could not be reached or the socket failed mid-request.
    #[error("connection error: {0}")]
    Connection(String),

    /// The write endpoint rejected the request.
    #[error("server rejected write (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// The query endpoint rejected the SQL.
    #[error("query failed (HTTP {status}): {message}")]
    Query {
        status: u16,
        message: String,
        position: Option<u64>,
    },

    #[error("failed to decode query response: {0}")]
    Decode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("client is closed")]
    Closed,
}

impl Error {
    /// True for errors raised by the remote end after it received the request.
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Server { .. } | Error::Query { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Decode(err.to_string())
        } else {
            Error::Connection(err.to_string())
        }
    }
}
