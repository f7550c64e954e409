mod message;
mod codec;

pub use message::{Command, Response, Verb};
pub use codec::{RequestCodec, ResponseCodec};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Empty request")]
    EmptyRequest,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{verb} expects {expected} argument(s), got {actual}")]
    WrongArity {
        verb: Verb,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid length hint: {0}")]
    InvalidLength(String),

    #[error("Request too large: {0} bytes")]
    RequestTooLarge(usize),

    #[error("Unexpected data after the request line: {0} bytes")]
    TrailingData(usize),

    #[error("Request is not valid UTF-8")]
    InvalidUtf8,

    #[error("Unexpected response to {verb}: {body:?}")]
    UnexpectedResponse { verb: Verb, body: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Maximum request size: 1MB
pub const MAX_REQUEST_SIZE: usize = 1024 * 1024;
