mod async_client;
mod sync_client;

pub use async_client::{LeasedTask, TaskQueueAsyncClient};
pub use sync_client::TaskQueueClient;

use leaseq_protocol::{ProtocolError, Verb};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(#[from] ProtocolError),

    #[error("Timeout")]
    Timeout,

    #[error("Broker rejected {0} request")]
    Rejected(Verb),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
