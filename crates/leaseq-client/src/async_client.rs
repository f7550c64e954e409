use crate::{ClientError, Result};
use leaseq_core::TaskId;
use leaseq_protocol::{Command, ProtocolError, Response, ResponseCodec, Verb};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A task handed out by GET
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasedTask {
    pub id: TaskId,
    pub length: i64,
    pub data: String,
}

/// Async client for the broker.
///
/// The broker serves one request per connection, so every call opens a fresh
/// connection, writes the request, half-closes, and reads the reply to EOF.
#[derive(Debug, Clone)]
pub struct TaskQueueAsyncClient {
    broker_address: String,
    timeout: Duration,
}

impl TaskQueueAsyncClient {
    /// Connect to broker
    pub async fn connect(broker_address: impl Into<String>) -> Result<Self> {
        let broker_address = broker_address.into();

        // Test connection
        let _ = TcpStream::connect(&broker_address)
            .await
            .map_err(|e| ClientError::ConnectionError(e.to_string()))?;

        Ok(TaskQueueAsyncClient {
            broker_address,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Bound on how long a single request may take
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn broker_address(&self) -> &str {
        &self.broker_address
    }

    /// Enqueue a task and return its id
    pub async fn add(
        &self,
        queue: impl Into<String>,
        length: i64,
        data: impl Into<String>,
    ) -> Result<TaskId> {
        let command = Command::Add {
            queue: queue.into(),
            length,
            data: data.into(),
        };
        match self.send(command).await? {
            Response::Added(id) => Ok(id),
            other => Err(unexpected(Verb::Add, other)),
        }
    }

    /// Lease the next idle task of `queue`, if any
    pub async fn get(&self, queue: impl Into<String>) -> Result<Option<LeasedTask>> {
        let command = Command::Get {
            queue: queue.into(),
        };
        match self.send(command).await? {
            Response::Task { id, length, data } => Ok(Some(LeasedTask { id, length, data })),
            Response::NoTask => Ok(None),
            other => Err(unexpected(Verb::Get, other)),
        }
    }

    /// Acknowledge a leased task; `false` if it was not leased in `queue`
    pub async fn ack(&self, queue: impl Into<String>, task_id: &TaskId) -> Result<bool> {
        let command = Command::Ack {
            queue: queue.into(),
            task_id: task_id.clone(),
        };
        self.expect_bool(command).await
    }

    /// Whether `queue` holds the task, leased or not
    pub async fn contains(&self, queue: impl Into<String>, task_id: &TaskId) -> Result<bool> {
        let command = Command::In {
            queue: queue.into(),
            task_id: task_id.clone(),
        };
        self.expect_bool(command).await
    }

    /// Ask the broker to write a checkpoint
    pub async fn save(&self) -> Result<()> {
        match self.send(Command::Save).await? {
            Response::Ok => Ok(()),
            other => Err(unexpected(Verb::Save, other)),
        }
    }

    /// Send one command and return the parsed reply, `ERROR` included
    pub async fn send(&self, command: Command) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.round_trip(command))
            .await
            .map_err(|_| ClientError::Timeout)?
    }

    async fn round_trip(&self, command: Command) -> Result<Response> {
        let verb = command.verb();

        let stream = TcpStream::connect(&self.broker_address)
            .await
            .map_err(|e| ClientError::ConnectionError(e.to_string()))?;

        let mut framed = Framed::new(stream, ResponseCodec);

        debug!("Sending {} to {}", verb, self.broker_address);
        framed.send(command).await?;
        framed.get_mut().shutdown().await?;

        match framed.next().await {
            Some(Ok(body)) => Ok(Response::parse(verb, &body)?),
            Some(Err(e)) => Err(e.into()),
            None => Err(ClientError::ConnectionError(
                "Connection closed without a response".to_string(),
            )),
        }
    }

    async fn expect_bool(&self, command: Command) -> Result<bool> {
        let verb = command.verb();
        match self.send(command).await? {
            Response::Yes => Ok(true),
            Response::No => Ok(false),
            other => Err(unexpected(verb, other)),
        }
    }
}

/// `ERROR` is a rejection; anything else is a reply that does not fit the verb
fn unexpected(verb: Verb, response: Response) -> ClientError {
    match response {
        Response::Error => ClientError::Rejected(verb),
        other => ProtocolError::UnexpectedResponse {
            verb,
            body: other.to_string(),
        }
        .into(),
    }
}
