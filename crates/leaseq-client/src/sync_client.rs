use crate::async_client::{LeasedTask, TaskQueueAsyncClient};
use crate::{ClientError, Result};
use leaseq_core::TaskId;
use leaseq_protocol::{Command, Response};
use std::time::Duration;

/// Synchronous client for the broker (wraps the async client)
pub struct TaskQueueClient {
    runtime: tokio::runtime::Runtime,
    inner: TaskQueueAsyncClient,
}

impl TaskQueueClient {
    /// Connect to broker
    pub fn connect(broker_address: impl Into<String>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ClientError::ConnectionError(e.to_string()))?;

        let inner = runtime.block_on(TaskQueueAsyncClient::connect(broker_address))?;

        Ok(TaskQueueClient { runtime, inner })
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        TaskQueueClient {
            runtime: self.runtime,
            inner: self.inner.with_timeout(timeout),
        }
    }

    pub fn add(&self, queue: impl Into<String>, length: i64, data: impl Into<String>) -> Result<TaskId> {
        self.runtime.block_on(self.inner.add(queue, length, data))
    }

    pub fn get(&self, queue: impl Into<String>) -> Result<Option<LeasedTask>> {
        self.runtime.block_on(self.inner.get(queue))
    }

    pub fn ack(&self, queue: impl Into<String>, task_id: &TaskId) -> Result<bool> {
        self.runtime.block_on(self.inner.ack(queue, task_id))
    }

    pub fn contains(&self, queue: impl Into<String>, task_id: &TaskId) -> Result<bool> {
        self.runtime.block_on(self.inner.contains(queue, task_id))
    }

    pub fn save(&self) -> Result<()> {
        self.runtime.block_on(self.inner.save())
    }

    pub fn send(&self, command: Command) -> Result<Response> {
        self.runtime.block_on(self.inner.send(command))
    }
}
