use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Invalid length hint: {0:?} is not an integer")]
    InvalidLength(String),

    #[error("Invalid queue name: {0:?}")]
    InvalidQueueName(String),

    #[error("Invalid lease timeout: {0}s (must be at most {max}s)", max = crate::MAX_LEASE_TIMEOUT_SECS)]
    InvalidLeaseTimeout(u64),

    #[error("Task payload must not be empty")]
    EmptyPayload,

    #[error("Duplicate queue: {0}")]
    DuplicateQueue(String),

    #[error("Duplicate task id {task_id} in queue {queue}")]
    DuplicateTask { queue: String, task_id: String },

    #[error("Cursor {cursor} out of range for queue {queue} with {len} tasks")]
    CursorOutOfRange { queue: String, cursor: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, QueueError>;
