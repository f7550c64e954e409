mod clock;
mod error;
mod queue;
mod registry;
mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, Result};
pub use queue::Queue;
pub use registry::{
    lease_timeout_from_secs, QueueRegistry, DEFAULT_LEASE_TIMEOUT_SECS, MAX_LEASE_TIMEOUT_SECS,
};
pub use task::{LeaseState, Task, TaskId};
