use crate::queue::validate_queue_name;
use crate::{Queue, QueueError, Result, Task, TaskId};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Default lease timeout (5 minutes)
pub const DEFAULT_LEASE_TIMEOUT_SECS: u64 = 300;

/// Longest accepted lease timeout (100 years)
pub const MAX_LEASE_TIMEOUT_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Convert a configured timeout into a lease duration
pub fn lease_timeout_from_secs(secs: u64) -> Result<Duration> {
    if secs > MAX_LEASE_TIMEOUT_SECS {
        return Err(QueueError::InvalidLeaseTimeout(secs));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or(QueueError::InvalidLeaseTimeout(secs))
}

/// All queues known to the broker, keyed by name.
///
/// Queues are created lazily by `add` and are never dropped, even once empty.
/// Every `get` and `ack` first sweeps the whole registry for expired leases,
/// so a lease that lapsed a moment ago is already idle when the command runs.
/// There is no background timer: an expired lease stays formally leased until
/// the next sweep.
#[derive(Debug, Clone)]
pub struct QueueRegistry {
    queues: BTreeMap<String, Queue>,
    lease_timeout: Duration,
    /// Leases reverted by sweeps since startup; not persisted
    leases_expired: u64,
}

impl QueueRegistry {
    pub fn new(lease_timeout: Duration) -> Self {
        QueueRegistry {
            queues: BTreeMap::new(),
            lease_timeout,
            leases_expired: 0,
        }
    }

    pub fn with_timeout_secs(secs: u64) -> Result<Self> {
        Ok(Self::new(lease_timeout_from_secs(secs)?))
    }

    /// Rebuild a registry from restored queues
    pub fn from_queues(queues: Vec<Queue>, lease_timeout: Duration) -> Result<Self> {
        let mut registry = Self::new(lease_timeout);
        for queue in queues {
            let name = queue.name().to_string();
            if registry.queues.insert(name.clone(), queue).is_some() {
                return Err(QueueError::DuplicateQueue(name));
            }
        }
        Ok(registry)
    }

    pub fn lease_timeout(&self) -> Duration {
        self.lease_timeout
    }

    pub fn leases_expired_total(&self) -> u64 {
        self.leases_expired
    }

    pub fn queue(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    pub fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    pub fn task_count(&self) -> usize {
        self.queues.values().map(Queue::len).sum()
    }

    /// Enqueue a task, creating the queue on first use
    pub fn add(&mut self, queue: &str, length: i64, data: &str) -> Result<TaskId> {
        validate_queue_name(queue)?;
        let task = Task::new(length, data)?;

        let id = self
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| {
                debug!("Creating queue {}", queue);
                Queue::new(queue)
            })
            .push(task);

        debug!("Added task {} to queue {}", id, queue);
        Ok(id)
    }

    /// Lease the next idle task of `queue`
    pub fn get(&mut self, queue: &str, now: DateTime<Utc>) -> Option<Task> {
        self.sweep(now);

        let timeout = self.lease_timeout;
        let task = self.queues.get_mut(queue)?.dequeue(now, timeout)?.clone();
        debug!("Leased task {} from queue {}", task.id, queue);
        Some(task)
    }

    /// Acknowledge a leased task, removing it
    pub fn ack(&mut self, queue: &str, task_id: &TaskId, now: DateTime<Utc>) -> bool {
        self.sweep(now);

        let acked = self
            .queues
            .get_mut(queue)
            .is_some_and(|q| q.ack(task_id));
        if acked {
            debug!("Acknowledged task {} in queue {}", task_id, queue);
        }
        acked
    }

    /// Membership check; no sweep, no mutation
    pub fn contains(&self, queue: &str, task_id: &TaskId) -> bool {
        self.queues
            .get(queue)
            .is_some_and(|q| q.contains(task_id))
    }

    /// Revert every expired lease in every queue; returns how many
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let mut released = 0;
        for queue in self.queues.values_mut() {
            let n = queue.release_expired(now);
            if n > 0 {
                warn!("Released {} expired lease(s) in queue {}", n, queue.name());
            }
            released += n;
        }
        self.leases_expired += released as u64;
        released
    }
}

impl Default for QueueRegistry {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_LEASE_TIMEOUT_SECS as i64))
    }
}
