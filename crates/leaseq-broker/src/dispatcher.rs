use crate::metrics::BrokerMetrics;
use chrono::Duration;
use leaseq_core::{Clock, QueueRegistry, TaskId};
use leaseq_persistence::{Checkpoint, CheckpointStore, PersistenceError};
use leaseq_protocol::{Command, Response};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Routes parsed commands to the registry and owns the checkpoint store.
///
/// All registry state sits behind one lock, so GET's select-and-lease and
/// ACK's check-and-remove are atomic with respect to the timeout sweep no
/// matter how many connections are in flight. SAVE holds the store lock for
/// the whole capture-and-write, which keeps concurrent SAVEs in order.
pub struct Dispatcher {
    registry: Mutex<QueueRegistry>,
    store: Mutex<CheckpointStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<BrokerMetrics>,
}

impl Dispatcher {
    /// Build the dispatcher, restoring the registry from the checkpoint if
    /// one exists. A checkpoint that exists but cannot be read is an error:
    /// starting empty would silently drop every task it held.
    pub fn open(
        store: CheckpointStore,
        lease_timeout: Duration,
        clock: Arc<dyn Clock>,
        metrics: Arc<BrokerMetrics>,
    ) -> Result<Self, PersistenceError> {
        let registry = match store.load()? {
            Some(checkpoint) => checkpoint.into_registry(lease_timeout)?,
            None => {
                info!("No checkpoint found at {:?}, starting empty", store.path());
                QueueRegistry::new(lease_timeout)
            }
        };

        metrics.update_registry_size(registry.queue_count(), registry.task_count());

        Ok(Dispatcher {
            registry: Mutex::new(registry),
            store: Mutex::new(store),
            clock,
            metrics,
        })
    }

    /// Parse and execute one request line. Never fails: protocol errors
    /// become `ERROR` without touching any state.
    pub fn handle_line(&self, line: &str) -> Response {
        let response = match Command::parse(line) {
            Ok(command) => {
                self.metrics.inc_requests(command.verb().as_str());
                self.dispatch(command)
            }
            Err(e) => {
                warn!("Rejected request {:?}: {}", line, e);
                self.metrics.inc_requests("invalid");
                Response::Error
            }
        };

        self.metrics.inc_responses(response.outcome());
        response
    }

    /// Execute a parsed command
    pub fn dispatch(&self, command: Command) -> Response {
        match command {
            Command::Add {
                queue,
                length,
                data,
            } => self.handle_add(&queue, length, &data),
            Command::Get { queue } => self.handle_get(&queue),
            Command::Ack { queue, task_id } => self.handle_ack(&queue, &task_id),
            Command::In { queue, task_id } => self.handle_in(&queue, &task_id),
            Command::Save => self.handle_save(),
        }
    }

    fn handle_add(&self, queue: &str, length: i64, data: &str) -> Response {
        let mut registry = self.registry.lock();
        match registry.add(queue, length, data) {
            Ok(task_id) => {
                self.refresh_size(&registry);
                Response::Added(task_id)
            }
            Err(e) => {
                warn!("Rejected ADD to queue {}: {}", queue, e);
                Response::Error
            }
        }
    }

    fn handle_get(&self, queue: &str) -> Response {
        let now = self.clock.now();
        let mut registry = self.registry.lock();

        let expired_before = registry.leases_expired_total();
        let task = registry.get(queue, now);
        self.record_expired(&registry, expired_before);

        match task {
            Some(task) => Response::from_task(&task),
            None => {
                debug!("No idle task in queue {}", queue);
                Response::NoTask
            }
        }
    }

    fn handle_ack(&self, queue: &str, task_id: &TaskId) -> Response {
        let now = self.clock.now();
        let mut registry = self.registry.lock();

        let expired_before = registry.leases_expired_total();
        let acked = registry.ack(queue, task_id, now);
        self.record_expired(&registry, expired_before);

        if acked {
            self.metrics.tasks_acked_total.inc();
            self.refresh_size(&registry);
        } else {
            debug!("ACK rejected for task {} in queue {}", task_id, queue);
        }
        Response::from_bool(acked)
    }

    fn handle_in(&self, queue: &str, task_id: &TaskId) -> Response {
        let registry = self.registry.lock();
        Response::from_bool(registry.contains(queue, task_id))
    }

    fn handle_save(&self) -> Response {
        let store = self.store.lock();
        let checkpoint = {
            let registry = self.registry.lock();
            Checkpoint::capture(&registry, self.clock.now())
        };

        match store.save(&checkpoint) {
            Ok(()) => {
                info!(
                    "Saved checkpoint to {:?} ({} queues, {} tasks)",
                    store.path(),
                    checkpoint.queues.len(),
                    checkpoint.task_count()
                );
                self.metrics.inc_checkpoints("ok");
                Response::Ok
            }
            Err(e) => {
                error!("Failed to save checkpoint to {:?}: {}", store.path(), e);
                self.metrics.inc_checkpoints("error");
                Response::Error
            }
        }
    }

    fn record_expired(&self, registry: &QueueRegistry, before: u64) {
        let released = registry.leases_expired_total() - before;
        if released > 0 {
            self.metrics.leases_expired_total.inc_by(released);
        }
    }

    fn refresh_size(&self, registry: &QueueRegistry) {
        self.metrics
            .update_registry_size(registry.queue_count(), registry.task_count());
    }

    /// Number of tasks across all queues
    pub fn task_count(&self) -> usize {
        self.registry.lock().task_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaseq_core::ManualClock;
    use leaseq_persistence::CheckpointStoreConfig;
    use tempfile::TempDir;

    struct Harness {
        dispatcher: Dispatcher,
        clock: Arc<ManualClock>,
        metrics: Arc<BrokerMetrics>,
        _dir: TempDir,
    }

    fn open_in(dir: &TempDir, clock: Arc<ManualClock>) -> (Dispatcher, Arc<BrokerMetrics>) {
        let store = CheckpointStore::open(CheckpointStoreConfig {
            checkpoint_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let metrics = Arc::new(BrokerMetrics::new().unwrap());
        let dispatcher =
            Dispatcher::open(store, Duration::seconds(5), clock, metrics.clone()).unwrap();
        (dispatcher, metrics)
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());
        let (dispatcher, metrics) = open_in(&dir, clock.clone());
        Harness {
            dispatcher,
            clock,
            metrics,
            _dir: dir,
        }
    }

    fn send(h: &Harness, line: &str) -> String {
        h.dispatcher.handle_line(line).to_string()
    }

    #[test]
    fn test_basic_scenario() {
        let h = harness();

        assert_eq!(send(&h, "GET Q1"), "NONE");
        let t1 = send(&h, "ADD Q1 2 12");
        assert_eq!(send(&h, &format!("IN Q1 {t1}")), "YES");
        assert_eq!(send(&h, &format!("ACK Q1 {t1}")), "NO");
        assert_eq!(send(&h, "GET Q1"), format!("{t1} 2 12"));
        assert_eq!(send(&h, "GET Q1"), "NONE");
        assert_eq!(send(&h, &format!("ACK Q1 {t1}")), "YES");
        assert_eq!(send(&h, "GET Q1"), "NONE");
        assert_eq!(send(&h, &format!("ACK Q1 {t1}")), "NO");
    }

    #[test]
    fn test_timeout_scenario() {
        let h = harness();

        let t1 = send(&h, "ADD Q1 2 12");
        let t2 = send(&h, "ADD Q1 3 123");
        let t3 = send(&h, "ADD Q1 4 1234");

        assert_eq!(send(&h, "GET Q1"), format!("{t1} 2 12"));
        assert_eq!(send(&h, "GET Q1"), format!("{t2} 3 123"));
        assert_eq!(send(&h, "GET Q1"), format!("{t3} 4 1234"));
        assert_eq!(send(&h, "GET Q1"), "NONE");

        h.clock.advance(Duration::seconds(6));

        assert_eq!(send(&h, &format!("ACK Q1 {t1}")), "NO");
        assert_eq!(send(&h, &format!("ACK Q1 {t2}")), "NO");
        assert_eq!(send(&h, &format!("ACK Q1 {t3}")), "NO");
        assert_eq!(send(&h, "GET Q1"), format!("{t1} 2 12"));
        assert_eq!(send(&h, "GET Q1"), format!("{t2} 3 123"));
        assert_eq!(send(&h, "GET Q1"), format!("{t3} 4 1234"));
        assert_eq!(send(&h, &format!("ACK Q1 {t2}")), "YES");
        assert_eq!(send(&h, &format!("ACK Q1 {t3}")), "YES");
        assert_eq!(send(&h, &format!("ACK Q1 {t1}")), "YES");
        assert_eq!(send(&h, "GET Q1"), "NONE");

        assert_eq!(h.metrics.leases_expired_total.get(), 3);
        assert_eq!(h.metrics.tasks_acked_total.get(), 3);
    }

    #[test]
    fn test_bad_requests() {
        let h = harness();

        assert_eq!(send(&h, "ADD"), "ERROR");
        assert_eq!(send(&h, "ADD 1"), "ERROR");
        assert_eq!(send(&h, "ADD Q1 x data"), "ERROR");
        assert_eq!(send(&h, "GET"), "ERROR");
        assert_eq!(send(&h, "PURGE Q1"), "ERROR");
        assert_eq!(send(&h, ""), "ERROR");
        assert_eq!(h.dispatcher.task_count(), 0);
        assert_eq!(
            h.metrics
                .requests_total
                .with_label_values(&["invalid"])
                .get(),
            6
        );
    }

    #[test]
    fn test_in_does_not_sweep() {
        let h = harness();
        let t1 = send(&h, "ADD Q1 1 x");
        send(&h, "GET Q1");

        h.clock.advance(Duration::seconds(6));
        assert_eq!(send(&h, &format!("IN Q1 {t1}")), "YES");
        assert_eq!(h.metrics.leases_expired_total.get(), 0);
    }

    #[test]
    fn test_save_and_restore() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::default());

        let (first, _) = open_in(&dir, clock.clone());
        let ids: Vec<String> = ["ADD Q1 2 12", "ADD Q1 3 123", "ADD Q2 4 1234"]
            .iter()
            .map(|line| first.handle_line(line).to_string())
            .collect();
        first.handle_line("GET Q1");
        assert_eq!(first.handle_line("SAVE"), Response::Ok);
        drop(first);

        let (second, metrics) = open_in(&dir, clock.clone());
        assert_eq!(metrics.tasks.get(), 3);
        assert_eq!(second.handle_line(&format!("IN Q1 {}", ids[0])), Response::Yes);
        assert_eq!(second.handle_line(&format!("IN Q2 {}", ids[2])), Response::Yes);

        // the leased task stayed leased across the restart
        assert_eq!(
            second.handle_line("GET Q1").to_string(),
            format!("{} 3 123", ids[1])
        );
        assert_eq!(second.handle_line("GET Q1"), Response::NoTask);
        assert_eq!(second.handle_line(&format!("ACK Q1 {}", ids[0])), Response::Yes);
    }

    #[test]
    fn test_save_failure_keeps_registry() {
        let dir = TempDir::new().unwrap();
        let checkpoint_dir = dir.path().join("gone");
        let store = CheckpointStore::open(CheckpointStoreConfig {
            checkpoint_dir: checkpoint_dir.clone(),
            ..Default::default()
        })
        .unwrap();
        let metrics = Arc::new(BrokerMetrics::new().unwrap());
        let dispatcher = Dispatcher::open(
            store,
            Duration::seconds(5),
            Arc::new(ManualClock::default()),
            metrics.clone(),
        )
        .unwrap();

        let t1 = dispatcher.handle_line("ADD Q1 1 x").to_string();
        std::fs::remove_dir(&checkpoint_dir).unwrap();

        assert_eq!(dispatcher.handle_line("SAVE"), Response::Error);
        assert_eq!(dispatcher.handle_line(&format!("IN Q1 {t1}")), Response::Yes);
        assert_eq!(
            metrics.checkpoints_total.with_label_values(&["error"]).get(),
            1
        );
    }

    #[test]
    fn test_corrupt_checkpoint_refuses_to_start() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("checkpoint.json"), b"{ truncated").unwrap();

        let store = CheckpointStore::open(CheckpointStoreConfig {
            checkpoint_dir: dir.path().to_path_buf(),
            ..Default::default()
        })
        .unwrap();
        let result = Dispatcher::open(
            store,
            Duration::seconds(5),
            Arc::new(ManualClock::default()),
            Arc::new(BrokerMetrics::new().unwrap()),
        );
        assert!(result.is_err());
    }
}
