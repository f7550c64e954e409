use crate::{PersistenceError, Result};
use chrono::{DateTime, Duration, Utc};
use leaseq_core::{Queue, QueueRegistry, Task};
use serde::{Deserialize, Serialize};

/// Version written into every checkpoint. Bump on any layout change.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Snapshot of the whole registry as written to disk.
///
/// The layout is plain JSON so a checkpoint can be inspected or repaired by
/// hand:
///
/// ```json
/// {
///   "format_version": 1,
///   "saved_at": "2024-01-01T00:00:00Z",
///   "queues": [
///     {
///       "name": "Q1",
///       "cursor": 0,
///       "tasks": [
///         { "id": "…", "length": 2, "data": "12",
///           "lease": { "state": "leased", "expires_at": "…" } }
///       ]
///     }
///   ]
/// }
/// ```
///
/// The lease timeout is configuration, not state, and is not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    pub queues: Vec<QueueRecord>,
}

/// One queue as stored in a checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub name: String,
    pub cursor: Option<usize>,
    pub tasks: Vec<Task>,
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

impl Checkpoint {
    /// Capture the current registry state
    pub fn capture(registry: &QueueRegistry, saved_at: DateTime<Utc>) -> Self {
        let queues = registry
            .queues()
            .map(|queue| QueueRecord {
                name: queue.name().to_string(),
                cursor: queue.cursor(),
                tasks: queue.tasks().to_vec(),
            })
            .collect();

        Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            saved_at,
            queues,
        }
    }

    /// Rebuild a registry, validating every queue on the way in
    pub fn into_registry(self, lease_timeout: Duration) -> Result<QueueRegistry> {
        let queues = self
            .queues
            .into_iter()
            .map(|record| Queue::from_parts(record.name, record.tasks, record.cursor))
            .collect::<leaseq_core::Result<Vec<_>>>()?;

        Ok(QueueRegistry::from_queues(queues, lease_timeout)?)
    }

    pub fn task_count(&self) -> usize {
        self.queues.iter().map(|q| q.tasks.len()).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Decode a checkpoint, refusing versions this build does not understand
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let probe: VersionProbe = serde_json::from_slice(bytes)?;
        if probe.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: probe.format_version,
                expected: CHECKPOINT_FORMAT_VERSION,
            });
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaseq_core::{LeaseState, QueueError, TaskId};

    fn sample_registry(now: DateTime<Utc>) -> (QueueRegistry, Vec<TaskId>) {
        let mut registry = QueueRegistry::with_timeout_secs(300).unwrap();
        let ids = vec![
            registry.add("Q1", 2, "12").unwrap(),
            registry.add("Q1", 3, "123").unwrap(),
            registry.add("Q2", 4, "with spaces inside").unwrap(),
        ];
        registry.get("Q1", now).unwrap();
        (registry, ids)
    }

    #[test]
    fn test_capture_and_restore() {
        let now = Utc::now();
        let (registry, ids) = sample_registry(now);

        let checkpoint = Checkpoint::capture(&registry, now);
        assert_eq!(checkpoint.format_version, CHECKPOINT_FORMAT_VERSION);
        assert_eq!(checkpoint.task_count(), 3);

        let bytes = checkpoint.to_bytes().unwrap();
        let restored = Checkpoint::from_bytes(&bytes)
            .unwrap()
            .into_registry(Duration::seconds(300))
            .unwrap();

        assert_eq!(restored.queue_count(), 2);
        for id in &ids[..2] {
            assert!(restored.contains("Q1", id));
        }
        assert!(restored.contains("Q2", &ids[2]));

        let q1 = restored.queue("Q1").unwrap();
        assert_eq!(q1.cursor(), Some(0));
        assert!(matches!(q1.tasks()[0].lease, LeaseState::Leased { .. }));
        assert_eq!(q1.tasks(), registry.queue("Q1").unwrap().tasks());
    }

    #[test]
    fn test_restored_lease_still_ackable() {
        let now = Utc::now();
        let (registry, ids) = sample_registry(now);

        let bytes = Checkpoint::capture(&registry, now).to_bytes().unwrap();
        let mut restored = Checkpoint::from_bytes(&bytes)
            .unwrap()
            .into_registry(Duration::seconds(300))
            .unwrap();

        assert!(restored.ack("Q1", &ids[0], now + Duration::seconds(1)));
        assert_eq!(restored.get("Q1", now).unwrap().id, ids[1]);
    }

    #[test]
    fn test_layout_is_readable_json() {
        let now = Utc::now();
        let (registry, _) = sample_registry(now);

        let bytes = Checkpoint::capture(&registry, now).to_bytes().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["format_version"], 1);
        assert_eq!(value["queues"][0]["name"], "Q1");
        assert_eq!(value["queues"][0]["tasks"][0]["lease"]["state"], "leased");
        assert_eq!(value["queues"][0]["tasks"][1]["lease"]["state"], "idle");
        assert_eq!(value["queues"][1]["tasks"][0]["data"], "with spaces inside");
    }

    #[test]
    fn test_unsupported_version() {
        let bytes = br#"{"format_version": 99, "saved_at": "2024-01-01T00:00:00Z", "queues": []}"#;
        assert!(matches!(
            Checkpoint::from_bytes(bytes),
            Err(PersistenceError::UnsupportedVersion { found: 99, expected: 1 })
        ));
    }

    #[test]
    fn test_corrupt_checkpoint() {
        assert!(matches!(
            Checkpoint::from_bytes(b"\x80\x04garbage"),
            Err(PersistenceError::SerializationError(_))
        ));
    }

    #[test]
    fn test_inconsistent_checkpoint_rejected() {
        let checkpoint = Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            saved_at: Utc::now(),
            queues: vec![QueueRecord {
                name: "Q1".to_string(),
                cursor: Some(3),
                tasks: vec![],
            }],
        };

        assert!(matches!(
            checkpoint.into_registry(Duration::seconds(5)),
            Err(PersistenceError::InvalidCheckpoint(QueueError::CursorOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_blank_queue_name_or_payload_rejected() {
        let (registry, _) = sample_registry(Utc::now());
        let mut checkpoint = Checkpoint::capture(&registry, Utc::now());
        checkpoint.queues[0].name = String::new();
        assert!(matches!(
            checkpoint.into_registry(Duration::seconds(5)),
            Err(PersistenceError::InvalidCheckpoint(QueueError::InvalidQueueName(_)))
        ));

        let mut checkpoint = Checkpoint::capture(&registry, Utc::now());
        checkpoint.queues[1].tasks[0].data.clear();
        assert!(matches!(
            checkpoint.into_registry(Duration::seconds(5)),
            Err(PersistenceError::InvalidCheckpoint(QueueError::EmptyPayload))
        ));
    }
}
