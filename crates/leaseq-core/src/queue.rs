use crate::{QueueError, Result, Task, TaskId};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// Named, insertion-ordered collection of tasks with round-robin dequeue.
///
/// `cursor` holds the index of the task handed out by the last successful
/// dequeue, or `None` when the next scan should begin at the head. Scans
/// start one past the cursor and wrap, so repeated polling walks the whole
/// queue instead of hammering the head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Queue {
    name: String,
    tasks: Vec<Task>,
    cursor: Option<usize>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Self {
        Queue {
            name: name.into(),
            tasks: Vec::new(),
            cursor: None,
        }
    }

    /// Rebuild a queue from persisted parts, rejecting states the live
    /// queue could never have reached.
    pub fn from_parts(name: String, tasks: Vec<Task>, cursor: Option<usize>) -> Result<Self> {
        validate_queue_name(&name)?;

        let mut seen = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            if task.data.is_empty() {
                return Err(QueueError::EmptyPayload);
            }
            if !seen.insert(&task.id) {
                return Err(QueueError::DuplicateTask {
                    queue: name,
                    task_id: task.id.to_string(),
                });
            }
        }

        if let Some(c) = cursor {
            if c >= tasks.len() {
                return Err(QueueError::CursorOutOfRange {
                    queue: name,
                    cursor: c,
                    len: tasks.len(),
                });
            }
        }

        Ok(Queue { name, tasks, cursor })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn leased_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_leased()).count()
    }

    /// Append a task and return its id
    pub fn push(&mut self, task: Task) -> TaskId {
        let id = task.id.clone();
        self.tasks.push(task);
        id
    }

    /// Membership check, independent of lease state
    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.position(task_id).is_some()
    }

    /// Lease the next idle task after the cursor, wrapping around once.
    ///
    /// Returns `None` without touching the cursor when every task is leased.
    pub fn dequeue(&mut self, now: DateTime<Utc>, timeout: Duration) -> Option<&Task> {
        let len = self.tasks.len();
        if len == 0 {
            return None;
        }

        let start = self.cursor.map_or(0, |c| c + 1);
        let idx = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| self.tasks[i].is_idle())?;

        self.cursor = Some(idx);
        let task = &mut self.tasks[idx];
        task.lease(now, timeout);
        Some(task)
    }

    /// Remove a leased task. Idle or unknown ids are rejected.
    pub fn ack(&mut self, task_id: &TaskId) -> bool {
        match self.position(task_id) {
            Some(idx) if self.tasks[idx].is_leased() => {
                self.remove_at(idx);
                true
            }
            _ => false,
        }
    }

    /// Revert every lease that expired before `now`; returns how many
    pub fn release_expired(&mut self, now: DateTime<Utc>) -> usize {
        let mut released = 0;
        for task in self.tasks.iter_mut().filter(|t| t.is_lease_expired(now)) {
            task.release();
            released += 1;
        }
        released
    }

    fn position(&self, task_id: &TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| &t.id == task_id)
    }

    fn remove_at(&mut self, idx: usize) {
        self.tasks.remove(idx);

        // Everything after `idx` shifted down by one. If the cursor pointed at
        // or past the removed slot, step it back so the scan resumes at the
        // task that followed the last dequeued one.
        self.cursor = match self.cursor {
            _ if self.tasks.is_empty() => None,
            Some(c) if idx <= c => c.checked_sub(1),
            other => other,
        };
    }
}

/// Queue names are single non-empty tokens
pub(crate) fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(QueueError::InvalidQueueName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn timeout() -> Duration {
        Duration::seconds(5)
    }

    fn queue_with(n: usize) -> (Queue, Vec<TaskId>) {
        let mut queue = Queue::new("q");
        let ids = (0..n)
            .map(|i| queue.push(Task::new(i as i64, format!("payload-{i}")).unwrap()))
            .collect();
        (queue, ids)
    }

    fn dequeue_id(queue: &mut Queue, now: DateTime<Utc>) -> Option<TaskId> {
        queue.dequeue(now, timeout()).map(|t| t.id.clone())
    }

    #[test]
    fn test_dequeue_in_insertion_order() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(3);

        assert_eq!(dequeue_id(&mut queue, now), Some(ids[0].clone()));
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[1].clone()));
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[2].clone()));
        assert_eq!(dequeue_id(&mut queue, now), None);
        assert_eq!(queue.cursor(), Some(2));
    }

    #[test]
    fn test_empty_queue_returns_none() {
        let mut queue = Queue::new("empty");
        assert!(queue.dequeue(Utc::now(), timeout()).is_none());
        assert_eq!(queue.cursor(), None);
    }

    #[test]
    fn test_ack_requires_lease() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(1);

        assert!(!queue.ack(&ids[0]));
        assert_eq!(queue.len(), 1);

        dequeue_id(&mut queue, now);
        assert!(queue.ack(&ids[0]));
        assert!(!queue.ack(&ids[0]));
        assert!(queue.is_empty());
        assert_eq!(queue.cursor(), None);
    }

    #[test]
    fn test_ack_unknown_id() {
        let (mut queue, _) = queue_with(2);
        assert!(!queue.ack(&TaskId::from("nope")));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_contains_ignores_lease_state() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(2);

        assert!(queue.contains(&ids[0]));
        dequeue_id(&mut queue, now);
        assert!(queue.contains(&ids[0]));
        assert!(!queue.contains(&TaskId::from("missing")));
    }

    #[test]
    fn test_expired_leases_are_released() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(3);
        for _ in 0..3 {
            dequeue_id(&mut queue, now);
        }

        assert_eq!(queue.release_expired(now + timeout()), 0);
        assert_eq!(queue.release_expired(now + Duration::seconds(6)), 3);
        assert_eq!(queue.leased_count(), 0);

        let later = now + Duration::seconds(6);
        assert_eq!(dequeue_id(&mut queue, later), Some(ids[0].clone()));
        assert_eq!(dequeue_id(&mut queue, later), Some(ids[1].clone()));
        assert_eq!(dequeue_id(&mut queue, later), Some(ids[2].clone()));
    }

    #[test]
    fn test_round_robin_skips_leased_head() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(3);

        assert_eq!(dequeue_id(&mut queue, now), Some(ids[0].clone()));
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[1].clone()));

        // t0 comes back first after t2 because the scan wraps
        queue.release_expired(now + Duration::seconds(6));
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[2].clone()));
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[0].clone()));
    }

    #[test]
    fn test_cursor_after_ack_before_cursor() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(4);

        dequeue_id(&mut queue, now); // t0
        dequeue_id(&mut queue, now); // t1, cursor = 1
        assert!(queue.ack(&ids[0]));
        assert_eq!(queue.cursor(), Some(0));

        // t2 is next, nothing skipped
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[2].clone()));
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[3].clone()));
    }

    #[test]
    fn test_cursor_after_ack_at_cursor() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(3);

        dequeue_id(&mut queue, now); // t0
        dequeue_id(&mut queue, now); // t1, cursor = 1
        assert!(queue.ack(&ids[1]));
        assert_eq!(queue.cursor(), Some(0));
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[2].clone()));
    }

    #[test]
    fn test_cursor_after_ack_of_head_at_cursor() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(3);

        dequeue_id(&mut queue, now); // t0, cursor = 0
        assert!(queue.ack(&ids[0]));
        assert_eq!(queue.cursor(), None);
        assert_eq!(dequeue_id(&mut queue, now), Some(ids[1].clone()));
    }

    #[test]
    fn test_cursor_after_ack_past_cursor() {
        let now = Utc::now();
        let (mut queue, ids) = queue_with(4);

        dequeue_id(&mut queue, now); // t0
        dequeue_id(&mut queue, now); // t1
        dequeue_id(&mut queue, now); // t2, cursor = 2
        queue.release_expired(now + Duration::seconds(6));

        // lease t3 then t0 again, cursor = 0
        let later = now + Duration::seconds(6);
        assert_eq!(dequeue_id(&mut queue, later), Some(ids[3].clone()));
        assert_eq!(dequeue_id(&mut queue, later), Some(ids[0].clone()));
        assert!(queue.ack(&ids[3]));
        assert_eq!(queue.cursor(), Some(0));
        assert_eq!(dequeue_id(&mut queue, later), Some(ids[1].clone()));
    }

    #[test]
    fn test_task_added_after_last_dequeue_is_next() {
        let now = Utc::now();
        let (mut queue, _) = queue_with(2);
        dequeue_id(&mut queue, now);
        dequeue_id(&mut queue, now);

        let fresh = queue.push(Task::new(9, "late").unwrap());
        assert_eq!(dequeue_id(&mut queue, now), Some(fresh));
    }

    #[test]
    fn test_from_parts_validation() {
        let task = Task::new(1, "a").unwrap();
        let dup = task.clone();

        assert!(matches!(
            Queue::from_parts("q".into(), vec![task.clone(), dup], None),
            Err(QueueError::DuplicateTask { .. })
        ));
        assert!(matches!(
            Queue::from_parts("q".into(), vec![task.clone()], Some(1)),
            Err(QueueError::CursorOutOfRange { .. })
        ));
        let queue = Queue::from_parts("q".into(), vec![task], Some(0)).unwrap();
        assert_eq!(queue.cursor(), Some(0));
    }

    #[test]
    fn test_from_parts_rejects_unreachable_contents() {
        let task = Task::new(1, "a").unwrap();
        let mut blank = Task::new(1, "b").unwrap();
        blank.data.clear();

        assert_eq!(
            Queue::from_parts("q".into(), vec![task.clone(), blank], None),
            Err(QueueError::EmptyPayload)
        );
        for name in ["", "two words", " "] {
            assert_eq!(
                Queue::from_parts(name.into(), vec![task.clone()], None),
                Err(QueueError::InvalidQueueName(name.to_string()))
            );
        }
    }

    proptest! {
        #[test]
        fn prop_n_gets_return_each_task_once(n in 1usize..40, warmup in 0usize..40) {
            let now = Utc::now();
            let (mut queue, ids) = queue_with(n);

            // move the cursor somewhere arbitrary, then free everything
            for _ in 0..warmup.min(n) {
                dequeue_id(&mut queue, now);
            }
            queue.release_expired(now + Duration::seconds(6));

            let later = now + Duration::seconds(6);
            let mut seen: Vec<TaskId> = (0..n)
                .map(|_| dequeue_id(&mut queue, later).unwrap())
                .collect();
            seen.sort();
            let mut expected = ids.clone();
            expected.sort();
            prop_assert_eq!(seen, expected);
            prop_assert!(queue.dequeue(later, timeout()).is_none());
        }

        #[test]
        fn prop_interleaved_acks_never_double_lease(ops in proptest::collection::vec(0u8..3, 1..120)) {
            let now = Utc::now();
            let (mut queue, _) = queue_with(5);
            let mut leased: Vec<TaskId> = Vec::new();

            for op in ops {
                match op {
                    0 | 1 => {
                        if let Some(id) = dequeue_id(&mut queue, now) {
                            prop_assert!(!leased.contains(&id));
                            leased.push(id);
                        } else {
                            prop_assert_eq!(queue.leased_count(), queue.len());
                        }
                    }
                    _ => {
                        if let Some(id) = leased.pop() {
                            prop_assert!(queue.ack(&id));
                            prop_assert!(!queue.ack(&id));
                        }
                        queue.push(Task::new(0, "refill").unwrap());
                    }
                }
                if let Some(c) = queue.cursor() {
                    prop_assert!(c < queue.len());
                }
            }
        }
    }
}
