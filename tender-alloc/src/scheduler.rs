//! Deadline scheduling.
//!
//! Every timer in the protocol (bidding deadlines, acknowledgement grace,
//! execution watchdog, backlog retry) is an entry in one min-heap that the
//! engine drains on each tick. Stale entries are tolerated: handlers check
//! that the thing they refer to is still in the expected state.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use tender_core::{AnnouncementId, AssignmentId, TaskId, Timestamp};

/// What to do when a deadline fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeadlineKind {
    BiddingClosed(AnnouncementId),
    AwardAck(AssignmentId),
    Watchdog(AssignmentId),
    BacklogRetry(TaskId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledDeadline {
    due: Timestamp,
    seq: u64,
    kind: DeadlineKind,
}

impl Ord for ScheduledDeadline {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScheduledDeadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending deadlines, ordered by due time then insertion order.
#[derive(Debug, Default)]
pub struct DeadlineQueue {
    heap: BinaryHeap<Reverse<ScheduledDeadline>>,
    next_seq: u64,
}

impl DeadlineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Timestamp, kind: DeadlineKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledDeadline { due, seq, kind }));
    }

    /// Remove and return every deadline due at or before `now`, earliest first.
    pub fn drain_due(&mut self, now: Timestamp) -> Vec<DeadlineKind> {
        let mut due = Vec::new();
        while let Some(Reverse(next)) = self.heap.peek() {
            if next.due > now {
                break;
            }
            if let Some(Reverse(entry)) = self.heap.pop() {
                due.push(entry.kind);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<Timestamp> {
        self.heap.peek().map(|Reverse(d)| d.due)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use tender_core::new_entity_id;

    #[test]
    fn test_drains_in_due_order() {
        let now = Utc::now();
        let a = new_entity_id();
        let b = new_entity_id();
        let c = new_entity_id();
        let mut queue = DeadlineQueue::new();
        queue.schedule(now + Duration::seconds(30), DeadlineKind::BiddingClosed(a));
        queue.schedule(now + Duration::seconds(10), DeadlineKind::AwardAck(b));
        queue.schedule(now + Duration::seconds(60), DeadlineKind::Watchdog(c));

        assert_eq!(queue.next_due(), Some(now + Duration::seconds(10)));
        assert_eq!(
            queue.drain_due(now + Duration::seconds(30)),
            vec![DeadlineKind::AwardAck(b), DeadlineKind::BiddingClosed(a)]
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_nothing_due_before_deadline() {
        let now = Utc::now();
        let mut queue = DeadlineQueue::new();
        queue.schedule(now + Duration::seconds(5), DeadlineKind::BacklogRetry(new_entity_id()));
        assert!(queue.drain_due(now).is_empty());
        assert!(!queue.is_empty());
    }

    #[test]
    fn test_same_due_time_keeps_insertion_order() {
        let now = Utc::now();
        let first = new_entity_id();
        let second = new_entity_id();
        let mut queue = DeadlineQueue::new();
        queue.schedule(now, DeadlineKind::BacklogRetry(first));
        queue.schedule(now, DeadlineKind::BacklogRetry(second));
        assert_eq!(
            queue.drain_due(now),
            vec![
                DeadlineKind::BacklogRetry(first),
                DeadlineKind::BacklogRetry(second)
            ]
        );
    }
}
