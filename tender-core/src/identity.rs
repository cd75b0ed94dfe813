//! Identity types for TENDER entities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub type AgentId = EntityId;
pub type TaskId = EntityId;
pub type PlanId = EntityId;
pub type AnnouncementId = EntityId;
pub type AssignmentId = EntityId;
pub type MessageId = EntityId;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Convert a std duration into a chrono duration for deadline arithmetic.
///
/// Saturates at `chrono::TimeDelta::MAX` for values chrono cannot represent.
pub fn to_time_delta(duration: std::time::Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX)
}

/// `now + duration`, or `None` when the result falls outside chrono's range.
pub fn checked_deadline(now: Timestamp, duration: std::time::Duration) -> Option<Timestamp> {
    chrono::TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_new_entity_id_is_v7_and_sortable() {
        let a = new_entity_id();
        let b = new_entity_id();
        assert_eq!(a.get_version_num(), 7);
        assert!(a <= b);
    }

    #[test]
    fn test_to_time_delta_converts_seconds() {
        let delta = to_time_delta(Duration::from_secs(30));
        assert_eq!(delta.num_seconds(), 30);
    }

    #[test]
    fn test_checked_deadline_refuses_overflow() {
        let now = Utc::now();
        assert_eq!(
            checked_deadline(now, Duration::from_secs(30)),
            Some(now + chrono::TimeDelta::seconds(30))
        );
        assert_eq!(checked_deadline(now, Duration::from_secs(10_000_000_000_000)), None);
        assert_eq!(checked_deadline(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)), None);
    }
}
