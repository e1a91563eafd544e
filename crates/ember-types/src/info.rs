use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ObjectId;
use crate::mode::RetentionMode;

/// Metadata for a committed object, as reported by store listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub mode: RetentionMode,
    /// When the object was committed.
    pub created_at: DateTime<Utc>,
    /// Payload size in bytes.
    pub size: u64,
}

impl ObjectInfo {
    /// Age of the object at `now`. Clock skew that puts `created_at` in the
    /// future yields zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns `true` once the object's age strictly exceeds `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_aged(secs: i64) -> (ObjectInfo, DateTime<Utc>) {
        let now = Utc::now();
        let info = ObjectInfo {
            id: ObjectId::generate().unwrap(),
            mode: RetentionMode::Normal,
            created_at: now - chrono::Duration::seconds(secs),
            size: 3,
        };
        (info, now)
    }

    #[test]
    fn age_is_measured_from_created_at() {
        let (info, now) = info_aged(90);
        assert_eq!(info.age(now), Duration::from_secs(90));
    }

    #[test]
    fn future_timestamps_have_zero_age() {
        let (info, now) = info_aged(-30);
        assert_eq!(info.age(now), Duration::ZERO);
        assert!(!info.is_expired(now, Duration::ZERO));
    }

    #[test]
    fn expiry_is_strictly_greater_than_ttl() {
        let ttl = Duration::from_secs(10_800);
        let (at_ttl, now) = info_aged(10_800);
        assert!(!at_ttl.is_expired(now, ttl));
        let (past_ttl, now) = info_aged(10_801);
        assert!(past_ttl.is_expired(now, ttl));
    }
}
