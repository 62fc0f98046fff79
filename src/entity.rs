//! The persisted user entity and the raw → entity transform.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::RawRecord;

/// A user row. `email` holds ciphertext while stored and plaintext once the
/// read path has decrypted it.
///
/// The JSON form is what the cache stores and what the HTTP API returns.
/// `deleted_at` is exposed as `updated_at` for compatibility with existing clients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(rename = "firstname")]
    #[sqlx(rename = "firstname")]
    pub first_name: String,
    #[serde(rename = "lastname")]
    #[sqlx(rename = "lastname")]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updated_at", default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

/// Convert an epoch in milliseconds to a timestamp truncated to whole seconds.
///
/// Non-positive epochs have no timestamp.
///
/// ```
/// use user_pipeline::entity::time_from_epoch;
///
/// let t = time_from_epoch(1672531200000).unwrap();
/// assert_eq!(t.to_rfc3339(), "2023-01-01T00:00:00+00:00");
/// assert!(time_from_epoch(0).is_none());
/// ```
pub fn time_from_epoch(epoch_ms: i64) -> Option<DateTime<Utc>> {
    if epoch_ms <= 0 {
        return None;
    }
    DateTime::from_timestamp(epoch_ms / 1000, 0)
}

/// Map a raw record to an unsaved [`User`]. Never fails: bad timestamps and the
/// negative parent sentinel become `None`.
///
/// The raw id is not carried over; the store assigns ids on insert.
pub fn to_entity(raw: RawRecord) -> User {
    User {
        id: 0,
        email: raw.email,
        first_name: raw.first_name,
        last_name: raw.last_name,
        parent_user_id: (raw.parent_user_id >= 0).then_some(raw.parent_user_id),
        created_at: time_from_epoch(raw.created_at),
        deleted_at: time_from_epoch(raw.deleted_at),
        merged_at: time_from_epoch(raw.merged_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_known_epoch() {
        let t = time_from_epoch(1_672_531_200_000).unwrap();
        assert_eq!(t, Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_sub_second_precision_truncated() {
        let t = time_from_epoch(1_672_531_200_999).unwrap();
        assert_eq!(t.timestamp(), 1_672_531_200);
        assert_eq!(t.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn test_non_positive_epochs_absent() {
        for epoch in [0, -1, -1000, i64::MIN] {
            assert!(time_from_epoch(epoch).is_none(), "epoch {epoch}");
        }
    }

    #[test]
    fn test_to_entity_full() {
        let raw = RawRecord {
            id: 8,
            first_name: "Hanah".into(),
            last_name: "Schmidt".into(),
            email: "h@example.com".into(),
            parent_user_id: 3,
            created_at: 1_672_531_200_000,
            deleted_at: -1,
            merged_at: 0,
        };
        let user = to_entity(raw);

        assert_eq!(user.email, "h@example.com");
        assert_eq!(user.first_name, "Hanah");
        assert_eq!(user.parent_user_id, Some(3));
        assert!(user.created_at.is_some());
        assert!(user.deleted_at.is_none());
        assert!(user.merged_at.is_none());
    }

    #[test]
    fn test_parent_sentinel() {
        let no_parent = to_entity(RawRecord { parent_user_id: -1, ..Default::default() });
        assert_eq!(no_parent.parent_user_id, None);

        // zero is a real reference, only negatives mean "none"
        let zero = to_entity(RawRecord { parent_user_id: 0, ..Default::default() });
        assert_eq!(zero.parent_user_id, Some(0));
    }

    #[test]
    fn test_json_shape() {
        let user = User {
            id: 1,
            email: "a@b.c".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            deleted_at: time_from_epoch(1_672_531_200_000),
            ..Default::default()
        };
        let json = serde_json::to_value(&user).unwrap();

        assert_eq!(json["firstname"], "A");
        assert_eq!(json["lastname"], "B");
        assert!(json.get("parent_user_id").is_none());
        assert!(json.get("created_at").is_none());
        assert!(json.get("updated_at").is_some());

        let back: User = serde_json::from_value(json).unwrap();
        assert_eq!(back, user);
    }
}
