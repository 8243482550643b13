use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

/// Identity of a lockable seat: one seat of one room for one showtime.
///
/// Ids are compared exactly; `a1` and `A1` are different seats.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatKey {
    pub schedule_id: String,
    pub cinema_room_id: String,
    pub seat_id: String,
}

impl SeatKey {
    pub fn new(
        schedule_id: impl Into<String>,
        cinema_room_id: impl Into<String>,
        seat_id: impl Into<String>,
    ) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            cinema_room_id: cinema_room_id.into(),
            seat_id: seat_id.into(),
        }
    }

    pub fn in_room(&self, schedule_id: &str, cinema_room_id: &str) -> bool {
        self.schedule_id == schedule_id && self.cinema_room_id == cinema_room_id
    }
}

impl fmt::Display for SeatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.schedule_id, self.cinema_room_id, self.seat_id)
    }
}

/// A time-bounded exclusive hold on a seat by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLock {
    pub schedule_id: String,
    pub cinema_room_id: String,
    pub seat_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeatLock {
    pub fn new(
        key: SeatKey,
        user_id: impl Into<String>,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            schedule_id: key.schedule_id,
            cinema_room_id: key.cinema_room_id,
            seat_id: key.seat_id,
            user_id: user_id.into(),
            created_at,
            expires_at,
        }
    }

    pub fn key(&self) -> SeatKey {
        SeatKey::new(&self.schedule_id, &self.cinema_room_id, &self.seat_id)
    }

    /// A lock is active strictly before its deadline.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Aggregate counters over the active lock set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStats {
    pub active_locks: usize,
    pub total_schedules_locked: usize,
    pub total_rooms_locked: usize,
    pub distinct_users: usize,
    pub average_remaining_seconds: f64,
    pub lock_ttl_seconds: u64,
    pub generated_at: DateTime<Utc>,
}
