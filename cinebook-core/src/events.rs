use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{SeatKey, SeatLock};

pub const SEATLOCK_TOPIC: &str = "seatlocks.events";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SeatLockEvent {
    SeatLocked {
        event_id: Uuid,
        lock: SeatLock,
        renewed: bool,
    },
    SeatUnlocked {
        event_id: Uuid,
        schedule_id: String,
        cinema_room_id: String,
        seat_id: String,
        user_id: String,
        released_at: DateTime<Utc>,
    },
    SeatsExpired {
        event_id: Uuid,
        seats: Vec<SeatKey>,
        swept_at: DateTime<Utc>,
    },
}

impl SeatLockEvent {
    pub fn locked(lock: SeatLock, renewed: bool) -> Self {
        Self::SeatLocked { event_id: Uuid::new_v4(), lock, renewed }
    }

    pub fn unlocked(lock: &SeatLock, released_at: DateTime<Utc>) -> Self {
        Self::SeatUnlocked {
            event_id: Uuid::new_v4(),
            schedule_id: lock.schedule_id.clone(),
            cinema_room_id: lock.cinema_room_id.clone(),
            seat_id: lock.seat_id.clone(),
            user_id: lock.user_id.clone(),
            released_at,
        }
    }

    pub fn expired(seats: Vec<SeatKey>, swept_at: DateTime<Utc>) -> Self {
        Self::SeatsExpired { event_id: Uuid::new_v4(), seats, swept_at }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SeatLocked { .. } => "seat_locked",
            Self::SeatUnlocked { .. } => "seat_unlocked",
            Self::SeatsExpired { .. } => "seats_expired",
        }
    }

    /// Partition key for the event bus: all events of one showtime stay ordered.
    pub fn partition_key(&self) -> &str {
        match self {
            Self::SeatLocked { lock, .. } => &lock.schedule_id,
            Self::SeatUnlocked { schedule_id, .. } => schedule_id,
            Self::SeatsExpired { seats, .. } => {
                seats.first().map(|s| s.schedule_id.as_str()).unwrap_or("sweep")
            }
        }
    }

    /// Whether the event touches a seat in the given schedule/room.
    pub fn concerns(&self, schedule_id: &str, cinema_room_id: &str) -> bool {
        match self {
            Self::SeatLocked { lock, .. } => {
                lock.schedule_id == schedule_id && lock.cinema_room_id == cinema_room_id
            }
            Self::SeatUnlocked { schedule_id: s, cinema_room_id: r, .. } => {
                s == schedule_id && r == cinema_room_id
            }
            Self::SeatsExpired { seats, .. } => {
                seats.iter().any(|seat| seat.in_room(schedule_id, cinema_room_id))
            }
        }
    }
}

/// Outbound event bus (Kafka in production).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_is_tagged() {
        let now = Utc::now();
        let lock = SeatLock::new(SeatKey::new("S1", "R1", "A1"), "u1", now, now);
        let value = serde_json::to_value(SeatLockEvent::locked(lock, false)).unwrap();

        assert_eq!(value["type"], "seat_locked");
        assert_eq!(value["lock"]["seatId"], "A1");
        assert_eq!(value["renewed"], false);
    }

    #[test]
    fn test_expired_event_concerns_rooms_it_names() {
        let event = SeatLockEvent::expired(
            vec![SeatKey::new("S1", "R1", "A1"), SeatKey::new("S2", "R9", "B4")],
            Utc::now(),
        );

        assert!(event.concerns("S2", "R9"));
        assert!(!event.concerns("S1", "R9"));
        assert_eq!(event.partition_key(), "S1");
    }
}
