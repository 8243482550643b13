use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crate::error::LockResult;
use crate::models::{SeatKey, SeatLock};

/// Result of trying to install a lock.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquireOutcome {
    /// No active lock existed; the candidate is now stored.
    Acquired(SeatLock),
    /// The caller already held the seat; the deadline moved forward.
    Renewed(SeatLock),
    /// Someone else holds an active lock. Carries their record.
    HeldByOther(SeatLock),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseOutcome {
    Released(SeatLock),
    NotLocked,
    HeldByOther(SeatLock),
}

/// Storage for seat locks.
///
/// Every method must be atomic with respect to the others: an implementation
/// either serializes callers or delegates to a store with compare-and-set.
/// `now` is supplied by the caller so that all implementations agree on
/// what "active" means for a single operation.
#[async_trait]
pub trait SeatLockStore: Send + Sync {
    /// Installs `candidate` unless a different user holds an active lock on
    /// the same seat. A renewal keeps the stored `created_at`.
    async fn try_acquire(
        &self,
        candidate: SeatLock,
        now: DateTime<Utc>,
    ) -> LockResult<AcquireOutcome>;

    /// Deletes the lock on `key` if `user_id` holds it.
    async fn release(
        &self,
        key: &SeatKey,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<ReleaseOutcome>;

    /// Deletes every active lock `user_id` holds in one schedule/room.
    async fn release_user(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<SeatLock>>;

    async fn active_in_room(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<SeatLock>>;

    async fn active_locks(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatLock>>;

    /// Removes every record with `expires_at <= now` and reports which seats were reclaimed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatKey>>;
}
