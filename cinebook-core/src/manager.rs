use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{LockError, LockResult};
use crate::memory::MemoryLockStore;
use crate::models::{LockStats, SeatKey, SeatLock};
use crate::store::{AcquireOutcome, ReleaseOutcome, SeatLockStore};

pub const DEFAULT_LOCK_TTL_SECONDS: u64 = 300;

/// Longest lease a seat may be held for: one day.
pub const MAX_LOCK_TTL_SECONDS: u64 = 86_400;

/// A successful `lock` call.
#[derive(Debug, Clone, PartialEq)]
pub struct LockGrant {
    pub lock: SeatLock,
    pub renewed: bool,
}

/// Owns the seat lease rules: who may hold a seat, for how long, and
/// when a stale lease is reclaimed. All store access goes through here.
#[derive(Clone)]
pub struct SeatLockManager {
    store: Arc<dyn SeatLockStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SeatLockManager {
    /// Fails unless `ttl_seconds` lies in `1..=MAX_LOCK_TTL_SECONDS`. A zero
    /// lease is never active, so every caller would win the seat.
    pub fn new(
        store: Arc<dyn SeatLockStore>,
        clock: Arc<dyn Clock>,
        ttl_seconds: u64,
    ) -> LockResult<Self> {
        Ok(Self { store, clock, ttl: lease_duration(ttl_seconds)? })
    }

    /// In-memory store, wall clock, default lease.
    pub fn in_memory() -> Self {
        Self {
            store: Arc::new(MemoryLockStore::new()),
            clock: Arc::new(SystemClock),
            ttl: Duration::seconds(DEFAULT_LOCK_TTL_SECONDS as i64),
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl.num_seconds().max(0) as u64
    }

    pub async fn lock(&self, key: SeatKey, user_id: &str) -> LockResult<LockGrant> {
        validate_key(&key)?;
        LockError::require("userId", user_id)?;

        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| LockError::Validation(format!("lease from {} is out of range", now)))?;
        let candidate = SeatLock::new(key, user_id, now, expires_at);

        match self.store.try_acquire(candidate, now).await? {
            AcquireOutcome::Acquired(lock) => {
                info!("Seat {} locked by {} until {}", lock.key(), lock.user_id, lock.expires_at);
                Ok(LockGrant { lock, renewed: false })
            }
            AcquireOutcome::Renewed(lock) => {
                debug!(
                    "Seat {} lock renewed by {} until {}",
                    lock.key(),
                    lock.user_id,
                    lock.expires_at
                );
                Ok(LockGrant { lock, renewed: true })
            }
            AcquireOutcome::HeldByOther(holder) => {
                warn!(
                    "Seat {} requested by {} but held by {}",
                    holder.key(),
                    user_id,
                    holder.user_id
                );
                Err(LockError::Conflict {
                    seat_id: holder.seat_id,
                    expires_at: holder.expires_at,
                })
            }
        }
    }

    /// Releases the caller's lock. `Ok(None)` means there was nothing to release.
    pub async fn unlock(&self, key: SeatKey, user_id: &str) -> LockResult<Option<SeatLock>> {
        validate_key(&key)?;
        LockError::require("userId", user_id)?;

        let now = self.clock.now();
        match self.store.release(&key, user_id, now).await? {
            ReleaseOutcome::Released(lock) => {
                info!("Seat {} unlocked by {}", key, user_id);
                Ok(Some(lock))
            }
            ReleaseOutcome::NotLocked => {
                debug!("Unlock of {} by {} was a no-op", key, user_id);
                Ok(None)
            }
            ReleaseOutcome::HeldByOther(holder) => {
                warn!("User {} tried to unlock seat {} held by {}", user_id, key, holder.user_id);
                Err(LockError::Forbidden(key.seat_id))
            }
        }
    }

    pub async fn release_all(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
        user_id: &str,
    ) -> LockResult<Vec<SeatLock>> {
        LockError::require("scheduleId", schedule_id)?;
        LockError::require("cinemaRoomId", cinema_room_id)?;
        LockError::require("userId", user_id)?;

        let released = self
            .store
            .release_user(schedule_id, cinema_room_id, user_id, self.clock.now())
            .await?;
        info!(
            "Released {} seat(s) held by {} in {}/{}",
            released.len(),
            user_id,
            schedule_id,
            cinema_room_id
        );
        Ok(released)
    }

    pub async fn list_locked(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
    ) -> LockResult<Vec<SeatLock>> {
        LockError::require("scheduleId", schedule_id)?;
        LockError::require("cinemaRoomId", cinema_room_id)?;

        self.store.active_in_room(schedule_id, cinema_room_id, self.clock.now()).await
    }

    pub async fn stats(&self) -> LockResult<LockStats> {
        let now = self.clock.now();
        let active = self.store.active_locks(now).await?;

        let schedules: HashSet<&str> = active.iter().map(|l| l.schedule_id.as_str()).collect();
        let rooms: HashSet<(&str, &str)> = active
            .iter()
            .map(|l| (l.schedule_id.as_str(), l.cinema_room_id.as_str()))
            .collect();
        let users: HashSet<&str> = active.iter().map(|l| l.user_id.as_str()).collect();

        let average_remaining_seconds = if active.is_empty() {
            0.0
        } else {
            let total_ms: i64 = active
                .iter()
                .map(|l| (l.expires_at - now).num_milliseconds())
                .sum();
            total_ms as f64 / 1000.0 / active.len() as f64
        };

        Ok(LockStats {
            active_locks: active.len(),
            total_schedules_locked: schedules.len(),
            total_rooms_locked: rooms.len(),
            distinct_users: users.len(),
            average_remaining_seconds,
            lock_ttl_seconds: self.ttl_seconds(),
            generated_at: now,
        })
    }

    /// Removes expired leases and returns the seats that were reclaimed.
    pub async fn cleanup(&self) -> LockResult<Vec<SeatKey>> {
        let removed = self.store.purge_expired(self.clock.now()).await?;
        if !removed.is_empty() {
            info!("Cleanup removed {} expired seat lock(s)", removed.len());
        }
        Ok(removed)
    }
}

fn validate_key(key: &SeatKey) -> LockResult<()> {
    LockError::require("scheduleId", &key.schedule_id)?;
    LockError::require("cinemaRoomId", &key.cinema_room_id)?;
    LockError::require("seatId", &key.seat_id)
}

fn lease_duration(ttl_seconds: u64) -> LockResult<Duration> {
    if ttl_seconds == 0 || ttl_seconds > MAX_LOCK_TTL_SECONDS {
        return Err(LockError::Validation(format!(
            "lock TTL must be between 1 and {} seconds, got {}",
            MAX_LOCK_TTL_SECONDS, ttl_seconds
        )));
    }
    i64::try_from(ttl_seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| LockError::Validation(format!("lock TTL {} is out of range", ttl_seconds)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::Utc;

    type Fixture = (SeatLockManager, Arc<ManualClock>, Arc<MemoryLockStore>);

    fn manager_with_clock(ttl_seconds: u64) -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryLockStore::new());
        let manager = SeatLockManager::new(store.clone(), clock.clone(), ttl_seconds).unwrap();
        (manager, clock, store)
    }

    fn seat(id: &str) -> SeatKey {
        SeatKey::new("S1", "R1", id)
    }

    #[tokio::test]
    async fn test_mutual_exclusion() {
        let (manager, _, _) = manager_with_clock(300);

        manager.lock(seat("A1"), "user1").await.unwrap();
        let err = manager.lock(seat("A1"), "user2").await.unwrap_err();
        assert!(matches!(err, LockError::Conflict { ref seat_id, .. } if seat_id == "A1"));
        assert_eq!(err.to_string(), "Seat A1 is already locked by another user");

        let locked = manager.list_locked("S1", "R1").await.unwrap();
        assert_eq!(locked.len(), 1);
        assert_eq!(locked[0].user_id, "user1");
    }

    #[test]
    fn test_ttl_outside_bounds_is_rejected() {
        for ttl in [0, MAX_LOCK_TTL_SECONDS + 1, 9_000_000_000_000, u64::MAX] {
            let store = Arc::new(MemoryLockStore::new());
            let result = SeatLockManager::new(store, Arc::new(SystemClock), ttl);
            assert!(matches!(result, Err(LockError::Validation(_))), "ttl {} accepted", ttl);
        }
    }

    #[tokio::test]
    async fn test_shortest_lease_still_excludes_other_users() {
        let (manager, clock, _) = manager_with_clock(1);

        manager.lock(seat("A1"), "u1").await.unwrap();
        let err = manager.lock(seat("A1"), "u2").await.unwrap_err();
        assert!(matches!(err, LockError::Conflict { .. }));

        clock.advance(Duration::seconds(1));
        manager.lock(seat("A1"), "u2").await.unwrap();
    }

    #[tokio::test]
    async fn test_longest_lease_locks_without_overflow() {
        let store = Arc::new(MemoryLockStore::new());
        let manager = SeatLockManager::new(store, Arc::new(SystemClock), MAX_LOCK_TTL_SECONDS)
            .unwrap();

        let grant = manager.lock(seat("A1"), "u1").await.unwrap();
        let lease = grant.lock.expires_at - grant.lock.created_at;
        assert_eq!(lease, Duration::seconds(MAX_LOCK_TTL_SECONDS as i64));
        assert_eq!(manager.stats().await.unwrap().lock_ttl_seconds, MAX_LOCK_TTL_SECONDS);
    }

    #[tokio::test]
    async fn test_idempotent_renewal_extends_deadline() {
        let (manager, clock, _) = manager_with_clock(300);

        let first = manager.lock(seat("A1"), "user1").await.unwrap();
        assert!(!first.renewed);

        clock.advance(Duration::seconds(120));
        let second = manager.lock(seat("A1"), "user1").await.unwrap();
        assert!(second.renewed);
        assert_eq!(second.lock.created_at, first.lock.created_at);
        assert_eq!(second.lock.expires_at, first.lock.expires_at + Duration::seconds(120));
    }

    #[tokio::test]
    async fn test_release_frees_seat() {
        let (manager, _, _) = manager_with_clock(300);

        manager.lock(seat("A1"), "user1").await.unwrap();
        let released = manager.unlock(seat("A1"), "user1").await.unwrap();
        assert!(released.is_some());

        manager.lock(seat("A1"), "user2").await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_by_non_holder_is_forbidden() {
        let (manager, _, _) = manager_with_clock(300);

        manager.lock(seat("A1"), "user1").await.unwrap();
        let err = manager.unlock(seat("A1"), "user2").await.unwrap_err();
        assert!(matches!(err, LockError::Forbidden(_)));
        assert_eq!(manager.list_locked("S1", "R1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unlock_of_unknown_seat_is_noop() {
        let (manager, _, _) = manager_with_clock(300);
        assert_eq!(manager.unlock(seat("Z9"), "user1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry_self_heals_before_cleanup() {
        let (manager, clock, store) = manager_with_clock(60);

        manager.lock(seat("A1"), "user1").await.unwrap();
        clock.advance(Duration::seconds(60));

        assert!(manager.list_locked("S1", "R1").await.unwrap().is_empty());
        let grant = manager.lock(seat("A1"), "user2").await.unwrap();
        assert!(!grant.renewed);
        assert_eq!(grant.lock.user_id, "user2");
        assert_eq!(store.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_and_is_idempotent() {
        let (manager, clock, store) = manager_with_clock(60);

        manager.lock(seat("A1"), "user1").await.unwrap();
        clock.advance(Duration::seconds(30));
        manager.lock(seat("A2"), "user2").await.unwrap();
        clock.advance(Duration::seconds(30));

        let removed = manager.cleanup().await.unwrap();
        assert_eq!(removed, vec![seat("A1")]);
        assert_eq!(store.record_count().await, 1);

        assert!(manager.cleanup().await.unwrap().is_empty());
        assert_eq!(manager.list_locked("S1", "R1").await.unwrap()[0].seat_id, "A2");
    }

    #[tokio::test]
    async fn test_stats_match_listings() {
        let (manager, clock, _) = manager_with_clock(100);

        manager.lock(SeatKey::new("S1", "R1", "A1"), "u1").await.unwrap();
        manager.lock(SeatKey::new("S1", "R1", "A2"), "u2").await.unwrap();
        manager.lock(SeatKey::new("S1", "R2", "B1"), "u1").await.unwrap();
        manager.lock(SeatKey::new("S2", "R1", "C1"), "u3").await.unwrap();
        clock.advance(Duration::seconds(50));

        let stats = manager.stats().await.unwrap();
        let mut listed = 0;
        for (schedule, room) in [("S1", "R1"), ("S1", "R2"), ("S2", "R1")] {
            listed += manager.list_locked(schedule, room).await.unwrap().len();
        }

        assert_eq!(stats.active_locks, listed);
        assert_eq!(stats.active_locks, 4);
        assert_eq!(stats.total_schedules_locked, 2);
        assert_eq!(stats.total_rooms_locked, 3);
        assert_eq!(stats.distinct_users, 3);
        assert!((stats.average_remaining_seconds - 50.0).abs() < 0.001);
        assert_eq!(stats.lock_ttl_seconds, 100);
    }

    #[tokio::test]
    async fn test_missing_fields_are_rejected() {
        let (manager, _, _) = manager_with_clock(300);

        let err = manager.lock(SeatKey::new("S1", "", "A1"), "user1").await.unwrap_err();
        assert_eq!(err.to_string(), "Validation failed: cinemaRoomId is required");

        let err = manager.lock(seat("A1"), "  ").await.unwrap_err();
        assert!(matches!(err, LockError::Validation(_)));

        assert!(manager.list_locked("", "R1").await.is_err());
    }

    #[tokio::test]
    async fn test_release_all_only_touches_caller() {
        let (manager, _, _) = manager_with_clock(300);

        manager.lock(seat("A1"), "user1").await.unwrap();
        manager.lock(seat("A2"), "user1").await.unwrap();
        manager.lock(seat("A3"), "user2").await.unwrap();

        let released = manager.release_all("S1", "R1", "user1").await.unwrap();
        assert_eq!(released.len(), 2);

        let remaining = manager.list_locked("S1", "R1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].seat_id, "A3");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lock_has_single_winner() {
        let manager = SeatLockManager::in_memory();

        let mut handles = Vec::new();
        for i in 0..32 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.lock(SeatKey::new("S1", "R1", "A1"), &format!("user{}", i)).await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(LockError::Conflict { .. }) => conflicts += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(conflicts, 31);
    }
}
