use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::LockResult;
use crate::models::{SeatKey, SeatLock};
use crate::store::{AcquireOutcome, ReleaseOutcome, SeatLockStore};

/// Process-local lock store. One mutex guards the whole map, so every
/// operation is linearized.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    locks: Mutex<HashMap<SeatKey, SeatLock>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub async fn record_count(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn sorted(mut locks: Vec<SeatLock>) -> Vec<SeatLock> {
    locks.sort_by(|a, b| a.key().cmp(&b.key()));
    locks
}

#[async_trait]
impl SeatLockStore for MemoryLockStore {
    async fn try_acquire(
        &self,
        mut candidate: SeatLock,
        now: DateTime<Utc>,
    ) -> LockResult<AcquireOutcome> {
        let mut locks = self.locks.lock().await;
        let key = candidate.key();

        match locks.get(&key).filter(|existing| existing.is_active(now)).cloned() {
            Some(existing) if !existing.is_held_by(&candidate.user_id) => {
                Ok(AcquireOutcome::HeldByOther(existing))
            }
            Some(existing) => {
                candidate.created_at = existing.created_at;
                locks.insert(key, candidate.clone());
                Ok(AcquireOutcome::Renewed(candidate))
            }
            None => {
                locks.insert(key, candidate.clone());
                Ok(AcquireOutcome::Acquired(candidate))
            }
        }
    }

    async fn release(
        &self,
        key: &SeatKey,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<ReleaseOutcome> {
        let mut locks = self.locks.lock().await;

        let existing = match locks.get(key).cloned() {
            Some(existing) => existing,
            None => return Ok(ReleaseOutcome::NotLocked),
        };

        if !existing.is_active(now) {
            locks.remove(key);
            return Ok(ReleaseOutcome::NotLocked);
        }
        if !existing.is_held_by(user_id) {
            return Ok(ReleaseOutcome::HeldByOther(existing));
        }

        locks.remove(key);
        Ok(ReleaseOutcome::Released(existing))
    }

    async fn release_user(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<SeatLock>> {
        let mut locks = self.locks.lock().await;

        let owned: Vec<SeatKey> = locks
            .iter()
            .filter(|(key, lock)| {
                key.in_room(schedule_id, cinema_room_id)
                    && lock.is_held_by(user_id)
                    && lock.is_active(now)
            })
            .map(|(key, _)| key.clone())
            .collect();

        let released = owned.iter().filter_map(|key| locks.remove(key)).collect();
        Ok(sorted(released))
    }

    async fn active_in_room(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<SeatLock>> {
        let locks = self.locks.lock().await;
        let active = locks
            .values()
            .filter(|lock| {
                lock.is_active(now)
                    && lock.schedule_id == schedule_id
                    && lock.cinema_room_id == cinema_room_id
            })
            .cloned()
            .collect();
        Ok(sorted(active))
    }

    async fn active_locks(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatLock>> {
        let locks = self.locks.lock().await;
        let active = locks.values().filter(|lock| lock.is_active(now)).cloned().collect();
        Ok(sorted(active))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatKey>> {
        let mut locks = self.locks.lock().await;
        let mut removed = Vec::new();

        locks.retain(|key, lock| {
            if lock.is_active(now) {
                true
            } else {
                removed.push(key.clone());
                false
            }
        });

        removed.sort();
        Ok(removed)
    }
}
