use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::Script;
use tracing::{error, info};

use cinebook_core::{
    AcquireOutcome, LockError, LockResult, ReleaseOutcome, SeatKey, SeatLock, SeatLockStore,
};

const ROOMS_INDEX: &str = "seatlocks:rooms";

// Compare-and-set on the holder. A renewal keeps the stored createdAt.
const ACQUIRE_SCRIPT: &str = r#"
    local current = redis.call("GET", KEYS[1])
    local payload = ARGV[2]
    local status = "acquired"
    if current then
        local held = cjson.decode(current)
        if held.userId ~= ARGV[1] then
            return {"held", current}
        end
        local fresh = cjson.decode(payload)
        fresh.createdAt = held.createdAt
        payload = cjson.encode(fresh)
        status = "renewed"
    end
    redis.call("SET", KEYS[1], payload, "PX", ARGV[3])
    redis.call("SADD", KEYS[2], ARGV[4])
    redis.call("SADD", KEYS[3], ARGV[5])
    return {status, payload}
"#;

const RELEASE_SCRIPT: &str = r#"
    local current = redis.call("GET", KEYS[1])
    if not current then
        redis.call("SREM", KEYS[2], ARGV[2])
        return {"missing", ""}
    end
    local held = cjson.decode(current)
    if held.userId ~= ARGV[1] then
        return {"held", current}
    end
    redis.call("DEL", KEYS[1])
    redis.call("SREM", KEYS[2], ARGV[2])
    return {"released", current}
"#;

// Redis expires the lock keys itself; this drops index entries that outlived them.
const PRUNE_ROOM_SCRIPT: &str = r#"
    local removed = {}
    for _, seat in ipairs(redis.call("SMEMBERS", KEYS[1])) do
        if redis.call("EXISTS", ARGV[1] .. seat) == 0 then
            redis.call("SREM", KEYS[1], seat)
            table.insert(removed, seat)
        end
    end
    if redis.call("SCARD", KEYS[1]) == 0 then
        redis.call("SREM", KEYS[2], ARGV[2])
    end
    return removed
"#;

/// Seat locks shared across API instances.
///
/// Layout:
/// - `seatlock:{schedule}:{room}:{seat}` holds the JSON lock with a `PX` TTL
/// - `seatlocks:room:{schedule}:{room}` is the set of seat ids locked in a room
/// - `seatlocks:rooms` is the set of rooms with at least one lock
#[derive(Clone)]
pub struct RedisLockStore {
    conn: MultiplexedConnection,
    acquire: Script,
    release: Script,
    prune_room: Script,
}

impl RedisLockStore {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected seat lock store to Redis");
        Ok(Self {
            conn,
            acquire: Script::new(ACQUIRE_SCRIPT),
            release: Script::new(RELEASE_SCRIPT),
            prune_room: Script::new(PRUNE_ROOM_SCRIPT),
        })
    }

    async fn room_seats(&self, schedule_id: &str, cinema_room_id: &str) -> LockResult<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS")
            .arg(room_key(schedule_id, cinema_room_id))
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn rooms(&self) -> LockResult<Vec<(String, String)>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(ROOMS_INDEX)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        Ok(members.iter().filter_map(|m| decode_room(m)).collect())
    }
}

pub fn lock_key(key: &SeatKey) -> String {
    format!("{}{}", lock_key_prefix(&key.schedule_id, &key.cinema_room_id), key.seat_id)
}

fn lock_key_prefix(schedule_id: &str, cinema_room_id: &str) -> String {
    format!("seatlock:{}:{}:", schedule_id, cinema_room_id)
}

pub fn room_key(schedule_id: &str, cinema_room_id: &str) -> String {
    format!("seatlocks:room:{}:{}", schedule_id, cinema_room_id)
}

fn room_member(schedule_id: &str, cinema_room_id: &str) -> String {
    serde_json::json!([schedule_id, cinema_room_id]).to_string()
}

fn decode_room(member: &str) -> Option<(String, String)> {
    serde_json::from_str(member).ok()
}

fn store_error(e: impl std::fmt::Display) -> LockError {
    error!("Redis seat lock store failure: {}", e);
    LockError::Store(e.to_string())
}

fn decode_lock(payload: &str) -> LockResult<SeatLock> {
    serde_json::from_str(payload).map_err(store_error)
}

#[async_trait]
impl SeatLockStore for RedisLockStore {
    async fn try_acquire(
        &self,
        candidate: SeatLock,
        now: DateTime<Utc>,
    ) -> LockResult<AcquireOutcome> {
        let key = candidate.key();
        let payload = serde_json::to_string(&candidate).map_err(store_error)?;
        let ttl_ms = (candidate.expires_at - now).num_milliseconds().max(1);

        let mut conn = self.conn.clone();
        let (status, stored): (String, String) = self
            .acquire
            .key(lock_key(&key))
            .key(room_key(&key.schedule_id, &key.cinema_room_id))
            .key(ROOMS_INDEX)
            .arg(&candidate.user_id)
            .arg(payload)
            .arg(ttl_ms)
            .arg(&key.seat_id)
            .arg(room_member(&key.schedule_id, &key.cinema_room_id))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        let lock = decode_lock(&stored)?;
        match status.as_str() {
            "held" => Ok(AcquireOutcome::HeldByOther(lock)),
            "renewed" => Ok(AcquireOutcome::Renewed(lock)),
            _ => Ok(AcquireOutcome::Acquired(lock)),
        }
    }

    async fn release(
        &self,
        key: &SeatKey,
        user_id: &str,
        _now: DateTime<Utc>,
    ) -> LockResult<ReleaseOutcome> {
        let mut conn = self.conn.clone();
        let (status, stored): (String, String) = self
            .release
            .key(lock_key(key))
            .key(room_key(&key.schedule_id, &key.cinema_room_id))
            .arg(user_id)
            .arg(&key.seat_id)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;

        match status.as_str() {
            "held" => Ok(ReleaseOutcome::HeldByOther(decode_lock(&stored)?)),
            "released" => Ok(ReleaseOutcome::Released(decode_lock(&stored)?)),
            _ => Ok(ReleaseOutcome::NotLocked),
        }
    }

    async fn release_user(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<SeatLock>> {
        let mut released = Vec::new();
        for lock in self.active_in_room(schedule_id, cinema_room_id, now).await? {
            if !lock.is_held_by(user_id) {
                continue;
            }
            if let ReleaseOutcome::Released(lock) = self.release(&lock.key(), user_id, now).await? {
                released.push(lock);
            }
        }
        Ok(released)
    }

    async fn active_in_room(
        &self,
        schedule_id: &str,
        cinema_room_id: &str,
        now: DateTime<Utc>,
    ) -> LockResult<Vec<SeatLock>> {
        let seats = self.room_seats(schedule_id, cinema_room_id).await?;
        if seats.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = seats
            .iter()
            .map(|seat| lock_key(&SeatKey::new(schedule_id, cinema_room_id, seat.as_str())))
            .collect();

        let mut conn = self.conn.clone();
        let payloads: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        let mut locks = Vec::new();
        for payload in payloads.into_iter().flatten() {
            let lock = decode_lock(&payload)?;
            if lock.is_active(now) {
                locks.push(lock);
            }
        }
        locks.sort_by(|a, b| a.seat_id.cmp(&b.seat_id));
        Ok(locks)
    }

    async fn active_locks(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatLock>> {
        let mut locks = Vec::new();
        for (schedule_id, cinema_room_id) in self.rooms().await? {
            locks.extend(self.active_in_room(&schedule_id, &cinema_room_id, now).await?);
        }
        Ok(locks)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> LockResult<Vec<SeatKey>> {
        let mut removed = Vec::new();
        for (schedule_id, cinema_room_id) in self.rooms().await? {
            let mut conn = self.conn.clone();
            let seats: Vec<String> = self
                .prune_room
                .key(room_key(&schedule_id, &cinema_room_id))
                .key(ROOMS_INDEX)
                .arg(lock_key_prefix(&schedule_id, &cinema_room_id))
                .arg(room_member(&schedule_id, &cinema_room_id))
                .invoke_async(&mut conn)
                .await
                .map_err(store_error)?;

            removed.extend(
                seats
                    .into_iter()
                    .map(|seat| SeatKey::new(schedule_id.as_str(), cinema_room_id.as_str(), seat)),
            );
        }
        removed.sort();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_key_layout() {
        let key = SeatKey::new("S1", "R1", "A1");
        assert_eq!(lock_key(&key), "seatlock:S1:R1:A1");
        assert_eq!(room_key("S1", "R1"), "seatlocks:room:S1:R1");
    }

    #[test]
    fn test_room_member_round_trips_ids_with_separators() {
        let member = room_member("show:7", "hall:2");
        assert_eq!(decode_room(&member), Some(("show:7".to_string(), "hall:2".to_string())));
    }

    // Needs a running Redis: REDIS_URL=redis://127.0.0.1:6379 cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn test_redis_mutual_exclusion_and_release() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisLockStore::new(&url).await.unwrap();
        let schedule = format!("test-{}", uuid::Uuid::new_v4());
        let now = Utc::now();
        let key = SeatKey::new(schedule.as_str(), "R1", "A1");

        let first = SeatLock::new(key.clone(), "u1", now, now + Duration::seconds(30));
        let outcome = store.try_acquire(first, now).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired(_)));

        let rival = SeatLock::new(key.clone(), "u2", now, now + Duration::seconds(30));
        let outcome = store.try_acquire(rival, now).await.unwrap();
        assert!(matches!(outcome, AcquireOutcome::HeldByOther(_)));

        let later = now + Duration::seconds(5);
        let renewal = SeatLock::new(key.clone(), "u1", later, later + Duration::seconds(30));
        match store.try_acquire(renewal, later).await.unwrap() {
            AcquireOutcome::Renewed(lock) => assert_eq!(lock.created_at, now),
            other => panic!("expected renewal, got {:?}", other),
        }

        assert_eq!(store.active_in_room(&schedule, "R1", later).await.unwrap().len(), 1);
        let outcome = store.release(&key, "u2", later).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::HeldByOther(_)));
        let outcome = store.release(&key, "u1", later).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::Released(_)));
        assert!(store.active_in_room(&schedule, "R1", later).await.unwrap().is_empty());
    }
}
