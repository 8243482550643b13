use axum::{
    extract::{rejection::{JsonRejection, QueryRejection}, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::{Stream, StreamExt};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use cinebook_core::{LockError, SeatKey, SeatLockEvent};
use crate::{error::AppError, state::AppState, worker};

// ============================================================================
// Request Types
// ============================================================================

/// Body of `/lock` and `/unlock`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatLockRequest {
    #[serde(default, deserialize_with = "opaque_id")]
    pub schedule_id: String,
    #[serde(default, deserialize_with = "opaque_id")]
    pub cinema_room_id: String,
    #[serde(default, deserialize_with = "opaque_id")]
    pub seat_id: String,
    #[serde(default, deserialize_with = "opaque_id")]
    pub user_id: String,
}

impl SeatLockRequest {
    fn key(&self) -> SeatKey {
        SeatKey::new(&self.schedule_id, &self.cinema_room_id, &self.seat_id)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseAllRequest {
    #[serde(default, deserialize_with = "opaque_id")]
    pub schedule_id: String,
    #[serde(default, deserialize_with = "opaque_id")]
    pub cinema_room_id: String,
    #[serde(default, deserialize_with = "opaque_id")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomQuery {
    #[serde(default)]
    pub schedule_id: String,
    #[serde(default)]
    pub cinema_room_id: String,
}

/// Ids are opaque: clients send them as strings or as plain numbers.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number id, got {}",
            other
        ))),
    }
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AppError::ValidationError(rejection.body_text()))
}

fn room_query(query: Result<Query<RoomQuery>, QueryRejection>) -> Result<RoomQuery, AppError> {
    let Query(query) = query.map_err(|rejection| AppError::ValidationError(rejection.body_text()))?;
    LockError::require("scheduleId", &query.schedule_id)?;
    LockError::require("cinemaRoomId", &query.cinema_room_id)?;
    Ok(query)
}

// ============================================================================
// Routes
// ============================================================================

/// Mounted under `/api/seatlocks`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/lock", post(lock_seat))
        .route("/unlock", post(unlock_seat))
        .route("/unlock-all", post(release_all))
        .route("/locked", get(list_locked))
        .route("/stats", get(lock_stats))
        .route("/cleanup", delete(cleanup))
        .route("/stream", get(stream_locks))
}

/// POST /api/seatlocks/lock
async fn lock_seat(
    State(state): State<AppState>,
    payload: Result<Json<SeatLockRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = json_body(payload)?;

    let grant = match state.locks.lock(req.key(), &req.user_id).await {
        Ok(grant) => grant,
        Err(err) => {
            if matches!(err, LockError::Conflict { .. }) {
                state.metrics.conflicts.inc();
            }
            return Err(err.into());
        }
    };

    let message = if grant.renewed {
        state.metrics.renewed.inc();
        format!("Seat {} lock renewed", grant.lock.seat_id)
    } else {
        state.metrics.acquired.inc();
        format!("Seat {} locked", grant.lock.seat_id)
    };

    state.emit(SeatLockEvent::locked(grant.lock.clone(), grant.renewed));

    Ok(Json(json!({
        "success": true,
        "message": message,
        "data": grant.lock,
    })))
}

/// POST /api/seatlocks/unlock
async fn unlock_seat(
    State(state): State<AppState>,
    payload: Result<Json<SeatLockRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = json_body(payload)?;

    let released = state.locks.unlock(req.key(), &req.user_id).await?;
    let message = match &released {
        Some(lock) => {
            state.metrics.released.inc();
            state.emit(SeatLockEvent::unlocked(lock, state.locks.now()));
            format!("Seat {} unlocked", req.seat_id)
        }
        None => format!("Seat {} was not locked", req.seat_id),
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "released": released.is_some(),
    })))
}

/// POST /api/seatlocks/unlock-all
async fn release_all(
    State(state): State<AppState>,
    payload: Result<Json<ReleaseAllRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let req = json_body(payload)?;

    let released = state
        .locks
        .release_all(&req.schedule_id, &req.cinema_room_id, &req.user_id)
        .await?;

    let now = state.locks.now();
    for lock in &released {
        state.emit(SeatLockEvent::unlocked(lock, now));
    }
    state.metrics.released.inc_by(released.len() as u64);

    Ok(Json(json!({
        "success": true,
        "message": format!("Released {} seat(s)", released.len()),
        "removed": released.len(),
        "data": released,
    })))
}

/// GET /api/seatlocks/locked?scheduleId=..&cinemaRoomId=..
async fn list_locked(
    State(state): State<AppState>,
    query: Result<Query<RoomQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let query = room_query(query)?;
    let locks = state.locks.list_locked(&query.schedule_id, &query.cinema_room_id).await?;

    Ok(Json(json!({
        "success": true,
        "count": locks.len(),
        "data": locks,
    })))
}

/// GET /api/seatlocks/stats
async fn lock_stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = state.locks.stats().await?;
    state.metrics.active.set(stats.active_locks as i64);

    Ok(Json(json!({
        "success": true,
        "data": stats,
    })))
}

/// DELETE /api/seatlocks/cleanup
async fn cleanup(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let removed = worker::run_cleanup(&state).await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("Removed {} expired lock(s)", removed),
        "removed": removed,
    })))
}

/// GET /api/seatlocks/stream?scheduleId=..&cinemaRoomId=..
async fn stream_locks(
    State(state): State<AppState>,
    query: Result<Query<RoomQuery>, QueryRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let RoomQuery { schedule_id, cinema_room_id } = room_query(query)?;
    let rx = state.events.subscribe();

    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = match result {
            Ok(event) if event.concerns(&schedule_id, &cinema_room_id) => {
                Event::default().event(event.name()).json_data(&event).ok()
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Seat lock stream lagged: {}", e);
                None
            }
        };
        async move { event.map(Ok::<_, Infallible>) }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_accept_strings_and_numbers() {
        let req: SeatLockRequest = serde_json::from_value(json!({
            "scheduleId": 12, "cinemaRoomId": "R1", "seatId": "A1", "userId": null
        }))
        .unwrap();

        assert_eq!(req.schedule_id, "12");
        assert_eq!(req.cinema_room_id, "R1");
        assert_eq!(req.user_id, "");
    }

    #[test]
    fn test_request_ids_reject_other_shapes() {
        let result: Result<SeatLockRequest, _> =
            serde_json::from_value(json!({ "seatId": ["A1"] }));
        assert!(result.is_err());
    }
}
