use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::state::AppState;

pub struct LockMetrics {
    registry: Registry,
    pub acquired: IntCounter,
    pub renewed: IntCounter,
    pub conflicts: IntCounter,
    pub released: IntCounter,
    pub expired_removed: IntCounter,
    pub active: IntGauge,
}

impl LockMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let acquired = IntCounter::new("seatlock_acquired_total", "Seat locks granted")?;
        let renewed =
            IntCounter::new("seatlock_renewed_total", "Seat locks renewed by their holder")?;
        let conflicts = IntCounter::new(
            "seatlock_conflicts_total",
            "Lock requests refused because another user holds the seat",
        )?;
        let released =
            IntCounter::new("seatlock_released_total", "Seat locks released by their holder")?;
        let expired_removed = IntCounter::new(
            "seatlock_expired_removed_total",
            "Expired seat locks reclaimed by cleanup",
        )?;
        let active = IntGauge::new("seatlock_active", "Active seat locks at last scrape")?;

        registry.register(Box::new(acquired.clone()))?;
        registry.register(Box::new(renewed.clone()))?;
        registry.register(Box::new(conflicts.clone()))?;
        registry.register(Box::new(released.clone()))?;
        registry.register(Box::new(expired_removed.clone()))?;
        registry.register(Box::new(active.clone()))?;

        Ok(Self {
            registry,
            acquired,
            renewed,
            conflicts,
            released,
            expired_removed,
            active,
        })
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.locks.stats().await {
        Ok(stats) => state.metrics.active.set(stats.active_locks as i64),
        Err(e) => tracing::warn!("Could not refresh active lock gauge: {}", e),
    }

    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
