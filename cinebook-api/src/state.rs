use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use cinebook_core::events::SEATLOCK_TOPIC;
use cinebook_core::{EventPublisher, SeatLockEvent, SeatLockManager};
use crate::metrics::LockMetrics;

#[derive(Clone)]
pub struct AppState {
    pub locks: SeatLockManager,
    pub events: broadcast::Sender<SeatLockEvent>,
    pub publisher: Option<Arc<dyn EventPublisher>>,
    pub metrics: Arc<LockMetrics>,
}

impl AppState {
    pub fn new(locks: SeatLockManager, channel_capacity: usize) -> Result<Self, prometheus::Error> {
        let (events, _) = broadcast::channel(channel_capacity.max(1));
        Ok(Self {
            locks,
            events,
            publisher: None,
            metrics: Arc::new(LockMetrics::new()?),
        })
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Fans an event out to stream subscribers and, if configured, the event bus.
    /// Delivery failures are logged, never surfaced to the caller.
    pub fn emit(&self, event: SeatLockEvent) {
        if let Some(publisher) = self.publisher.clone() {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    let key = event.partition_key().to_string();
                    tokio::spawn(async move {
                        if let Err(e) = publisher.publish(SEATLOCK_TOPIC, &key, &payload).await {
                            warn!("Failed to publish seat lock event: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Failed to serialize seat lock event: {}", e),
            }
        }

        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
