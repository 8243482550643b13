use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use cinebook_core::{LockResult, SeatLockEvent};
use crate::state::AppState;

/// One sweep: reclaim expired leases, count them, tell subscribers which seats came free.
pub async fn run_cleanup(state: &AppState) -> LockResult<usize> {
    let removed = state.locks.cleanup().await?;
    let count = removed.len();

    if count > 0 {
        state.metrics.expired_removed.inc_by(count as u64);
        state.emit(SeatLockEvent::expired(removed, state.locks.now()));
    }

    Ok(count)
}

/// Sweeps expired seat locks every `every` until `shutdown` flips.
pub async fn start_cleanup_worker(
    state: AppState,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    info!("Seat lock cleanup worker started, sweeping every {:?}", every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match run_cleanup(&state).await {
                    Ok(0) => {}
                    Ok(removed) => debug!("Sweep reclaimed {} seat lock(s)", removed),
                    Err(e) => error!("Seat lock cleanup failed: {}", e),
                }
            }
            _ = shutdown.changed() => {
                info!("Seat lock cleanup worker stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cinebook_core::{ManualClock, MemoryLockStore, SeatKey, SeatLockManager};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_worker_reclaims_expired_locks() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryLockStore::new());
        let manager = SeatLockManager::new(store.clone(), clock.clone(), 60).unwrap();
        let state = AppState::new(manager.clone(), 16).unwrap();
        let mut events = state.events.subscribe();

        manager.lock(SeatKey::new("S1", "R1", "A1"), "u1").await.unwrap();
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(store.record_count().await, 1);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(start_cleanup_worker(state.clone(), Duration::from_secs(5), rx));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(store.record_count().await, 0);
        assert_eq!(state.metrics.expired_removed.get(), 1);

        match events.recv().await.unwrap() {
            SeatLockEvent::SeatsExpired { seats, .. } => {
                assert_eq!(seats, vec![SeatKey::new("S1", "R1", "A1")])
            }
            other => panic!("expected expiry event, got {:?}", other),
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_cleanup_is_quiet_when_nothing_expired() {
        let state = AppState::new(SeatLockManager::in_memory(), 4).unwrap();
        let mut events = state.events.subscribe();

        state.locks.lock(SeatKey::new("S1", "R1", "A1"), "u1").await.unwrap();
        assert_eq!(run_cleanup(&state).await.unwrap(), 0);
        assert!(events.try_recv().is_err());
    }
}
