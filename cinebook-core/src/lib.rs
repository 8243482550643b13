pub mod clock;
pub mod error;
pub mod events;
pub mod manager;
pub mod memory;
pub mod models;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{LockError, LockResult};
pub use events::{EventPublisher, SeatLockEvent};
pub use manager::{LockGrant, SeatLockManager, DEFAULT_LOCK_TTL_SECONDS, MAX_LOCK_TTL_SECONDS};
pub use memory::MemoryLockStore;
pub use models::{LockStats, SeatKey, SeatLock};
pub use store::{AcquireOutcome, ReleaseOutcome, SeatLockStore};
