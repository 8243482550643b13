pub mod app_config;
pub mod redis_repo;
#[cfg(feature = "kafka")]
pub mod events;

pub use redis_repo::RedisLockStore;
#[cfg(feature = "kafka")]
pub use events::EventProducer;
