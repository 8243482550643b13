use cinebook_core::MAX_LOCK_TTL_SECONDS;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub redis: RedisConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    pub locks: LockConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KafkaConfig {
    /// Unset disables event publishing.
    pub brokers: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    pub ttl_seconds: u64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .set_default("server.port", 8080)?
            .set_default("store.backend", "memory")?
            .set_default("redis.url", "redis://127.0.0.1:6379")?
            .set_default("locks.ttl_seconds", 300)?
            .set_default("locks.cleanup_interval_seconds", 60)?
            .set_default("events.channel_capacity", 256)?
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(
                config::File::with_name(&format!("config/{}", run_mode)).required(false),
            )
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. CINEBOOK__LOCKS__TTL_SECONDS=120
            .add_source(config::Environment::with_prefix("CINEBOOK").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.locks.validate()?;
        Ok(config)
    }
}

impl LockConfig {
    /// A zero TTL would let every caller take the same seat.
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.ttl_seconds == 0 || self.ttl_seconds > MAX_LOCK_TTL_SECONDS {
            return Err(config::ConfigError::Message(format!(
                "locks.ttl_seconds must be between 1 and {}, got {}",
                MAX_LOCK_TTL_SECONDS, self.ttl_seconds
            )));
        }
        Ok(())
    }
}
