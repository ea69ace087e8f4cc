use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// TTL on persisted room snapshots; refreshed on every write.
    pub snapshot_ttl_seconds: u64,
    /// How long a room's session survives with no connections before the
    /// sweeper evicts it.
    pub room_idle_secs: u64,
    pub sweep_interval_secs: u64,
    /// Bound on a single outbound socket write; a slower connection is
    /// torn down.
    pub write_timeout_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("JAMROOM_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            snapshot_ttl_seconds: env::var("SNAPSHOT_TTL")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(2_592_000), // 30 days
            room_idle_secs: env::var("ROOM_IDLE_SECS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(300),
            sweep_interval_secs: env::var("ROOM_SWEEP_INTERVAL")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(60),
            write_timeout_ms: env::var("WS_WRITE_TIMEOUT_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(10_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://localhost:6379".to_string(),
            snapshot_ttl_seconds: 2_592_000,
            room_idle_secs: 300,
            sweep_interval_secs: 60,
            write_timeout_ms: 10_000,
        }
    }
}
