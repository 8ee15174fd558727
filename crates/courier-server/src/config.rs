//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use courier_shared::constants::{DEFAULT_CHAT_PORT, DEFAULT_HTTP_PORT};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the newline-delimited JSON chat listener.
    /// Env: `LISTEN_ADDR`
    /// Default: `127.0.0.1:5000`
    pub listen_addr: SocketAddr,

    /// Socket address for the HTTP (axum) status API.
    /// Env: `HTTP_ADDR`
    /// Default: `127.0.0.1:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, meaning the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Courier"`
    pub instance_name: String,

    /// A connection that sends nothing for this long is closed.
    /// Env: `IDLE_TIMEOUT_SECS`
    /// Default: 300 seconds
    pub idle_timeout: Duration,

    /// Sessions older than this are rejected and marked expired.
    /// Env: `SESSION_TTL_SECS` (0 disables expiry)
    /// Default: 7 days
    pub session_ttl: Option<Duration>,

    /// Capacity of each connection's outbound push queue.
    /// Env: `PUSH_BUFFER`
    /// Default: `64`
    pub push_buffer: usize,

    /// Argon2id memory cost in KiB.
    /// Env: `ARGON2_MEMORY_KIB`
    /// Default: `19456`
    pub argon2_memory_kib: u32,

    /// Argon2id iteration count.
    /// Env: `ARGON2_ITERATIONS`
    /// Default: `2`
    pub argon2_iterations: u32,

    /// Sustained requests per second allowed per peer IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    /// Default: `20`
    pub rate_limit_per_sec: f64,

    /// Burst size of the per-IP token bucket.
    /// Env: `RATE_LIMIT_BURST`
    /// Default: `60`
    pub rate_limit_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], DEFAULT_CHAT_PORT).into(),
            http_addr: ([127, 0, 0, 1], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: "Courier".to_string(),
            idle_timeout: Duration::from_secs(300),
            session_ttl: Some(Duration::from_secs(7 * 24 * 60 * 60)),
            push_buffer: 64,
            argon2_memory_kib: 19_456,
            argon2_iterations: 2,
            rate_limit_per_sec: 20.0,
            rate_limit_burst: 60.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup. Invalid values are
    /// logged and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        set_parsed(&lookup, "LISTEN_ADDR", &mut config.listen_addr);
        set_parsed(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.trim().is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(name) = lookup("INSTANCE_NAME").filter(|n| !n.trim().is_empty()) {
            config.instance_name = name;
        }

        let mut idle_secs = config.idle_timeout.as_secs();
        set_parsed(&lookup, "IDLE_TIMEOUT_SECS", &mut idle_secs);
        if idle_secs == 0 {
            tracing::warn!("IDLE_TIMEOUT_SECS must be positive, using default");
        } else {
            config.idle_timeout = Duration::from_secs(idle_secs);
        }

        if let Some(raw) = lookup("SESSION_TTL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.session_ttl = None,
                Ok(secs) => config.session_ttl = Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!(value = %raw, "Invalid SESSION_TTL_SECS, using default")
                }
            }
        }

        set_parsed(&lookup, "PUSH_BUFFER", &mut config.push_buffer);
        config.push_buffer = config.push_buffer.max(1);

        set_parsed(&lookup, "ARGON2_MEMORY_KIB", &mut config.argon2_memory_kib);
        set_parsed(&lookup, "ARGON2_ITERATIONS", &mut config.argon2_iterations);
        set_parsed(&lookup, "RATE_LIMIT_PER_SEC", &mut config.rate_limit_per_sec);
        set_parsed(&lookup, "RATE_LIMIT_BURST", &mut config.rate_limit_burst);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
impl ServerConfig {
    /// Defaults with the cheapest Argon2 parameters and ephemeral ports.
    pub fn for_tests() -> Self {
        Self {
            listen_addr: ([127, 0, 0, 1], 0).into(),
            http_addr: ([127, 0, 0, 1], 0).into(),
            argon2_memory_kib: 8,
            argon2_iterations: 1,
            rate_limit_per_sec: 1000.0,
            rate_limit_burst: 1000.0,
            ..Self::default()
        }
    }
}

fn set_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}
