//! Server configuration from `PHYSIO_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use physio_core::auth::{AuthConfig, DEFAULT_PBKDF2_ITERATIONS, DEFAULT_SESSION_TTL_SECS};
use physio_core::stats::StatsConfig;
use physio_core::store::{StoreConfig, DEFAULT_REFETCH_DEBOUNCE};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_DB_PATH: &str = "physio.db";

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| match v.as_str() {
            "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
            "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_duration_ms(name: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_u64(name, default_ms))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    pub session_ttl_secs: u64,
    /// Bearer token required on every `/api` route except login/registration
    pub require_auth: bool,
    pub stats_timeout: Duration,
    pub refetch_debounce: Duration,
    pub log_json: bool,
    pub pbkdf2_iterations: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS as u64,
            require_auth: true,
            stats_timeout: StatsConfig::default().timeout,
            refetch_debounce: DEFAULT_REFETCH_DEBOUNCE,
            log_json: false,
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_string("PHYSIO_BIND_ADDR", DEFAULT_BIND_ADDR),
            db_path: PathBuf::from(env_string("PHYSIO_DB_PATH", DEFAULT_DB_PATH)),
            session_ttl_secs: env_u64("PHYSIO_SESSION_TTL_SECS", defaults.session_ttl_secs),
            require_auth: env_bool("PHYSIO_REQUIRE_AUTH", defaults.require_auth),
            stats_timeout: env_duration_ms(
                "PHYSIO_STATS_TIMEOUT_MS",
                defaults.stats_timeout.as_millis() as u64,
            ),
            refetch_debounce: env_duration_ms(
                "PHYSIO_REFETCH_DEBOUNCE_MS",
                defaults.refetch_debounce.as_millis() as u64,
            ),
            log_json: env_bool("PHYSIO_LOG_JSON", defaults.log_json),
            pbkdf2_iterations: env_u64("PHYSIO_PBKDF2_ITERATIONS", defaults.pbkdf2_iterations as u64)
                .clamp(1, u32::MAX as u64) as u32,
        }
    }

    pub fn auth(&self) -> AuthConfig {
        AuthConfig {
            iterations: self.pbkdf2_iterations,
            session_ttl: chrono::Duration::seconds(
                i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX / 1000),
            ),
        }
    }

    pub fn stats(&self) -> StatsConfig {
        StatsConfig {
            timeout: self.stats_timeout,
        }
    }

    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            refetch_debounce: self.refetch_debounce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("physio.db"));
        assert_eq!(config.session_ttl_secs, 43_200);
        assert!(config.require_auth);
        assert_eq!(config.stats_timeout, Duration::from_secs(3));
        assert_eq!(config.refetch_debounce, Duration::from_millis(500));
        assert!(!config.log_json);
        assert_eq!(config.auth().session_ttl, chrono::Duration::hours(12));
        assert_eq!(config.store().refetch_debounce, config.refetch_debounce);
    }

    #[test]
    fn test_env_parsing() {
        env::set_var("PHYSIO_TEST_BOOL", "no");
        env::set_var("PHYSIO_TEST_U64", "oops");
        assert!(!env_bool("PHYSIO_TEST_BOOL", true));
        assert!(env_bool("PHYSIO_TEST_MISSING_BOOL", true));
        assert_eq!(env_u64("PHYSIO_TEST_U64", 7), 7);
        assert_eq!(env_string("PHYSIO_TEST_MISSING_STRING", "x"), "x");
    }
}
