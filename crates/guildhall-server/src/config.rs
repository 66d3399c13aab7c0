use guildhall_cache::{CacheConfig, EngineConfig, PresenceConfig, RedisConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache primitives and local fallback tier
    #[serde(default)]
    pub cache: CacheConfig,
    /// Presence records and heartbeat
    #[serde(default)]
    pub presence: PresenceConfig,
    /// HTTP response caching
    #[serde(default)]
    pub response_cache: ResponseCacheConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Engine validations
        self.engine().validate()?;
        // Response cache validation
        let rc = &self.response_cache;
        if rc.max_body_bytes == 0 {
            return Err("response_cache.max_body_bytes must be > 0".into());
        }
        if [rc.session_ttl_secs, rc.list_ttl_secs, rc.aggregate_ttl_secs, rc.stats_ttl_secs].contains(&0) {
            return Err("response_cache TTL presets must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// The sections owned by the cache engine.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            redis: self.redis.clone(),
            cache: self.cache.clone(),
            presence: self.presence.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseCacheConfig {
    /// Global switch; when false every request passes straight through
    #[serde(default = "default_response_cache_enabled")]
    pub enabled: bool,

    /// Largest response body that is buffered and cached
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// TTL for per-session responses (default: 15 minutes)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,

    /// TTL for paginated lists (default: 30 minutes)
    #[serde(default = "default_list_ttl")]
    pub list_ttl_secs: u64,

    /// TTL for aggregates such as clan or federation detail (default: 1 hour)
    #[serde(default = "default_aggregate_ttl")]
    pub aggregate_ttl_secs: u64,

    /// TTL for statistics (default: 2 minutes)
    #[serde(default = "default_stats_ttl")]
    pub stats_ttl_secs: u64,
}

fn default_response_cache_enabled() -> bool {
    true
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_session_ttl() -> u64 {
    900
}

fn default_list_ttl() -> u64 {
    1800
}

fn default_aggregate_ttl() -> u64 {
    3600
}

fn default_stats_ttl() -> u64 {
    120
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_response_cache_enabled(),
            max_body_bytes: default_max_body_bytes(),
            session_ttl_secs: default_session_ttl(),
            list_ttl_secs: default_list_ttl(),
            aggregate_ttl_secs: default_aggregate_ttl(),
            stats_ttl_secs: default_stats_ttl(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("guildhall.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., GUILDHALL__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("GUILDHALL")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.response_cache.session_ttl_secs, 900);
        assert_eq!(cfg.engine().presence.ttl_secs, 300);
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().unwrap_err().contains("logging.level"));
    }

    #[test]
    fn test_rejects_heartbeat_not_below_ttl() {
        let mut cfg = AppConfig::default();
        cfg.presence.heartbeat_interval_secs = cfg.presence.ttl_secs;
        assert!(cfg.validate().unwrap_err().contains("heartbeat_interval_secs"));
    }
}
