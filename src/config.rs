use std::net::SocketAddr;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

pub const DEFAULT_CLIENT_IP_HEADER: &str = "x-nf-client-connection-ip";

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    #[serde(default = "default_env")]
    pub env: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default)]
    pub sentry_dsn: Option<String>,

    /// Comma separated list of permitted client addresses.
    #[serde(default)]
    pub allowed_ips: String,
    /// Header set by the edge proxy carrying the real client address.
    #[serde(default = "default_client_ip_header")]
    pub client_ip_header: Option<String>,

    pub db_url: String,
    pub db_max_connections: u32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub db_acquire_timeout: Duration,

    pub redis_url: String,
    pub redis_max_connections: u32,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_presence_ttl")]
    pub presence_ttl: Duration,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,

    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    #[serde(default = "default_shorteners")]
    pub shorteners: Vec<ShortenerConfig>,
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_shortener_timeout")]
    pub shortener_timeout: Duration,

    #[serde(default)]
    pub users: Vec<UserConfig>,
}

/// A third-party shortening API and the field names it speaks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShortenerConfig {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_request_field")]
    pub request_field: String,
    #[serde(default = "default_result_field")]
    pub result_field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserConfig {
    pub name: String,
    pub ip: String,
}

impl AppConfig {
    pub fn new_from_file_and_env(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("deployform"))
            .set_override_option("allowed_ips", std::env::var("ALLOWED_IPS").ok())?
            .build()
            .and_then(|cfg| cfg.try_deserialize::<Self>())
            .and_then(Self::validated)
    }

    /// Rejects presence timings the heartbeat loop can't work with.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.presence_ttl.is_zero() {
            return Err(ConfigError::Message(
                "presence_ttl must be at least one second".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::Message(
                "heartbeat_interval must be at least one second".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.presence_ttl {
            return Err(ConfigError::Message(format!(
                "heartbeat_interval ({}s) must be shorter than presence_ttl ({}s)",
                self.heartbeat_interval.as_secs(),
                self.presence_ttl.as_secs()
            )));
        }
        Ok(self)
    }

    pub fn is_production(&self) -> bool {
        self.env == "production"
    }

    /// The first configured shortener is the default one.
    pub fn default_shortener(&self) -> Option<&ShortenerConfig> {
        self.shorteners.first()
    }

    pub fn find_shortener(&self, name: &str) -> Option<&ShortenerConfig> {
        self.shorteners.iter().find(|s| s.name == name)
    }
}

fn default_env() -> String {
    "development".to_string()
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_client_ip_header() -> Option<String> {
    Some(DEFAULT_CLIENT_IP_HEADER.to_string())
}

fn default_presence_ttl() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_shorteners() -> Vec<ShortenerConfig> {
    vec![ShortenerConfig {
        name: "lrl".to_string(),
        endpoint: "https://api.lrl.kr/v6/short".to_string(),
        request_field: default_request_field(),
        result_field: default_result_field(),
    }]
}

fn default_shortener_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_field() -> String {
    "url".to_string()
}

fn default_result_field() -> String {
    "result".to_string()
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        env: default_env(),
        bind_addr: default_bind_addr(),
        sentry_dsn: None,
        allowed_ips: "127.0.0.1".to_string(),
        client_ip_header: default_client_ip_header(),
        db_url: "postgres://localhost/deployform".to_string(),
        db_max_connections: 1,
        db_acquire_timeout: Duration::from_secs(1),
        redis_url: "redis://localhost:6379".to_string(),
        redis_max_connections: 1,
        presence_ttl: default_presence_ttl(),
        heartbeat_interval: default_heartbeat_interval(),
        static_dir: default_static_dir(),
        shorteners: default_shorteners(),
        shortener_timeout: default_shortener_timeout(),
        users: vec![],
    }
}
