use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::trigger::OverduePolicy;

pub const DEFAULT_PORT: u16 = 18790;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (chronod.toml + CHRONOD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChronodConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Timer engine and retry policy knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Reload polling cadence in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// How far ahead the reload query looks, in seconds.
    #[serde(default = "default_lookahead_secs")]
    pub lookahead_secs: u64,
    /// Fixed delay between delivery retries, in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Upper bound on the total time a job may spend retrying.
    #[serde(default = "default_retry_window_ms")]
    pub retry_window_ms: u64,
    /// Default retry budget for jobs that do not specify one.
    #[serde(default = "default_retries")]
    pub default_retries: u32,
    /// Behaviour for point-in-time jobs whose fire time already passed.
    #[serde(default)]
    pub overdue_policy: OverduePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            lookahead_secs: default_lookahead_secs(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_window_ms: default_retry_window_ms(),
            default_retries: default_retries(),
            overdue_policy: OverduePolicy::default(),
        }
    }
}

/// Leader-election knobs. The heartbeat interval must stay strictly shorter
/// than the staleness timeout or the leader would demote itself between
/// renewals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Stable identity of this instance; generated at startup when absent.
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            instance_id: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

/// Outbound delivery and event publishing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Per-request timeout for recipient calls, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Bounded attempts for publishing one status event.
    #[serde(default = "default_publish_max_attempts")]
    pub publish_max_attempts: u32,
    /// Base delay between publish attempts, in milliseconds.
    #[serde(default = "default_publish_base_delay_ms")]
    pub publish_base_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            publish_max_attempts: default_publish_max_attempts(),
            publish_base_delay_ms: default_publish_base_delay_ms(),
        }
    }
}

impl ChronodConfig {
    /// Load configuration, merging in order:
    ///   1. Explicit path argument
    ///   2. ./chronod.toml
    ///   3. CHRONOD_* environment overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.unwrap_or("chronod.toml");

        let config: ChronodConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CHRONOD_").split("_"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Cross-field consistency checks.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.heartbeat_interval_ms >= self.cluster.heartbeat_timeout_ms {
            return Err(CoreError::Config(format!(
                "heartbeat_interval_ms ({}) must be shorter than heartbeat_timeout_ms ({})",
                self.cluster.heartbeat_interval_ms, self.cluster.heartbeat_timeout_ms
            )));
        }
        if self.scheduler.poll_interval_secs == 0 {
            return Err(CoreError::Config("poll_interval_secs must be positive".into()));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_db_path() -> String {
    "chronod.db".to_string()
}

fn default_poll_interval_secs() -> u64 {
    1
}

fn default_lookahead_secs() -> u64 {
    300 // five minutes
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_retry_window_ms() -> u64 {
    60_000
}

fn default_retries() -> u32 {
    3
}

fn default_heartbeat_interval_ms() -> u64 {
    1_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_publish_max_attempts() -> u32 {
    4
}

fn default_publish_base_delay_ms() -> u64 {
    200
}
