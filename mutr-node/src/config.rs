//! Configuration for mutr-node
//!
//! Resolution order: command line → environment (both via clap) → TOML file
//! → compiled defaults. The TOML file is `mutr-node.toml`, found through
//! `--config` or the platform config directory.

use mutr_common::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::services::{CoordinatorSettings, DispatcherSettings, RecoverySettings, WorkerSettings};

/// TOML file name looked up in the config directories
pub const CONFIG_FILE_NAME: &str = "mutr-node.toml";
/// Environment variable naming the data folder
pub const ROOT_FOLDER_ENV: &str = "MUTR_ROOT_FOLDER";
/// Database file created inside the data folder
pub const DATABASE_FILE_NAME: &str = "mutr.db";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 5740,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base URL of the classification engine
    pub base_url: String,
    pub timeout_ms: u64,
    /// Attempts per analysis before the node is marked FAILED
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:50051".to_string(),
            timeout_ms: 30_000,
            max_attempts: 3,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Lifetime of a held request (seconds)
    pub waiting_ttl_secs: u64,
    /// Lifetime of readiness markers (seconds)
    pub readiness_ttl_secs: u64,
    /// Ancestor content collected for the engine prompt
    pub context_cutoff_chars: usize,
    pub notification_channel: String,
    pub max_lock_wait_ms: u64,
    /// How often expired coordination entries are purged (seconds)
    pub purge_interval_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_capacity: 256,
            waiting_ttl_secs: 3600,
            readiness_ttl_secs: 3600,
            context_cutoff_chars: 500,
            notification_channel: mutr_common::events::PUBLIC_GALAXY_CHANNEL.to_string(),
            max_lock_wait_ms: 5000,
            purge_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub enabled: bool,
    pub health_check_attempts: u32,
    pub health_check_interval_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            health_check_attempts: 30,
            health_check_interval_secs: 10,
        }
    }
}

/// Contents of `mutr-node.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeServiceConfig {
    /// Data folder holding the database
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub analysis: AnalysisConfig,
    pub recovery: RecoveryConfig,
}

impl NodeServiceConfig {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            waiting_ttl: Duration::from_secs(self.analysis.waiting_ttl_secs),
            readiness_ttl: Duration::from_secs(self.analysis.readiness_ttl_secs),
            max_lock_wait_ms: self.analysis.max_lock_wait_ms,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            engine_timeout: Duration::from_millis(self.engine.timeout_ms),
            max_attempts: self.engine.max_attempts,
            retry_backoff: Duration::from_millis(self.engine.retry_backoff_ms),
            notification_channel: self.analysis.notification_channel.clone(),
            max_lock_wait_ms: self.analysis.max_lock_wait_ms,
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            worker_count: self.analysis.worker_count,
            queue_capacity: self.analysis.queue_capacity,
        }
    }

    pub fn recovery_settings(&self) -> RecoverySettings {
        RecoverySettings {
            health_check_attempts: self.recovery.health_check_attempts,
            health_check_interval: Duration::from_secs(self.recovery.health_check_interval_secs),
            context_cutoff_chars: self.analysis.context_cutoff_chars,
        }
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> mutr_common::Result<()> {
        let invalid = |msg: &str| Err(mutr_common::Error::Config(msg.to_string()));

        if self.engine.base_url.trim().is_empty() {
            return invalid("engine.base_url must not be empty");
        }
        if self.engine.timeout_ms == 0 {
            return invalid("engine.timeout_ms must be greater than 0");
        }
        if self.engine.max_attempts == 0 {
            return invalid("engine.max_attempts must be at least 1");
        }
        if self.analysis.worker_count == 0 {
            return invalid("analysis.worker_count must be at least 1");
        }
        if self.analysis.queue_capacity == 0 {
            return invalid("analysis.queue_capacity must be at least 1");
        }
        if self.analysis.notification_channel.trim().is_empty() {
            return invalid("analysis.notification_channel must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_constants() {
        let config = NodeServiceConfig::default();
        assert_eq!(config.analysis.context_cutoff_chars, 500);
        assert_eq!(config.analysis.notification_channel, "/topic/galaxy/public");
        assert_eq!(config.recovery.health_check_attempts, 30);
        assert_eq!(config.recovery.health_check_interval_secs, 10);
        assert_eq!(config.analysis.waiting_ttl_secs, 3600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: NodeServiceConfig = toml::from_str(
            r#"
            [engine]
            base_url = "http://engine:8080"

            [analysis]
            worker_count = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.base_url, "http://engine:8080");
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.analysis.worker_count, 2);
        assert_eq!(config.analysis.queue_capacity, 256);
        assert_eq!(config.server.port, 5740);
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = NodeServiceConfig::default();
        config.analysis.worker_count = 0;
        assert!(matches!(
            config.validate(),
            Err(mutr_common::Error::Config(_))
        ));
    }

    #[test]
    fn test_settings_conversion() {
        let mut config = NodeServiceConfig::default();
        config.engine.timeout_ms = 1500;
        config.recovery.health_check_interval_secs = 2;

        assert_eq!(config.worker_settings().engine_timeout, Duration::from_millis(1500));
        assert_eq!(
            config.recovery_settings().health_check_interval,
            Duration::from_secs(2)
        );
        assert_eq!(config.dispatcher_settings().worker_count, 4);
    }
}
