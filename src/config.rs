//! Configuration for the replication engine.
//!
//! Configuration is passed to [`ReplicationEngine::new()`](crate::ReplicationEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//! Namespace pairing and credentials for each remote cluster are not part of
//! this file: they arrive per peering as a [`RemoteCluster`].
//!
//! # Quick Start
//!
//! ```rust
//! use crd_replicator::config::ReplicatorConfig;
//!
//! let config = ReplicatorConfig {
//!     local_cluster_id: "cluster-a".into(),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorConfig
//! ├── local_cluster_id: String      # Stamped as origin on every mirror
//! └── settings: ReplicatorSettings
//!     ├── workers: usize            # Worker pool size per reflector
//!     ├── shutdown_timeout: String  # Max wait for workers on shutdown
//!     ├── queue: QueueConfig        # Retry backoff and rate limit
//!     └── informer: InformerConfig  # Relist backoff
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! local_cluster_id: "cluster-a"
//!
//! settings:
//!   workers: 8
//!   queue:
//!     base_delay: "5ms"
//!     max_delay: "1000s"
//!     rate_limit_per_sec: 10
//!     rate_limit_burst: 100
//!   informer:
//!     relist_backoff_base: "1s"
//!     relist_backoff_max: "5m"
//! ```

use crate::error::{ReplicationError, Result};
use crate::resilience::{BackoffConfig, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Identity of the local cluster. Stamped as the origin on every mirror
    /// and used to select the mirrors this engine owns.
    pub local_cluster_id: String,

    /// Tunable parameters.
    #[serde(default)]
    pub settings: ReplicatorSettings,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            local_cluster_id: "local-cluster".to_string(),
            settings: ReplicatorSettings::default(),
        }
    }
}

impl ReplicatorConfig {
    /// Create a config with fast retries for testing.
    pub fn for_testing(local_cluster_id: &str) -> Self {
        Self {
            local_cluster_id: local_cluster_id.to_string(),
            settings: ReplicatorSettings {
                workers: 2,
                shutdown_timeout: "2s".to_string(),
                queue: QueueConfig {
                    base_delay: "5ms".to_string(),
                    max_delay: "100ms".to_string(),
                    backoff_factor: 2.0,
                    rate_limit_per_sec: 10_000,
                    rate_limit_burst: 1000,
                },
                informer: InformerConfig {
                    relist_backoff_base: "10ms".to_string(),
                    relist_backoff_max: "100ms".to_string(),
                },
            },
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.local_cluster_id.trim().is_empty() {
            return Err(ReplicationError::Config(
                "local_cluster_id must not be empty".to_string(),
            ));
        }
        if self.settings.workers == 0 {
            return Err(ReplicationError::Config(
                "settings.workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicatorSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// General settings for the replication logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorSettings {
    /// Number of workers draining each reflector's queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long shutdown waits for worker tasks, as a duration string.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub informer: InformerConfig,
}

fn default_workers() -> usize {
    4
}

fn default_shutdown_timeout() -> String {
    "10s".to_string()
}

impl Default for ReplicatorSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            shutdown_timeout: "10s".to_string(),
            queue: QueueConfig::default(),
            informer: InformerConfig::default(),
        }
    }
}

impl ReplicatorSettings {
    pub fn shutdown_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.shutdown_timeout, Duration::from_secs(10))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// QueueConfig: retry backoff and rate limit
// ═══════════════════════════════════════════════════════════════════════════════

/// Work queue retry settings.
///
/// A failed item is retried after `base_delay * backoff_factor^(failures-1)`,
/// capped at `max_delay`, and additionally waits for a token from a bucket
/// refilling at `rate_limit_per_sec`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_base_delay")]
    pub base_delay: String,

    #[serde(default = "default_max_delay")]
    pub max_delay: String,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_base_delay() -> String {
    "5ms".to_string()
}

fn default_max_delay() -> String {
    "1000s".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_rate_limit_per_sec() -> u32 {
    10
}

fn default_rate_limit_burst() -> u32 {
    100
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_delay: "5ms".to_string(),
            max_delay: "1000s".to_string(),
            backoff_factor: 2.0,
            rate_limit_per_sec: 10,
            rate_limit_burst: 100,
        }
    }
}

impl QueueConfig {
    /// Per-item backoff schedule. Unparseable durations fall back to defaults.
    pub fn backoff(&self) -> BackoffConfig {
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            default_backoff_factor()
        };
        BackoffConfig {
            initial_delay: parse_duration_or(&self.base_delay, Duration::from_millis(5)),
            max_delay: parse_duration_or(&self.max_delay, Duration::from_secs(1000)),
            backoff_factor: factor,
        }
    }

    /// Global retry rate limit.
    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            burst_size: self.rate_limit_burst,
            refill_rate: self.rate_limit_per_sec,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// InformerConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Watch cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformerConfig {
    /// First delay after a failed list.
    #[serde(default = "default_relist_backoff_base")]
    pub relist_backoff_base: String,

    /// Ceiling for relist backoff.
    #[serde(default = "default_relist_backoff_max")]
    pub relist_backoff_max: String,
}

fn default_relist_backoff_base() -> String {
    "1s".to_string()
}

fn default_relist_backoff_max() -> String {
    "5m".to_string()
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            relist_backoff_base: "1s".to_string(),
            relist_backoff_max: "5m".to_string(),
        }
    }
}

impl InformerConfig {
    pub fn relist_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: parse_duration_or(&self.relist_backoff_base, Duration::from_secs(1)),
            max_delay: parse_duration_or(&self.relist_backoff_max, Duration::from_secs(300)),
            backoff_factor: 2.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RemoteCluster: one entry per peering
// ═══════════════════════════════════════════════════════════════════════════════

/// Namespace pairing for one remote cluster.
///
/// Supplied by the bootstrap collaborator when a peering is established.
/// A reflector is bound to one pairing for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCluster {
    /// Identity of the remote cluster; matched against the destination label.
    pub cluster_id: String,

    /// Local tenant namespace holding records destined for this cluster.
    pub local_namespace: String,

    /// Namespace in the remote cluster where mirrors are created.
    pub remote_namespace: String,
}

impl RemoteCluster {
    pub fn new(
        cluster_id: impl Into<String>,
        local_namespace: impl Into<String>,
        remote_namespace: impl Into<String>,
    ) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            local_namespace: local_namespace.into(),
            remote_namespace: remote_namespace.into(),
        }
    }
}

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReplicatorConfig::default();
        assert_eq!(config.local_cluster_id, "local-cluster");
        assert_eq!(config.settings.workers, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_cluster_id() {
        let config = ReplicatorConfig {
            local_cluster_id: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ReplicationError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = ReplicatorConfig::default();
        config.settings.workers = 0;
        assert!(matches!(config.validate(), Err(ReplicationError::Config(_))));
    }

    #[test]
    fn test_queue_backoff_parsing() {
        let config = QueueConfig {
            base_delay: "10ms".to_string(),
            max_delay: "1m".to_string(),
            ..Default::default()
        };
        let backoff = config.backoff();
        assert_eq!(backoff.initial_delay, Duration::from_millis(10));
        assert_eq!(backoff.max_delay, Duration::from_secs(60));
        assert_eq!(backoff.backoff_factor, 2.0);
    }

    #[test]
    fn test_queue_backoff_invalid_fallback() {
        let config = QueueConfig {
            base_delay: "soon".to_string(),
            max_delay: "later".to_string(),
            backoff_factor: 0.5,
            ..Default::default()
        };
        let backoff = config.backoff();
        assert_eq!(backoff.initial_delay, Duration::from_millis(5));
        assert_eq!(backoff.max_delay, Duration::from_secs(1000));
        assert_eq!(backoff.backoff_factor, 2.0);
    }

    #[test]
    fn test_queue_rate_limit() {
        let config = QueueConfig::default();
        let rate = config.rate_limit();
        assert_eq!(rate.refill_rate, 10);
        assert_eq!(rate.burst_size, 100);
    }

    #[test]
    fn test_informer_relist_backoff() {
        let backoff = InformerConfig::default().relist_backoff();
        assert_eq!(backoff.initial_delay, Duration::from_secs(1));
        assert_eq!(backoff.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_shutdown_timeout() {
        let settings = ReplicatorSettings::default();
        assert_eq!(settings.shutdown_timeout_duration(), Duration::from_secs(10));

        let settings = ReplicatorSettings {
            shutdown_timeout: "garbage".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.shutdown_timeout_duration(), Duration::from_secs(10));
    }

    #[test]
    fn test_for_testing_config() {
        let config = ReplicatorConfig::for_testing("cluster-a");
        assert_eq!(config.local_cluster_id, "cluster-a");
        assert_eq!(config.settings.workers, 2);
        assert_eq!(config.settings.queue.backoff().max_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_config_json_minimal() {
        let json = r#"{"local_cluster_id": "cluster-z"}"#;
        let config: ReplicatorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.local_cluster_id, "cluster-z");
        assert_eq!(config.settings.workers, 4);
        assert_eq!(config.settings.queue.rate_limit_burst, 100);
        assert_eq!(config.settings.informer.relist_backoff_max, "5m");
    }

    #[test]
    fn test_config_json_roundtrip() {
        let mut config = ReplicatorConfig::for_testing("cluster-a");
        config.settings.workers = 7;

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ReplicatorConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.local_cluster_id, "cluster-a");
        assert_eq!(parsed.settings.workers, 7);
        assert_eq!(parsed.settings.queue.max_delay, "100ms");
    }

    #[test]
    fn test_remote_cluster_new() {
        let remote = RemoteCluster::new("cluster-b", "tenant-b", "tenant-a");
        assert_eq!(remote.cluster_id, "cluster-b");
        assert_eq!(remote.local_namespace, "tenant-b");
        assert_eq!(remote.remote_namespace, "tenant-a");
    }
}
