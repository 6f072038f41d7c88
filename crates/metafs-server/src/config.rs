use serde::{Deserialize, Serialize};

use metafs_types::{make_error_msg, Result, StatusCode, Void};

/// Server configuration. Every field has a default so a config file only
/// needs to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// This server's slot among the cluster sessions.
    pub server_slot: u32,
    /// Number of server sessions (processes) in the cluster.
    pub num_sessions: u32,
    /// Worker slots per server; each owns one bootstrap shard.
    pub workers_per_server: u32,
    /// Routing key buckets per bootstrap shard.
    pub hash_range: u64,
    /// Element count beyond which a shard splits.
    pub split_threshold: u64,
    /// Unshipped log entries under which the range split is published.
    pub log_almost_done_threshold: u64,
    /// Payload byte budget per migration batch.
    pub wire_byte_budget: usize,
    /// Coordinator sleep when the split queue is empty.
    pub coordinator_idle_sleep_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_slot: 0,
            num_sessions: 1,
            workers_per_server: 1,
            hash_range: 1024,
            split_threshold: 200_000,
            log_almost_done_threshold: 30,
            wire_byte_budget: 3712,
            coordinator_idle_sleep_ms: 1,
        }
    }
}

impl ServerConfig {
    /// Total routing key space covered by the cluster's bootstrap shards.
    pub fn key_space(&self) -> u64 {
        self.num_sessions as u64 * self.workers_per_server as u64 * self.hash_range
    }

    /// Number of shards the cluster starts with.
    pub fn bootstrap_shards(&self) -> u32 {
        self.num_sessions * self.workers_per_server
    }

    pub fn validate(&self) -> Result<Void> {
        if self.num_sessions == 0 || self.workers_per_server == 0 || self.hash_range == 0 {
            return make_error_msg(
                StatusCode::INVALID_CONFIG,
                "sessions, workers and hash_range must be positive",
            );
        }
        if self.server_slot >= self.num_sessions {
            return make_error_msg(
                StatusCode::INVALID_CONFIG,
                format!(
                    "server_slot {} out of {} sessions",
                    self.server_slot, self.num_sessions
                ),
            );
        }
        if self.split_threshold == 0 {
            return make_error_msg(StatusCode::INVALID_CONFIG, "split_threshold must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = ServerConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.key_space(), 1024);
        assert_eq!(cfg.bootstrap_shards(), 1);
    }

    #[test]
    fn test_partial_override_from_json() {
        let cfg: ServerConfig =
            serde_json::from_str(r#"{"num_sessions": 2, "split_threshold": 8}"#).unwrap();
        assert_eq!(cfg.num_sessions, 2);
        assert_eq!(cfg.split_threshold, 8);
        assert_eq!(cfg.hash_range, 1024);
        assert_eq!(cfg.key_space(), 2048);
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let cfg = ServerConfig {
            server_slot: 3,
            num_sessions: 2,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
