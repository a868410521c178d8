//! Engine configuration.
//!
//! A unified-config-with-builder pattern: one coherent struct, `serde`
//! round-trippable, constructed through a dedicated builder rather than
//! public field mutation.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for a `ConversationEngine` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for persisted conversation files.
    pub files_dir: PathBuf,

    /// Opening timeout for a connection attempt.
    #[serde(with = "duration_seconds")]
    pub opening_timeout: Duration,

    /// Ceiling for the exponential reconnect backoff.
    #[serde(with = "duration_seconds")]
    pub backoff_ceiling: Duration,

    /// File transfer chunk size in bytes.
    pub chunk_size_bytes: u64,

    /// Maximum number of deferrable operations coalesced before a forced
    /// flush, independent of the timer-based flush.
    pub max_deferred_batch: usize,

    /// How long deferrable operations may be coalesced before the timer
    /// forces a flush.
    #[serde(with = "duration_seconds")]
    pub deferred_flush_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            files_dir: PathBuf::from("./conversations"),
            opening_timeout: crate::connection::OPENING_TIMEOUT,
            backoff_ceiling: Duration::from_secs(5 * 60),
            chunk_size_bytes: crate::transfer::CHUNK_SIZE,
            max_deferred_batch: 32,
            deferred_flush_interval: Duration::from_secs(10),
        }
    }
}

/// Fluent builder for `EngineConfig`.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn files_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.files_dir = dir.into();
        self
    }

    pub fn opening_timeout(mut self, timeout: Duration) -> Self {
        self.config.opening_timeout = timeout;
        self
    }

    pub fn backoff_ceiling(mut self, ceiling: Duration) -> Self {
        self.config.backoff_ceiling = ceiling;
        self
    }

    pub fn chunk_size_bytes(mut self, bytes: u64) -> Self {
        self.config.chunk_size_bytes = bytes;
        self
    }

    pub fn deferred_flush_interval(mut self, interval: Duration) -> Self {
        self.config.deferred_flush_interval = interval;
        self
    }

    /// Validates the accumulated settings and returns the finished config
    /// rather than handing back an unchecked struct.
    pub fn build(self) -> anyhow::Result<EngineConfig> {
        if self.config.chunk_size_bytes == 0 {
            anyhow::bail!("chunk_size_bytes cannot be 0");
        }
        if self.config.max_deferred_batch == 0 {
            anyhow::bail!("max_deferred_batch cannot be 0");
        }
        if self.config.opening_timeout.is_zero() {
            anyhow::bail!("opening_timeout cannot be 0");
        }
        Ok(self.config)
    }
}

impl EngineConfig {
    /// Loads a config from a human-editable JSON file, distinct from the
    /// binary wire protocol's `bincode` framing.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> crate::error::ConvoResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> crate::error::ConvoResult<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

mod duration_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = EngineConfigBuilder::new()
            .chunk_size_bytes(1024)
            .backoff_ceiling(Duration::from_secs(60))
            .build()
            .unwrap();
        assert_eq!(config.chunk_size_bytes, 1024);
        assert_eq!(config.backoff_ceiling, Duration::from_secs(60));
    }

    #[test]
    fn default_uses_the_standard_protocol_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_size_bytes, 256 * 1024);
        assert_eq!(config.opening_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let result = EngineConfigBuilder::new().chunk_size_bytes(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn round_trips_through_a_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let config = EngineConfigBuilder::new().chunk_size_bytes(4096).build().unwrap();
        config.save_to_file(&path).unwrap();
        let loaded = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.chunk_size_bytes, 4096);
    }
}
