use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::engine::EngineKind;
use crate::{Result, TranscribeError};

/// Configuration for the on-device recognizer subprocess
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeEngineConfig {
    /// Recognizer executable
    pub command: String,
    /// Arguments placed before the audio path
    pub args: Vec<String>,
    /// Working directory for the process
    pub workdir: Option<PathBuf>,
}

impl Default for NativeEngineConfig {
    fn default() -> Self {
        Self {
            command: "whisper-cli".to_string(),
            args: Vec::new(),
            workdir: None,
        }
    }
}

/// Configuration for the asynchronous remote backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteEngineConfig {
    /// Server base URL, e.g. http://localhost:8000
    pub base_url: String,
    /// Optional bearer token
    pub api_key: Option<String>,
    /// Model name sent with each submission
    pub model: String,
}

impl Default for RemoteEngineConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            model: "whisper-1".to_string(),
        }
    }
}

/// Tunable policy for chunking, deadlines, and job polling.
///
/// All durations are plain seconds in the config file; accessors expose
/// `Duration` values where callers race timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriberConfig {
    /// Maximum chunk length in seconds (clamped to a hard safety ceiling)
    pub max_chunk_secs: f64,
    /// Recordings longer than this are rejected outright
    pub max_total_secs: f64,
    /// Requested overlap between consecutive chunks in seconds
    pub chunk_overlap_secs: f64,
    /// Hard cap on the number of chunks per request
    pub max_chunk_count: usize,
    /// Backend tag to prefer when the caller does not name one
    pub preferred_engine: Option<String>,
    /// Pause between chunks to avoid saturating the backend
    pub cooldown_secs: f64,
    /// Deadline for recognizing an unchunked recording
    pub whole_file_deadline_secs: u64,
    /// Deadline for recognizing one chunk
    pub chunk_recognition_deadline_secs: u64,
    /// Deadline for exporting one chunk
    pub chunk_export_deadline_secs: u64,
    /// Ceiling for one whole request
    pub request_ceiling_secs: u64,
    /// Interval between async job poll cycles
    pub poll_interval_secs: u64,
    /// Jobs outstanding longer than this are abandoned
    pub job_max_wait_secs: u64,
    pub native: NativeEngineConfig,
    pub remote: Option<RemoteEngineConfig>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            max_chunk_secs: 300.0,
            max_total_secs: 14_400.0,
            chunk_overlap_secs: 2.0,
            max_chunk_count: 200,
            preferred_engine: None,
            cooldown_secs: 1.0,
            whole_file_deadline_secs: 300,
            chunk_recognition_deadline_secs: 180,
            chunk_export_deadline_secs: 120,
            request_ceiling_secs: 3600,
            poll_interval_secs: 30,
            job_max_wait_secs: 7200,
            native: NativeEngineConfig::default(),
            remote: None,
        }
    }
}

impl TranscriberConfig {
    /// Load configuration from a JSON file, validating backend tags
    /// at load time rather than when a request arrives.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| TranscribeError::NotConfigured {
                reason: format!("invalid config {}: {}", path.display(), e),
            })?;
        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Reject unknown engine tags and impossible limits
    pub fn validate(&self) -> Result<()> {
        if let Some(tag) = self.preferred_engine.as_deref() {
            tag.parse::<EngineKind>()?;
        }
        if self.max_chunk_secs <= 0.0 || self.max_total_secs <= 0.0 {
            return Err(TranscribeError::NotConfigured {
                reason: "chunk and total duration limits must be positive".to_string(),
            });
        }
        if self.max_chunk_count == 0 {
            return Err(TranscribeError::NotConfigured {
                reason: "max_chunk_count must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Preferred backend, already validated by `load`
    pub fn preferred(&self) -> Option<EngineKind> {
        self.preferred_engine
            .as_deref()
            .and_then(|tag| tag.parse().ok())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs.max(0.0))
    }

    pub fn whole_file_deadline(&self) -> Duration {
        Duration::from_secs(self.whole_file_deadline_secs)
    }

    pub fn chunk_recognition_deadline(&self) -> Duration {
        Duration::from_secs(self.chunk_recognition_deadline_secs)
    }

    pub fn chunk_export_deadline(&self) -> Duration {
        Duration::from_secs(self.chunk_export_deadline_secs)
    }

    pub fn request_ceiling(&self) -> Duration {
        Duration::from_secs(self.request_ceiling_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = TranscriberConfig::default();
        assert_eq!(config.max_chunk_secs, 300.0);
        assert_eq!(config.chunk_overlap_secs, 2.0);
        assert_eq!(config.poll_interval_secs, 30);
        assert!(config.preferred().is_none());
        assert!(config.remote.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "max_chunk_secs": 120.0, "preferred_engine": "remote",
                 "remote": { "base_url": "http://localhost:8000" } }"#,
        )
        .unwrap();

        let config = TranscriberConfig::load(&path).unwrap();
        assert_eq!(config.max_chunk_secs, 120.0);
        assert_eq!(config.preferred(), Some(EngineKind::Remote));
        assert_eq!(config.max_chunk_count, 200);
        assert_eq!(
            config.remote.unwrap().base_url,
            "http://localhost:8000"
        );
    }

    #[test]
    fn test_unknown_engine_tag_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "preferred_engine": "telepathy" }"#).unwrap();

        let err = TranscriberConfig::load(&path).unwrap_err();
        assert!(matches!(err, TranscribeError::NotConfigured { .. }));
    }

    #[test]
    fn test_zero_chunk_count_rejected() {
        let config = TranscriberConfig {
            max_chunk_count: 0,
            ..TranscriberConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
