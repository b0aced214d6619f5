//! Chunkscribe - chunked transcription orchestration
//!
//! This crate turns a long audio recording into text by routing it through
//! one of several interchangeable recognition backends. It features:
//!
//! - Overlapping time-window chunk planning with guaranteed termination
//! - Per-chunk WAV extraction into drop-cleaned temporary artifacts
//! - Deadline-raced recognition with recoverable-error suppression
//! - Ordered aggregation of chunk transcripts back onto the source timeline
//! - Sled-persisted tracking of asynchronous remote jobs across restarts
//!
//! # Example
//!
//! ```rust,no_run
//! use chunkscribe::{
//!     config::TranscriberConfig,
//!     engine::{Engine, NativeEngine, router::EngineRouter},
//!     orchestrator::Orchestrator,
//!     tracker::{JobStore, JobTracker},
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> chunkscribe::Result<()> {
//!     let config = TranscriberConfig::default();
//!     let native = Arc::new(Engine::Native(NativeEngine::new(config.native.clone())));
//!     let router = EngineRouter::new(Arc::clone(&native), None);
//!     let store = JobStore::temp()?;
//!     let tracker = JobTracker::new(Arc::clone(&native), store, &config);
//!     let orchestrator = Orchestrator::new(config, router, tracker);
//!
//!     let result = orchestrator.transcribe(Path::new("meeting.wav"), None).await?;
//!     println!("{}", result.text);
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod engine;
pub mod executor;
pub mod media;
pub mod orchestrator;
pub mod planner;
pub mod protocol;
pub mod tracker;

// Re-export commonly used types for convenience
pub use config::TranscriberConfig;
pub use engine::{Engine, EngineKind};
pub use orchestrator::{Orchestrator, RequestState};
pub use protocol::{
    ChunkPlan, ChunkTranscript, ChunkWindow, EngineAvailability, JobPoll, TranscriptSegment,
    TranscriptionJob, TranscriptionRequest, TranscriptionResult,
};
pub use tracker::{JobEvent, JobStore, JobTracker};

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can surface from a transcription request
#[derive(Error, Debug)]
pub enum TranscribeError {
    /// The source recording does not exist or cannot be opened
    #[error("source not found: {0}")]
    SourceNotFound(PathBuf),

    /// The selected backend cannot take work right now
    #[error("backend unavailable: {reason}")]
    BackendUnavailable { reason: String },

    /// Recognition finished but produced no text
    #[error("no speech detected")]
    NoSpeechDetected,

    /// A chunk could not be exported to a standalone artifact
    #[error("segment extraction failed: {reason}")]
    SegmentExtractionFailed { reason: String },

    /// One chunk failed fatally, aborting the whole request
    #[error("chunk {index} failed")]
    ChunkFailed {
        index: usize,
        #[source]
        source: Box<TranscribeError>,
    },

    /// A unit of work lost its deadline race
    #[error("timed out after {after:?}")]
    Timeout { after: Duration },

    /// The recording exceeds the configured size ceiling
    #[error("recording too large: {duration:.0}s exceeds the {max:.0}s limit")]
    TooLarge { duration: f64, max: f64 },

    /// The asynchronous backend rejected or lost a job
    #[error("async backend failed: {reason}")]
    AsyncBackendFailed { reason: String },

    /// A second request arrived while one was executing
    #[error("a transcription is already in progress")]
    AlreadyInProgress,

    /// Configuration names an unknown backend or is otherwise unusable
    #[error("not configured: {reason}")]
    NotConfigured { reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job store error
    #[error("job store error: {0}")]
    Store(#[source] anyhow::Error),
}

/// Result type alias for chunkscribe operations
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Utility functions for common operations
pub mod utils {
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::path::Path;

    /// Write a sine-wave WAV of the given duration. 16 kHz mono 16-bit.
    pub fn write_test_wav(path: &Path, duration_secs: f64) -> crate::Result<()> {
        let sample_rate = 16_000u32;
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).map_err(|e| {
            crate::TranscribeError::SegmentExtractionFailed {
                reason: e.to_string(),
            }
        })?;
        let samples = (duration_secs * sample_rate as f64) as usize;
        for i in 0..samples {
            let t = i as f32 / sample_rate as f32;
            let amp = (t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 0.1;
            writer
                .write_sample((amp * i16::MAX as f32) as i16)
                .map_err(|e| crate::TranscribeError::SegmentExtractionFailed {
                    reason: e.to_string(),
                })?;
        }
        writer
            .finalize()
            .map_err(|e| crate::TranscribeError::SegmentExtractionFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }
}
