use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::engine::EngineKind;

/// One transcription request as seen by the orchestrator
#[derive(Debug, Clone)]
pub struct TranscriptionRequest {
    /// Unique identifier for this request
    pub id: Uuid,
    /// Source recording on disk
    pub source: PathBuf,
    /// Human-readable name carried through to completion events
    pub display_name: String,
    /// Total duration of the source in seconds
    pub duration_secs: f64,
    /// Requested backend, or None for auto selection
    pub preferred: Option<EngineKind>,
}

impl TranscriptionRequest {
    pub fn new(source: PathBuf, duration_secs: f64, preferred: Option<EngineKind>) -> Self {
        let display_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        Self {
            id: Uuid::new_v4(),
            source,
            display_name,
            duration_secs,
            preferred,
        }
    }
}

/// A half-open time window `[start, end)` on the source timeline, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkWindow {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl ChunkWindow {
    pub fn new(start_secs: f64, end_secs: f64) -> Self {
        Self {
            start_secs,
            end_secs,
        }
    }

    /// Window length in seconds
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Ordered, immutable sequence of chunk windows covering the source
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    windows: Vec<ChunkWindow>,
}

impl ChunkPlan {
    pub fn new(windows: Vec<ChunkWindow>) -> Self {
        Self { windows }
    }

    pub fn windows(&self) -> &[ChunkWindow] {
        &self.windows
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// One recognized span of speech, in source-timeline coordinates once merged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Speaker label if the backend provides diarization
    pub speaker: Option<String>,
    pub text: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Recognition output for one unit of work (one chunk, or the whole file)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkTranscript {
    /// Concatenated text for this unit
    pub text: String,
    /// Per-span detail, chunk-local timestamps
    pub segments: Vec<TranscriptSegment>,
    /// Wall-clock time the backend spent on this unit
    pub processing: Duration,
}

impl ChunkTranscript {
    pub fn new(text: String, segments: Vec<TranscriptSegment>, processing: Duration) -> Self {
        Self {
            text,
            segments,
            processing,
        }
    }

    /// True when recognition succeeded but produced nothing
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.segments.is_empty()
    }
}

/// Terminal artifact of one transcription request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub text: String,
    /// Segments in source-timeline coordinates, chunk order
    pub segments: Vec<TranscriptSegment>,
    /// Total backend processing time across all chunks
    pub processing: Duration,
    pub chunk_count: usize,
    pub success: bool,
    pub error: Option<String>,
    /// Set when the request was accepted by an asynchronous backend;
    /// the transcript arrives later through the job tracker
    pub job_id: Option<String>,
}

impl TranscriptionResult {
    /// Build a successful result from one unit of recognition output
    pub fn from_chunk(transcript: ChunkTranscript) -> Self {
        Self {
            text: transcript.text,
            segments: transcript.segments,
            processing: transcript.processing,
            chunk_count: 1,
            success: true,
            error: None,
            job_id: None,
        }
    }

    /// Marker result for a request handed off to an asynchronous backend
    pub fn accepted(job_id: String) -> Self {
        Self {
            success: true,
            job_id: Some(job_id),
            ..Self::default()
        }
    }

    /// Result for a request cancelled by the caller
    pub fn cancelled() -> Self {
        Self {
            success: false,
            error: Some("cancelled".to_string()),
            ..Self::default()
        }
    }
}

/// A job accepted by an asynchronous backend, persisted until terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionJob {
    /// Identifier assigned by the remote backend
    pub job_id: String,
    /// Source recording the job was submitted for
    pub source: PathBuf,
    /// Human-readable name for completion notifications
    pub display_name: String,
    /// When the backend accepted the job
    pub submitted_at: DateTime<Utc>,
}

impl TranscriptionJob {
    pub fn new(job_id: String, source: PathBuf, display_name: String) -> Self {
        Self {
            job_id,
            source,
            display_name,
            submitted_at: Utc::now(),
        }
    }

    /// How long the job has been outstanding
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.submitted_at
    }

    /// Serialize to MessagePack for the durable store
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserialize from MessagePack
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

/// Outcome of asking an asynchronous backend about one job
#[derive(Debug, Clone)]
pub enum JobPoll {
    /// The backend finished and returned the full transcript
    Completed(ChunkTranscript),
    /// The backend gave up on the job
    Failed(String),
    /// Still working; ask again next cycle
    Pending,
}

/// Whether a backend can take work right now, and why not
#[derive(Debug, Clone)]
pub struct EngineAvailability {
    pub available: bool,
    pub reason: String,
}

impl EngineAvailability {
    pub fn available(reason: impl Into<String>) -> Self {
        Self {
            available: true,
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_serialization_round_trip() {
        let job = TranscriptionJob::new(
            "job-42".to_string(),
            PathBuf::from("/recordings/standup.wav"),
            "standup.wav".to_string(),
        );

        let bytes = job.to_bytes().unwrap();
        let deserialized = TranscriptionJob::from_bytes(&bytes).unwrap();

        assert_eq!(job, deserialized);
    }

    #[test]
    fn test_window_duration() {
        let window = ChunkWindow::new(298.0, 598.0);
        assert_eq!(window.duration_secs(), 300.0);
    }

    #[test]
    fn test_request_display_name_from_file_name() {
        let request =
            TranscriptionRequest::new(PathBuf::from("/tmp/audio/interview.wav"), 120.0, None);
        assert_eq!(request.display_name, "interview.wav");
    }

    #[test]
    fn test_accepted_result_carries_job_id() {
        let result = TranscriptionResult::accepted("job-7".to_string());
        assert!(result.success);
        assert_eq!(result.chunk_count, 0);
        assert_eq!(result.job_id.as_deref(), Some("job-7"));
    }

    #[test]
    fn test_empty_chunk_transcript() {
        assert!(ChunkTranscript::default().is_empty());
        let spoken = ChunkTranscript::new("hello".to_string(), vec![], Duration::from_secs(1));
        assert!(!spoken.is_empty());
    }
}
