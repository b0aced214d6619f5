//! Merge per-chunk transcripts into one result on the source timeline.

use std::time::Duration;

use crate::protocol::{ChunkTranscript, TranscriptionResult};

/// Merge chunk transcripts, in chunk order, into a single result.
///
/// Each entry pairs a chunk's source-timeline offset with its transcript.
/// Text is joined with a single space, every segment is shifted by its
/// chunk's offset, processing times are summed, and the chunk count equals
/// the input length. Failed chunks never reach this point; the orchestrator
/// aborts the request instead of aggregating partial output.
pub fn merge(chunks: Vec<(f64, ChunkTranscript)>) -> TranscriptionResult {
    let chunk_count = chunks.len();
    let mut text_parts = Vec::new();
    let mut segments = Vec::new();
    let mut processing = Duration::ZERO;

    for (offset_secs, chunk) in chunks {
        let trimmed = chunk.text.trim();
        if !trimmed.is_empty() {
            text_parts.push(trimmed.to_string());
        }
        processing += chunk.processing;
        for mut segment in chunk.segments {
            segment.start_secs += offset_secs;
            segment.end_secs += offset_secs;
            segments.push(segment);
        }
    }

    TranscriptionResult {
        text: text_parts.join(" "),
        segments,
        processing,
        chunk_count,
        success: true,
        error: None,
        job_id: None,
    }
}
