//! Chunk planning: split a duration into overlapping, bounded windows.

use tracing::{debug, warn};

use crate::config::TranscriberConfig;
use crate::protocol::{ChunkPlan, ChunkWindow};
use crate::{Result, TranscribeError};

/// Hard safety ceiling on chunk length, regardless of configuration
pub const MAX_CHUNK_CEILING_SECS: f64 = 600.0;

/// Overlap is clamped to this fraction of the effective chunk length
pub const MAX_OVERLAP_FRACTION: f64 = 0.10;

/// Minimum forward progress per window; guarantees termination even when
/// configured overlap meets or exceeds the chunk length
pub const MIN_ADVANCE_SECS: f64 = 1.0;

/// Effective chunk length after the safety ceiling is applied
fn clamped_chunk_secs(config: &TranscriberConfig) -> f64 {
    config.max_chunk_secs.min(MAX_CHUNK_CEILING_SECS).max(MIN_ADVANCE_SECS)
}

/// Whether a recording of this length must be split before recognition
pub fn needs_chunking(duration_secs: f64, config: &TranscriberConfig) -> bool {
    duration_secs > clamped_chunk_secs(config)
}

/// Compute the ordered window plan for a recording.
///
/// Rejects with `TooLarge` when the recording exceeds the configured total
/// ceiling or the plan would exceed the chunk-count cap. The returned plan
/// always covers `[0, duration)` with monotonically increasing starts.
pub fn plan(duration_secs: f64, config: &TranscriberConfig) -> Result<ChunkPlan> {
    if duration_secs > config.max_total_secs {
        return Err(TranscribeError::TooLarge {
            duration: duration_secs,
            max: config.max_total_secs,
        });
    }

    let chunk = clamped_chunk_secs(config);
    if chunk < config.max_chunk_secs {
        warn!(
            "Chunk length {}s clamped to safety ceiling {}s",
            config.max_chunk_secs, chunk
        );
    }

    let max_overlap = chunk * MAX_OVERLAP_FRACTION;
    let overlap = config.chunk_overlap_secs.clamp(0.0, max_overlap);
    if overlap < config.chunk_overlap_secs {
        warn!(
            "Overlap {}s clamped to {}s (10% of chunk length)",
            config.chunk_overlap_secs, overlap
        );
    }

    let mut windows = Vec::new();
    let mut cur = 0.0f64;
    while cur < duration_secs {
        let end = (cur + chunk).min(duration_secs);
        windows.push(ChunkWindow::new(cur, end));

        if windows.len() > config.max_chunk_count {
            warn!(
                "Plan for {:.1}s exceeds the {}-chunk cap",
                duration_secs, config.max_chunk_count
            );
            // Report the longest duration the chunk-count cap admits, not
            // the unrelated total-duration ceiling.
            let advance = (chunk - overlap).max(MIN_ADVANCE_SECS);
            return Err(TranscribeError::TooLarge {
                duration: duration_secs,
                max: chunk + advance * (config.max_chunk_count as f64 - 1.0),
            });
        }

        // Forward-progress floor keeps pathological overlap configurations
        // from looping forever.
        cur = (cur + chunk - overlap).max(cur + MIN_ADVANCE_SECS);
    }

    debug!(
        "Planned {} windows for {:.1}s (chunk {:.0}s, overlap {:.1}s)",
        windows.len(),
        duration_secs,
        chunk,
        overlap
    );
    Ok(ChunkPlan::new(windows))
}
