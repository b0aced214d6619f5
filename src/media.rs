//! Media I/O: duration probing and sub-range extraction into standalone
//! temporary WAV artifacts.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::protocol::ChunkWindow;
use crate::{Result, TranscribeError};

/// A standalone audio artifact for one chunk. The backing file is deleted
/// when this value is dropped, whatever the recognition outcome was.
#[derive(Debug)]
pub struct SegmentFile {
    path: TempPath,
    /// Position of this segment on the source timeline
    pub offset_secs: f64,
}

impl SegmentFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Total duration of a WAV recording in seconds. A missing file is
/// `SourceNotFound`; a file that exists but does not decode is an
/// extraction failure.
pub fn probe_duration(source: &Path) -> Result<f64> {
    if !source.exists() {
        return Err(TranscribeError::SourceNotFound(source.to_path_buf()));
    }
    let reader = WavReader::open(source).map_err(|e| TranscribeError::SegmentExtractionFailed {
        reason: format!("decode {}: {}", source.display(), e),
    })?;
    let spec = reader.spec();
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

/// Extract one time window of the source into a temporary WAV, racing the
/// export against `deadline`. The artifact is independently recognizable;
/// on timeout or failure any partial file is removed by the temp guard.
pub async fn extract_segment(
    source: &Path,
    window: ChunkWindow,
    deadline: Duration,
) -> Result<SegmentFile> {
    if !source.exists() {
        return Err(TranscribeError::SourceNotFound(source.to_path_buf()));
    }

    let source: PathBuf = source.to_path_buf();
    let export = spawn_blocking(move || copy_range(&source, window));

    match tokio::time::timeout(deadline, export).await {
        Err(_) => Err(TranscribeError::Timeout { after: deadline }),
        Ok(Err(join)) => Err(TranscribeError::SegmentExtractionFailed {
            reason: format!("export task failed: {}", join),
        }),
        Ok(Ok(result)) => {
            let file = result?;
            debug!(
                "Extracted [{:.1}s, {:.1}s) of {} samples-worth into temp artifact",
                window.start_secs,
                window.end_secs,
                window.duration_secs()
            );
            Ok(SegmentFile {
                path: file.into_temp_path(),
                offset_secs: window.start_secs,
            })
        }
    }
}

/// Blocking copy of the sample sub-range into a fresh temp file.
fn copy_range(source: &Path, window: ChunkWindow) -> Result<NamedTempFile> {
    let mut reader = WavReader::open(source)
        .map_err(|e| TranscribeError::SegmentExtractionFailed {
            reason: format!("open {}: {}", source.display(), e),
        })?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(TranscribeError::SegmentExtractionFailed {
            reason: format!(
                "expected 16-bit PCM, got {}-bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let channels = spec.channels as usize;
    let start_frame = (window.start_secs * spec.sample_rate as f64) as usize;
    let end_frame = (window.end_secs * spec.sample_rate as f64) as usize;
    let take = end_frame.saturating_sub(start_frame) * channels;

    let file = NamedTempFile::new()?;
    let out_spec = WavSpec {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer =
        WavWriter::create(file.path(), out_spec).map_err(|e| {
            TranscribeError::SegmentExtractionFailed {
                reason: format!("create segment: {}", e),
            }
        })?;

    for sample in reader
        .samples::<i16>()
        .skip(start_frame * channels)
        .take(take)
    {
        let sample = sample.map_err(|e| TranscribeError::SegmentExtractionFailed {
            reason: format!("read sample: {}", e),
        })?;
        writer
            .write_sample(sample)
            .map_err(|e| TranscribeError::SegmentExtractionFailed {
                reason: format!("write sample: {}", e),
            })?;
    }
    writer
        .finalize()
        .map_err(|e| TranscribeError::SegmentExtractionFailed {
            reason: format!("finalize segment: {}", e),
        })?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::write_test_wav;
    use tempfile::TempDir;

    fn test_source(dir: &TempDir, secs: f64) -> PathBuf {
        let path = dir.path().join("source.wav");
        write_test_wav(&path, secs).unwrap();
        path
    }

    #[test]
    fn test_probe_duration() {
        let dir = TempDir::new().unwrap();
        let source = test_source(&dir, 2.0);
        let duration = probe_duration(&source).unwrap();
        assert!((duration - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_probe_missing_file_is_source_not_found() {
        let err = probe_duration(Path::new("/nonexistent/audio.wav")).unwrap_err();
        assert!(matches!(err, TranscribeError::SourceNotFound(_)));
    }

    #[test]
    fn test_probe_corrupt_file_is_a_decode_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("not-audio.wav");
        std::fs::write(&path, b"definitely not a wav").unwrap();

        // The file exists, so this must not look like a missing source.
        let err = probe_duration(&path).unwrap_err();
        assert!(matches!(err, TranscribeError::SegmentExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_extract_produces_standalone_playable_segment() {
        let dir = TempDir::new().unwrap();
        let source = test_source(&dir, 2.0);

        let segment = extract_segment(
            &source,
            ChunkWindow::new(0.5, 1.5),
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert_eq!(segment.offset_secs, 0.5);
        // The artifact must decode on its own, without the source.
        let duration = probe_duration(segment.path()).unwrap();
        assert!((duration - 1.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn test_segment_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let source = test_source(&dir, 1.0);

        let segment = extract_segment(
            &source,
            ChunkWindow::new(0.0, 1.0),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        let artifact = segment.path().to_path_buf();
        assert!(artifact.exists());

        drop(segment);
        assert!(!artifact.exists());
    }

    #[tokio::test]
    async fn test_extract_missing_source() {
        let err = extract_segment(
            Path::new("/nonexistent/audio.wav"),
            ChunkWindow::new(0.0, 1.0),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TranscribeError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_window_past_end_is_clamped_by_available_samples() {
        let dir = TempDir::new().unwrap();
        let source = test_source(&dir, 1.0);

        let segment = extract_segment(
            &source,
            ChunkWindow::new(0.5, 5.0),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        let duration = probe_duration(segment.path()).unwrap();
        assert!((duration - 0.5).abs() < 1e-3);
    }
}
