//! One recognition attempt, raced against a deadline.

use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::Engine;
use crate::protocol::ChunkTranscript;
use crate::{Result, TranscribeError};

/// Run a single recognition attempt on one unit of work. The attempt and a
/// deadline timer run concurrently; whichever finishes first wins and the
/// loser is cancelled (dropping the attempt kills the recognizer process).
///
/// A successful attempt that recognized nothing is reported as
/// `NoSpeechDetected` rather than an empty success.
pub async fn execute(engine: &Engine, audio: &Path, deadline: Duration) -> Result<ChunkTranscript> {
    debug!(
        "Executing recognition on {} ({} backend, deadline {:?})",
        audio.display(),
        engine.kind(),
        deadline
    );

    match tokio::time::timeout(deadline, engine.recognize(audio)).await {
        Err(_) => {
            warn!("Recognition missed its {:?} deadline", deadline);
            Err(TranscribeError::Timeout { after: deadline })
        }
        Ok(Err(e)) => Err(e),
        Ok(Ok(transcript)) if transcript.is_empty() => Err(TranscribeError::NoSpeechDetected),
        Ok(Ok(transcript)) => Ok(transcript),
    }
}
