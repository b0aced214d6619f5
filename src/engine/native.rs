//! On-device recognizer backend.
//!
//! Each recognition attempt spawns the configured recognizer executable on
//! one standalone audio artifact and reads a line protocol from stdout:
//!
//! - `partial <text>` — interim hypothesis, filtered out
//! - `transient <message>` — recoverable backend hiccup; the attempt keeps
//!   waiting for a final result on the same call
//! - a single-line JSON document — the final result
//!
//! The process exiting before a final document is fatal: the backend has
//! become unavailable. Exactly one outcome is delivered per invocation even
//! if the recognizer emits the final document more than once.

use serde::Deserialize;
use std::process::Stdio;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::NativeEngineConfig;
use crate::protocol::{ChunkTranscript, EngineAvailability, TranscriptSegment};
use crate::{Result, TranscribeError};

/// Stateful recognizer handle. One recognition call may be outstanding
/// against it at a time; `reset` drops it so the next call starts fresh.
#[derive(Debug, Clone)]
struct RecognizerHandle {
    command: String,
    args: Vec<String>,
    workdir: Option<PathBuf>,
}

pub struct NativeEngine {
    config: NativeEngineConfig,
    handle: Arc<Mutex<Option<RecognizerHandle>>>,
}

impl NativeEngine {
    pub fn new(config: NativeEngineConfig) -> Self {
        Self {
            config,
            handle: Arc::new(Mutex::new(None)),
        }
    }

    /// The on-device backend is the always-available fallback.
    pub fn availability(&self) -> EngineAvailability {
        EngineAvailability::available(format!("on-device recognizer '{}'", self.config.command))
    }

    /// Drop the recognizer handle; it is recreated on the next call.
    pub async fn reset(&self) {
        let mut handle = self.handle.lock().await;
        if handle.take().is_some() {
            debug!("Recognizer handle dropped; will recreate on next use");
        }
    }

    #[cfg(test)]
    pub(crate) async fn has_handle(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    async fn handle(&self) -> RecognizerHandle {
        let mut guard = self.handle.lock().await;
        guard
            .get_or_insert_with(|| {
                debug!("Creating recognizer handle for '{}'", self.config.command);
                RecognizerHandle {
                    command: self.config.command.clone(),
                    args: self.config.args.clone(),
                    workdir: self.config.workdir.clone(),
                }
            })
            .clone()
    }

    /// Run one recognition attempt to its final result. Dropping the
    /// returned future kills the recognizer process.
    pub async fn recognize(&self, audio: &Path) -> Result<ChunkTranscript> {
        let handle = self.handle().await;
        let started = Instant::now();

        let mut cmd = Command::new(&handle.command);
        cmd.args(&handle.args)
            .arg(audio)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = handle.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| TranscribeError::BackendUnavailable {
            reason: format!("failed to spawn recognizer '{}': {}", handle.command, e),
        })?;
        debug!("Recognizer spawned with PID {:?}", child.id());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TranscribeError::BackendUnavailable {
                reason: "recognizer stdout unavailable".to_string(),
            })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TranscribeError::BackendUnavailable {
                reason: "recognizer stderr unavailable".to_string(),
            })?;

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("Recognizer stderr: {}", line);
            }
        });

        let (tx, rx) = oneshot::channel();
        tokio::spawn(read_stdout(stdout, tx));

        match rx.await {
            Ok(doc) => {
                // Final result delivered; the process may still be flushing.
                let _ = child.kill().await;
                let _ = child.wait().await;
                Ok(doc.into_transcript(started.elapsed()))
            }
            Err(_) => {
                // Sender dropped without a final result: the recognizer
                // went away mid-call.
                let status = child
                    .wait()
                    .await
                    .map(|s| s.to_string())
                    .unwrap_or_else(|e| e.to_string());
                Err(TranscribeError::BackendUnavailable {
                    reason: format!("recognizer exited without a final result ({})", status),
                })
            }
        }
    }
}

/// Final document emitted by the recognizer
#[derive(Debug, Deserialize)]
struct FinalDoc {
    text: String,
    #[serde(default)]
    segments: Vec<FinalSegment>,
}

#[derive(Debug, Deserialize)]
struct FinalSegment {
    #[serde(default)]
    speaker: Option<String>,
    start: f64,
    end: f64,
    text: String,
}

impl FinalDoc {
    fn into_transcript(self, processing: std::time::Duration) -> ChunkTranscript {
        let segments = self
            .segments
            .into_iter()
            .map(|s| TranscriptSegment {
                speaker: s.speaker,
                text: s.text,
                start_secs: s.start,
                end_secs: s.end,
            })
            .collect();
        ChunkTranscript::new(self.text, segments, processing)
    }
}

enum RecognizerLine {
    Partial(String),
    Transient(String),
    Final(FinalDoc),
    Noise(String),
}

fn parse_line(line: &str) -> RecognizerLine {
    if let Some(text) = line.strip_prefix("partial ") {
        return RecognizerLine::Partial(text.to_string());
    }
    if let Some(message) = line.strip_prefix("transient ") {
        return RecognizerLine::Transient(message.to_string());
    }
    match serde_json::from_str::<FinalDoc>(line) {
        Ok(doc) => RecognizerLine::Final(doc),
        Err(_) => RecognizerLine::Noise(line.to_string()),
    }
}

/// Read recognizer stdout until EOF, delivering at most one final result.
/// The sender lives in an `Option` so a duplicate final line cannot fire
/// the channel twice.
async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    tx: oneshot::Sender<FinalDoc>,
) {
    let mut tx = Some(tx);
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        match parse_line(&line) {
            RecognizerLine::Partial(text) => {
                debug!("Partial hypothesis filtered: {}", text);
            }
            RecognizerLine::Transient(message) => {
                // Recoverable hiccup: keep waiting on the same call.
                warn!("Transient recognizer error suppressed: {}", message);
            }
            RecognizerLine::Final(doc) => match tx.take() {
                Some(tx) => {
                    let _ = tx.send(doc);
                }
                None => warn!("Duplicate final result ignored"),
            },
            RecognizerLine::Noise(line) => {
                debug!("Unrecognized recognizer output: {}", line);
            }
        }
    }
}
