//! Request lifecycle: probe, route, chunk, recognize, aggregate.
//!
//! One request is in flight at a time. A second call while busy fails fast
//! with `AlreadyInProgress` rather than queueing. Cancellation is
//! cooperative: the in-flight recognition future is dropped, which kills
//! the recognizer process, and the request resolves to a cancelled result.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::TranscriberConfig;
use crate::engine::{router::EngineRouter, Engine, EngineKind};
use crate::protocol::{ChunkTranscript, TranscriptionRequest, TranscriptionResult};
use crate::tracker::JobTracker;
use crate::{aggregate, executor, media, planner, Result, TranscribeError};

/// Observable phase of the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    /// Probing the source and planning chunks
    Preparing,
    /// Working through the chunk plan
    Transcribing { chunk: usize, total: usize },
    /// Handed to the asynchronous backend; completion arrives via job events
    AwaitingRemote,
}

pub struct Orchestrator {
    config: TranscriberConfig,
    router: EngineRouter,
    tracker: JobTracker,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    cancel_notify: Arc<Notify>,
    state: Arc<StdMutex<RequestState>>,
}

/// Releases the single-request slot when the request ends, whatever way
/// it ends.
struct BusySlot {
    busy: Arc<AtomicBool>,
    state: Arc<StdMutex<RequestState>>,
}

impl Drop for BusySlot {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            *state = RequestState::Idle;
        }
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    pub fn new(config: TranscriberConfig, router: EngineRouter, tracker: JobTracker) -> Self {
        Self {
            config,
            router,
            tracker,
            busy: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            cancel_notify: Arc::new(Notify::new()),
            state: Arc::new(StdMutex::new(RequestState::Idle)),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(RequestState::Idle)
    }

    /// The tracker handling asynchronous jobs; subscribe here for
    /// completion events and call `resume` on startup.
    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Cancel the in-flight request, if any. The request resolves to a
    /// cancelled result; any running recognizer process is killed.
    pub fn cancel(&self) {
        if self.busy.load(Ordering::SeqCst) {
            info!("Cancelling in-flight transcription");
            self.cancel.store(true, Ordering::SeqCst);
            self.cancel_notify.notify_waiters();
        }
    }

    /// Transcribe one recording. `preferred` overrides the configured
    /// backend preference for this request only.
    ///
    /// The whole request races a hard ceiling; blowing it resolves to
    /// `Timeout` and releases the slot.
    pub async fn transcribe(
        &self,
        source: &Path,
        preferred: Option<EngineKind>,
    ) -> Result<TranscriptionResult> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(TranscribeError::AlreadyInProgress);
        }
        let slot = BusySlot {
            busy: Arc::clone(&self.busy),
            state: Arc::clone(&self.state),
        };
        self.cancel.store(false, Ordering::SeqCst);

        let ceiling = self.config.request_ceiling();
        let result = match tokio::time::timeout(ceiling, self.run(source, preferred)).await {
            Err(_) => {
                warn!("Request blew its {:?} ceiling", ceiling);
                Err(TranscribeError::Timeout { after: ceiling })
            }
            Ok(result) => result,
        };

        drop(slot);
        result
    }

    async fn run(
        &self,
        source: &Path,
        preferred: Option<EngineKind>,
    ) -> Result<TranscriptionResult> {
        self.set_state(RequestState::Preparing);

        let duration_secs = media::probe_duration(source)?;
        let request = TranscriptionRequest::new(source.to_path_buf(), duration_secs, preferred);
        info!(
            "Transcribing '{}' ({:.1}s, request {})",
            request.display_name, request.duration_secs, request.id
        );

        let engine = self
            .router
            .route(request.preferred, self.config.preferred(), &self.tracker)
            .await;

        if engine.is_async() {
            self.set_state(RequestState::AwaitingRemote);
            let job = self.tracker.submit(&request.source, &request.display_name).await?;
            return Ok(TranscriptionResult::accepted(job.job_id));
        }

        if !planner::needs_chunking(request.duration_secs, &self.config) {
            self.set_state(RequestState::Transcribing { chunk: 1, total: 1 });
            let transcript = tokio::select! {
                result = executor::execute(
                    &engine,
                    &request.source,
                    self.config.whole_file_deadline(),
                ) => result?,
                _ = self.wait_cancelled() => return self.cancelled_result(&engine).await,
            };
            return Ok(TranscriptionResult::from_chunk(transcript));
        }

        self.run_chunked(&request, &engine).await
    }

    async fn run_chunked(
        &self,
        request: &TranscriptionRequest,
        engine: &Arc<Engine>,
    ) -> Result<TranscriptionResult> {
        let plan = planner::plan(request.duration_secs, &self.config)?;
        let total = plan.len();
        info!("'{}' split into {} chunks", request.display_name, total);

        let mut chunks: Vec<(f64, ChunkTranscript)> = Vec::with_capacity(total);
        let mut spoke = false;

        for (index, window) in plan.windows().iter().enumerate() {
            if self.cancelled() {
                return self.cancelled_result(engine).await;
            }
            self.set_state(RequestState::Transcribing {
                chunk: index + 1,
                total,
            });

            let segment = media::extract_segment(
                &request.source,
                *window,
                self.config.chunk_export_deadline(),
            )
            .await
            .map_err(|e| chunk_failed(index, e))?;

            let outcome = tokio::select! {
                result = executor::execute(
                    engine,
                    segment.path(),
                    self.config.chunk_recognition_deadline(),
                ) => result,
                _ = self.wait_cancelled() => return self.cancelled_result(engine).await,
            };

            match outcome {
                Ok(transcript) => {
                    spoke = true;
                    chunks.push((segment.offset_secs, transcript));
                }
                // A silent chunk is normal in a long recording; it
                // contributes nothing but does not abort the request.
                Err(TranscribeError::NoSpeechDetected) => {
                    debug!("Chunk {}/{} had no speech", index + 1, total);
                    chunks.push((segment.offset_secs, ChunkTranscript::default()));
                }
                Err(e) => {
                    warn!("Chunk {}/{} failed: {}", index + 1, total, e);
                    engine.reset().await;
                    return Err(chunk_failed(index, e));
                }
            }

            let last = index + 1 == total;
            if !last && !self.config.cooldown().is_zero() {
                tokio::select! {
                    _ = sleep(self.config.cooldown()) => {}
                    _ = self.wait_cancelled() => return self.cancelled_result(engine).await,
                }
            }
        }

        if !spoke {
            return Err(TranscribeError::NoSpeechDetected);
        }
        Ok(aggregate::merge(chunks))
    }

    /// Resolve a cancelled request, leaving the backend ready for a fresh
    /// one: any stateful recognizer handle is dropped and recreated on the
    /// next use.
    async fn cancelled_result(&self, engine: &Arc<Engine>) -> Result<TranscriptionResult> {
        engine.reset().await;
        Ok(TranscriptionResult::cancelled())
    }

    fn set_state(&self, next: RequestState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn wait_cancelled(&self) {
        loop {
            // Register interest before checking the flag so a cancel
            // landing in between is not lost.
            let notified = self.cancel_notify.notified();
            if self.cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn chunk_failed(index: usize, source: TranscribeError) -> TranscribeError {
    match source {
        // Cancellation and slot errors pass through untouched.
        e @ TranscribeError::AlreadyInProgress => e,
        e => TranscribeError::ChunkFailed {
            index,
            source: Box::new(e),
        },
    }
}
