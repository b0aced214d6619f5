//! Tracking of asynchronous remote jobs across process restarts.
//!
//! A job accepted by the remote backend is persisted to a sled store before
//! control returns to the caller, then polled on a fixed interval until it
//! completes, fails, or outstays the wait ceiling. Completions are emitted
//! on a broadcast channel together with the original request context.

use anyhow::Context;
use sled::{Db, Tree};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::TranscriberConfig;
use crate::engine::Engine;
use crate::protocol::{JobPoll, TranscriptionJob, TranscriptionResult};
use crate::{Result, TranscribeError};

/// Durable store for pending jobs, keyed by the backend's job identifier.
#[derive(Clone)]
pub struct JobStore {
    db: Db,
    tree: Tree,
}

impl JobStore {
    /// Open (or create) a job store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(&path)
            .with_context(|| format!("open job store at {}", path.as_ref().display()))
            .map_err(TranscribeError::Store)?;
        let tree = db
            .open_tree("jobs")
            .context("open jobs tree")
            .map_err(TranscribeError::Store)?;
        info!("Opened job store at {}", path.as_ref().display());
        Ok(Self { db, tree })
    }

    /// In-memory store, useful for tests.
    pub fn temp() -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .context("create temporary job store")
            .map_err(TranscribeError::Store)?;
        let tree = db
            .open_tree("jobs")
            .context("open jobs tree")
            .map_err(TranscribeError::Store)?;
        Ok(Self { db, tree })
    }

    /// Insert or update one job record.
    pub fn insert(&self, job: &TranscriptionJob) -> Result<()> {
        let bytes = job
            .to_bytes()
            .context("serialize job")
            .map_err(TranscribeError::Store)?;
        self.tree
            .insert(job.job_id.as_bytes(), bytes)
            .with_context(|| format!("persist job {}", job.job_id))
            .map_err(TranscribeError::Store)?;
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<Option<TranscriptionJob>> {
        let value = self
            .tree
            .get(job_id.as_bytes())
            .with_context(|| format!("read job {}", job_id))
            .map_err(TranscribeError::Store)?;
        match value {
            Some(bytes) => {
                let job = TranscriptionJob::from_bytes(&bytes)
                    .context("deserialize job")
                    .map_err(TranscribeError::Store)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    pub fn remove(&self, job_id: &str) -> Result<bool> {
        let removed = self
            .tree
            .remove(job_id.as_bytes())
            .with_context(|| format!("remove job {}", job_id))
            .map_err(TranscribeError::Store)?;
        Ok(removed.is_some())
    }

    /// All persisted jobs, in key order.
    pub fn all(&self) -> Result<Vec<TranscriptionJob>> {
        let mut jobs = Vec::new();
        for entry in self.tree.iter() {
            let (_, bytes) = entry
                .context("iterate job store")
                .map_err(TranscribeError::Store)?;
            let job = TranscriptionJob::from_bytes(&bytes)
                .context("deserialize job")
                .map_err(TranscribeError::Store)?;
            jobs.push(job);
        }
        Ok(jobs)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&self) -> Result<()> {
        self.tree
            .clear()
            .context("clear job store")
            .map_err(TranscribeError::Store)
    }

    /// Flush pending writes so the record survives a crash.
    pub async fn flush(&self) -> Result<()> {
        self.db
            .flush_async()
            .await
            .context("flush job store")
            .map_err(TranscribeError::Store)?;
        Ok(())
    }
}

/// Notification emitted when a tracked job reaches a terminal state.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The backend finished; carries the original request context.
    Completed {
        job: TranscriptionJob,
        result: TranscriptionResult,
    },
    /// The backend gave up on the job. No result; the failure is logged.
    Failed { job: TranscriptionJob, reason: String },
    /// The job outstayed the wait ceiling and was abandoned.
    TimedOut { job: TranscriptionJob },
}

/// Owns the pending-job set and the background polling task.
pub struct JobTracker {
    engine: Arc<Engine>,
    store: JobStore,
    events: broadcast::Sender<JobEvent>,
    poll_interval: Duration,
    max_wait_secs: i64,
    running: Arc<AtomicBool>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    // One poll cycle at a time, shared between the timer and manual checks
    cycle: Arc<Mutex<()>>,
}

impl JobTracker {
    pub fn new(engine: Arc<Engine>, store: JobStore, config: &TranscriberConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            engine,
            store,
            events,
            poll_interval: config.poll_interval().max(Duration::from_millis(100)),
            max_wait_secs: config.job_max_wait_secs as i64,
            running: Arc::new(AtomicBool::new(false)),
            poll_task: Mutex::new(None),
            cycle: Arc::new(Mutex::new(())),
        }
    }

    /// Subscribe to terminal-state notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Jobs currently outstanding.
    pub fn pending(&self) -> Result<Vec<TranscriptionJob>> {
        self.store.all()
    }

    pub fn is_polling(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Submit the whole recording to the asynchronous backend. The job is
    /// durable before this returns, so it survives a process restart.
    pub async fn submit(&self, source: &Path, display_name: &str) -> Result<TranscriptionJob> {
        let job_id = self.engine.submit(source, display_name).await?;
        let job = TranscriptionJob::new(job_id, source.to_path_buf(), display_name.to_string());

        self.store.insert(&job)?;
        self.store.flush().await?;
        info!(
            "Job {} submitted for '{}'; {} pending",
            job.job_id,
            job.display_name,
            self.store.len()
        );

        self.ensure_polling().await;
        Ok(job)
    }

    /// Resume polling for jobs persisted by a previous run.
    pub async fn resume(&self) {
        match self.store.len() {
            0 => debug!("No persisted jobs to resume"),
            n => {
                info!("Resuming polling for {} persisted job(s)", n);
                self.ensure_polling().await;
            }
        }
    }

    /// Poll immediately instead of waiting for the next timer tick.
    pub async fn check_for_completed_jobs(&self) -> Result<()> {
        run_cycle(
            &self.engine,
            &self.store,
            &self.events,
            self.max_wait_secs,
            &self.cycle,
        )
        .await
    }

    /// Update a renamed/relocated source in place; never duplicates a job.
    pub async fn rename_source(
        &self,
        job_id: &str,
        new_source: &Path,
        new_display_name: &str,
    ) -> Result<bool> {
        match self.store.get(job_id)? {
            Some(mut job) => {
                job.source = new_source.to_path_buf();
                job.display_name = new_display_name.to_string();
                self.store.insert(&job)?;
                self.store.flush().await?;
                debug!("Job {} source updated to {}", job_id, new_source.display());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Stop the background polling task.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
            // Wait for the task to wind down so its store clone is gone
            // before the caller clears or reopens the store.
            let _ = handle.await;
            debug!("Job polling task stopped");
        }
    }

    /// Drop all job bookkeeping (used when routing switches away from the
    /// asynchronous backend).
    pub async fn clear(&self) -> Result<()> {
        self.store.clear()?;
        self.store.flush().await
    }

    async fn ensure_polling(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = Arc::clone(&self.engine);
        let store = self.store.clone();
        let events = self.events.clone();
        let running = Arc::clone(&self.running);
        let cycle = Arc::clone(&self.cycle);
        let poll_interval = self.poll_interval;
        let max_wait_secs = self.max_wait_secs;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            // The first tick fires immediately; a just-submitted job cannot
            // be ready yet, so consume it.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = run_cycle(&engine, &store, &events, max_wait_secs, &cycle).await {
                    warn!("Poll cycle failed: {}", e);
                }

                if store.is_empty() {
                    running.store(false, Ordering::SeqCst);
                    // A submit landing between the emptiness check and the
                    // store above finds the slot still taken and spawns
                    // nothing; reclaim the slot if work arrived.
                    if !store.is_empty() && !running.swap(true, Ordering::SeqCst) {
                        continue;
                    }
                    break;
                }
            }
            debug!("Job polling loop ended");
        });

        *self.poll_task.lock().await = Some(handle);
        info!("Job polling started (every {:?})", self.poll_interval);
    }
}

/// One poll cycle over every outstanding job.
async fn run_cycle(
    engine: &Engine,
    store: &JobStore,
    events: &broadcast::Sender<JobEvent>,
    max_wait_secs: i64,
    cycle: &Mutex<()>,
) -> Result<()> {
    let _guard = cycle.lock().await;

    for job in store.all()? {
        if job.age().num_seconds() > max_wait_secs {
            store.remove(&job.job_id)?;
            warn!(
                "Job {} abandoned after {}s outstanding",
                job.job_id,
                job.age().num_seconds()
            );
            let _ = events.send(JobEvent::TimedOut { job });
            continue;
        }

        match engine.poll(&job.job_id).await {
            Ok(JobPoll::Completed(transcript)) => {
                store.remove(&job.job_id)?;
                info!("Job {} completed ('{}')", job.job_id, job.display_name);
                let result = TranscriptionResult::from_chunk(transcript);
                let _ = events.send(JobEvent::Completed { job, result });
            }
            Ok(JobPoll::Failed(reason)) => {
                store.remove(&job.job_id)?;
                error!("Job {} failed: {}", job.job_id, reason);
                let _ = events.send(JobEvent::Failed { job, reason });
            }
            Ok(JobPoll::Pending) => {
                debug!("Job {} still pending", job.job_id);
            }
            Err(e) => {
                // Transient transport problem: keep the job and retry on
                // the next cycle.
                warn!("Status check for job {} failed: {}", job.job_id, e);
            }
        }
    }

    store.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::ScriptedEngine;
    use crate::engine::EngineKind;
    use crate::protocol::ChunkTranscript;
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::sync::broadcast::error::TryRecvError;

    fn remote() -> (ScriptedEngine, Arc<Engine>) {
        let scripted = ScriptedEngine::new(EngineKind::Remote);
        let engine = Arc::new(Engine::Scripted(scripted.clone()));
        (scripted, engine)
    }

    fn tracker(engine: Arc<Engine>, store: JobStore) -> JobTracker {
        JobTracker::new(engine, store, &TranscriberConfig::default())
    }

    fn transcript(text: &str) -> ChunkTranscript {
        ChunkTranscript::new(text.to_string(), Vec::new(), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_submit_persists_before_returning() {
        let (_, engine) = remote();
        let tracker = tracker(engine, JobStore::temp().unwrap());

        let job = tracker
            .submit(Path::new("/tmp/talk.wav"), "talk.wav")
            .await
            .unwrap();

        assert_eq!(tracker.pending().unwrap(), vec![job]);
        assert!(tracker.is_polling());
        tracker.stop().await;
    }

    #[tokio::test]
    async fn test_completed_job_emits_exactly_one_notification() {
        let (scripted, engine) = remote();
        scripted.push_poll(Ok(JobPoll::Pending));
        scripted.push_poll(Ok(JobPoll::Completed(transcript("all done"))));
        // Anything after completion would be a duplicate.
        scripted.push_poll(Ok(JobPoll::Completed(transcript("again"))));

        let tracker = tracker(engine, JobStore::temp().unwrap());
        let mut events = tracker.subscribe();
        tracker
            .submit(Path::new("/tmp/talk.wav"), "talk.wav")
            .await
            .unwrap();
        tracker.stop().await;

        // First cycle: still pending.
        tracker.check_for_completed_jobs().await.unwrap();
        assert_eq!(tracker.pending().unwrap().len(), 1);
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));

        // Second cycle: completed, removed, notified once.
        tracker.check_for_completed_jobs().await.unwrap();
        assert!(tracker.pending().unwrap().is_empty());
        match events.try_recv().unwrap() {
            JobEvent::Completed { job, result } => {
                assert_eq!(job.display_name, "talk.wav");
                assert_eq!(result.text, "all done");
            }
            other => panic!("expected completion, got {:?}", other),
        }

        // Further cycles have nothing to report.
        tracker.check_for_completed_jobs().await.unwrap();
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_job_survives_restart() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("jobs");

        // First process: submit and stop without completing.
        {
            let (_, engine) = remote();
            let tracker = tracker(engine, JobStore::open(&db_path).unwrap());
            tracker
                .submit(Path::new("/tmp/talk.wav"), "talk.wav")
                .await
                .unwrap();
            tracker.stop().await;
        }

        // Second process: the job is still there and completes.
        let (scripted, engine) = remote();
        scripted.push_poll(Ok(JobPoll::Completed(transcript("recovered"))));
        let tracker = tracker(engine, JobStore::open(&db_path).unwrap());
        assert_eq!(tracker.pending().unwrap().len(), 1);

        let mut events = tracker.subscribe();
        tracker.resume().await;
        tracker.check_for_completed_jobs().await.unwrap();
        tracker.stop().await;

        assert!(tracker.pending().unwrap().is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            JobEvent::Completed { result, .. } if result.text == "recovered"
        ));
    }

    #[tokio::test]
    async fn test_transient_poll_error_keeps_the_job() {
        let (scripted, engine) = remote();
        scripted.push_poll(Err(TranscribeError::AsyncBackendFailed {
            reason: "network blip".to_string(),
        }));

        let tracker = tracker(engine, JobStore::temp().unwrap());
        tracker
            .submit(Path::new("/tmp/talk.wav"), "talk.wav")
            .await
            .unwrap();
        tracker.stop().await;

        tracker.check_for_completed_jobs().await.unwrap();
        assert_eq!(tracker.pending().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_job_is_removed_without_result() {
        let (scripted, engine) = remote();
        scripted.push_poll(Ok(JobPoll::Failed("corrupt upload".to_string())));

        let tracker = tracker(engine, JobStore::temp().unwrap());
        let mut events = tracker.subscribe();
        tracker
            .submit(Path::new("/tmp/talk.wav"), "talk.wav")
            .await
            .unwrap();
        tracker.stop().await;

        tracker.check_for_completed_jobs().await.unwrap();
        assert!(tracker.pending().unwrap().is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            JobEvent::Failed { reason, .. } if reason == "corrupt upload"
        ));
    }

    #[tokio::test]
    async fn test_overdue_job_is_abandoned() {
        let (_, engine) = remote();
        let store = JobStore::temp().unwrap();

        let mut job = TranscriptionJob::new(
            "job-old".to_string(),
            PathBuf::from("/tmp/old.wav"),
            "old.wav".to_string(),
        );
        job.submitted_at = Utc::now() - chrono::Duration::hours(3);
        store.insert(&job).unwrap();

        let tracker = tracker(engine, store);
        let mut events = tracker.subscribe();
        tracker.check_for_completed_jobs().await.unwrap();

        assert!(tracker.pending().unwrap().is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            JobEvent::TimedOut { job } if job.job_id == "job-old"
        ));
    }

    #[tokio::test]
    async fn test_rename_updates_in_place() {
        let (_, engine) = remote();
        let tracker = tracker(engine, JobStore::temp().unwrap());
        let job = tracker
            .submit(Path::new("/tmp/talk.wav"), "talk.wav")
            .await
            .unwrap();
        tracker.stop().await;

        let renamed = tracker
            .rename_source(&job.job_id, Path::new("/tmp/renamed.wav"), "renamed.wav")
            .await
            .unwrap();
        assert!(renamed);

        let pending = tracker.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].display_name, "renamed.wav");
        assert_eq!(pending[0].source, PathBuf::from("/tmp/renamed.wav"));

        assert!(!tracker
            .rename_source("no-such-job", Path::new("/x.wav"), "x.wav")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_stop_releases_the_store() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("jobs");

        let (_, engine) = remote();
        let tracker = tracker(engine, JobStore::open(&db_path).unwrap());
        tracker
            .submit(Path::new("/tmp/talk.wav"), "talk.wav")
            .await
            .unwrap();
        tracker.stop().await;
        drop(tracker);

        // The sled lock must be free as soon as the tracker is gone; a
        // lingering polling task would still hold a store clone.
        let reopened = JobStore::open(&db_path).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_restarts_for_a_new_submission() {
        let (scripted, engine) = remote();
        scripted.push_poll(Ok(JobPoll::Completed(transcript("first"))));
        scripted.push_poll(Ok(JobPoll::Completed(transcript("second"))));

        let tracker = tracker(engine, JobStore::temp().unwrap());
        let mut events = tracker.subscribe();

        tracker
            .submit(Path::new("/tmp/a.wav"), "a.wav")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!tracker.is_polling());

        // The loop stopped itself; a fresh submit must start it again.
        tracker
            .submit(Path::new("/tmp/b.wav"), "b.wav")
            .await
            .unwrap();
        assert!(tracker.is_polling());

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!tracker.is_polling());
        assert!(tracker.pending().unwrap().is_empty());
        assert!(matches!(
            events.try_recv().unwrap(),
            JobEvent::Completed { result, .. } if result.text == "first"
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            JobEvent::Completed { result, .. } if result.text == "second"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_when_no_jobs_remain() {
        let (scripted, engine) = remote();
        scripted.push_poll(Ok(JobPoll::Completed(transcript("done"))));

        let tracker = tracker(engine, JobStore::temp().unwrap());
        tracker
            .submit(Path::new("/tmp/talk.wav"), "talk.wav")
            .await
            .unwrap();
        assert!(tracker.is_polling());

        // Default interval is 30s; paused time auto-advances through it.
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!tracker.is_polling());
        assert!(tracker.pending().unwrap().is_empty());
    }
}
