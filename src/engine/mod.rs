//! Recognition backends behind a closed dispatch enum.
//!
//! Backend tags are a closed set validated at configuration-load time;
//! requests never reach an unknown backend name.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::protocol::{ChunkTranscript, EngineAvailability, JobPoll};
use crate::{Result, TranscribeError};

pub mod native;
pub mod remote;
pub mod router;

pub use native::NativeEngine;
pub use remote::RemoteEngine;

/// Tag for one supported backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// On-device recognizer; always available
    Native,
    /// Remote HTTP service that accepts jobs and completes them later
    Remote,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Native, EngineKind::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Native => "native",
            EngineKind::Remote => "remote",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = TranscribeError;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "native" | "on-device" | "local" => Ok(EngineKind::Native),
            "remote" | "cloud" => Ok(EngineKind::Remote),
            other => Err(TranscribeError::NotConfigured {
                reason: format!(
                    "unknown engine '{}' (supported: native, remote)",
                    other
                ),
            }),
        }
    }
}

/// One recognition backend. Dispatch is a closed enum rather than trait
/// objects so the supported set is checkable at configuration load.
pub enum Engine {
    Native(NativeEngine),
    Remote(RemoteEngine),
    #[cfg(test)]
    Scripted(testing::ScriptedEngine),
}

impl Engine {
    pub fn kind(&self) -> EngineKind {
        match self {
            Engine::Native(_) => EngineKind::Native,
            Engine::Remote(_) => EngineKind::Remote,
            #[cfg(test)]
            Engine::Scripted(engine) => engine.kind(),
        }
    }

    /// Whether this backend returns a job handle instead of a result
    pub fn is_async(&self) -> bool {
        matches!(self.kind(), EngineKind::Remote)
    }

    /// Current availability; recomputed on every call, never cached
    pub async fn availability(&self) -> EngineAvailability {
        match self {
            Engine::Native(engine) => engine.availability(),
            Engine::Remote(engine) => engine.availability(),
            #[cfg(test)]
            Engine::Scripted(engine) => engine.availability(),
        }
    }

    /// Run one synchronous recognition attempt on a standalone artifact
    pub async fn recognize(&self, audio: &Path) -> Result<ChunkTranscript> {
        match self {
            Engine::Native(engine) => engine.recognize(audio).await,
            Engine::Remote(_) => Err(TranscribeError::BackendUnavailable {
                reason: "remote backend is asynchronous; submit a job instead".to_string(),
            }),
            #[cfg(test)]
            Engine::Scripted(engine) => engine.recognize(audio).await,
        }
    }

    /// Hand the whole recording to an asynchronous backend; returns the
    /// backend-assigned job identifier
    pub async fn submit(&self, audio: &Path, display_name: &str) -> Result<String> {
        match self {
            Engine::Native(_) => Err(TranscribeError::AsyncBackendFailed {
                reason: "on-device backend does not accept jobs".to_string(),
            }),
            Engine::Remote(engine) => engine.submit(audio, display_name).await,
            #[cfg(test)]
            Engine::Scripted(engine) => engine.submit(audio, display_name).await,
        }
    }

    /// Ask an asynchronous backend about one outstanding job
    pub async fn poll(&self, job_id: &str) -> Result<JobPoll> {
        match self {
            Engine::Native(_) => Err(TranscribeError::AsyncBackendFailed {
                reason: "on-device backend has no jobs to poll".to_string(),
            }),
            Engine::Remote(engine) => engine.poll(job_id).await,
            #[cfg(test)]
            Engine::Scripted(engine) => engine.poll(job_id).await,
        }
    }

    /// Drop any stateful recognizer handle so the next request starts fresh
    pub async fn reset(&self) {
        match self {
            Engine::Native(engine) => engine.reset().await,
            Engine::Remote(_) => {}
            #[cfg(test)]
            Engine::Scripted(engine) => engine.reset(),
        }
    }
}
