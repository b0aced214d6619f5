//! Remote transcription backend (OpenAI-style HTTP API).
//!
//! The remote service accepts the whole recording up front and completes
//! it later: `submit` uploads the audio and returns a job identifier, and
//! `poll` asks for that job's status until it is terminal. Transport
//! errors surface as `AsyncBackendFailed`; the job tracker treats poll
//! transport errors as transient.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::config::RemoteEngineConfig;
use crate::protocol::{ChunkTranscript, EngineAvailability, JobPoll, TranscriptSegment};
use crate::{Result, TranscribeError};

pub struct RemoteEngine {
    config: RemoteEngineConfig,
    client: reqwest::Client,
}

impl RemoteEngine {
    pub fn new(config: RemoteEngineConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Availability is derived from configuration on every call.
    pub fn availability(&self) -> EngineAvailability {
        if self.config.base_url.trim().is_empty() {
            return EngineAvailability::unavailable("no server URL configured");
        }
        EngineAvailability::available(format!("remote server {}", self.config.base_url))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => req.bearer_auth(key.trim()),
            _ => req,
        }
    }

    /// Upload the whole recording; the service answers with a job id.
    pub async fn submit(&self, audio: &Path, display_name: &str) -> Result<String> {
        let bytes = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|e| TranscribeError::AsyncBackendFailed {
                reason: e.to_string(),
            })?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("display_name", display_name.to_string());

        let response = self
            .authorize(self.client.post(self.url("/v1/jobs")).multipart(form))
            .send()
            .await
            .map_err(|e| TranscribeError::AsyncBackendFailed {
                reason: format!("submit failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::AsyncBackendFailed {
                reason: format!("submit rejected ({}): {}", status, body),
            });
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| TranscribeError::AsyncBackendFailed {
                    reason: format!("submit response: {}", e),
                })?;
        let job_id = json
            .get("job_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| TranscribeError::AsyncBackendFailed {
                reason: "submit response missing job_id".to_string(),
            })?
            .to_string();

        debug!("Remote backend accepted job {}", job_id);
        Ok(job_id)
    }

    /// Ask the service about one job.
    pub async fn poll(&self, job_id: &str) -> Result<JobPoll> {
        let response = self
            .authorize(self.client.get(self.url(&format!("/v1/jobs/{}", job_id))))
            .send()
            .await
            .map_err(|e| TranscribeError::AsyncBackendFailed {
                reason: format!("status check failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::AsyncBackendFailed {
                reason: format!("status check rejected ({}): {}", status, body),
            });
        }

        let doc: StatusDoc =
            response
                .json()
                .await
                .map_err(|e| TranscribeError::AsyncBackendFailed {
                    reason: format!("status response: {}", e),
                })?;
        doc.into_poll()
    }
}

/// Status document returned by `GET /v1/jobs/{id}`
#[derive(Debug, Deserialize)]
struct StatusDoc {
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    segments: Vec<WireSegment>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    processing_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WireSegment {
    #[serde(default)]
    speaker: Option<String>,
    start: f64,
    end: f64,
    text: String,
}

impl StatusDoc {
    fn into_poll(self) -> Result<JobPoll> {
        match self.status.as_str() {
            "completed" => {
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
                Ok(JobPoll::Completed(ChunkTranscript::new(
                    self.text.unwrap_or_default(),
                    segments,
                    Duration::from_millis(self.processing_ms.unwrap_or(0)),
                )))
            }
            "failed" => Ok(JobPoll::Failed(
                self.error.unwrap_or_else(|| "unknown failure".to_string()),
            )),
            "pending" | "running" | "queued" => Ok(JobPoll::Pending),
            other => Err(TranscribeError::AsyncBackendFailed {
                reason: format!("unknown job status '{}'", other),
            }),
        }
    }
}
