//! Backend selection with fallback to the on-device recognizer.
//!
//! Routing never fails a request: when the requested backend cannot take
//! work, the router logs why and falls back to the on-device backend.
//! Availability is asked fresh on every request, so a backend that was
//! unreachable a minute ago gets another chance now.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineKind};
use crate::tracker::JobTracker;

pub struct EngineRouter {
    native: Arc<Engine>,
    remote: Option<Arc<Engine>>,
    // Backend the previous request was routed to
    last: Mutex<Option<EngineKind>>,
}

impl EngineRouter {
    pub fn new(native: Arc<Engine>, remote: Option<Arc<Engine>>) -> Self {
        Self {
            native,
            remote,
            last: Mutex::new(None),
        }
    }

    /// The fallback backend, used directly for per-chunk recognition.
    pub fn native(&self) -> &Arc<Engine> {
        &self.native
    }

    /// Pick the backend for one request. `requested` overrides the
    /// configured preference; `None` means take the preference as-is.
    ///
    /// Switching away from the asynchronous backend stops its polling and
    /// drops its job bookkeeping, so a later switch back starts clean.
    pub async fn route(
        &self,
        requested: Option<EngineKind>,
        preferred: Option<EngineKind>,
        tracker: &JobTracker,
    ) -> Arc<Engine> {
        let wanted = requested.or(preferred).unwrap_or(EngineKind::Native);
        let chosen = self.select(wanted).await;

        let mut last = self.last.lock().await;
        if *last == Some(EngineKind::Remote) && chosen.kind() != EngineKind::Remote {
            info!("Left the remote backend; stopping job polling");
            tracker.stop().await;
            if let Err(e) = tracker.clear().await {
                warn!("Failed to clear job bookkeeping: {}", e);
            }
        }
        *last = Some(chosen.kind());

        chosen
    }

    async fn select(&self, wanted: EngineKind) -> Arc<Engine> {
        let candidate = match wanted {
            EngineKind::Native => &self.native,
            EngineKind::Remote => match self.remote.as_ref() {
                Some(remote) => remote,
                None => {
                    warn!("Remote backend not configured; falling back to on-device");
                    return Arc::clone(&self.native);
                }
            },
        };

        let availability = candidate.availability().await;
        if availability.available {
            debug!("Routing to {} backend ({})", wanted, availability.reason);
            return Arc::clone(candidate);
        }

        if wanted == EngineKind::Native {
            // Nothing further to fall back to; the attempt itself will
            // report the failure.
            warn!(
                "On-device backend reports unavailable ({}); using it anyway",
                availability.reason
            );
            return Arc::clone(&self.native);
        }

        warn!(
            "{} backend unavailable ({}); falling back to on-device",
            wanted, availability.reason
        );
        Arc::clone(&self.native)
    }
}
