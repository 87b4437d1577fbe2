use std::sync::Mutex;

use crate::event::LifecycleEvent;

/// Sink for pipeline progress events.
///
/// Reporting is a convenience, not a correctness dependency: every
/// implementation must be non-blocking from the pipeline's point of view
/// and must never surface a delivery failure to the job.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &LifecycleEvent);
}

/// Fire-and-forget HTTP POST of lifecycle events to the configured
/// event-ingestion URL. Failures are logged and never retried — a retry
/// could reorder or duplicate events beyond what observers already
/// tolerate, for no gain.
pub struct WebhookEmitter {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl WebhookEmitter {
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Emitter that drops every event (no endpoint configured).
    pub fn disabled() -> Self {
        Self::new(None)
    }
}

impl ProgressReporter for WebhookEmitter {
    fn report(&self, event: &LifecycleEvent) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };
        let client = self.client.clone();
        let event = event.clone();

        tokio::spawn(async move {
            let result = client.post(&endpoint).json(&event).send().await;
            match result {
                Ok(resp) => {
                    if let Err(e) = resp.error_for_status() {
                        tracing::warn!(error = %e, "Event webhook rejected");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, endpoint = %endpoint, "Event webhook delivery failed");
                }
            }
        });
    }
}

/// Test reporter that records events in arrival order.
pub struct RecordingReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl Default for RecordingReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingReporter {
    fn report(&self, event: &LifecycleEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
