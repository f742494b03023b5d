use crate::service::JobService;
use std::time::{Duration, Instant};

/// Shared state behind every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The boundary operations.
    pub service: JobService,
    /// Idle interval between SSE keepalive comments.
    pub keepalive: Duration,
    /// Process start, for the health endpoint.
    pub started_at: Instant,
}

impl AppState {
    /// Creates state with the default one-second keepalive.
    #[must_use]
    pub fn new(service: JobService) -> Self {
        Self {
            service,
            keepalive: Duration::from_secs(1),
            started_at: Instant::now(),
        }
    }

    /// Sets the SSE keepalive interval.
    #[must_use]
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }
}
