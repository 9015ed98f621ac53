//! Deadline and cancellation tracking for pending JSON-RPC requests.
//!
//! Every in-flight request gets a [`PendingRequest`] entry with two
//! deadlines: a sliding idle window (reset by progress notifications when
//! enabled) and a hard ceiling measured from the start time that no amount
//! of progress can extend. A request is expired iff it was cancelled, the
//! ceiling passed, or the idle window elapsed since the last progress.
//!
//! Each entry carries a [`CancellationToken`]; cancelling or expiring the
//! request fires the token so whatever is executing on its behalf can be
//! preempted mid-await.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::model::RequestId;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAXIMUM_TIMEOUT: Duration = Duration::from_secs(300);
/// Idle time each progress notification buys, clamped to this range.
pub const MIN_PROGRESS_RESET_WINDOW: Duration = Duration::from_secs(5);
pub const MAX_PROGRESS_RESET_WINDOW: Duration = Duration::from_secs(60);
/// How long cancelled entries are retained for duplicate detection.
const CANCELLED_RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub default_timeout: Duration,
    pub maximum_timeout: Duration,
    /// The idle window applied after a progress reset.
    pub progress_reset_window: Duration,
    pub enable_progress_reset: bool,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            maximum_timeout: DEFAULT_MAXIMUM_TIMEOUT,
            progress_reset_window: Duration::from_secs(30),
            enable_progress_reset: true,
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    method: String,
    start_time: Instant,
    /// Current idle window; `now - last_progress >= timeout` expires the
    /// request.
    timeout: Duration,
    maximum_timeout: Duration,
    last_progress: Instant,
    cancelled: bool,
    cancelled_at: Option<Instant>,
    token: CancellationToken,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        self.cancelled
            || now.duration_since(self.start_time) >= self.maximum_timeout
            || now.duration_since(self.last_progress) >= self.timeout
    }
}

/// Tracks pending requests, their deadlines, and their cancellation
/// tokens.
#[derive(Debug)]
pub struct TimeoutManager {
    config: TimeoutConfig,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
}

impl TimeoutManager {
    pub fn new(mut config: TimeoutConfig) -> Self {
        config.progress_reset_window = config
            .progress_reset_window
            .clamp(MIN_PROGRESS_RESET_WINDOW, MAX_PROGRESS_RESET_WINDOW);
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a request. The idle window is the custom timeout (or
    /// the default), capped by the hard ceiling. Duplicate IDs are ignored;
    /// the existing entry's token is returned.
    pub async fn add_request(
        &self,
        id: RequestId,
        method: &str,
        custom_timeout: Option<Duration>,
    ) -> CancellationToken {
        let mut pending = self.pending.lock().await;
        if let Some(existing) = pending.get(&id) {
            return existing.token.clone();
        }
        let now = Instant::now();
        let timeout = custom_timeout
            .unwrap_or(self.config.default_timeout)
            .min(self.config.maximum_timeout);
        let token = CancellationToken::new();
        pending.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                start_time: now,
                timeout,
                maximum_timeout: self.config.maximum_timeout,
                last_progress: now,
                cancelled: false,
                cancelled_at: None,
                token: token.clone(),
            },
        );
        token
    }

    /// Reset the idle deadline after a progress notification. Does nothing
    /// when progress-based extension is disabled; never extends the hard
    /// ceiling.
    pub async fn update_progress(&self, id: &RequestId) -> bool {
        if !self.config.enable_progress_reset {
            return false;
        }
        let mut pending = self.pending.lock().await;
        match pending.get_mut(id) {
            Some(request) if !request.cancelled => {
                request.last_progress = Instant::now();
                request.timeout = self.config.progress_reset_window;
                true
            }
            _ => false,
        }
    }

    /// Mark the request cancelled and fire its token. Returns false for
    /// unknown IDs.
    pub async fn cancel_request(&self, id: &RequestId) -> bool {
        let mut pending = self.pending.lock().await;
        match pending.get_mut(id) {
            Some(request) => {
                if !request.cancelled {
                    request.cancelled = true;
                    request.cancelled_at = Some(Instant::now());
                    request.token.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Scan for newly expired requests: mark them cancelled, fire their
    /// tokens, and return their IDs.
    pub async fn check_expired_requests(&self) -> Vec<RequestId> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut pending = self.pending.lock().await;
        for (id, request) in pending.iter_mut() {
            if !request.cancelled && request.is_expired(now) {
                request.cancelled = true;
                request.cancelled_at = Some(now);
                request.token.cancel();
                expired.push(id.clone());
            }
        }
        expired
    }

    /// Stop tracking a finished request.
    pub async fn complete_request(&self, id: &RequestId) -> bool {
        self.pending.lock().await.remove(id).is_some()
    }

    /// Drop cancelled entries older than the retention window so the map
    /// stays bounded.
    pub async fn cleanup_completed_requests(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock().await;
        let before = pending.len();
        pending.retain(|_, request| match request.cancelled_at {
            Some(at) => now.duration_since(at) < CANCELLED_RETENTION,
            None => true,
        });
        before - pending.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Expiry state of one request, if tracked.
    pub async fn is_expired(&self, id: &RequestId) -> Option<bool> {
        let pending = self.pending.lock().await;
        pending.get(id).map(|r| r.is_expired(Instant::now()))
    }

    /// Method name recorded for a pending request.
    pub async fn request_method(&self, id: &RequestId) -> Option<String> {
        let pending = self.pending.lock().await;
        pending.get(id).map(|r| r.method.clone())
    }
}

impl Default for TimeoutManager {
    fn default() -> Self {
        Self::new(TimeoutConfig::default())
    }
}
