//! Session management for the streamable HTTP transport.
//!
//! A session groups the logically related interactions of one MCP client,
//! identified by the `Mcp-Session-Id` header and outliving any single TCP
//! connection. Each session carries a strictly monotonic event counter and
//! a bounded buffer of emitted SSE events, so a client that reconnects
//! with `Last-Event-ID` can be replayed exactly the events it missed.
//!
//! Sessions expire after an idle timeout (default 30 minutes) and are
//! swept by [`SessionManager::cleanup_expired_sessions`], which runs at
//! most once per cleanup interval (default 5 minutes). A terminated
//! session is removed and never resurrected.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 1000;

/// Capacity of the per-session live event channel.
const SUBSCRIBER_CHANNEL_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Expired,
    Terminated,
}

/// One buffered SSE event, replayable by ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEventRecord {
    pub id: u64,
    pub event_type: Option<String>,
    pub data: String,
}

/// Snapshot of a session returned to callers.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub connection_id: String,
    pub state: SessionState,
    pub client_info: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone)]
pub struct SessionManagerConfig {
    pub session_timeout: Duration,
    pub cleanup_interval: Duration,
    pub event_buffer_capacity: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            event_buffer_capacity: DEFAULT_EVENT_BUFFER_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct Session {
    session_id: String,
    connection_id: String,
    state: SessionState,
    created_at: Instant,
    last_activity: Instant,
    timeout: Duration,
    client_info: Option<Value>,
    next_event_id: u64,
    events: VecDeque<SseEventRecord>,
    subscriber: Option<mpsc::Sender<SseEventRecord>>,
}

impl Session {
    fn is_expired(&self, now: Instant) -> bool {
        self.state == SessionState::Terminated
            || now.duration_since(self.last_activity) > self.timeout
    }
}

/// Creates, looks up, expires, and terminates sessions, and assigns SSE
/// event IDs.
#[derive(Debug)]
pub struct SessionManager {
    config: SessionManagerConfig,
    sessions: RwLock<HashMap<String, Session>>,
    /// connection_id → session_id, maintained alongside `sessions`.
    connections: RwLock<HashMap<String, String>>,
    last_cleanup: Mutex<Option<Instant>>,
}

impl SessionManager {
    pub fn new(config: SessionManagerConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            last_cleanup: Mutex::new(None),
        }
    }

    /// Allocate a fresh UUIDv4 session bound to `connection_id`.
    pub async fn create_session(
        &self,
        connection_id: &str,
        client_info: Option<Value>,
    ) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = Instant::now();
        let session = Session {
            session_id: session_id.clone(),
            connection_id: connection_id.to_string(),
            state: SessionState::Active,
            created_at: now,
            last_activity: now,
            timeout: self.config.session_timeout,
            client_info,
            next_event_id: 0,
            events: VecDeque::new(),
            subscriber: None,
        };
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);
        self.connections
            .write()
            .await
            .insert(connection_id.to_string(), session_id.clone());
        tracing::info!(%session_id, %connection_id, "session created");
        session_id
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        // A session past its idle timeout reads as expired even before the
        // next sweep removes it.
        let state = if session.state == SessionState::Active && session.is_expired(Instant::now())
        {
            SessionState::Expired
        } else {
            session.state
        };
        Ok(SessionInfo {
            session_id: session.session_id.clone(),
            connection_id: session.connection_id.clone(),
            state,
            client_info: session.client_info.clone(),
        })
    }

    pub async fn has_session(&self, session_id: &str) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Refresh the idle timer. Unknown sessions are ignored.
    pub async fn update_activity(&self, session_id: &str) {
        if let Some(session) = self.sessions.write().await.get_mut(session_id) {
            session.last_activity = Instant::now();
        }
    }

    /// Remove the session and its connection mapping. Idempotent.
    pub async fn terminate_session(&self, session_id: &str) {
        let removed = self.sessions.write().await.remove(session_id);
        if let Some(session) = removed {
            self.connections.write().await.remove(&session.connection_id);
            tracing::info!(%session_id, "session terminated");
        }
    }

    /// Sweep expired sessions. Runs at most once per cleanup interval;
    /// calls inside the interval return 0 without scanning.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Instant::now();
        {
            let mut last = self.last_cleanup.lock().await;
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.config.cleanup_interval {
                    return 0;
                }
            }
            *last = Some(now);
        }

        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .values()
                .filter(|s| s.is_expired(now))
                .map(|s| s.session_id.clone())
                .collect()
        };
        for session_id in &expired {
            self.terminate_session(session_id).await;
            tracing::debug!(%session_id, "expired session removed");
        }
        expired.len()
    }

    /// Next event ID for the session, in `<session_id>-<n>` form. `n` is
    /// strictly monotonic within the session, starting at 1.
    pub async fn generate_event_id(&self, session_id: &str) -> Result<String, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.next_event_id += 1;
        Ok(format!("{}-{}", session.session_id, session.next_event_id))
    }

    /// Assign the next event ID and buffer the event for replay, without
    /// forwarding it to a live subscriber. Used for events that are
    /// written directly to the stream that caused them.
    pub async fn record_event(
        &self,
        session_id: &str,
        event_type: Option<String>,
        data: String,
    ) -> Result<SseEventRecord, SessionError> {
        let (record, _) = self.buffer_event(session_id, event_type, data).await?;
        Ok(record)
    }

    /// Assign the next event ID, buffer the event for replay, and forward
    /// it to the live subscriber if one is attached.
    pub async fn publish_event(
        &self,
        session_id: &str,
        event_type: Option<String>,
        data: String,
    ) -> Result<SseEventRecord, SessionError> {
        let (record, subscriber) = self.buffer_event(session_id, event_type, data).await?;
        if let Some(subscriber) = subscriber {
            // A full or closed channel means the subscriber is gone or
            // lagging; the event stays in the buffer for replay.
            let _ = subscriber.try_send(record.clone());
        }
        Ok(record)
    }

    async fn buffer_event(
        &self,
        session_id: &str,
        event_type: Option<String>,
        data: String,
    ) -> Result<(SseEventRecord, Option<mpsc::Sender<SseEventRecord>>), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        session.next_event_id += 1;
        let record = SseEventRecord {
            id: session.next_event_id,
            event_type,
            data,
        };
        session.events.push_back(record.clone());
        while session.events.len() > self.config.event_buffer_capacity {
            session.events.pop_front();
        }
        Ok((record, session.subscriber.clone()))
    }

    /// Buffered events with `id > last_event_id`, oldest first.
    pub async fn events_after(
        &self,
        session_id: &str,
        last_event_id: u64,
    ) -> Result<Vec<SseEventRecord>, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(session
            .events
            .iter()
            .filter(|e| e.id > last_event_id)
            .cloned()
            .collect())
    }

    /// Attach a live event channel to the session, replacing any previous
    /// subscriber (a reconnecting client supersedes its dead stream).
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<mpsc::Receiver<SseEventRecord>, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_SIZE);
        session.subscriber = Some(tx);
        Ok(rx)
    }

    /// Age of the session, for diagnostics.
    pub async fn session_age(&self, session_id: &str) -> Result<Duration, SessionError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(session.created_at.elapsed())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionManagerConfig::default())
    }
}
