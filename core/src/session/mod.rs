//! RTSP session management (RFC 2326 §3, §12.37).
//!
//! An RTSP session is a server-side state object created during SETUP and
//! destroyed by TEARDOWN (or connection loss). It tracks:
//!
//! - A unique session ID (hex string, returned in the `Session` header).
//! - The playback state: Setup -> Playing. There is no PAUSE/paused state —
//!   GET_PARAMETER and PAUSE are not supported methods.
//! - One [`crate::rtp::RtpSession`] per negotiated stream (video streamId 1,
//!   audio streamId 2), each independently counting packets/bytes and
//!   scheduling its own Sender Reports.
//!
//! ## Session lifecycle
//!
//! ```text
//! SETUP(streamId=1)  -> Setup, rtp_sessions={1: ...}
//! SETUP(streamId=2)  -> Setup, rtp_sessions={1: ..., 2: ...}
//! PLAY               -> Playing
//! TEARDOWN           -> (removed)
//! TCP disconnect     -> (removed, via cleanup)
//! ```

pub mod transport;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::rtp::RtpSession;
pub use transport::{Transport, TransportHeader};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// RTSP session state machine, narrowed to the methods this server
/// implements (OPTIONS/DESCRIBE/SETUP/PLAY/TEARDOWN — no PAUSE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created via SETUP, not yet playing.
    Setup,
    /// Media is being delivered (RTP packets sent to client).
    Playing,
}

/// A single RTSP session (RFC 2326 §3): one or more RTP streams (video,
/// optionally audio) sharing a playback state and a `Session:` ID.
pub struct RtspSession {
    /// Unique session identifier (16-char hex string).
    pub id: String,
    /// The RTSP URI this session was created for (from the SETUP request).
    pub uri: String,
    /// Current playback state.
    pub state: RwLock<SessionState>,
    /// RTP delivery state per negotiated stream, keyed by `streamId`.
    pub rtp_sessions: RwLock<HashMap<u32, Arc<Mutex<RtpSession>>>>,
    /// Session timeout in seconds (included in the `Session` response header).
    pub timeout_secs: u64,
}

impl RtspSession {
    /// Create a new session with a unique auto-incrementing ID.
    pub fn new(uri: &str) -> Self {
        let id = SESSION_COUNTER.fetch_add(1, Ordering::SeqCst);
        RtspSession {
            id: format!("{id:016X}"),
            uri: uri.to_string(),
            state: RwLock::new(SessionState::Setup),
            rtp_sessions: RwLock::new(HashMap::new()),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    pub fn add_rtp_session(&self, stream_id: u32, rtp_session: RtpSession) {
        self.add_rtp_session_handle(stream_id, Arc::new(Mutex::new(rtp_session)));
    }

    /// Insert an already-wrapped handle, so a caller can retain its own
    /// clone (e.g. to route inbound interleaved RTCP) before the session
    /// takes ownership.
    pub fn add_rtp_session_handle(&self, stream_id: u32, handle: Arc<Mutex<RtpSession>>) {
        self.rtp_sessions.write().insert(stream_id, handle);
    }

    pub fn get_rtp_session(&self, stream_id: u32) -> Option<Arc<Mutex<RtpSession>>> {
        self.rtp_sessions.read().get(&stream_id).cloned()
    }

    pub fn rtp_session_ids(&self) -> Vec<u32> {
        self.rtp_sessions.read().keys().copied().collect()
    }

    /// Transition to a new playback state.
    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old_state = ?*self.state.read(), new_state = ?state, "state transition");
        *self.state.write() = state;
    }

    pub fn get_state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_playing(&self) -> bool {
        self.get_state() == SessionState::Playing
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// Thread-safe registry of active sessions, owned by one `RtspConnection`.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<RtspSession>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn create_session(&self, uri: &str) -> Arc<RtspSession> {
        let session = Arc::new(RtspSession::new(uri));
        let id = session.id.clone();
        self.sessions.write().insert(id.clone(), session.clone());
        tracing::debug!(session_id = %id, uri, "session created");
        session
    }

    pub fn get_session(&self, id: &str) -> Option<Arc<RtspSession>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn remove_session(&self, id: &str) -> Option<Arc<RtspSession>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = %id, "session removed");
        }
        removed
    }

    pub fn remove_sessions(&self, ids: &[String]) -> usize {
        let mut sessions = self.sessions.write();
        let mut removed = 0;
        for id in ids {
            if sessions.remove(id).is_some() {
                removed += 1;
            }
        }
        removed
    }

    pub fn get_playing_sessions(&self) -> Vec<Arc<RtspSession>> {
        self.sessions.read().values().filter(|s| s.is_playing()).cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_in_setup_state() {
        let manager = SessionManager::new();
        let session = manager.create_session("rtsp://localhost/stream");
        assert_eq!(session.get_state(), SessionState::Setup);
        assert!(!session.is_playing());
    }

    #[test]
    fn state_transitions_to_playing() {
        let manager = SessionManager::new();
        let session = manager.create_session("rtsp://localhost/stream");
        session.set_state(SessionState::Playing);
        assert!(session.is_playing());
    }

    #[test]
    fn teardown_removes_session() {
        let manager = SessionManager::new();
        let session = manager.create_session("rtsp://localhost/stream");
        let id = session.id.clone();
        assert!(manager.remove_session(&id).is_some());
        assert!(manager.get_session(&id).is_none());
    }

}
