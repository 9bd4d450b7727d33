//! Error types for the RTSP server library.

use std::fmt;

/// Errors that can occur in the RTSP server library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`Rtcp`](Self::Rtcp) — malformed wire bytes.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`SessionNotPlaying`](Self::SessionNotPlaying),
///   [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`InvalidState`](Self::InvalidState), [`MissingSession`](Self::MissingSession).
/// - **Auth**: [`Auth`](Self::Auth).
/// - **Server**: [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Bitstream / container**: [`Bitstream`](Self::Bitstream), [`Mp4`](Self::Mp4).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session with the given ID exists in the `SessionManager`.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// SETUP has not been completed for this stream (no transport negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// Attempted to send media to a session that is not in the Playing state.
    #[error("session not in playing state: {0}")]
    SessionNotPlaying(String),

    /// A method was received in a state that does not permit it (RFC 2326 §A.1).
    #[error("method {method} invalid in state {state}")]
    InvalidState { method: String, state: String },

    /// PLAY/TEARDOWN/SETUP referenced a `Session:` header that was not supplied.
    #[error("Session header required")]
    MissingSession,

    /// Basic-Auth challenge failed or was not presented.
    #[error("authentication required")]
    Auth,

    /// `Server::start` has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// `Server::start` was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Failed to parse a compound RTCP packet (RFC 3550 §6).
    #[error("RTCP parse error: {0}")]
    Rtcp(String),

    /// Failed to decode an SPS, `avcC` record, or NAL bitstream.
    #[error("bitstream error: {0}")]
    Bitstream(String),

    /// Failed to walk or locate an atom in an MP4 byte stream.
    #[error("MP4 container error: {0}")]
    Mp4(String),

    /// No stream registered for the requested streamId.
    #[error("stream not found: {0}")]
    StreamNotFound(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// `Content-Length` announced more bytes than were available.
    IncompleteBody,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::IncompleteBody => write!(f, "incomplete body"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
