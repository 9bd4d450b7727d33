use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use parking_lot::RwLock;

use crate::error::{Result, RtspError};
use crate::h264::AvcC;
use crate::protocol::sdp::{self, SdpParams};
use crate::session::SessionManager;
use crate::transport::tcp;

/// Default file-rotation threshold for the frame extractor (50 MiB).
pub const DEFAULT_ROTATION_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

/// Default number of round-robin rotation output files.
pub const DEFAULT_MAX_FILE_INDEX: u32 = 5;

/// Basic-Auth credentials (RFC 2617), checked against every method except
/// OPTIONS and TEARDOWN when configured.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }

    /// Check a raw `Authorization: Basic <...>` header value.
    pub fn matches(&self, header_value: &str) -> bool {
        let Some(encoded) = header_value.strip_prefix("Basic ") else {
            return false;
        };
        use base64::prelude::{BASE64_STANDARD, Engine as _};
        let Ok(decoded) = BASE64_STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(decoded) = String::from_utf8(decoded) else {
            return false;
        };
        decoded == format!("{}:{}", self.username, self.password)
    }
}

/// The currently-published stream description: the `avcC` configuration
/// record plus the geometry/bitrate figures surfaced in SDP. Replaced
/// atomically each time the encoder republishes its parameter sets (camera
/// rotation, resolution change, etc.) — §4.10.
#[derive(Default)]
struct StreamDescriptor {
    avcc: Option<AvcC>,
    width: u32,
    height: u32,
    bitrate: u32,
    audio_sample_rate: Option<u32>,
}

/// Server-level configuration and runtime state shared by every
/// `RtspConnection` (SDP fields, Basic-Auth credentials, the live
/// `configData`/bitrate cell).
pub struct ServerConfig {
    /// Public host advertised in SDP `o=`/`c=` lines. When `None`, the host
    /// is inferred from the request URI or client address.
    pub public_host: Option<String>,
    /// Device name used in the SDP `s=` line (`Live stream from <name>`).
    pub device_name: String,
    /// Optional Basic-Auth gate (§4.9); `None` disables authentication.
    pub auth: Option<BasicAuth>,
    /// File-rotation threshold for the frame extractor, in bytes.
    pub rotation_threshold_bytes: u64,
    /// Maximum round-robin rotation file index.
    pub max_file_index: u32,
    stream: RwLock<StreamDescriptor>,
}

impl ServerConfig {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            public_host: None,
            device_name: device_name.into(),
            auth: None,
            rotation_threshold_bytes: DEFAULT_ROTATION_THRESHOLD_BYTES,
            max_file_index: DEFAULT_MAX_FILE_INDEX,
            stream: RwLock::new(StreamDescriptor::default()),
        }
    }

    pub fn with_auth(mut self, auth: BasicAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_public_host(mut self, host: impl Into<String>) -> Self {
        self.public_host = Some(host.into());
        self
    }

    pub fn with_rotation_threshold_bytes(mut self, bytes: u64) -> Self {
        self.rotation_threshold_bytes = bytes;
        self
    }

    /// Publish a new `configData` snapshot (RFC 2326 §4.10). Readers
    /// (DESCRIBE handlers) observe a consistent snapshot under the lock.
    pub fn publish_stream_config(&self, avcc: AvcC, width: u32, height: u32, bitrate: u32, audio_sample_rate: Option<u32>) {
        let mut stream = self.stream.write();
        stream.avcc = Some(avcc);
        stream.width = width;
        stream.height = height;
        stream.bitrate = bitrate;
        stream.audio_sample_rate = audio_sample_rate;
    }

    pub fn update_bitrate(&self, bitrate: u32) {
        self.stream.write().bitrate = bitrate;
    }

    pub fn has_stream_config(&self) -> bool {
        self.stream.read().avcc.is_some()
    }

    /// Realm string for the `WWW-Authenticate` challenge.
    pub fn realm(&self) -> &str {
        &self.device_name
    }

    pub fn check_auth(&self, header_value: Option<&str>) -> bool {
        match &self.auth {
            None => true,
            Some(auth) => header_value.map(|v| auth.matches(v)).unwrap_or(false),
        }
    }

    /// Build the DESCRIBE SDP body. Returns `None` until the encoder has
    /// published at least one `configData` snapshot (§7: a DESCRIBE issued
    /// before any parameter sets are known surfaces as 500, not empty SDP).
    pub fn describe_sdp(&self, ip: &str) -> Option<String> {
        let stream = self.stream.read();
        let avcc = stream.avcc.as_ref()?;
        let params = SdpParams {
            ip,
            device_name: &self.device_name,
            avcc,
            width: stream.width,
            height: stream.height,
            bitrate: stream.bitrate,
            audio_sample_rate: stream.audio_sample_rate,
        };
        Some(sdp::generate_sdp(&params, (rand::random::<u32>(), rand::random::<u32>())))
    }
}

/// High-level RTSP server orchestrator: binds the TCP listener, accepts
/// connections, and exposes the broadcast entry points an encoder-facing
/// driver calls with freshly extracted access units.
pub struct Server {
    session_manager: SessionManager,
    running: Arc<AtomicBool>,
    bind_addr: String,
    config: Arc<ServerConfig>,
}

impl Server {
    pub fn new(bind_addr: &str, config: ServerConfig) -> Self {
        Self {
            session_manager: SessionManager::new(),
            running: Arc::new(AtomicBool::new(false)),
            bind_addr: bind_addr.to_string(),
            config: Arc::new(config),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.bind_addr)?;
        listener.set_nonblocking(true)?;

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let session_manager = self.session_manager.clone();
        let config = self.config.clone();

        tracing::info!(addr = %self.bind_addr, "RTSP server listening");

        thread::spawn(move || {
            tcp::accept_loop(listener, session_manager, config, running);
        });

        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Fan out a just-extracted H.264 access unit to every playing session's
    /// video stream (`streamId` 1).
    pub fn broadcast_video(&self, nalus: &[Vec<u8>], pts: f64) {
        for session in self.session_manager.get_playing_sessions() {
            if let Some(rtp) = session.get_rtp_session(1) {
                let mut rtp = rtp.lock();
                if let Err(e) = rtp.send_h264_access_unit(nalus, pts) {
                    tracing::warn!(session_id = %session.id, error = %e, "failed to send video access unit");
                }
                let _ = rtp.maybe_send_sr(std::time::Instant::now());
            }
        }
    }

    /// Fan out an AAC access unit to every playing session's audio stream
    /// (`streamId` 2).
    pub fn broadcast_audio(&self, au: &[u8], pts: f64) {
        for session in self.session_manager.get_playing_sessions() {
            if let Some(rtp) = session.get_rtp_session(2) {
                let mut rtp = rtp.lock();
                match rtp.send_aac_access_unit(au, pts) {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!(session_id = %session.id, "dropped oversized AAC access unit"),
                    Err(e) => tracing::warn!(session_id = %session.id, error = %e, "failed to send audio access unit"),
                }
                let _ = rtp.maybe_send_sr(std::time::Instant::now());
            }
        }
    }

    pub fn get_viewers(&self) -> Vec<Viewer> {
        self.session_manager
            .get_playing_sessions()
            .iter()
            .map(|session| Viewer {
                session_id: session.id.clone(),
                uri: session.uri.clone(),
                stream_ids: session.rtp_session_ids(),
            })
            .collect()
    }

    pub fn session_manager(&self) -> &SessionManager {
        &self.session_manager
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        self.config.clone()
    }
}

/// Information about a connected viewer (client in the Playing state).
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub uri: String,
    pub stream_ids: Vec<u32>,
}
