use std::collections::HashMap;
use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::rtp::RtpSession;
use crate::rtp::transport::RtpTransport;
use crate::server::ServerConfig;
use crate::session::transport::TransportHeader;
use crate::session::{RtspSession, SessionManager, SessionState};

const VIDEO_STREAM_ID: u32 = 1;
const AUDIO_STREAM_ID: u32 = 2;
const VIDEO_PAYLOAD_TYPE: u8 = 96;
const AUDIO_PAYLOAD_TYPE: u8 = 97;
const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Handles RTSP method requests for a single TCP connection (§4.9).
///
/// Owns the subset of state scoped to one client: which `Session:` IDs it
/// created (for cleanup on disconnect) and the interleaved-channel routing
/// table used to demux inbound RTCP bytes arriving over the shared RTSP
/// socket. Purely request/response logic — socket I/O and the interleaved
/// `$`-frame demultiplexing loop live in [`crate::transport::tcp`].
pub struct RtspConnection {
    session_manager: SessionManager,
    client_addr: SocketAddr,
    config: Arc<ServerConfig>,
    rtsp_socket: Arc<Mutex<Box<dyn Write + Send>>>,
    session_ids: Vec<String>,
    channel_routes: HashMap<u8, Arc<Mutex<RtpSession>>>,
}

impl RtspConnection {
    pub fn new(
        session_manager: SessionManager,
        client_addr: SocketAddr,
        config: Arc<ServerConfig>,
        rtsp_socket: Arc<Mutex<Box<dyn Write + Send>>>,
    ) -> Self {
        RtspConnection {
            session_manager,
            client_addr,
            config,
            rtsp_socket,
            session_ids: Vec::new(),
            channel_routes: HashMap::new(),
        }
    }

    /// Returns session IDs owned by this connection (for cleanup on disconnect).
    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    /// Route an inbound interleaved RTCP frame (demuxed by the transport
    /// layer) to the session whose SETUP claimed this channel number.
    pub fn route_inbound_rtcp(&self, channel: u8, payload: &[u8]) -> Result<bool> {
        if let Some(rtp) = self.channel_routes.get(&channel) {
            return rtp.lock().handle_rtcp(payload);
        }
        Ok(false)
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0").to_string();

        if !self.authorized(request) {
            tracing::warn!(%cseq, method = %request.method, "missing or invalid Authorization header");
            return RtspResponse::unauthorized()
                .add_header("CSeq", &cseq)
                .add_header("WWW-Authenticate", &format!("Basic realm=\"{}\"", self.config.realm()));
        }

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(&cseq),
            "DESCRIBE" => self.handle_describe(&cseq, &request.uri),
            "SETUP" => self.handle_setup(&cseq, request),
            "PLAY" => self.handle_play(&cseq, request),
            "TEARDOWN" => self.handle_teardown(&cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::method_not_allowed()
                    .add_header("CSeq", &cseq)
                    .add_header("Allow", "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN")
            }
        }
    }

    /// Basic-Auth gate (§4.9): OPTIONS and TEARDOWN are always allowed through.
    fn authorized(&self, request: &RtspRequest) -> bool {
        if self.config.auth.is_none() {
            return true;
        }
        if matches!(request.method.as_str(), "OPTIONS" | "TEARDOWN") {
            return true;
        }
        self.config.check_auth(request.get_header("Authorization"))
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN")
    }

    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.config.public_host {
            return host.clone();
        }
        if let Some(after_scheme) = uri.strip_prefix("rtsp://").or_else(|| uri.strip_prefix("rtsps://")) {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");
        let host = self.host_from_uri_or_client(uri);
        match self.config.describe_sdp(&host) {
            Some(sdp) => RtspResponse::ok()
                .add_header("CSeq", cseq)
                .add_header("Content-Type", "application/sdp")
                .add_header("Content-Base", uri)
                .with_body(sdp),
            None => {
                tracing::warn!(%cseq, "DESCRIBE before any stream configuration was published");
                RtspResponse::internal_server_error().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(stream_id) = parse_stream_id(&request.uri) else {
            tracing::warn!(%cseq, uri = %request.uri, "SETUP for unknown streamId");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let transport_header = match request.get_header("Transport") {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, "SETUP missing Transport header");
                return RtspResponse::bad_request().add_header("CSeq", cseq);
            }
        };

        let client_transport = match TransportHeader::parse(transport_header) {
            Some(t) => t,
            None => {
                tracing::warn!(%cseq, transport_header, "SETUP Transport header names an unsupported mode");
                return RtspResponse::unsupported_transport().add_header("CSeq", cseq);
            }
        };

        let session = match self.existing_or_new_session(request, &request.uri) {
            Ok(session) => session,
            Err(resp) => return resp.add_header("CSeq", cseq),
        };

        if session.get_rtp_session(stream_id).is_some() {
            tracing::warn!(%cseq, stream_id, "SETUP repeated for a stream already configured");
            return RtspResponse::method_not_valid_in_this_state().add_header("CSeq", cseq);
        }
        if session.get_state() == SessionState::Playing {
            tracing::warn!(%cseq, "SETUP while already Playing");
            return RtspResponse::method_not_valid_in_this_state().add_header("CSeq", cseq);
        }

        let (payload_type, clock_rate) = if stream_id == VIDEO_STREAM_ID {
            (VIDEO_PAYLOAD_TYPE, VIDEO_CLOCK_RATE)
        } else {
            (AUDIO_PAYLOAD_TYPE, 44_100)
        };

        let (transport, transport_response) = match self.build_transport(&client_transport) {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(%cseq, error = %e, "failed to negotiate transport");
                return RtspResponse::internal_server_error().add_header("CSeq", cseq);
            }
        };

        let rtp_session = RtpSession::new(
            rand::random::<u32>(),
            stream_id,
            payload_type,
            clock_rate,
            rand::random::<u32>(),
            ntp_now(),
            transport,
        );

        if let Some(recv_socket) = rtp_session.transport.rtcp_recv_socket() {
            spawn_udp_rtcp_listener(recv_socket, self.session_manager.clone(), session.id.clone(), stream_id);
        }

        let rtp_handle = Arc::new(Mutex::new(rtp_session));
        if let TransportHeader::Interleaved { channel_rtcp, .. } = client_transport {
            self.channel_routes.insert(channel_rtcp, rtp_handle.clone());
        }
        session.add_rtp_session_handle(stream_id, rtp_handle);
        self.session_ids.push(session.id.clone());

        tracing::info!(session_id = %session.id, stream_id, client = %self.client_addr, "session stream configured via SETUP");

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport_response)
            .add_header("Session", &session.session_header_value())
    }

    /// Reuse the session named by the `Session:` header (second SETUP for
    /// an audio track), or create a new one if none was supplied.
    fn existing_or_new_session(&self, request: &RtspRequest, uri: &str) -> std::result::Result<Arc<RtspSession>, RtspResponse> {
        match self.extract_session_id(request) {
            Some(id) => self.session_manager.get_session(&id).ok_or(RtspResponse::session_not_found()),
            None => Ok(self.session_manager.create_session(uri)),
        }
    }

    fn build_transport(&self, client_transport: &TransportHeader) -> Result<(RtpTransport, String)> {
        match *client_transport {
            TransportHeader::Udp { client_rtp_port, client_rtcp_port } => {
                // Bind to ephemeral ports (§4.7): the OS picks a free port
                // for each socket, so SETUP never collides with another
                // session's allocation.
                let socket_rtp = UdpSocket::bind(("0.0.0.0", 0))?;
                let socket_rtcp = UdpSocket::bind(("0.0.0.0", 0))?;
                let server_rtp_port = socket_rtp.local_addr()?.port();
                let server_rtcp_port = socket_rtcp.local_addr()?.port();
                let peer_rtp = SocketAddr::new(self.client_addr.ip(), client_rtp_port);
                let peer_rtcp = SocketAddr::new(self.client_addr.ip(), client_rtcp_port);
                let transport = RtpTransport::Udp { socket_rtp, socket_rtcp, peer_rtp, peer_rtcp };
                let response = format!(
                    "RTP/AVP;unicast;client_port={client_rtp_port}-{client_rtcp_port};server_port={server_rtp_port}-{server_rtcp_port}"
                );
                Ok((transport, response))
            }
            TransportHeader::Interleaved { channel_rtp, channel_rtcp } => {
                let transport = RtpTransport::Interleaved {
                    channel_rtp,
                    channel_rtcp,
                    rtsp_socket: self.rtsp_socket.clone(),
                };
                let response = format!("RTP/AVP/TCP;unicast;interleaved={channel_rtp}-{channel_rtcp}");
                Ok((transport, response))
            }
        }
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session_id) = self.extract_session_id(request) else {
            tracing::warn!(%cseq, "PLAY missing Session header");
            return RtspResponse::parameter_not_understood().add_header("CSeq", cseq);
        };

        match self.session_manager.get_session(&session_id) {
            Some(session) => {
                if session.get_state() == SessionState::Playing {
                    tracing::warn!(session_id, "PLAY while already Playing");
                    return RtspResponse::method_not_valid_in_this_state().add_header("CSeq", cseq);
                }
                session.set_state(SessionState::Playing);
                tracing::info!(session_id, "session started playing");
                let rtp_info = self.rtp_info_header(&session, &request.uri);
                let mut resp = RtspResponse::ok()
                    .add_header("CSeq", cseq)
                    .add_header("Session", &session.session_header_value())
                    .add_header("Range", "npt=0.000-");
                if !rtp_info.is_empty() {
                    resp = resp.add_header("RTP-Info", &rtp_info);
                }
                resp
            }
            None => {
                tracing::warn!(session_id, "PLAY for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    /// Build the `RTP-Info` header value (RFC 2326 §12.33): one
    /// `url=...;seq=...;rtptime=...` entry per negotiated stream, so the
    /// client can align its jitter buffer to the first packet it will see.
    fn rtp_info_header(&self, session: &RtspSession, play_uri: &str) -> String {
        let base = play_uri.trim_end_matches('/');
        let mut ids = session.rtp_session_ids();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|stream_id| {
                let rtp = session.get_rtp_session(stream_id)?;
                let (seq, rtptime) = rtp.lock().next_rtp_info();
                Some(format!("url={base}/streamid={stream_id};seq={seq};rtptime={rtptime}"))
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session_id) = self.extract_session_id(request) else {
            tracing::warn!(%cseq, "TEARDOWN missing Session header");
            return RtspResponse::parameter_not_understood().add_header("CSeq", cseq);
        };

        match self.session_manager.remove_session(&session_id) {
            Some(_) => {
                self.session_ids.retain(|id| id != &session_id);
                self.channel_routes.clear();
                tracing::info!(session_id, "session terminated via TEARDOWN");
                RtspResponse::ok().add_header("CSeq", cseq)
            }
            None => {
                tracing::warn!(session_id, "TEARDOWN for unknown session");
                RtspResponse::session_not_found().add_header("CSeq", cseq)
            }
        }
    }

    /// Extract session ID from the Session header.
    /// Handles the timeout suffix: `"SESSIONID;timeout=60"` -> `"SESSIONID"`.
    fn extract_session_id(&self, request: &RtspRequest) -> Option<String> {
        request.get_header("Session").map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
    }
}

/// Parse the trailing `streamid=N` path segment from a SETUP URI, e.g.
/// `rtsp://host/streamid=1` -> `Some(1)`. Only 1 (video) and 2 (audio) are
/// recognized streams.
fn parse_stream_id(uri: &str) -> Option<u32> {
    let marker = "streamid=";
    let idx = uri.rfind(marker)?;
    let digits: String = uri[idx + marker.len()..].chars().take_while(|c| c.is_ascii_digit()).collect();
    let id: u32 = digits.parse().ok()?;
    if id == VIDEO_STREAM_ID || id == AUDIO_STREAM_ID { Some(id) } else { None }
}

/// NTP timestamp (seconds since 1900-01-01, Q32.32) for the current wall
/// clock, used as a Sender Report's `ntpBase` (§4.8).
fn ntp_now() -> u64 {
    const NTP_UNIX_EPOCH_OFFSET_SECS: u64 = 2_208_988_800;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs() + NTP_UNIX_EPOCH_OFFSET_SECS;
    let frac = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
    (secs << 32) | frac
}

/// Background reader for one UDP-transport stream's RTCP socket: every
/// datagram received is handed to the matching `RtpSession::handle_rtcp`.
fn spawn_udp_rtcp_listener(socket: UdpSocket, session_manager: SessionManager, session_id: String, stream_id: u32) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 1500];
        loop {
            match socket.recv(&mut buf) {
                Ok(n) => {
                    let Some(session) = session_manager.get_session(&session_id) else { break };
                    let Some(rtp) = session.get_rtp_session(stream_id) else { break };
                    match rtp.lock().handle_rtcp(&buf[..n]) {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(e) => tracing::warn!(session_id, error = %e, "malformed inbound RTCP packet"),
                    }
                }
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;
    use std::net::Ipv4Addr;

    fn new_connection() -> RtspConnection {
        let buf: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(Vec::new())));
        RtspConnection::new(
            SessionManager::new(),
            SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5000),
            Arc::new(ServerConfig::new("Test Camera")),
            buf,
        )
    }

    fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> RtspRequest {
        let mut raw = format!("{method} {uri} RTSP/1.0\r\nCSeq: 1\r\n");
        for (k, v) in headers {
            raw.push_str(&format!("{k}: {v}\r\n"));
        }
        raw.push_str("\r\n");
        RtspRequest::parse(&raw).unwrap()
    }

    #[test]
    fn options_lists_supported_methods() {
        let mut conn = new_connection();
        let resp = conn.handle(&request("OPTIONS", "*", &[]));
        assert_eq!(resp.status_code, 200);
        assert_eq!(
            resp.headers.iter().find(|(k, _)| k == "Public").unwrap().1,
            "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN"
        );
    }

    #[test]
    fn describe_before_config_published_is_server_error() {
        let mut conn = new_connection();
        let resp = conn.handle(&request("DESCRIBE", "rtsp://localhost/", &[]));
        assert_eq!(resp.status_code, 500);
    }

    #[test]
    fn setup_unknown_stream_id_is_not_found() {
        let mut conn = new_connection();
        let resp = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=9",
            &[("Transport", "RTP/AVP;unicast;client_port=40000-40001")],
        ));
        assert_eq!(resp.status_code, 404);
    }

    #[test]
    fn setup_missing_transport_is_bad_request() {
        let mut conn = new_connection();
        let resp = conn.handle(&request("SETUP", "rtsp://localhost/streamid=1", &[]));
        assert_eq!(resp.status_code, 400);
    }

    #[test]
    fn setup_video_then_play_transitions_to_playing() {
        let mut conn = new_connection();
        let setup = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=1",
            &[("Transport", "RTP/AVP;unicast;client_port=40000-40001")],
        ));
        assert_eq!(setup.status_code, 200);
        let session_header = setup.headers.iter().find(|(k, _)| k == "Session").unwrap().1.clone();
        let session_id = session_header.split(';').next().unwrap().to_string();

        let play = conn.handle(&request("PLAY", "rtsp://localhost/", &[("Session", &session_id)]));
        assert_eq!(play.status_code, 200);
        assert!(conn.session_manager.get_session(&session_id).unwrap().is_playing());
    }

    #[test]
    fn repeated_play_while_already_playing_is_rejected() {
        let mut conn = new_connection();
        let setup = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=1",
            &[("Transport", "RTP/AVP;unicast;client_port=40000-40001")],
        ));
        let session_header = setup.headers.iter().find(|(k, _)| k == "Session").unwrap().1.clone();
        let session_id = session_header.split(';').next().unwrap().to_string();

        let first_play = conn.handle(&request("PLAY", "rtsp://localhost/", &[("Session", &session_id)]));
        assert_eq!(first_play.status_code, 200);

        let second_play = conn.handle(&request("PLAY", "rtsp://localhost/", &[("Session", &session_id)]));
        assert_eq!(second_play.status_code, 455);
        assert!(conn.session_manager.get_session(&session_id).unwrap().is_playing());
    }

    #[test]
    fn play_without_session_header_is_parameter_not_understood() {
        let mut conn = new_connection();
        let resp = conn.handle(&request("PLAY", "rtsp://localhost/", &[]));
        assert_eq!(resp.status_code, 451);
    }

    #[test]
    fn play_unknown_session_is_session_not_found() {
        let mut conn = new_connection();
        let resp = conn.handle(&request("PLAY", "rtsp://localhost/", &[("Session", "DEADBEEF")]));
        assert_eq!(resp.status_code, 454);
    }

    #[test]
    fn teardown_removes_session() {
        let mut conn = new_connection();
        let setup = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=1",
            &[("Transport", "RTP/AVP;unicast;client_port=40000-40001")],
        ));
        let session_header = setup.headers.iter().find(|(k, _)| k == "Session").unwrap().1.clone();
        let session_id = session_header.split(';').next().unwrap().to_string();

        let teardown = conn.handle(&request("TEARDOWN", "rtsp://localhost/", &[("Session", &session_id)]));
        assert_eq!(teardown.status_code, 200);
        assert!(conn.session_manager.get_session(&session_id).is_none());
    }

    #[test]
    fn repeated_setup_for_same_stream_is_rejected() {
        let mut conn = new_connection();
        let setup = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=1",
            &[("Transport", "RTP/AVP;unicast;client_port=40000-40001")],
        ));
        let session_header = setup.headers.iter().find(|(k, _)| k == "Session").unwrap().1.clone();
        let session_id = session_header.split(';').next().unwrap().to_string();

        let resp = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=1",
            &[("Transport", "RTP/AVP;unicast;client_port=40002-40003"), ("Session", &session_id)],
        ));
        assert_eq!(resp.status_code, 455);
    }

    #[test]
    fn setup_with_interleaved_transport_echoes_channels() {
        let mut conn = new_connection();
        let resp = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=1",
            &[("Transport", "RTP/AVP/TCP;unicast;interleaved=0-1")],
        ));
        assert_eq!(resp.status_code, 200);
        let transport = resp.headers.iter().find(|(k, _)| k == "Transport").unwrap().1.clone();
        assert!(transport.contains("interleaved=0-1"));
    }

    #[test]
    fn unsupported_transport_header_returns_461() {
        let mut conn = new_connection();
        let resp = conn.handle(&request(
            "SETUP",
            "rtsp://localhost/streamid=1",
            &[("Transport", "RTP/AVP;unicast")],
        ));
        assert_eq!(resp.status_code, 461);
    }

    #[test]
    fn unknown_method_is_405_with_allow_header() {
        let mut conn = new_connection();
        let resp = conn.handle(&request("PAUSE", "rtsp://localhost/", &[]));
        assert_eq!(resp.status_code, 405);
        assert!(resp.headers.iter().any(|(k, _)| k == "Allow"));
    }

    #[test]
    fn auth_required_rejects_missing_authorization() {
        let buf: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(Vec::new())));
        let config = ServerConfig::new("Test Camera").with_auth(crate::server::BasicAuth::new("admin", "secret"));
        let mut conn = RtspConnection::new(
            SessionManager::new(),
            SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5000),
            Arc::new(config),
            buf,
        );
        let resp = conn.handle(&request("DESCRIBE", "rtsp://localhost/", &[]));
        assert_eq!(resp.status_code, 401);
        assert!(resp.headers.iter().any(|(k, _)| k == "WWW-Authenticate"));
    }

    #[test]
    fn auth_required_allows_options_and_teardown_through() {
        let buf: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(Vec::new())));
        let config = ServerConfig::new("Test Camera").with_auth(crate::server::BasicAuth::new("admin", "secret"));
        let mut conn = RtspConnection::new(
            SessionManager::new(),
            SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5000),
            Arc::new(config),
            buf,
        );
        assert_eq!(conn.handle(&request("OPTIONS", "*", &[])).status_code, 200);
    }
}
