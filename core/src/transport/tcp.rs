use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{ParseErrorKind, RtspError};
use crate::protocol::RtspConnection;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::server::ServerConfig;
use crate::session::SessionManager;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub fn accept_loop(listener: TcpListener, session_manager: SessionManager, config: Arc<ServerConfig>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(true).is_err() {
                    continue;
                }
                let sm = session_manager.clone();
                let c = config.clone();
                let r = running.clone();
                thread::spawn(move || {
                    Connection::handle(stream, sm, c, r);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A single RTSP client connection with its own lifecycle.
///
/// Reads raw bytes into a growing buffer and dispatches each complete
/// unit at the front — either an RTSP request, or (once a session has
/// negotiated interleaved transport) a `$`-framed RTP/RTCP packet —
/// before asking the socket for more (§4.9).
struct Connection {
    read_half: TcpStream,
    write_half: Arc<Mutex<Box<dyn Write + Send>>>,
    handler: RtspConnection,
    peer_addr: SocketAddr,
    buffer: Vec<u8>,
}

impl Connection {
    pub fn handle(stream: TcpStream, session_manager: SessionManager, config: Arc<ServerConfig>, running: Arc<AtomicBool>) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let read_half = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };
        let write_half: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(stream)));

        let handler = RtspConnection::new(session_manager.clone(), peer_addr, config, write_half.clone());

        let mut conn = Connection {
            read_half,
            write_half,
            handler,
            peer_addr,
            buffer: Vec::new(),
        };

        let reason = conn.run(&running);
        conn.cleanup(&session_manager);

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// Request/response and interleaved-frame dispatch loop. Returns the
    /// reason for exiting.
    fn run(&mut self, running: &Arc<AtomicBool>) -> &'static str {
        let mut chunk = [0u8; 4096];
        while running.load(Ordering::SeqCst) {
            while let Some(consumed) = self.try_process_buffer() {
                self.buffer.drain(..consumed);
            }

            match self.read_half.read(&mut chunk) {
                Ok(0) => return "connection closed by client",
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return "read error",
            }
        }
        "server shutting down"
    }

    /// Try to consume exactly one unit (interleaved frame or RTSP request)
    /// from the front of the buffer. Returns `None` when the buffer holds
    /// an incomplete unit and more bytes are needed.
    fn try_process_buffer(&mut self) -> Option<usize> {
        if self.buffer.is_empty() {
            return None;
        }

        if self.buffer[0] == 0x24 {
            return self.try_process_interleaved_frame();
        }

        match RtspRequest::parse_buf(&self.buffer) {
            Ok((request, consumed)) => {
                tracing::debug!(peer = %self.peer_addr, method = %request.method, uri = %request.uri, "request");
                let response = self.handler.handle(&request);
                tracing::debug!(peer = %self.peer_addr, status = response.status_code, "response");
                self.write_response(&response);
                Some(consumed)
            }
            Err(RtspError::Parse { kind: ParseErrorKind::IncompleteBody }) => None,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "malformed RTSP request, dropping buffered bytes");
                let response = RtspResponse::bad_request().add_header("CSeq", "0");
                self.write_response(&response);
                Some(self.buffer.len())
            }
        }
    }

    fn try_process_interleaved_frame(&self) -> Option<usize> {
        if self.buffer.len() < 4 {
            return None;
        }
        let channel = self.buffer[1];
        let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        if self.buffer.len() < 4 + length {
            return None;
        }
        let payload = &self.buffer[4..4 + length];
        if let Err(e) = self.handler.route_inbound_rtcp(channel, payload) {
            tracing::warn!(peer = %self.peer_addr, channel, error = %e, "malformed inbound interleaved RTCP frame");
        }
        Some(4 + length)
    }

    fn write_response(&self, response: &RtspResponse) {
        let mut guard = self.write_half.lock();
        if guard.write_all(response.serialize().as_bytes()).is_err() {
            tracing::warn!(peer = %self.peer_addr, "failed to write RTSP response");
        }
    }

    fn cleanup(&self, session_manager: &SessionManager) {
        let orphaned = self.handler.session_ids().to_vec();
        if !orphaned.is_empty() {
            let removed = session_manager.remove_sessions(&orphaned);
            tracing::info!(peer = %self.peer_addr, removed, "cleaned up sessions on disconnect");
        }
    }
}
