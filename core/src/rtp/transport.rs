//! Per-session delivery path for RTP/RTCP packets: either a dedicated UDP
//! socket pair, or multiplexed inside the RTSP TCP connection as
//! interleaved binary frames (RFC 2326 §10.12).

use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Where RTP/RTCP packets for one stream are sent.
///
/// The UDP flavor uses two distinct server-side sockets — one bound to the
/// RTP port, one to the RTCP port — matching the `server_port=L1-L2` pair
/// advertised in the SETUP response (§4.7); a shared socket would collapse
/// the two advertised local ports into one.
pub enum RtpTransport {
    Udp {
        socket_rtp: UdpSocket,
        socket_rtcp: UdpSocket,
        peer_rtp: SocketAddr,
        peer_rtcp: SocketAddr,
    },
    Interleaved {
        channel_rtp: u8,
        channel_rtcp: u8,
        rtsp_socket: Arc<Mutex<Box<dyn Write + Send>>>,
    },
}

impl RtpTransport {
    pub fn send_rtp(&self, packet: &[u8]) -> Result<()> {
        match self {
            RtpTransport::Udp { socket_rtp, peer_rtp, .. } => {
                socket_rtp.send_to(packet, peer_rtp)?;
                Ok(())
            }
            RtpTransport::Interleaved {
                channel_rtp,
                rtsp_socket,
                ..
            } => write_interleaved(rtsp_socket, *channel_rtp, packet),
        }
    }

    pub fn send_rtcp(&self, packet: &[u8]) -> Result<()> {
        match self {
            RtpTransport::Udp { socket_rtcp, peer_rtcp, .. } => {
                socket_rtcp.send_to(packet, peer_rtcp)?;
                Ok(())
            }
            RtpTransport::Interleaved {
                channel_rtcp,
                rtsp_socket,
                ..
            } => write_interleaved(rtsp_socket, *channel_rtcp, packet),
        }
    }

    /// A cloned handle to the RTCP receive socket, for a background thread
    /// to listen for inbound Receiver Reports / SDES / BYE. `None` for
    /// interleaved transports, whose inbound RTCP arrives demuxed from the
    /// RTSP TCP stream instead (§4.9).
    pub fn rtcp_recv_socket(&self) -> Option<UdpSocket> {
        match self {
            RtpTransport::Udp { socket_rtcp, .. } => socket_rtcp.try_clone().ok(),
            RtpTransport::Interleaved { .. } => None,
        }
    }
}

fn write_interleaved(socket: &Arc<Mutex<Box<dyn Write + Send>>>, channel: u8, payload: &[u8]) -> Result<()> {
    let mut framed = Vec::with_capacity(4 + payload.len());
    framed.push(0x24); // '$'
    framed.push(channel);
    framed.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    framed.extend_from_slice(payload);

    let mut guard = socket.lock();
    guard.write_all(&framed)?;
    Ok(())
}
