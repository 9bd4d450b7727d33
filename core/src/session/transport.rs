use std::net::SocketAddr;

/// Negotiated RTP/RTCP transport parameters for a session (RFC 2326 §12.39).
///
/// Created during SETUP from the client's `Transport` header and the
/// server's allocated port pair. Used to address UDP packets.
///
/// ## Wire format example
///
/// ```text
/// Client → Server:
///   Transport: RTP/AVP;unicast;client_port=8000-8001
///
/// Server → Client:
///   Transport: RTP/AVP;unicast;client_port=8000-8001;server_port=5000-5001
/// ```
///
/// The server sends RTP to `client_addr:client_rtp_port` and (future)
/// RTCP to `client_addr:client_rtcp_port`.
#[derive(Debug, Clone)]
pub struct Transport {
    /// Client's RTP receive port.
    pub client_rtp_port: u16,
    /// Client's RTCP receive port (typically `client_rtp_port + 1`).
    pub client_rtcp_port: u16,
    /// Server's RTP send port (advertised to client, not actually bound).
    pub server_rtp_port: u16,
    /// Server's RTCP port (advertised to client, not actually bound).
    pub server_rtcp_port: u16,
    /// Full socket address for RTP delivery (`client_ip:client_rtp_port`).
    pub client_addr: SocketAddr,
}

/// Parsed client-side transport info from the RTSP `Transport` header.
///
/// Handles both `RTP/AVP;unicast;client_port=A-B` (UDP) and
/// `RTP/AVP/TCP;interleaved=N-M` (RFC 2326 §10.12).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportHeader {
    Udp { client_rtp_port: u16, client_rtcp_port: u16 },
    Interleaved { channel_rtp: u8, channel_rtcp: u8 },
}

impl TransportHeader {
    /// Parse the `Transport` header value (RFC 2326 §12.39).
    ///
    /// ## Examples
    ///
    /// ```
    /// use camstream_rtsp::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th, TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// let th = TransportHeader::parse("RTP/AVP/TCP;interleaved=0-1").unwrap();
    /// assert_eq!(th, TransportHeader::Interleaved { channel_rtp: 0, channel_rtcp: 1 });
    ///
    /// assert!(TransportHeader::parse("RTP/AVP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        for part in header.split(';') {
            let part = part.trim();
            if let Some(ports) = part.strip_prefix("client_port=") {
                let (rtp, rtcp) = parse_pair(ports)?;
                return Some(TransportHeader::Udp {
                    client_rtp_port: rtp,
                    client_rtcp_port: rtcp,
                });
            }
            if let Some(channels) = part.strip_prefix("interleaved=") {
                let (rtp, rtcp) = parse_pair(channels)?;
                return Some(TransportHeader::Interleaved {
                    channel_rtp: rtp as u8,
                    channel_rtcp: rtcp as u8,
                });
            }
        }
        None
    }
}

fn parse_pair(s: &str) -> Option<(u16, u16)> {
    let mut parts = s.split('-');
    let a: u16 = parts.next()?.parse().ok()?;
    let b: u16 = parts.next()?.parse().ok()?;
    Some((a, b))
}
