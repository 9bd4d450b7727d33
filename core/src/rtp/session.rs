//! Per-stream RTP/RTCP session: packet/byte counters, Sender Report
//! scheduling, Receiver Report demuxing, and the single-owner send path
//! that keeps counters consistent with what actually went on the wire.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::rtcp::{build_sender_report, parse_compound, ReportBlock, RtcpPacket};
use crate::rtp::header::{build_header, sequence_for, timestamp_for};
use crate::rtp::packetizer::{packetize_aac_au, packetize_h264_nal, DEFAULT_MTU};
use crate::rtp::transport::RtpTransport;

/// Minimum interval between consecutive Sender Reports (§4.6).
const SR_INTERVAL: Duration = Duration::from_secs(1);

/// One stream's RTP delivery state within an `RtspSession`.
pub struct RtpSession {
    pub ssrc: u32,
    pub stream_id: u32,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub transport: RtpTransport,

    start_seq: u16,
    packets: u64,
    bytes_sent: u64,

    rtp_base: u32,
    pts_base: Option<f64>,
    ntp_base: u64,

    last_sr_at: Option<Instant>,
    packets_at_last_sr: u64,
    bytes_at_last_sr: u64,

    source_description: Option<String>,
    seen_first_idr: bool,

    rr_events: Option<mpsc::Sender<ReportBlock>>,
}

impl RtpSession {
    pub fn new(ssrc: u32, stream_id: u32, payload_type: u8, clock_rate: u32, rtp_base: u32, ntp_base: u64, transport: RtpTransport) -> Self {
        Self {
            ssrc,
            stream_id,
            payload_type,
            clock_rate,
            transport,
            start_seq: rand::random::<u16>(),
            packets: 0,
            bytes_sent: 0,
            rtp_base,
            pts_base: None,
            ntp_base,
            last_sr_at: None,
            packets_at_last_sr: 0,
            bytes_at_last_sr: 0,
            source_description: None,
            seen_first_idr: false,
            rr_events: None,
        }
    }

    /// Subscribe to this session's inbound Receiver Report blocks (one
    /// [`ReportBlock`] per block per RR packet), so an operator/UI can
    /// observe jitter and loss (spec §4.8). Replaces any previous
    /// subscription.
    pub fn subscribe_receiver_reports(&mut self) -> mpsc::Receiver<ReportBlock> {
        let (tx, rx) = mpsc::channel();
        self.rr_events = Some(tx);
        rx
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets
    }

    /// Sequence number and RTP timestamp of the next packet this session
    /// will emit, for the `RTP-Info` header on a PLAY response (RFC 2326
    /// §12.33). Before any media has been sent this is just the session's
    /// randomized starting sequence/timestamp.
    pub fn next_rtp_info(&self) -> (u16, u32) {
        let seq = sequence_for(self.start_seq, self.packets);
        let ts = self.pts_base.map_or(self.rtp_base, |base| timestamp_for(self.rtp_base, base, base, self.clock_rate));
        (seq, ts)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn rtp_timestamp(&mut self, pts: f64) -> u32 {
        let base = *self.pts_base.get_or_insert(pts);
        timestamp_for(self.rtp_base, base, pts, self.clock_rate)
    }

    fn send_one(&mut self, payload: &[u8], marker: bool, pts: f64) -> Result<()> {
        let seq = sequence_for(self.start_seq, self.packets);
        let ts = self.rtp_timestamp(pts);
        let header = build_header(self.payload_type, marker, seq, ts, self.ssrc);

        let mut packet = Vec::with_capacity(12 + payload.len());
        packet.extend_from_slice(&header);
        packet.extend_from_slice(payload);

        self.transport.send_rtp(&packet)?;
        self.packets += 1;
        self.bytes_sent += payload.len() as u64;
        Ok(())
    }

    /// Send one H.264 access unit (list of NALs already stripped of start
    /// codes). Fragments are suppressed until the first IDR has been seen
    /// in this session, per §4.8.
    pub fn send_h264_access_unit(&mut self, nalus: &[Vec<u8>], pts: f64) -> Result<()> {
        let contains_idr = nalus.iter().any(|n| !n.is_empty() && n[0] & 0x1f == 5);
        if contains_idr {
            self.seen_first_idr = true;
        }
        if !self.seen_first_idr {
            return Ok(());
        }

        for (i, nal) in nalus.iter().enumerate() {
            let is_last_nal = i == nalus.len() - 1;
            let fragments = packetize_h264_nal(nal, DEFAULT_MTU, is_last_nal);
            for fragment in fragments {
                self.send_one(&fragment.bytes, fragment.is_last, pts)?;
            }
        }
        Ok(())
    }

    /// Send one AAC access unit. Oversized AUs (larger than fit in one
    /// unfragmented packet) are dropped; the caller logs the warning since
    /// it knows the session/stream identity worth attaching to the log.
    pub fn send_aac_access_unit(&mut self, au: &[u8], pts: f64) -> Result<bool> {
        if 12 + 4 + au.len() > DEFAULT_MTU {
            return Ok(false);
        }
        let payload = packetize_aac_au(au);
        self.send_one(&payload, true, pts)?;
        Ok(true)
    }

    /// Emit a Sender Report if at least [`SR_INTERVAL`] has elapsed since
    /// the last one (or none has been sent yet).
    pub fn maybe_send_sr(&mut self, now: Instant) -> Result<bool> {
        let due = match self.last_sr_at {
            None => true,
            Some(last) => now.duration_since(last) >= SR_INTERVAL,
        };
        if !due {
            return Ok(false);
        }

        let packets_delta = (self.packets - self.packets_at_last_sr) as u32;
        let bytes_delta = (self.bytes_sent - self.bytes_at_last_sr) as u32;
        let rtp_ts = self.rtp_timestamp(self.pts_base.unwrap_or(0.0));

        let sr = build_sender_report(self.ssrc, self.ntp_base, rtp_ts, packets_delta, bytes_delta);
        self.transport.send_rtcp(&sr)?;

        self.last_sr_at = Some(now);
        self.packets_at_last_sr = self.packets;
        self.bytes_at_last_sr = self.bytes_sent;
        Ok(true)
    }

    /// Demux an inbound compound RTCP packet: updates `source_description`
    /// from SDES CNAME items; publishes Receiver Report blocks to any
    /// subscriber from [`subscribe_receiver_reports`](Self::subscribe_receiver_reports);
    /// BYE is observed (tears down locally, handled by the caller once it
    /// sees this return `true`); Sender Reports and unknown payloads are
    /// no-ops.
    pub fn handle_rtcp(&mut self, data: &[u8]) -> Result<bool> {
        let mut bye_received = false;
        for packet in parse_compound(data)? {
            match packet {
                RtcpPacket::SourceDescription { chunks } => {
                    for chunk in chunks {
                        if chunk.ssrc != self.ssrc && let Some(cname) = chunk.cname {
                            self.source_description = Some(cname);
                        }
                    }
                }
                RtcpPacket::Bye { .. } => bye_received = true,
                RtcpPacket::ReceiverReport(rr) => {
                    if let Some(tx) = &self.rr_events {
                        for block in rr.report_blocks {
                            let _ = tx.send(block);
                        }
                    }
                }
                RtcpPacket::SenderReport(_) | RtcpPacket::Unknown { .. } => {}
            }
        }
        Ok(bye_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn udp_loopback_session(ssrc: u32) -> (RtpSession, std::net::UdpSocket) {
        let server_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let client_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let client_addr = client_socket.local_addr().unwrap();
        server_socket.connect(client_addr).unwrap();
        let transport = RtpTransport::Udp {
            socket_rtp: server_socket.try_clone().unwrap(),
            socket_rtcp: server_socket,
            peer_rtp: client_addr,
            peer_rtcp: client_addr,
        };
        (
            RtpSession::new(ssrc, 1, 96, 90_000, 1000, 0, transport),
            client_socket,
        )
    }

    #[test]
    fn suppresses_fragments_until_first_idr() {
        let (mut session, client) = udp_loopback_session(0x1111);
        client.set_read_timeout(Some(std::time::Duration::from_millis(50))).unwrap();

        // Non-IDR slice before any IDR: dropped.
        session.send_h264_access_unit(&[vec![0x41, 0xAA]], 0.0).unwrap();
        let mut buf = [0u8; 1500];
        assert!(client.recv(&mut buf).is_err());

        // IDR arrives: subsequent packets are sent.
        session.send_h264_access_unit(&[vec![0x65, 0xBB]], 1.0 / 30.0).unwrap();
        let n = client.recv(&mut buf).unwrap();
        assert!(n > 0);
    }

    #[test]
    fn packet_and_byte_counters_track_sends() {
        let (mut session, _client) = udp_loopback_session(0x2222);
        session.send_h264_access_unit(&[vec![0x65, 1, 2, 3]], 0.0).unwrap();
        assert_eq!(session.packets_sent(), 1);
        assert_eq!(session.bytes_sent(), 4);
    }

    #[test]
    fn sr_not_due_twice_within_interval() {
        let (mut session, _client) = udp_loopback_session(0x3333);
        session.send_h264_access_unit(&[vec![0x65, 1]], 0.0).unwrap();
        let now = Instant::now();
        assert!(session.maybe_send_sr(now).unwrap());
        assert!(!session.maybe_send_sr(now).unwrap());
    }

    #[test]
    fn aac_oversized_au_is_dropped() {
        let (mut session, _client) = udp_loopback_session(0x4444);
        let huge = vec![0u8; DEFAULT_MTU];
        let sent = session.send_aac_access_unit(&huge, 0.0).unwrap();
        assert!(!sent);
        assert_eq!(session.packets_sent(), 0);
    }

    #[test]
    fn sdes_cname_updates_source_description() {
        let (mut session, _client) = udp_loopback_session(0x5555);
        let mut chunk = Vec::new();
        chunk.extend_from_slice(&0xABCDu32.to_be_bytes());
        chunk.push(1); // CNAME
        chunk.push(4);
        chunk.extend_from_slice(b"cam1");
        chunk.push(0);
        while chunk.len() % 4 != 0 {
            chunk.push(0);
        }
        let mut packet = vec![0x81, 202];
        let words = (chunk.len() / 4) as u16;
        packet.extend_from_slice(&words.to_be_bytes());
        packet.extend_from_slice(&chunk);

        session.handle_rtcp(&packet).unwrap();
        assert_eq!(session.source_description.as_deref(), Some("cam1"));
    }

    #[test]
    fn receiver_report_is_published_to_subscriber() {
        let (mut session, _client) = udp_loopback_session(0x6666);
        let rx = session.subscribe_receiver_reports();

        let mut body = Vec::new();
        body.extend_from_slice(&0x1111_2222u32.to_be_bytes()); // sender ssrc
        body.extend_from_slice(&0x3333_4444u32.to_be_bytes()); // block ssrc
        body.push(10); // fraction lost
        body.extend_from_slice(&[0, 0, 5]); // cumulative lost = 5
        body.extend_from_slice(&1000u32.to_be_bytes()); // highest sequence
        body.extend_from_slice(&50u32.to_be_bytes()); // jitter
        body.extend_from_slice(&77u32.to_be_bytes()); // last SR
        body.extend_from_slice(&99u32.to_be_bytes()); // delay since last SR

        let mut packet = vec![0x81, 201]; // RR, count=1
        let length_words = (body.len() / 4) as u16;
        packet.extend_from_slice(&length_words.to_be_bytes());
        packet.extend_from_slice(&body);

        session.handle_rtcp(&packet).unwrap();

        let block = rx.try_recv().expect("receiver report event published");
        assert_eq!(block.ssrc, 0x3333_4444);
        assert_eq!(block.cumulative_lost, 5);
        assert_eq!(block.jitter, 50);
        assert!(rx.try_recv().is_err());
    }
}
