//! RTCP compound packet parsing (RFC 3550 §6): Sender Reports, Receiver
//! Reports, source descriptions, and BYE. Hand-rolled rather than pulled
//! from a crate since only the subset that feeds session bookkeeping is
//! needed — full RTCP (APP, XR, profile extensions) is out of scope.

use crate::error::{Result, RtspError};

const SR: u8 = 200;
const RR: u8 = 201;
const SDES: u8 = 202;
const BYE: u8 = 203;

const SDES_CNAME: u8 = 1;

/// One parsed packet out of an RTCP compound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpPacket {
    SenderReport(SenderReport),
    ReceiverReport(ReceiverReport),
    SourceDescription { chunks: Vec<SdesChunk> },
    Bye { sources: Vec<u32> },
    /// A recognized-but-unhandled payload type; length-skipped, not dropped.
    Unknown { payload_type: u8 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SenderReport {
    pub ssrc: u32,
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
    pub report_blocks: Vec<ReportBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverReport {
    pub ssrc: u32,
    pub report_blocks: Vec<ReportBlock>,
}

/// A 24-byte reception report block (RFC 3550 §6.4.1/§6.4.2).
#[derive(Debug, Clone, PartialEq)]
pub struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: u32,
    pub highest_sequence: u32,
    pub jitter: u32,
    pub last_sr: u32,
    pub delay_since_last_sr: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdesChunk {
    pub ssrc: u32,
    pub cname: Option<String>,
}

/// Parse an RTCP compound packet into its individual messages, skipping
/// any packet type this crate doesn't act on by its declared length so
/// parsing can continue past it.
pub fn parse_compound(mut data: &[u8]) -> Result<Vec<RtcpPacket>> {
    let mut packets = Vec::new();
    while data.len() >= 4 {
        let version = data[0] >> 6;
        if version != 2 {
            return Err(RtspError::Rtcp(format!("unsupported RTCP version {version}")));
        }
        let count = data[0] & 0x1f;
        let payload_type = data[1];
        let length_words = u16::from_be_bytes([data[2], data[3]]) as usize;
        let total = (length_words + 1) * 4;
        if data.len() < total {
            return Err(RtspError::Rtcp(format!(
                "RTCP packet declares {total} bytes but only {} remain",
                data.len()
            )));
        }
        let body = &data[4..total];

        let packet = match payload_type {
            SR => RtcpPacket::SenderReport(parse_sender_report(body, count)?),
            RR => RtcpPacket::ReceiverReport(parse_receiver_report(body, count)?),
            SDES => RtcpPacket::SourceDescription {
                chunks: parse_sdes(body, count)?,
            },
            BYE => RtcpPacket::Bye {
                sources: parse_bye(body, count)?,
            },
            other => RtcpPacket::Unknown { payload_type: other },
        };
        packets.push(packet);
        data = &data[total..];
    }
    Ok(packets)
}

fn parse_sender_report(body: &[u8], report_count: u8) -> Result<SenderReport> {
    if body.len() < 20 {
        return Err(RtspError::Rtcp("SR body too short".into()));
    }
    let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let ntp_timestamp = u64::from_be_bytes(body[4..12].try_into().unwrap());
    let rtp_timestamp = u32::from_be_bytes(body[12..16].try_into().unwrap());
    let packet_count = u32::from_be_bytes(body[16..20].try_into().unwrap());
    let octet_count = u32::from_be_bytes(body[20..24].try_into().unwrap());
    let report_blocks = parse_report_blocks(&body[24..], report_count)?;
    Ok(SenderReport {
        ssrc,
        ntp_timestamp,
        rtp_timestamp,
        packet_count,
        octet_count,
        report_blocks,
    })
}

fn parse_receiver_report(body: &[u8], report_count: u8) -> Result<ReceiverReport> {
    if body.len() < 4 {
        return Err(RtspError::Rtcp("RR body too short".into()));
    }
    let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let report_blocks = parse_report_blocks(&body[4..], report_count)?;
    Ok(ReceiverReport { ssrc, report_blocks })
}

fn parse_report_blocks(mut body: &[u8], count: u8) -> Result<Vec<ReportBlock>> {
    let mut blocks = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if body.len() < 24 {
            return Err(RtspError::Rtcp("truncated reception report block".into()));
        }
        let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
        let fraction_lost = body[4];
        let cumulative_lost = u32::from_be_bytes([0, body[5], body[6], body[7]]);
        let highest_sequence = u32::from_be_bytes(body[8..12].try_into().unwrap());
        let jitter = u32::from_be_bytes(body[12..16].try_into().unwrap());
        let last_sr = u32::from_be_bytes(body[16..20].try_into().unwrap());
        let delay_since_last_sr = u32::from_be_bytes(body[20..24].try_into().unwrap());
        blocks.push(ReportBlock {
            ssrc,
            fraction_lost,
            cumulative_lost,
            highest_sequence,
            jitter,
            last_sr,
            delay_since_last_sr,
        });
        body = &body[24..];
    }
    Ok(blocks)
}

fn parse_sdes(mut body: &[u8], chunk_count: u8) -> Result<Vec<SdesChunk>> {
    let mut chunks = Vec::with_capacity(chunk_count as usize);
    for _ in 0..chunk_count {
        if body.len() < 4 {
            return Err(RtspError::Rtcp("truncated SDES chunk".into()));
        }
        let ssrc = u32::from_be_bytes(body[0..4].try_into().unwrap());
        let mut rest = &body[4..];
        let mut cname = None;
        loop {
            let Some(&item_type) = rest.first() else {
                return Err(RtspError::Rtcp("SDES chunk missing terminator".into()));
            };
            if item_type == 0 {
                rest = &rest[1..];
                break;
            }
            let len = *rest.get(1).ok_or_else(|| RtspError::Rtcp("truncated SDES item".into()))? as usize;
            let text = rest
                .get(2..2 + len)
                .ok_or_else(|| RtspError::Rtcp("truncated SDES item text".into()))?;
            if item_type == SDES_CNAME {
                cname = Some(String::from_utf8_lossy(text).into_owned());
            }
            rest = &rest[2 + len..];
        }
        // Chunks are padded to a 32-bit boundary.
        let consumed = body.len() - rest.len();
        let padded = consumed.div_ceil(4) * 4;
        if body.len() < padded {
            return Err(RtspError::Rtcp("SDES chunk padding overruns body".into()));
        }
        body = &body[padded..];
        chunks.push(SdesChunk { ssrc, cname });
    }
    Ok(chunks)
}

fn parse_bye(body: &[u8], source_count: u8) -> Result<Vec<u32>> {
    let needed = source_count as usize * 4;
    if body.len() < needed {
        return Err(RtspError::Rtcp("truncated BYE source list".into()));
    }
    Ok(body[..needed]
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes(c.try_into().unwrap()))
        .collect())
}

/// Build a 28-byte Sender Report with no reception report blocks, the
/// shape this crate always emits (§4.6).
pub fn build_sender_report(ssrc: u32, ntp_timestamp: u64, rtp_timestamp: u32, packet_count: u32, octet_count: u32) -> [u8; 28] {
    let mut out = [0u8; 28];
    out[0] = 0x80; // version=2, padding=0, report_count=0
    out[1] = SR;
    out[2..4].copy_from_slice(&6u16.to_be_bytes()); // length = 7 words - 1
    out[4..8].copy_from_slice(&ssrc.to_be_bytes());
    out[8..16].copy_from_slice(&ntp_timestamp.to_be_bytes());
    out[16..20].copy_from_slice(&rtp_timestamp.to_be_bytes());
    out[20..24].copy_from_slice(&packet_count.to_be_bytes());
    out[24..28].copy_from_slice(&octet_count.to_be_bytes());
    out
}
