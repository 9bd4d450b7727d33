//! Codec payload packetization: H.264 (RFC 6184) and AAC/MPEG4-GENERIC
//! (RFC 3640), producing RTP payload bytes (header not included — the
//! caller in [`crate::rtp::session`] attaches it per packet).

/// Default MTU for payload fragmentation decisions.
pub const DEFAULT_MTU: usize = 1200;

/// One packetized RTP payload plus whether it is the final packet of its
/// access unit (marker bit should be set).
pub struct RtpPayload {
    pub bytes: Vec<u8>,
    pub is_last: bool,
}

/// Packetize one H.264 NAL unit (header byte included, no start code) into
/// one or more RTP payloads.
///
/// Single NAL Unit mode (RFC 6184 §5.6) is used when `12 + nal.len() <= mtu`;
/// otherwise the NAL is split via FU-A fragmentation (§5.8).
pub fn packetize_h264_nal(nal: &[u8], mtu: usize, is_last_nal_in_au: bool) -> Vec<RtpPayload> {
    if nal.is_empty() {
        return Vec::new();
    }

    if 12 + nal.len() <= mtu {
        return vec![RtpPayload {
            bytes: nal.to_vec(),
            is_last: is_last_nal_in_au,
        }];
    }

    let nal_header = nal[0];
    let fu_indicator = (nal_header & 0xE0) | 28;
    let payload = &nal[1..];
    let max_fragment = mtu.saturating_sub(12 + 2);

    let mut packets = Vec::new();
    let mut offset = 0usize;
    while offset < payload.len() {
        let remaining = payload.len() - offset;
        let chunk_size = remaining.min(max_fragment);
        let is_first = offset == 0;
        let is_final_fragment = offset + chunk_size == payload.len();

        let fu_header = (nal_header & 0x1F) | ((is_first as u8) << 7) | ((is_final_fragment as u8) << 6);

        let mut bytes = Vec::with_capacity(2 + chunk_size);
        bytes.push(fu_indicator);
        bytes.push(fu_header);
        bytes.extend_from_slice(&payload[offset..offset + chunk_size]);

        packets.push(RtpPayload {
            bytes,
            is_last: is_last_nal_in_au && is_final_fragment,
        });
        offset += chunk_size;
    }
    packets
}

/// Build the RFC 3640 (MPEG4-GENERIC) payload for one AAC access unit: a
/// single 4-byte AU-headers-length/AU-header prefix followed by the raw
/// AAC frame, with no fragmentation. AUs larger than `mtu` are dropped by
/// the caller (a warning is logged there, not here, since only the caller
/// knows the stream/session identity worth logging).
pub fn packetize_aac_au(au: &[u8]) -> Vec<u8> {
    let au_size = (au.len() as u16) & 0x1FFF; // 13-bit size field
    let au_header: u16 = au_size << 3; // index (3 bits) = 0

    let mut out = Vec::with_capacity(4 + au.len());
    out.extend_from_slice(&16u16.to_be_bytes()); // AU-headers-length in bits
    out.extend_from_slice(&au_header.to_be_bytes());
    out.extend_from_slice(au);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_nal_is_single_packet() {
        let nal = vec![0x65, 0xAA, 0xBB, 0xCC];
        let packets = packetize_h264_nal(&nal, DEFAULT_MTU, true);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].bytes, nal);
        assert!(packets[0].is_last);
    }

    #[test]
    fn nal_exactly_at_mtu_boundary_is_single_packet() {
        let nal = vec![0x65u8; DEFAULT_MTU - 12];
        let packets = packetize_h264_nal(&nal, DEFAULT_MTU, true);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn oversized_nal_uses_fu_a() {
        let mut nal = vec![0x65u8]; // nal_ref_idc=3 (0x60), type=5
        nal.extend(vec![0xAAu8; DEFAULT_MTU]);
        let packets = packetize_h264_nal(&nal, DEFAULT_MTU, true);
        assert!(packets.len() > 1);

        let first = &packets[0].bytes;
        assert_eq!(first[0] & 0x1f, 28); // FU indicator type
        assert_eq!(first[0] & 0x60, 0x60); // NRI carried over
        assert_eq!(first[1] & 0x80, 0x80); // start bit
        assert_eq!(first[1] & 0x40, 0); // not end
        assert_eq!(first[1] & 0x1f, 5); // original NAL type preserved

        let last = packets.last().unwrap();
        assert_eq!(last.bytes[1] & 0x40, 0x40); // end bit
        assert!(last.is_last);
        assert!(!packets[0].is_last);
    }

    #[test]
    fn fu_a_fragments_reassemble_to_original_payload() {
        let mut nal = vec![0x65u8];
        nal.extend((0..3000u32).map(|i| (i % 256) as u8));
        let packets = packetize_h264_nal(&nal, DEFAULT_MTU, true);

        let mut reassembled = vec![nal[0]];
        for p in &packets {
            reassembled.extend_from_slice(&p.bytes[2..]);
        }
        assert_eq!(reassembled, nal);
    }

    #[test]
    fn aac_au_header_encodes_size() {
        let au = vec![0u8; 200];
        let payload = packetize_aac_au(&au);
        assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 16);
        let au_header = u16::from_be_bytes([payload[2], payload[3]]);
        assert_eq!(au_header >> 3, 200);
        assert_eq!(au_header & 0x7, 0);
        assert_eq!(&payload[4..], &au[..]);
    }
}
