//! SDP (Session Description Protocol) generation (RFC 4566), shaped for the
//! fixed dual-track (H.264 video + optional AAC audio) layout this server
//! always advertises in response to DESCRIBE.
//!
//! ```text
//! v=0
//! o=- <rand> <rand> IN IP4 <ip>
//! s=Live stream from <device-name>
//! c=IN IP4 0.0.0.0
//! t=0 0
//! a=control:*
//! m=video 0 RTP/AVP 96
//! b=TIAS:<bitrate>
//! a=maxprate:<packets>.0000
//! a=control:streamid=1
//! a=rtpmap:96 H264/90000
//! a=mimetype:string;"video/H264"
//! a=framesize:96 <cx>-<cy>
//! a=Width:integer;<cx>
//! a=Height:integer;<cy>
//! a=fmtp:96 packetization-mode=1;profile-level-id=<hex6>;sprop-parameter-sets=<b64sps>,<b64pps>
//! m=audio 0 RTP/AVP 97
//! a=control:streamid=2
//! a=rtpmap:97 MPEG4-GENERIC/<sampleRate>/2
//! a=fmtp:97 streamtype=5; profile-level-id=1; mode=AAC-hbr; config=1210; SizeLength=13; IndexLength=3; IndexDeltaLength=3;
//! ```

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::h264::AvcC;
use crate::rtp::packetizer::DEFAULT_MTU;

pub const VIDEO_PAYLOAD_TYPE: u8 = 96;
pub const AUDIO_PAYLOAD_TYPE: u8 = 97;
pub const VIDEO_CLOCK_RATE: u32 = 90_000;

/// Everything the DESCRIBE handler needs to know to build the SDP body.
pub struct SdpParams<'a> {
    pub ip: &'a str,
    pub device_name: &'a str,
    pub avcc: &'a AvcC,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    /// `Some(sample_rate)` when this stream also carries AAC audio.
    pub audio_sample_rate: Option<u32>,
}

/// Build the DESCRIBE response body for the fixed video(+audio) layout.
///
/// `origin_rand` supplies the two `o=` identifiers (RFC 4566 §5.2); callers
/// pass freshly generated random `u32`s since this function stays free of
/// nondeterministic calls.
pub fn generate_sdp(params: &SdpParams<'_>, origin_rand: (u32, u32)) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- {} {} IN IP4 {}", origin_rand.0, origin_rand.1, params.ip));
    sdp.push(format!("s=Live stream from {}", params.device_name));
    sdp.push("c=IN IP4 0.0.0.0".to_string());
    sdp.push("t=0 0".to_string());
    sdp.push("a=control:*".to_string());

    sdp.push(format!("m=video 0 RTP/AVP {VIDEO_PAYLOAD_TYPE}"));
    sdp.push(format!("b=TIAS:{}", params.bitrate));
    sdp.push(format!("a=maxprate:{}.0000", packets_per_second(params.bitrate)));
    sdp.push("a=control:streamid=1".to_string());
    sdp.push(format!("a=rtpmap:{VIDEO_PAYLOAD_TYPE} H264/{VIDEO_CLOCK_RATE}"));
    sdp.push("a=mimetype:string;\"video/H264\"".to_string());
    sdp.push(format!("a=framesize:{VIDEO_PAYLOAD_TYPE} {}-{}", params.width, params.height));
    sdp.push(format!("a=Width:integer;{}", params.width));
    sdp.push(format!("a=Height:integer;{}", params.height));

    let profile_level_id = params.avcc.profile_level_id().unwrap_or_else(|| "420028".to_string());
    let sprop_sps = BASE64_STANDARD.encode(&params.avcc.sps);
    let sprop_pps = BASE64_STANDARD.encode(&params.avcc.pps);
    sdp.push(format!(
        "a=fmtp:{VIDEO_PAYLOAD_TYPE} packetization-mode=1;profile-level-id={profile_level_id};sprop-parameter-sets={sprop_sps},{sprop_pps}"
    ));

    if let Some(sample_rate) = params.audio_sample_rate {
        sdp.push(format!("m=audio 0 RTP/AVP {AUDIO_PAYLOAD_TYPE}"));
        sdp.push("a=control:streamid=2".to_string());
        sdp.push(format!("a=rtpmap:{AUDIO_PAYLOAD_TYPE} MPEG4-GENERIC/{sample_rate}/2"));
        sdp.push(format!(
            "a=fmtp:{AUDIO_PAYLOAD_TYPE} streamtype=5; profile-level-id=1; mode=AAC-hbr; config=1210; SizeLength=13; IndexLength=3; IndexDeltaLength=3;"
        ));
    }

    tracing::debug!(ip = params.ip, "generated SDP body");

    format!("{}\r\n", sdp.join("\r\n"))
}

/// Estimated sustained packet rate at `bitrate`, used for `a=maxprate`.
fn packets_per_second(bitrate: u32) -> u32 {
    let bits_per_packet = (DEFAULT_MTU as u32) * 8;
    bitrate / bits_per_packet.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_avcc() -> AvcC {
        AvcC::parse(&AvcC::build(&[0x67, 0x42, 0x00, 0x1e, 0xAA], &[0x68, 0xce, 0x38, 0x80])).unwrap()
    }

    #[test]
    fn generates_dual_track_sdp() {
        let avcc = sample_avcc();
        let params = SdpParams {
            ip: "192.168.1.100",
            device_name: "Front Door",
            avcc: &avcc,
            width: 1920,
            height: 1080,
            bitrate: 2_000_000,
            audio_sample_rate: Some(44_100),
        };
        let sdp = generate_sdp(&params, (111, 222));

        assert!(sdp.starts_with("v=0\r\n"));
        assert!(sdp.contains("o=- 111 222 IN IP4 192.168.1.100\r\n"));
        assert!(sdp.contains("s=Live stream from Front Door\r\n"));
        assert!(sdp.contains("c=IN IP4 0.0.0.0\r\n"));
        assert!(sdp.contains("a=control:*\r\n"));
        assert!(sdp.contains("m=video 0 RTP/AVP 96\r\n"));
        assert!(sdp.contains("b=TIAS:2000000\r\n"));
        assert!(sdp.contains("a=control:streamid=1\r\n"));
        assert!(sdp.contains("a=rtpmap:96 H264/90000\r\n"));
        assert!(sdp.contains("a=mimetype:string;\"video/H264\"\r\n"));
        assert!(sdp.contains("a=framesize:96 1920-1080\r\n"));
        assert!(sdp.contains("a=Width:integer;1920\r\n"));
        assert!(sdp.contains("a=Height:integer;1080\r\n"));
        assert!(sdp.contains("profile-level-id=42001e"));
        assert!(sdp.contains("m=audio 0 RTP/AVP 97\r\n"));
        assert!(sdp.contains("a=control:streamid=2\r\n"));
        assert!(sdp.contains("a=rtpmap:97 MPEG4-GENERIC/44100/2\r\n"));
        assert!(sdp.contains("SizeLength=13; IndexLength=3; IndexDeltaLength=3;"));
        assert!(sdp.ends_with("\r\n"));

        let video_idx = sdp.find("m=video").unwrap();
        let audio_idx = sdp.find("m=audio").unwrap();
        assert!(video_idx < audio_idx);
    }

    #[test]
    fn omits_audio_track_when_no_sample_rate_given() {
        let avcc = sample_avcc();
        let params = SdpParams {
            ip: "127.0.0.1",
            device_name: "Cam",
            avcc: &avcc,
            width: 640,
            height: 480,
            bitrate: 500_000,
            audio_sample_rate: None,
        };
        let sdp = generate_sdp(&params, (1, 2));
        assert!(!sdp.contains("m=audio"));
    }
}
