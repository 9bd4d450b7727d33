//! Sequence Parameter Set decoding (ITU-T H.264 §7.3.2.1.1).

use super::bitreader::BitReader;
use crate::error::{Result, RtspError};

/// Profiles that carry the high-profile chroma/bit-depth/scaling-list
/// extension fields after `seq_parameter_set_id` (§7.3.2.1.1).
const HIGH_PROFILE_FAMILY: [u32; 9] = [100, 110, 122, 244, 44, 83, 86, 118, 128];

/// Decoded Sequence Parameter Set fields needed to build SDP and drive
/// POC recovery. See [`crate::h264::poc::PocTracker`] for the related
/// per-slice state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqParamSet {
    /// Bit width of `frame_num` (`log2_max_frame_num_minus4 + 4`).
    pub frame_bits: u32,
    pub width: u32,
    pub height: u32,
    pub interlaced: bool,
    pub profile: u8,
    pub level: u8,
    pub compatibility: u8,
    /// `pic_order_cnt_type`, one of `{0, 1, 2}`.
    pub poc_type: u32,
    /// Bit width of `pic_order_cnt_lsb` (only meaningful when `poc_type == 0`).
    pub poc_lsb_bits: u32,
}

impl SeqParamSet {
    /// Decode an SPS RBSP (NAL header already stripped).
    pub fn decode(sps: &[u8]) -> Result<Self> {
        if sps.len() < 4 {
            return Err(RtspError::Bitstream("SPS too short".into()));
        }
        let mut r = BitReader::new(sps);

        let profile = r.read_bits(8) as u8;
        let compatibility = r.read_bits(8) as u8;
        let level = r.read_bits(8) as u8;
        let _seq_parameter_set_id = r.read_ue();

        if HIGH_PROFILE_FAMILY.contains(&(profile as u32)) {
            let chroma_format_idc = r.read_ue();
            if chroma_format_idc == 3 {
                r.skip(1); // separate_colour_plane_flag
            }
            let _bit_depth_luma_minus8 = r.read_ue();
            let _bit_depth_chroma_minus8 = r.read_ue();
            r.skip(1); // qpprime_y_zero_transform_bypass_flag
            let seq_scaling_matrix_present = r.read_bit();
            if seq_scaling_matrix_present == 1 {
                let count = if chroma_format_idc != 3 { 8 } else { 12 };
                for i in 0..count {
                    let present = r.read_bit();
                    if present == 1 {
                        let size = if i < 6 { 16 } else { 64 };
                        skip_scaling_list(&mut r, size);
                    }
                }
            }
        }

        let log2_max_frame_num_minus4 = r.read_ue();
        let frame_bits = log2_max_frame_num_minus4 + 4;
        let poc_type = r.read_ue();

        let mut poc_lsb_bits = 0;
        match poc_type {
            0 => {
                let log2_max_pic_order_cnt_lsb_minus4 = r.read_ue();
                poc_lsb_bits = log2_max_pic_order_cnt_lsb_minus4 + 4;
            }
            1 => {
                r.skip(1); // delta_pic_order_always_zero_flag
                let _offset_for_non_ref_pic = r.read_se();
                let _offset_for_top_to_bottom_field = r.read_se();
                let num_ref_frames_in_pic_order_cnt_cycle = r.read_ue();
                for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
                    let _ = r.read_se();
                }
            }
            2 => {}
            _ => return Err(RtspError::Bitstream(format!("invalid pic_order_cnt_type {poc_type}"))),
        }

        let _num_ref_frames = r.read_ue();
        r.skip(1); // gaps_in_frame_num_value_allowed_flag
        let pic_width_in_mbs_minus1 = r.read_ue();
        let pic_height_in_map_units_minus1 = r.read_ue();

        let width = (pic_width_in_mbs_minus1 + 1) * 16;
        let mut height = (pic_height_in_map_units_minus1 + 1) * 16;

        if width > 2000 || height > 2000 {
            return Err(RtspError::Bitstream(format!(
                "SPS dimensions out of range: {width}x{height}"
            )));
        }

        let frame_mbs_only_flag = r.read_bit();
        let interlaced = frame_mbs_only_flag == 0;
        if interlaced {
            height *= 2;
            r.skip(1); // mb_adaptive_frame_field_flag
        }
        r.skip(1); // direct_8x8_inference_flag

        Ok(SeqParamSet {
            frame_bits,
            width,
            height,
            interlaced,
            profile,
            level,
            compatibility,
            poc_type,
            poc_lsb_bits,
        })
    }
}

/// Skip a scaling list using the canonical delta walker (§7.3.2.1.1.1):
/// each entry updates `next_scale` via a signed Exp-Golomb delta until
/// either `size` entries are consumed or `next_scale` hits zero (fall-back
/// to the default/flat list, which we don't materialize since callers
/// only need byte offsets, not scaling values).
fn skip_scaling_list(r: &mut BitReader, size: u32) {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = r.read_se();
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hand-built baseline-profile SPS for a 320x240 progressive stream,
    /// frame_num width 4 bits, poc_type 0, poc_lsb width 4 bits.
    /// Bits after profile/compat/level/seq_parameter_set_id(ue=0):
    ///   log2_max_frame_num_minus4 = 0  (ue -> "1")
    ///   pic_order_cnt_type = 0         (ue -> "1")
    ///   log2_max_pic_order_cnt_lsb_minus4 = 0 (ue -> "1")
    ///   num_ref_frames = 1             (ue(1) -> "010")
    ///   gaps_in_frame_num_allowed = 0  (1 bit "0")
    ///   pic_width_in_mbs_minus1 = 19   (320/16-1=19, ue(19) -> "000010100")
    ///   pic_height_in_map_units_minus1 = 14 (240/16-1=14, ue(14) -> "0001111")
    ///   frame_mbs_only_flag = 1
    ///   direct_8x8_inference_flag = 1
    fn build_baseline_sps_bits() -> Vec<u8> {
        let mut bits: Vec<u8> = Vec::new();
        // profile=66 compat=0 level=30 (3 bytes, MSB first)
        for byte in [66u8, 0, 30] {
            for i in (0..8).rev() {
                bits.push((byte >> i) & 1);
            }
        }
        fn push_ue(bits: &mut Vec<u8>, v: u32) {
            let codeword = v + 1;
            let nbits = 32 - codeword.leading_zeros();
            for _ in 0..nbits - 1 {
                bits.push(0);
            }
            for i in (0..nbits).rev() {
                bits.push(((codeword >> i) & 1) as u8);
            }
        }
        push_ue(&mut bits, 0); // seq_parameter_set_id
        push_ue(&mut bits, 0); // log2_max_frame_num_minus4
        push_ue(&mut bits, 0); // pic_order_cnt_type
        push_ue(&mut bits, 0); // log2_max_pic_order_cnt_lsb_minus4
        push_ue(&mut bits, 1); // num_ref_frames
        bits.push(0); // gaps_in_frame_num_value_allowed_flag
        push_ue(&mut bits, 19); // pic_width_in_mbs_minus1
        push_ue(&mut bits, 14); // pic_height_in_map_units_minus1
        bits.push(1); // frame_mbs_only_flag
        bits.push(1); // direct_8x8_inference_flag
        // pad to byte boundary
        while !bits.len().is_multiple_of(8) {
            bits.push(0);
        }

        let mut bytes = vec![0u8; bits.len() / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit == 1 {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        bytes
    }

    #[test]
    fn decodes_baseline_profile_dimensions() {
        let sps = build_baseline_sps_bits();
        let parsed = SeqParamSet::decode(&sps).unwrap();
        assert_eq!(parsed.width, 320);
        assert_eq!(parsed.height, 240);
        assert!(!parsed.interlaced);
        assert_eq!(parsed.profile, 66);
        assert_eq!(parsed.poc_type, 0);
        assert_eq!(parsed.poc_lsb_bits, 4);
        assert_eq!(parsed.frame_bits, 4);
    }

    #[test]
    fn rejects_oversized_dimensions() {
        // A width ue() encoding that resolves to > 2000 pixels wide should be rejected.
        let mut bits: Vec<u8> = Vec::new();
        for byte in [100u8, 0, 30] {
            for i in (0..8).rev() {
                bits.push((byte >> i) & 1);
            }
        }
        // profile 100 is high-profile family; keep it simple and use 66 instead in
        // most tests. Here exercise only the bounds check via a minimal baseline SPS
        // with an enormous width.
        bits.clear();
        for byte in [66u8, 0, 30] {
            for i in (0..8).rev() {
                bits.push((byte >> i) & 1);
            }
        }
        let push_ue = |bits: &mut Vec<u8>, v: u32| {
            let codeword = v + 1;
            let nbits = 32 - codeword.leading_zeros();
            for _ in 0..nbits - 1 {
                bits.push(0);
            }
            for i in (0..nbits).rev() {
                bits.push(((codeword >> i) & 1) as u8);
            }
        };
        push_ue(&mut bits, 0); // seq_parameter_set_id
        push_ue(&mut bits, 0); // log2_max_frame_num_minus4
        push_ue(&mut bits, 0); // pic_order_cnt_type
        push_ue(&mut bits, 0); // log2_max_pic_order_cnt_lsb_minus4
        push_ue(&mut bits, 1); // num_ref_frames
        bits.push(0);
        push_ue(&mut bits, 200); // pic_width_in_mbs_minus1 -> width 3216
        push_ue(&mut bits, 14);
        bits.push(1);
        bits.push(1);
        while !bits.len().is_multiple_of(8) {
            bits.push(0);
        }
        let mut bytes = vec![0u8; bits.len() / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit == 1 {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        assert!(SeqParamSet::decode(&bytes).is_err());
    }

    #[test]
    fn rejects_invalid_poc_type() {
        let mut bits: Vec<u8> = Vec::new();
        for byte in [66u8, 0, 30] {
            for i in (0..8).rev() {
                bits.push((byte >> i) & 1);
            }
        }
        let push_ue = |bits: &mut Vec<u8>, v: u32| {
            let codeword = v + 1;
            let nbits = 32 - codeword.leading_zeros();
            for _ in 0..nbits - 1 {
                bits.push(0);
            }
            for i in (0..nbits).rev() {
                bits.push(((codeword >> i) & 1) as u8);
            }
        };
        push_ue(&mut bits, 0); // seq_parameter_set_id
        push_ue(&mut bits, 0); // log2_max_frame_num_minus4
        push_ue(&mut bits, 3); // pic_order_cnt_type = 3 (invalid)
        while !bits.len().is_multiple_of(8) {
            bits.push(0);
        }
        let mut bytes = vec![0u8; bits.len() / 8];
        for (i, &bit) in bits.iter().enumerate() {
            if bit == 1 {
                bytes[i / 8] |= 0x80 >> (i % 8);
            }
        }
        assert!(SeqParamSet::decode(&bytes).is_err());
    }
}
