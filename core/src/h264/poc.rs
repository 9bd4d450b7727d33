//! Picture Order Count recovery across slices (ITU-T H.264 §8.2.1, POC type 0).

use super::bitreader::BitReader;
use super::sps::SeqParamSet;

/// Recovers the presentation-order Picture Order Count for each slice,
/// tracking the running `(prevLsb, prevMsb)` pair across IDR resets and
/// LSB wraparound.
///
/// Only `pic_order_cnt_type == 0` is handled — the only type the access-unit
/// grouping heuristic in [`crate::mp4::extractor`] needs to reorder.
#[derive(Debug, Default)]
pub struct PocTracker {
    prev_lsb: u32,
    prev_msb: i64,
}

/// NAL types that carry a slice header (coded slice, partitions, IDR slice).
pub fn is_slice_nal(nal_type: u8) -> bool {
    matches!(nal_type, 1 | 2 | 5)
}

impl PocTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the slice header of `nal` (header byte included) and return the
    /// reconstructed POC. `sps` must be the active parameter set for the
    /// stream. Returns `None` if `nal` is not a slice NAL.
    pub fn decode(&mut self, nal: &[u8], sps: &SeqParamSet) -> Option<i64> {
        if nal.is_empty() {
            return None;
        }
        let nal_ref_idc = (nal[0] & 0x60) >> 5;
        let nal_type = nal[0] & 0x1f;
        if !is_slice_nal(nal_type) {
            return None;
        }

        let mut r = BitReader::new(&nal[1..]);
        let _first_mb_in_slice = r.read_ue();
        let _slice_type = r.read_ue();
        let _pic_parameter_set_id = r.read_ue();
        let _frame_num = r.read_bits(sps.frame_bits);

        if sps.interlaced {
            let field_pic_flag = r.read_bit();
            if field_pic_flag == 1 {
                r.skip(1); // bottom_field_flag
            }
        }

        if nal_type == 5 {
            let _idr_pic_id = r.read_ue();
            self.prev_lsb = 0;
            self.prev_msb = 0;
        }

        if sps.poc_type != 0 {
            return None;
        }

        let lsb = r.read_bits(sps.poc_lsb_bits);
        let max_lsb = 1i64 << sps.poc_lsb_bits;

        let msb = if (lsb as i64) < self.prev_lsb as i64
            && (self.prev_lsb as i64 - lsb as i64) >= max_lsb / 2
        {
            self.prev_msb + max_lsb
        } else if (lsb as i64) > self.prev_lsb as i64
            && (lsb as i64 - self.prev_lsb as i64) > max_lsb / 2
        {
            self.prev_msb - max_lsb
        } else {
            self.prev_msb
        };

        if nal_ref_idc != 0 {
            self.prev_lsb = lsb;
            self.prev_msb = msb;
        }

        Some(msb + lsb as i64)
    }
}
