//! Tailing extractor: reads a growing MP4 fragment written by the encoder,
//! slices `mdat` into NAL units, groups them into access units, reorders by
//! POC, and re-associates capture-side presentation timestamps.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Result, RtspError};
use crate::h264::poc::{is_slice_nal, PocTracker};
use crate::h264::{read_length_prefixed, SeqParamSet};
use crate::mp4::walker::read_atom_header;

const DEFAULT_ROTATION_THRESHOLD: u64 = 50 * 1024 * 1024;
const DEFAULT_MAX_FILE_INDEX: u32 = 5;

/// Groups NALs into access units using the NAL-type/`nal_ref_idc`/
/// `first_mb_in_slice` heuristic mandated by §4.4.
///
/// Buffers the currently open access unit; [`push`](Self::push) returns the
/// previous access unit once a new-frame boundary is detected.
#[derive(Default)]
pub struct AccessUnitAssembler {
    pending: Vec<Vec<u8>>,
    prev_header: Option<(u8, u8)>,
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one NAL (header byte included, no start code / length prefix).
    /// Returns `Some(completed_au)` when this NAL starts a new access unit.
    pub fn push(&mut self, nal: Vec<u8>) -> Option<Vec<Vec<u8>>> {
        if nal.is_empty() {
            return None;
        }
        let idc = nal[0] & 0x60;
        let t = nal[0] & 0x1f;

        let boundary = match self.prev_header {
            None => false,
            Some((pidc, pt)) => pt < 6 && is_new_au_boundary(idc, t, pidc, pt, &nal),
        };

        self.prev_header = Some((idc, t));

        if boundary && !self.pending.is_empty() {
            let completed = std::mem::take(&mut self.pending);
            self.pending.push(nal);
            Some(completed)
        } else {
            self.pending.push(nal);
            None
        }
    }

    /// Flush whatever access unit is still open (end of stream / rotation).
    pub fn drain(&mut self) -> Option<Vec<Vec<u8>>> {
        if self.pending.is_empty() {
            None
        } else {
            self.prev_header = None;
            Some(std::mem::take(&mut self.pending))
        }
    }
}

fn is_new_au_boundary(idc: u8, t: u8, pidc: u8, pt: u8, nal: &[u8]) -> bool {
    if t >= 6 {
        return true;
    }
    if idc != pidc && (idc == 0 || pidc == 0) {
        return true;
    }
    if t != pt && t == 5 {
        return true;
    }
    if (1..=5).contains(&t) {
        let mut r = crate::h264::bitreader::BitReader::new(&nal[1..]);
        if r.read_ue() == 0 {
            return true;
        }
    }
    false
}

/// POC-ordered delivery buffer (§4.4). Reorders access units whose POC
/// arrives out of presentation order and re-associates capture timestamps
/// per the "first frame takes the latest timestamp of the batch" rule.
///
/// This rule only yields correct ordering for a single B-frame reorder
/// depth; deeper reorder patterns are a known limitation (see `spec.md`
/// design notes).
#[derive(Default)]
pub struct ReorderBuffer {
    frames: VecDeque<(i64, Vec<Vec<u8>>)>,
    times: VecDeque<f64>,
    prev_poc: i64,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capture-side presentation timestamp, in arrival order.
    pub fn push_timestamp(&mut self, pts: f64) {
        self.times.push_back(pts);
    }

    /// Submit a grouped access unit with its recovered POC (or `0` if POC
    /// could not be determined, e.g. no slice NAL parsed yet).
    pub fn submit(&mut self, poc: i64, nalus: Vec<Vec<u8>>, deliver: &mut dyn FnMut(Vec<Vec<u8>>, f64)) {
        if poc == 0 {
            self.flush(deliver);
            let pts = self.times.pop_front().unwrap_or(0.0);
            deliver(nalus, pts);
            self.prev_poc = 0;
        } else if poc > self.prev_poc {
            self.flush(deliver);
            self.prev_poc = poc;
            self.frames.push_back((poc, nalus));
        } else {
            self.frames.push_back((poc, nalus));
        }
    }

    fn flush(&mut self, deliver: &mut dyn FnMut(Vec<Vec<u8>>, f64)) {
        let k = self.frames.len();
        if k == 0 {
            return;
        }
        let mut window = Vec::with_capacity(k);
        for _ in 0..k {
            match self.times.pop_front() {
                Some(t) => window.push(t),
                None => break,
            }
        }
        let n = window.len();
        for (i, (_, nalus)) in self.frames.drain(..).enumerate() {
            let pts = if i == 0 {
                window.get(n.saturating_sub(1)).copied().unwrap_or(0.0)
            } else {
                window.get(i - 1).copied().unwrap_or(0.0)
            };
            deliver(nalus, pts);
        }
    }
}

/// Tails a growing MP4 fragment, slicing `mdat` into access units and
/// delivering them in POC-corrected presentation order.
pub struct FrameExtractor {
    path: PathBuf,
    file: File,
    mdat_start: Option<u64>,
    cursor: u64,
    length_size: u8,
    sps: Option<SeqParamSet>,
    poc_tracker: PocTracker,
    assembler: AccessUnitAssembler,
    reorder: ReorderBuffer,
    rotation_threshold: u64,
    max_file_index: u32,
    next_rotation_index: u32,
    bytes_in_first_second: u64,
    first_delivery_pts: Option<f64>,
    bits_per_second: u64,
}

impl FrameExtractor {
    pub fn open(path: impl AsRef<Path>, length_size: u8) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            file,
            mdat_start: None,
            cursor: 0,
            length_size,
            sps: None,
            poc_tracker: PocTracker::new(),
            assembler: AccessUnitAssembler::new(),
            reorder: ReorderBuffer::new(),
            rotation_threshold: DEFAULT_ROTATION_THRESHOLD,
            max_file_index: DEFAULT_MAX_FILE_INDEX,
            next_rotation_index: 0,
            bytes_in_first_second: 0,
            first_delivery_pts: None,
            bits_per_second: 0,
        })
    }

    pub fn with_rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold = bytes;
        self
    }

    pub fn set_sps(&mut self, sps: SeqParamSet) {
        self.sps = Some(sps);
    }

    pub fn push_timestamp(&mut self, pts: f64) {
        self.reorder.push_timestamp(pts);
    }

    pub fn bits_per_second(&self) -> u64 {
        self.bits_per_second
    }

    /// Whether the tailed file has exceeded the rotation threshold.
    pub fn should_rotate(&self) -> Result<bool> {
        let len = self.file.metadata()?.len();
        Ok(len >= self.rotation_threshold)
    }

    /// Locate `mdat` (if not already found) and deliver every complete
    /// access unit available so far via `deliver`. Safe to call repeatedly
    /// ("pump") as more bytes land in the file.
    pub fn pump(&mut self, deliver: &mut dyn FnMut(Vec<Vec<u8>>, f64)) -> Result<()> {
        let file_len = self.file.metadata()?.len();

        if self.mdat_start.is_none() {
            self.mdat_start = locate_mdat(&mut self.file, file_len)?;
            if let Some(start) = self.mdat_start {
                self.cursor = start;
            } else {
                return Ok(());
            }
        }

        loop {
            let remaining = file_len.saturating_sub(self.cursor);
            if remaining < self.length_size as u64 {
                return Ok(());
            }

            self.file.seek(SeekFrom::Start(self.cursor))?;
            let mut buf = vec![0u8; remaining as usize];
            self.file.read_exact(&mut buf)?;

            match read_length_prefixed(&buf, self.length_size) {
                Some((nal, consumed)) => {
                    self.cursor += consumed as u64;
                    self.ingest_nal(nal.to_vec(), deliver);
                }
                None => return Ok(()), // declared length exceeds available bytes; wait
            }
        }
    }

    fn ingest_nal(&mut self, nal: Vec<u8>, deliver: &mut dyn FnMut(Vec<Vec<u8>>, f64)) {
        if let Some(completed) = self.assembler.push(nal) {
            self.deliver_access_unit(completed, deliver);
        }
    }

    fn deliver_access_unit(&mut self, nalus: Vec<Vec<u8>>, deliver: &mut dyn FnMut(Vec<Vec<u8>>, f64)) {
        let poc = self.recover_poc(&nalus);
        let mut reorder = std::mem::take(&mut self.reorder);
        let mut wrapped = |au: Vec<Vec<u8>>, pts: f64| {
            let bytes: usize = au.iter().map(Vec::len).sum();
            self.track_bitrate(bytes, pts);
            deliver(au, pts);
        };
        reorder.submit(poc, nalus, &mut wrapped);
        self.reorder = reorder;
    }

    fn recover_poc(&mut self, nalus: &[Vec<u8>]) -> i64 {
        let sps = match &self.sps {
            Some(s) => s,
            None => return 0,
        };
        for nal in nalus {
            if nal.is_empty() {
                continue;
            }
            if is_slice_nal(nal[0] & 0x1f) && let Some(poc) = self.poc_tracker.decode(nal, sps) {
                return poc;
            }
        }
        0
    }

    fn track_bitrate(&mut self, bytes: usize, pts: f64) {
        let first = *self.first_delivery_pts.get_or_insert(pts);
        if pts - first <= 1.0 {
            self.bytes_in_first_second += bytes as u64;
            self.bits_per_second = self.bytes_in_first_second * 8;
        }
    }

    /// Finish reading any residual access units from the current file, then
    /// start tailing `new_path` from offset 0 (§4.4 rotation).
    pub fn rotate_to(&mut self, new_path: impl AsRef<Path>, deliver: &mut dyn FnMut(Vec<Vec<u8>>, f64)) -> Result<()> {
        self.pump(deliver)?;
        if let Some(completed) = self.assembler.drain() {
            self.deliver_access_unit(completed, deliver);
        }

        let old_path = self.path.clone();
        self.path = new_path.as_ref().to_path_buf();
        self.file = File::open(&self.path)?;
        self.mdat_start = None;
        self.cursor = 0;
        self.next_rotation_index = (self.next_rotation_index + 1) % self.max_file_index.max(1);
        std::fs::remove_file(&old_path).ok();
        Ok(())
    }
}

fn locate_mdat(reader: &mut File, file_len: u64) -> Result<Option<u64>> {
    let mut cursor = 0u64;
    while cursor + 8 <= file_len {
        let atom = read_atom_header(reader, cursor, file_len).map_err(|e| {
            RtspError::Mp4(format!("failed walking top-level atoms while locating mdat: {e}"))
        })?;
        if &atom.fourcc == b"mdat" {
            return Ok(Some(atom.body_offset));
        }
        if atom.total_size == 0 {
            return Ok(None);
        }
        cursor = atom.end_offset();
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sps_320x240() -> SeqParamSet {
        SeqParamSet {
            frame_bits: 4,
            width: 320,
            height: 240,
            interlaced: false,
            profile: 66,
            level: 30,
            compatibility: 0,
            poc_type: 2, // type 2: POC derived implicitly, recover_poc returns 0 for non-type-0
            poc_lsb_bits: 0,
        }
    }

    // --- AccessUnitAssembler ---

    #[test]
    fn sps_pps_start_new_au() {
        let mut a = AccessUnitAssembler::new();
        assert!(a.push(vec![0x65, 0x88]).is_none()); // IDR slice, first NAL
        // SPS (type 7) forces a boundary
        let completed = a.push(vec![0x67, 0x42, 0x00]);
        assert!(completed.is_some());
        assert_eq!(completed.unwrap(), vec![vec![0x65, 0x88]]);
    }

    #[test]
    fn first_mb_zero_starts_new_au() {
        let mut a = AccessUnitAssembler::new();
        // first NAL: IDR slice (type 5), first_mb_in_slice = 0 encoded: need a prior NAL to compare against.
        // nal[1..] ue(0) is encoded as a single 1 bit -> 0x80 if remaining bits 0.
        let first_mb_zero_payload = vec![0x65u8, 0x80, 0x00];
        assert!(a.push(first_mb_zero_payload.clone()).is_none());
        let second = a.push(first_mb_zero_payload);
        assert!(second.is_some());
    }

    #[test]
    fn drain_returns_pending_au() {
        let mut a = AccessUnitAssembler::new();
        a.push(vec![0x65, 0x80]);
        let drained = a.drain().unwrap();
        assert_eq!(drained, vec![vec![0x65, 0x80]]);
        assert!(a.drain().is_none());
    }

    // --- ReorderBuffer ---

    #[test]
    fn poc_zero_delivers_immediately_with_next_timestamp() {
        let mut rb = ReorderBuffer::new();
        rb.push_timestamp(1.0);
        let mut delivered = Vec::new();
        let mut sink = |au: Vec<Vec<u8>>, pts: f64| delivered.push((au, pts));
        rb.submit(0, vec![vec![1]], &mut sink);
        assert_eq!(delivered, vec![(vec![vec![1]], 1.0)]);
    }

    #[test]
    fn higher_poc_flushes_buffer_and_enqueues() {
        let mut rb = ReorderBuffer::new();
        rb.push_timestamp(0.0);
        rb.push_timestamp(1.0);
        rb.push_timestamp(2.0);
        let mut delivered: Vec<(Vec<Vec<u8>>, f64)> = Vec::new();

        rb.submit(0, vec![vec![0]], &mut |au, pts| delivered.push((au, pts))); // IDR, poc 0, delivered immediately with ts 0.0
        rb.submit(4, vec![vec![4]], &mut |au, pts| delivered.push((au, pts))); // buffered (poc>prev_poc=0 after flush of empty buffer)
        assert!(delivered.len() == 1);

        rb.submit(8, vec![vec![8]], &mut |au, pts| delivered.push((au, pts))); // flush buffer [poc4] then enqueue poc8
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[1], (vec![vec![4]], 1.0));
    }

    // --- FrameExtractor integration (synthetic mdat) ---

    fn write_box(out: &mut Vec<u8>, fourcc: &[u8; 4], body: &[u8]) {
        out.extend_from_slice(&((8 + body.len()) as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(body);
    }

    fn length_prefixed(nal: &[u8]) -> Vec<u8> {
        let mut out = (nal.len() as u32).to_be_bytes().to_vec();
        out.extend_from_slice(nal);
        out
    }

    #[test]
    fn pumps_access_units_out_of_a_growing_mdat_file() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("camstream_test_{}.mp4", std::process::id()));

        let mut mdat_body = Vec::new();
        mdat_body.extend(length_prefixed(&[0x67, 0x42])); // SPS
        mdat_body.extend(length_prefixed(&[0x65, 0x80])); // IDR slice, first_mb=0-ish

        let mut file_bytes = Vec::new();
        write_box(&mut file_bytes, b"ftyp", &[0; 4]);
        write_box(&mut file_bytes, b"mdat", &mdat_body);

        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&file_bytes).unwrap();
        }

        let mut extractor = FrameExtractor::open(&path, 4).unwrap();
        extractor.set_sps(sps_320x240());
        extractor.push_timestamp(0.0);

        let mut delivered = Vec::new();
        let mut sink = |au: Vec<Vec<u8>>, pts: f64| delivered.push((au, pts));
        extractor.pump(&mut sink).unwrap();

        // SPS alone doesn't close an AU (assembler buffers until next NAL);
        // draining the remainder surfaces it.
        if let Some(completed) = extractor.assembler.drain() {
            extractor.deliver_access_unit(completed, &mut sink);
        }

        assert!(!delivered.is_empty());
        std::fs::remove_file(&path).ok();
    }
}
