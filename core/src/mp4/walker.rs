//! MP4/ISOBMFF box tree walking.
//!
//! An atom is `[u32-be size][4-byte fourcc]`. `size == 1` means a following
//! `u64-be` extended size; `size == 0` means "extends to the end of its
//! parent"; fourcc `"uuid"` adds a 16-byte extended-type header after the
//! fourcc. The walker only seeks and reads through the given handle — it
//! performs no buffering of its own, matching the stateful, single-reader
//! design a tailing file source requires.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Result, RtspError};

/// A located atom: its start offset, total size (header + body), and fourcc.
/// Owns no bytes — callers seek back into the file to read its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp4Atom {
    pub offset: u64,
    pub total_size: u64,
    pub fourcc: [u8; 4],
    /// Offset of the first body byte (after the size/fourcc/extended headers).
    pub body_offset: u64,
}

impl Mp4Atom {
    pub fn body_size(&self) -> u64 {
        self.total_size - (self.body_offset - self.offset)
    }

    pub fn end_offset(&self) -> u64 {
        self.offset + self.total_size
    }

    pub fn fourcc_str(&self) -> String {
        String::from_utf8_lossy(&self.fourcc).to_string()
    }
}

/// Read one atom header at `offset`. `parent_end` bounds a `size == 0`
/// atom (it extends to the end of its enclosing atom, or the file).
pub fn read_atom_header<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    parent_end: u64,
) -> Result<Mp4Atom> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut hdr = [0u8; 8];
    reader.read_exact(&mut hdr)?;

    let small_size = u32::from_be_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]) as u64;
    let fourcc = [hdr[4], hdr[5], hdr[6], hdr[7]];

    let mut body_offset = offset + 8;
    let total_size = if small_size == 1 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext)?;
        body_offset += 8;
        u64::from_be_bytes(ext)
    } else if small_size == 0 {
        parent_end - offset
    } else {
        small_size
    };

    if &fourcc == b"uuid" {
        let mut extended_type = [0u8; 16];
        reader.read_exact(&mut extended_type)?;
        body_offset += 16;
    }

    if total_size < body_offset - offset {
        return Err(RtspError::Mp4(format!(
            "atom {} at {offset} has size {total_size} smaller than its own header",
            String::from_utf8_lossy(&fourcc)
        )));
    }

    Ok(Mp4Atom {
        offset,
        total_size,
        fourcc,
        body_offset,
    })
}

/// Find the first child atom of `fourcc` inside `parent`, starting the
/// search at `start_at` (an absolute file offset at or after
/// `parent.body_offset`).
pub fn child_of<R: Read + Seek>(
    reader: &mut R,
    parent: &Mp4Atom,
    fourcc: &[u8; 4],
    start_at: u64,
) -> Result<Option<Mp4Atom>> {
    let mut cursor = start_at;
    let parent_end = parent.end_offset();

    while cursor < parent_end {
        let child = read_atom_header(reader, cursor, parent_end)?;
        if &child.fourcc == fourcc {
            return Ok(Some(child));
        }
        if child.total_size == 0 {
            return Ok(None);
        }
        cursor = child.end_offset();
    }
    Ok(None)
}

/// Read the body of `atom` into a freshly allocated buffer.
pub fn read_body<R: Read + Seek>(reader: &mut R, atom: &Mp4Atom) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(atom.body_offset))?;
    let mut buf = vec![0u8; atom.body_size() as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Walk `moov -> trak(enabled) -> mdia -> minf -> stbl -> stsd -> avc1 -> avcC`
/// and return the raw `avcC` record bytes, per the finished "header file"
/// MP4 fragment produced once at stream start.
///
/// The enabled track is the first whose `tkhd` has bit 0 of the flags' low
/// byte set (`track_enabled`, ISO/IEC 14496-12 §8.3.2).
pub fn find_avcc<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<Vec<u8>> {
    let moov = find_top_level(reader, file_len, b"moov")?
        .ok_or_else(|| RtspError::Mp4("moov atom not found".into()))?;

    let mut trak_cursor = moov.body_offset;
    let trak = loop {
        let candidate = child_of(reader, &moov, b"trak", trak_cursor)?
            .ok_or_else(|| RtspError::Mp4("no enabled trak found in moov".into()))?;
        if is_track_enabled(reader, &candidate)? {
            break candidate;
        }
        trak_cursor = candidate.end_offset();
    };

    let mdia = child_of(reader, &trak, b"mdia", trak.body_offset)?
        .ok_or_else(|| RtspError::Mp4("mdia atom not found".into()))?;
    let minf = child_of(reader, &mdia, b"minf", mdia.body_offset)?
        .ok_or_else(|| RtspError::Mp4("minf atom not found".into()))?;
    let stbl = child_of(reader, &minf, b"stbl", minf.body_offset)?
        .ok_or_else(|| RtspError::Mp4("stbl atom not found".into()))?;
    let stsd = child_of(reader, &stbl, b"stsd", stbl.body_offset)?
        .ok_or_else(|| RtspError::Mp4("stsd atom not found".into()))?;

    // stsd body: version(1) + flags(3) + entry_count(4), then sample entries.
    let avc1 = read_atom_header(reader, stsd.body_offset + 8, stsd.end_offset())?;
    if &avc1.fourcc != b"avc1" {
        return Err(RtspError::Mp4(format!(
            "expected avc1 sample entry, found {}",
            avc1.fourcc_str()
        )));
    }

    // avc1 sample entry body is fixed 78 bytes before its child boxes begin.
    let avcc = child_of(reader, &avc1, b"avcC", avc1.body_offset + 78)?
        .ok_or_else(|| RtspError::Mp4("avcC atom not found inside avc1".into()))?;

    read_body(reader, &avcc)
}

fn is_track_enabled<R: Read + Seek>(reader: &mut R, trak: &Mp4Atom) -> Result<bool> {
    let tkhd = child_of(reader, trak, b"tkhd", trak.body_offset)?
        .ok_or_else(|| RtspError::Mp4("tkhd atom not found".into()))?;
    let body = read_body(reader, &tkhd)?;
    let flags_low_byte = *body.get(3).ok_or_else(|| RtspError::Mp4("tkhd too short".into()))?;
    Ok(flags_low_byte & 1 == 1)
}

fn find_top_level<R: Read + Seek>(
    reader: &mut R,
    file_len: u64,
    fourcc: &[u8; 4],
) -> Result<Option<Mp4Atom>> {
    let mut cursor = 0u64;
    while cursor < file_len {
        let atom = read_atom_header(reader, cursor, file_len)?;
        if &atom.fourcc == fourcc {
            return Ok(Some(atom));
        }
        if atom.total_size == 0 {
            return Ok(None);
        }
        cursor = atom.end_offset();
    }
    Ok(None)
}
