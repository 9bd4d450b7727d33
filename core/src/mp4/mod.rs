//! MP4/ISOBMFF container handling: box tree walking to recover the `avcC`
//! configuration record, and a tailing extractor that turns a growing
//! fragment's `mdat` into delivered access units.

pub mod extractor;
pub mod walker;

pub use extractor::{AccessUnitAssembler, FrameExtractor, ReorderBuffer};
pub use walker::{find_avcc, Mp4Atom};
