//! ISO BMFF box tree: parsing, filtering and re-serialization.
//!
//! A segment is parsed into a [`BoxTree`], an arena of nodes addressed by
//! [`BoxId`] with parent links. Composite boxes hold children, every other box
//! is kept as raw bytes. [`BoxFilter`] walks the tree once in pre-order and
//! hands registered box types to their [`BoxTransform`]. Serialization
//! recomputes every size field bottom-up.

mod filter;
mod tree;

pub use filter::{BoxFilter, BoxTransform};
pub use tree::{BoxId, BoxTree, MAX_DEPTH};

use std::collections::HashSet;

/// Box header length without extended size.
pub const HEADER_SIZE: usize = 8;

/// Four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub [u8; 4]);

impl BoxType {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const SIDX: Self = Self(*b"sidx");
    pub const EMSG: Self = Self(*b"emsg");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const EDTS: Self = Self(*b"edts");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const DINF: Self = Self(*b"dinf");
    pub const STBL: Self = Self(*b"stbl");
    pub const MVEX: Self = Self(*b"mvex");
    pub const MEHD: Self = Self(*b"mehd");
    pub const TREX: Self = Self(*b"trex");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const MDAT: Self = Self(*b"mdat");

    /// Create from the four header bytes.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Get the 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::fmt::Debug for BoxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxType({})", self.as_str())
    }
}

/// Box types whose payload is a plain sequence of child boxes.
pub fn default_containers() -> HashSet<BoxType> {
    [
        BoxType::MOOV,
        BoxType::TRAK,
        BoxType::EDTS,
        BoxType::MDIA,
        BoxType::MINF,
        BoxType::DINF,
        BoxType::STBL,
        BoxType::MVEX,
        BoxType::MOOF,
        BoxType::TRAF,
    ]
    .into_iter()
    .collect()
}

// ---------------------------------------------------------------------------
// Low-level box writing helpers
// ---------------------------------------------------------------------------

/// Write a complete box: size (u32 BE) + type (4 ASCII bytes) + content.
pub fn write_box(box_type: BoxType, content: &[u8]) -> Vec<u8> {
    let size = (HEADER_SIZE + content.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&box_type.0);
    out.extend_from_slice(content);
    out
}

/// Write a container box (size + type + children concatenated).
pub fn write_container_box(box_type: BoxType, children: &[&[u8]]) -> Vec<u8> {
    let children_len: usize = children.iter().map(|c| c.len()).sum();
    let size = (HEADER_SIZE + children_len) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&box_type.0);
    for child in children {
        out.extend_from_slice(child);
    }
    out
}

/// Encode a full box version/flags word.
pub fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    let val = ((version as u32) << 24) | (flags & 0x00FF_FFFF);
    val.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_box_type_display() {
        assert_eq!(BoxType::TFDT.to_string(), "tfdt");
        assert_eq!(BoxType::from_bytes(*b"moof"), BoxType::MOOF);
    }

    #[test]
    fn test_write_container_box_size() {
        let child = write_box(BoxType::MFHD, &[0; 8]);
        let moof = write_container_box(BoxType::MOOF, &[&child]);
        assert_eq!(u32::from_be_bytes([moof[0], moof[1], moof[2], moof[3]]), 24);
        assert_eq!(&moof[4..8], b"moof");
    }

    #[test]
    fn test_fullbox_header_masks_flags() {
        assert_eq!(fullbox_header(1, 0xFF02_0000), [1, 2, 0, 0]);
    }
}
