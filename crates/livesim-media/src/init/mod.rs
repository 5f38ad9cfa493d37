//! Init segment inspection and live conversion.
//!
//! Version 1 movie, track and media headers widen creation and modification
//! time to 64 bits, which moves every following field by 8 bytes; the
//! duration field itself also grows to 64 bits.

use crate::boxes::{default_containers, BoxFilter, BoxId, BoxTree, BoxType};
use crate::fmp4::HandlerType;
use crate::structops;
use crate::{Error, Result};
use tracing::debug;

/// Track parameters of a single-track init segment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackInfo {
    pub track_id: u32,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    pub handler: HandlerType,
    /// Media duration in timescale units, zero for live content.
    pub duration: u64,
}

/// Position and width of the duration field for a header box version.
fn duration_field(box_type: BoxType, version: u8) -> (usize, usize) {
    match (box_type, version) {
        (BoxType::TKHD, 1) => (36, 8),
        (BoxType::TKHD, _) => (28, 4),
        (BoxType::MEHD, 1) => (12, 8),
        (BoxType::MEHD, _) => (12, 4),
        (_, 1) => (32, 8),
        _ => (24, 4),
    }
}

fn read_field(bytes: &[u8], (pos, width): (usize, usize)) -> u64 {
    if width == 8 {
        structops::get_u64(bytes, pos)
    } else {
        structops::get_u32(bytes, pos) as u64
    }
}

fn version(tree: &BoxTree, id: BoxId) -> Result<u8> {
    Ok(tree.checked_data(id, 12)?[8])
}

/// Extract track id, timescale and handler from an init segment.
///
/// Exactly one `trak` is required.
pub fn inspect_init(data: &[u8]) -> Result<TrackInfo> {
    let tree = BoxTree::parse(data, &default_containers())?;
    let moov = tree.find_root(BoxType::MOOV).ok_or(Error::MissingBox("moov"))?;

    let traks = tree.find_children(moov, BoxType::TRAK);
    let trak = match traks.as_slice() {
        [] => return Err(Error::MissingBox("trak")),
        [trak] => *trak,
        _ => return Err(Error::consistency("multiple tracks unsupported")),
    };

    let tkhd = tree.find_child(trak, BoxType::TKHD).ok_or(Error::MissingBox("tkhd"))?;
    let track_id_at = if version(&tree, tkhd)? == 1 { 28 } else { 20 };
    let track_id = structops::get_u32(tree.checked_data(tkhd, track_id_at + 4)?, track_id_at);

    let mdia = tree.find_child(trak, BoxType::MDIA).ok_or(Error::MissingBox("mdia"))?;
    let mdhd = tree.find_child(mdia, BoxType::MDHD).ok_or(Error::MissingBox("mdhd"))?;
    let mdhd_version = version(&tree, mdhd)?;
    let field = duration_field(BoxType::MDHD, mdhd_version);
    let bytes = tree.checked_data(mdhd, field.0 + field.1)?;
    let timescale = structops::get_u32(bytes, field.0 - 4);
    let duration = read_field(bytes, field);

    let hdlr = tree.find_child(mdia, BoxType::HDLR).ok_or(Error::MissingBox("hdlr"))?;
    let bytes = tree.checked_data(hdlr, 20)?;
    let handler = HandlerType::from_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);

    debug!(track_id, timescale, ?handler, "Inspected init segment");

    Ok(TrackInfo {
        track_id,
        timescale,
        handler,
        duration,
    })
}

fn zero_duration(tree: &mut BoxTree, id: BoxId, _: &mut ()) -> Result<()> {
    let box_type = tree.box_type(id);
    let field = duration_field(box_type, version(tree, id)?);
    let mut bytes = tree.checked_data(id, field.0 + field.1)?.to_vec();
    if field.1 == 8 {
        structops::set_u64(&mut bytes, field.0, 0);
    } else {
        structops::set_u32(&mut bytes, field.0, 0);
    }
    tree.replace(id, bytes)
}

fn drop_mehd(tree: &mut BoxTree, id: BoxId, _: &mut ()) -> Result<()> {
    tree.remove(id);
    Ok(())
}

/// Rewrite an init segment for an unbounded presentation.
///
/// Every duration in `mvhd`, `tkhd` and `mdhd` is set to zero and
/// `mvex/mehd` is removed.
pub fn live_init(data: &[u8]) -> Result<Vec<u8>> {
    let filter = BoxFilter::new()
        .register(BoxType::MVHD, zero_duration)
        .register(BoxType::TKHD, zero_duration)
        .register(BoxType::MDHD, zero_duration)
        .register(BoxType::MEHD, drop_mehd);
    filter.filter(data, &mut ())
}
