//! Two-track multiplexing of single-track init and media segments.

use crate::boxes::{default_containers, write_box, write_container_box, BoxId, BoxTree, BoxType};
use crate::fmp4::{
    TrackFragmentHeader, TrackRun, TFHD_BASE_DATA_OFFSET, TFHD_DEFAULT_BASE_IS_MOOF,
    TRUN_DATA_OFFSET,
};
use crate::init::inspect_init;
use crate::structops;
use crate::{Error, Result};
use tracing::debug;

fn required(tree: &BoxTree, parent: BoxId, box_type: BoxType, name: &'static str) -> Result<BoxId> {
    tree.find_child(parent, box_type).ok_or(Error::MissingBox(name))
}

fn root(tree: &BoxTree, box_type: BoxType, name: &'static str) -> Result<BoxId> {
    tree.find_root(box_type).ok_or(Error::MissingBox(name))
}

/// Combine two single-track init segments into one two-track init segment.
///
/// `ftyp` and `mvhd` come from `first`; both `trak` boxes and `trex` boxes
/// are gathered under one `moov` and `mvex`.
pub fn mux_init(first: &[u8], second: &[u8]) -> Result<Vec<u8>> {
    let first_track = inspect_init(first)?;
    let second_track = inspect_init(second)?;
    if first_track.track_id == second_track.track_id {
        return Err(Error::consistency(format!(
            "both init segments use track id {}",
            first_track.track_id
        )));
    }

    let containers = default_containers();
    let a = BoxTree::parse(first, &containers)?;
    let b = BoxTree::parse(second, &containers)?;

    let ftyp = a.node_bytes(root(&a, BoxType::FTYP, "ftyp")?)?;
    let moov_a = root(&a, BoxType::MOOV, "moov")?;
    let moov_b = root(&b, BoxType::MOOV, "moov")?;

    let mvhd_id = required(&a, moov_a, BoxType::MVHD, "mvhd")?;
    let mut mvhd = a.checked_data(mvhd_id, 12)?.to_vec();
    let next_track_id = first_track.track_id.max(second_track.track_id) + 1;
    let last = mvhd.len() - 4;
    structops::set_u32(&mut mvhd, last, next_track_id);

    let trak_a = a.node_bytes(required(&a, moov_a, BoxType::TRAK, "trak")?)?;
    let trak_b = b.node_bytes(required(&b, moov_b, BoxType::TRAK, "trak")?)?;

    let mvex_a = required(&a, moov_a, BoxType::MVEX, "mvex")?;
    let mvex_b = required(&b, moov_b, BoxType::MVEX, "mvex")?;
    let mut mvex_children = Vec::new();
    if let Some(mehd) = a.find_child(mvex_a, BoxType::MEHD) {
        mvex_children.push(a.node_bytes(mehd)?);
    }
    mvex_children.push(a.node_bytes(required(&a, mvex_a, BoxType::TREX, "trex")?)?);
    mvex_children.push(b.node_bytes(required(&b, mvex_b, BoxType::TREX, "trex")?)?);
    let mvex_refs: Vec<&[u8]> = mvex_children.iter().map(Vec::as_slice).collect();
    let mvex = write_container_box(BoxType::MVEX, &mvex_refs);

    let moov = write_container_box(BoxType::MOOV, &[&mvhd, &trak_a, &trak_b, &mvex]);

    debug!(
        first_track = first_track.track_id,
        second_track = second_track.track_id,
        "Muxed init segments"
    );
    Ok([ftyp, moov].concat())
}

/// One input of a media mux.
struct MediaInput {
    tree: BoxTree,
    moof: BoxId,
    traf: BoxId,
    tfhd: TrackFragmentHeader,
    payload: Vec<u8>,
}

impl MediaInput {
    fn parse(data: &[u8]) -> Result<Self> {
        let tree = BoxTree::parse(data, &default_containers())?;
        let moof = root(&tree, BoxType::MOOF, "moof")?;
        let traf = required(&tree, moof, BoxType::TRAF, "traf")?;
        let tfhd_id = required(&tree, traf, BoxType::TFHD, "tfhd")?;
        let tfhd = TrackFragmentHeader::parse(tree.checked_data(tfhd_id, 16)?).ok_or_else(|| {
            Error::format(tree.path(tfhd_id), tree.offset(tfhd_id), "truncated track fragment header")
        })?;
        let mdat = root(&tree, BoxType::MDAT, "mdat")?;
        let payload = tree.checked_data(mdat, 8)?[8..].to_vec();
        Ok(Self {
            tree,
            moof,
            traf,
            tfhd,
            payload,
        })
    }

    /// Serialize the traf with its runs pointing at `data_offset` onwards.
    ///
    /// The tfhd gets `default-base-is-moof` and loses any base data offset;
    /// every trun carries a data offset.
    fn traf_bytes(&self, data_offset: i32) -> Result<Vec<u8>> {
        let tree = &self.tree;
        let mut children = Vec::new();
        let mut run_offset = data_offset;

        for &child in tree.children(self.traf) {
            let bytes = match tree.box_type(child) {
                BoxType::TFHD => {
                    let mut tfhd = self.tfhd.clone();
                    tfhd.flags = (tfhd.flags & !TFHD_BASE_DATA_OFFSET) | TFHD_DEFAULT_BASE_IS_MOOF;
                    tfhd.base_data_offset = None;
                    tfhd.encode()
                }
                BoxType::TRUN => {
                    let mut trun = TrackRun::parse(tree.checked_data(child, 16)?).ok_or_else(|| {
                        Error::format(tree.path(child), tree.offset(child), "truncated track run")
                    })?;
                    let run_size = trun.total_size(&self.tfhd).ok_or_else(|| {
                        Error::unsupported(tree.path(child), tree.offset(child), "sample sizes unknown")
                    })?;
                    trun.flags |= TRUN_DATA_OFFSET;
                    trun.data_offset = Some(run_offset);
                    run_offset += run_size as i32;
                    trun.encode()
                }
                _ => tree.node_bytes(child)?,
            };
            children.push(bytes);
        }

        let refs: Vec<&[u8]> = children.iter().map(Vec::as_slice).collect();
        Ok(write_container_box(BoxType::TRAF, &refs))
    }
}

/// Combine two rewritten single-track media segments into one segment with a
/// shared `mdat`.
///
/// Boxes before the first input's `moof` are kept, except `sidx`. The shared
/// `mdat` holds the first track's samples followed by the second's, and both
/// runs' data offsets point into it relative to the new `moof`.
pub fn mux_media(first: &[u8], second: &[u8]) -> Result<Vec<u8>> {
    let a = MediaInput::parse(first)?;
    let b = MediaInput::parse(second)?;
    if a.tfhd.track_id == b.tfhd.track_id {
        return Err(Error::consistency(format!(
            "both media segments use track id {}",
            a.tfhd.track_id
        )));
    }

    let mut out = Vec::with_capacity(first.len() + second.len());
    for &id in a.tree.roots() {
        match a.tree.box_type(id) {
            BoxType::MOOF => break,
            BoxType::SIDX => continue,
            _ => out.extend_from_slice(&a.tree.node_bytes(id)?),
        }
    }

    let mfhd = a.tree.node_bytes(required(&a.tree, a.moof, BoxType::MFHD, "mfhd")?)?;

    // Data offsets are fixed-width, so the moof size does not depend on them.
    let moof_size = 8 + mfhd.len() + a.traf_bytes(0)?.len() + b.traf_bytes(0)?.len();
    let first_offset = (moof_size + 8) as i32;
    let second_offset = first_offset + a.payload.len() as i32;

    let traf_a = a.traf_bytes(first_offset)?;
    let traf_b = b.traf_bytes(second_offset)?;
    out.extend_from_slice(&write_container_box(BoxType::MOOF, &[&mfhd, &traf_a, &traf_b]));
    out.extend_from_slice(&write_box(BoxType::MDAT, &[a.payload.as_slice(), b.payload.as_slice()].concat()));

    debug!(
        first_track = a.tfhd.track_id,
        second_track = b.tfhd.track_id,
        first_offset,
        second_offset,
        "Muxed media segments"
    );
    Ok(out)
}
