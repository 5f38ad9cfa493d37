//! VoD to live media segment rewriting.
//!
//! One pre-order pass over the segment tree rewrites:
//!
//! - `styp`: `lmsg` brand, followed by any SCTE-35 `emsg` boxes due
//! - `sidx`: dropped, or its earliest presentation time shifted
//! - `mfhd`: live sequence number
//! - `tfdt`: decode time shifted, promoted to 64 bits when needed
//! - `trun`: data offset corrected for growth earlier in the `moof`
//! - `mdat`: regenerated timed text documents
//!
//! Cross-box dependencies are carried in a [`RewriteContext`] that is reset
//! at each `moof`.

mod text;

pub use text::{format_clock, regenerate_ttml, NUMBER_TOKEN};

use crate::boxes::{default_containers, write_box, BoxFilter, BoxId, BoxTree, BoxType};
use crate::fmp4::{TrackFragmentHeader, TrackRun};
use crate::scte35;
use crate::structops;
use crate::{Error, Result};
use tracing::debug;

/// Last-segment brand in `styp`.
pub const LMSG: [u8; 4] = *b"lmsg";

/// Per-request rewrite parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Live sequence number written to `mfhd`.
    pub sequence_number: u32,
    /// Presentation offset in seconds (loops done times wrap duration).
    pub offset_seconds: u64,
    /// Track timescale used to scale the offset.
    pub timescale: u32,
    /// Mark the segment as the last one with the `lmsg` brand.
    pub is_last: bool,
    /// Keep and shift `sidx` instead of dropping it.
    pub keep_sidx: bool,
    /// Splice density for SCTE-35 events; zero disables them.
    pub splices_per_minute: u32,
    /// Regenerate the single mdat sample as a timed text document.
    pub text_payload: bool,
}

/// Result of a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenSegment {
    pub data: Vec<u8>,
    /// Decode time of the first track fragment after rewriting.
    pub base_media_decode_time: u64,
    /// Total duration of all track runs in timescale units.
    pub duration: u64,
    /// Growth of the last `moof` applied to its data offsets.
    pub size_change: i64,
}

/// State shared by the transforms of one rewrite pass.
#[derive(Debug, Default)]
pub struct RewriteContext {
    options: RewriteOptions,
    offset_ticks: u64,
    tfhd: Option<TrackFragmentHeader>,
    size_change: i64,
    trun_seen: bool,
    first_trun: Option<BoxId>,
    base_media_decode_time: Option<u64>,
    duration: u64,
}

impl RewriteContext {
    fn new(options: RewriteOptions) -> Result<Self> {
        let offset_ticks = options
            .offset_seconds
            .checked_mul(options.timescale as u64)
            .ok_or(Error::TimeOverflow {
                base: 0,
                offset: options.offset_seconds,
            })?;
        Ok(Self {
            options,
            offset_ticks,
            ..Self::default()
        })
    }
}

fn shift_time(base: u64, offset: u64) -> Result<u64> {
    base.checked_add(offset)
        .ok_or(Error::TimeOverflow { base, offset })
}

/// Version and decode time of a `tfdt` box.
fn read_tfdt(tree: &BoxTree, id: BoxId) -> Result<(u8, u64)> {
    let bytes = tree.checked_data(id, 16)?;
    if bytes[8] == 1 {
        let bytes = tree.checked_data(id, 20)?;
        Ok((1, structops::get_u64(bytes, 12)))
    } else {
        Ok((0, structops::get_u32(bytes, 12) as u64))
    }
}

fn parse_tfhd(tree: &BoxTree, id: BoxId) -> Result<TrackFragmentHeader> {
    TrackFragmentHeader::parse(tree.checked_data(id, 16)?)
        .ok_or_else(|| Error::format(tree.path(id), tree.offset(id), "truncated track fragment header"))
}

fn parse_trun(tree: &BoxTree, id: BoxId) -> Result<TrackRun> {
    TrackRun::parse(tree.checked_data(id, 16)?)
        .ok_or_else(|| Error::format(tree.path(id), tree.offset(id), "truncated track run"))
}

/// Decode time and duration of the first track fragment, as stored.
fn track_fragment_timing(tree: &BoxTree) -> Result<Option<(u64, u64)>> {
    let Some(traf) = tree.find_path(&[BoxType::MOOF, BoxType::TRAF]) else {
        return Ok(None);
    };
    let (Some(tfhd), Some(tfdt)) = (
        tree.find_child(traf, BoxType::TFHD),
        tree.find_child(traf, BoxType::TFDT),
    ) else {
        return Ok(None);
    };
    let (_, decode_time) = read_tfdt(tree, tfdt)?;

    let tfhd = parse_tfhd(tree, tfhd)?;
    let mut duration = 0;
    for trun in tree.find_children(traf, BoxType::TRUN) {
        duration += parse_trun(tree, trun)?.total_duration(&tfhd).unwrap_or(0);
    }
    Ok(Some((decode_time, duration)))
}

/// Shifted decode time and duration of the first track fragment.
fn fragment_timing(tree: &BoxTree, cx: &RewriteContext) -> Result<Option<(u64, u64)>> {
    match track_fragment_timing(tree)? {
        Some((decode_time, duration)) => Ok(Some((shift_time(decode_time, cx.offset_ticks)?, duration))),
        None => Ok(None),
    }
}

/// Base media decode time and total run duration of a media segment.
///
/// Fails with [`Error::MissingBox`] when the segment has no `tfdt`.
pub fn segment_timing(data: &[u8]) -> Result<(u64, u64)> {
    let tree = BoxTree::parse(data, &default_containers())?;
    track_fragment_timing(&tree)?.ok_or(Error::MissingBox("tfdt"))
}

fn rewrite_styp(tree: &mut BoxTree, id: BoxId, cx: &mut RewriteContext) -> Result<()> {
    let bytes = tree.checked_data(id, 16)?;
    if (bytes.len() - 16) % 4 != 0 {
        return Err(Error::format(
            tree.path(id),
            tree.offset(id),
            format!("{} trailing bytes do not form a brand", (bytes.len() - 16) % 4),
        ));
    }
    let mut content = bytes[8..16].to_vec(); // major brand + minor version
    for brand in bytes[16..].chunks_exact(4) {
        if brand != &LMSG[..] {
            content.extend_from_slice(brand);
        }
    }
    if cx.options.is_last {
        content.extend_from_slice(&LMSG);
    }
    tree.replace(id, write_box(BoxType::STYP, &content))?;

    if cx.options.splices_per_minute == 0 || cx.options.timescale == 0 {
        return Ok(());
    }
    if let Some((start, duration)) = fragment_timing(tree, cx)? {
        let timescale = cx.options.timescale as f64;
        let start_s = start as f64 / timescale;
        let end_s = (start + duration) as f64 / timescale;

        let mut after = id;
        for event in scte35::splices_for_segment(start_s, end_s, cx.options.splices_per_minute) {
            debug!(
                event_id = event.event_id,
                splice_time_s = event.splice_time_s,
                start_s,
                end_s,
                "Inserting splice event"
            );
            after = tree.insert_after(after, event.to_emsg())?;
        }
    }
    Ok(())
}

fn rewrite_sidx(tree: &mut BoxTree, id: BoxId, cx: &mut RewriteContext) -> Result<()> {
    if !cx.options.keep_sidx {
        tree.remove(id);
        return Ok(());
    }

    let bytes = tree.checked_data(id, 32)?;
    let timescale = structops::get_u32(bytes, 16) as u64;
    let shift = cx
        .options
        .offset_seconds
        .checked_mul(timescale)
        .ok_or(Error::TimeOverflow {
            base: 0,
            offset: cx.options.offset_seconds,
        })?;

    if bytes[8] == 1 {
        let bytes = tree.checked_data(id, 40)?;
        let ept = shift_time(structops::get_u64(bytes, 20), shift)?;
        let mut out = bytes.to_vec();
        structops::set_u64(&mut out, 20, ept);
        return tree.replace(id, out);
    }

    let ept = shift_time(structops::get_u32(bytes, 20) as u64, shift)?;
    let out = match u32::try_from(ept) {
        Ok(ept) => {
            let mut out = bytes.to_vec();
            structops::set_u32(&mut out, 20, ept);
            out
        }
        Err(_) => {
            // Growth of the index is not propagated to any offset.
            debug!(path = %tree.path(id), ept, "Promoting sidx to version 1");
            let first_offset = structops::get_u32(bytes, 24) as u64;
            let mut out = Vec::with_capacity(bytes.len() + 8);
            out.extend_from_slice(&bytes[0..8]);
            out.push(1);
            out.extend_from_slice(&bytes[9..20]);
            out.extend_from_slice(&structops::u64_bytes(ept));
            out.extend_from_slice(&structops::u64_bytes(first_offset));
            out.extend_from_slice(&bytes[28..]);
            out
        }
    };
    tree.replace(id, out)
}

fn rewrite_mfhd(tree: &mut BoxTree, id: BoxId, cx: &mut RewriteContext) -> Result<()> {
    let mut out = tree.checked_data(id, 16)?.to_vec();
    structops::set_u32(&mut out, 12, cx.options.sequence_number);
    tree.replace(id, out)
}

fn start_fragment(_: &mut BoxTree, _: BoxId, cx: &mut RewriteContext) -> Result<()> {
    cx.size_change = 0;
    cx.trun_seen = false;
    cx.tfhd = None;
    Ok(())
}

fn start_track_fragment(_: &mut BoxTree, _: BoxId, cx: &mut RewriteContext) -> Result<()> {
    cx.tfhd = None;
    Ok(())
}

fn read_tfhd(tree: &mut BoxTree, id: BoxId, cx: &mut RewriteContext) -> Result<()> {
    cx.tfhd = Some(parse_tfhd(tree, id)?);
    Ok(())
}

fn rewrite_tfdt(tree: &mut BoxTree, id: BoxId, cx: &mut RewriteContext) -> Result<()> {
    let (version, decode_time) = read_tfdt(tree, id)?;
    let shifted = shift_time(decode_time, cx.offset_ticks)?;
    let bytes = tree.checked_data(id, 16)?;

    let out = if version == 0 && shifted > u32::MAX as u64 {
        if cx.trun_seen {
            return Err(Error::unsupported(
                tree.path(id),
                tree.offset(id),
                "decode time growth after an earlier track run in the same moof",
            ));
        }
        debug!(path = %tree.path(id), shifted, "Promoting tfdt to version 1");
        let mut content = Vec::with_capacity(12);
        content.push(1);
        content.extend_from_slice(&bytes[9..12]);
        content.extend_from_slice(&structops::u64_bytes(shifted));
        cx.size_change += 4;
        write_box(BoxType::TFDT, &content)
    } else {
        let mut out = bytes.to_vec();
        if version == 1 {
            structops::set_u64(&mut out, 12, shifted);
        } else {
            structops::set_u32(&mut out, 12, shifted as u32);
        }
        out
    };

    cx.base_media_decode_time.get_or_insert(shifted);
    tree.replace(id, out)
}

fn rewrite_trun(tree: &mut BoxTree, id: BoxId, cx: &mut RewriteContext) -> Result<()> {
    let trun = parse_trun(tree, id)?;
    let tfhd = cx.tfhd.as_ref().ok_or_else(|| {
        Error::format(tree.path(id), tree.offset(id), "track run before track fragment header")
    })?;

    cx.duration += trun.total_duration(tfhd).unwrap_or(0);
    cx.trun_seen = true;
    cx.first_trun.get_or_insert(id);

    if cx.size_change == 0 {
        return Ok(());
    }
    if tfhd.has_base_data_offset() {
        return Err(Error::unsupported(
            tree.path(id),
            tree.offset(id),
            "base data offset cannot follow a size change",
        ));
    }
    let Some(pos) = trun.data_offset_position() else {
        return Err(Error::unsupported(
            tree.path(id),
            tree.offset(id),
            "size change without a data offset to adjust",
        ));
    };

    let mut out = tree.checked_data(id, pos + 4)?.to_vec();
    let data_offset = structops::get_i32(&out, pos)
        .checked_add(cx.size_change as i32)
        .ok_or_else(|| Error::format(tree.path(id), tree.offset(id), "data offset overflow"))?;
    structops::set_i32(&mut out, pos, data_offset);
    debug!(path = %tree.path(id), data_offset, size_change = cx.size_change, "Adjusted data offset");
    tree.replace(id, out)
}

fn rewrite_mdat(tree: &mut BoxTree, id: BoxId, cx: &mut RewriteContext) -> Result<()> {
    if !cx.options.text_payload {
        return Ok(());
    }
    let trun_id = cx.first_trun.ok_or_else(|| {
        Error::unsupported(tree.path(id), tree.offset(id), "text payload without a track run")
    })?;
    let mut trun = parse_trun(tree, trun_id)?;
    if trun.entries.len() != 1 || !trun.has_sample_sizes() {
        return Err(Error::unsupported(
            tree.path(trun_id),
            tree.offset(trun_id),
            "text payload needs exactly one sample with an explicit size",
        ));
    }

    let document = &tree.checked_data(id, 8)?[8..];
    if trun.entries[0].size as usize != document.len() {
        return Err(Error::unsupported(
            tree.path(id),
            tree.offset(id),
            "text sample does not fill the media data box",
        ));
    }
    let offset_ms = cx.options.offset_seconds.saturating_mul(1000);
    let regenerated = regenerate_ttml(document, offset_ms, cx.options.sequence_number as u64);

    trun.entries[0].size = regenerated.len() as u32;
    tree.replace(trun_id, trun.encode())?;
    tree.replace(id, write_box(BoxType::MDAT, &regenerated))
}

/// Rewrites VoD media segments into live segments.
pub struct MediaSegmentRewriter {
    filter: BoxFilter<RewriteContext>,
}

impl MediaSegmentRewriter {
    pub fn new() -> Self {
        let filter = BoxFilter::new()
            .register(BoxType::STYP, rewrite_styp)
            .register(BoxType::SIDX, rewrite_sidx)
            .register(BoxType::MOOF, start_fragment)
            .register(BoxType::MFHD, rewrite_mfhd)
            .register(BoxType::TRAF, start_track_fragment)
            .register(BoxType::TFHD, read_tfhd)
            .register(BoxType::TFDT, rewrite_tfdt)
            .register(BoxType::TRUN, rewrite_trun)
            .register(BoxType::MDAT, rewrite_mdat);
        Self { filter }
    }

    /// Rewrite one segment.
    pub fn rewrite(&self, data: &[u8], options: &RewriteOptions) -> Result<RewrittenSegment> {
        let mut cx = RewriteContext::new(*options)?;
        let mut tree = self.filter.parse(data)?;
        self.filter.filter_tree(&mut tree, &mut cx)?;
        let data = tree.to_bytes()?;

        debug!(
            sequence_number = options.sequence_number,
            offset_seconds = options.offset_seconds,
            size_change = cx.size_change,
            "Rewrote media segment"
        );

        Ok(RewrittenSegment {
            data,
            base_media_decode_time: cx.base_media_decode_time.unwrap_or(cx.offset_ticks),
            duration: cx.duration,
            size_change: cx.size_change,
        })
    }
}

impl Default for MediaSegmentRewriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite one segment with a freshly built rewriter.
pub fn rewrite_segment(data: &[u8], options: &RewriteOptions) -> Result<RewrittenSegment> {
    MediaSegmentRewriter::new().rewrite(data, options)
}
