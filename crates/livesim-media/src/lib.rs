//! Livesim-Media: ISO BMFF box-tree filtering and live segment synthesis
//!
//! This crate turns stored fragmented-MP4 VoD segments into segments of a
//! live presentation without re-encoding. Every transformation is a byte-level
//! rewrite of the box tree that keeps all size and offset fields consistent.
//!
//! # Modules
//!
//! - `boxes` - Arena box tree and the per-type filter pass
//! - `structops` - Big-endian integer field access
//! - `init` - Init segment inspection and the live (unbounded) variant
//! - `rewrite` - Media segment rewriting (mfhd, tfdt, trun, sidx, styp, mdat)
//! - `scte35` - Periodic SCTE-35 splice events carried in `emsg`
//! - `mux` - Combining two single-track segments into one
//! - `chunk` - Low-latency chunking of a rewritten segment
//! - `fmp4` - Fragment box codecs and init/media segment builders
//! - `segment_timeline` - Run-length encoded segment durations
//!
//! # Request flow
//!
//! For one live media segment request:
//!
//! 1. The caller maps the live number onto a VoD segment and a presentation offset
//! 2. The VoD segment bytes are parsed into a [`BoxTree`](boxes::BoxTree)
//! 3. One pre-order [`BoxFilter`](boxes::BoxFilter) pass applies the rewrites
//! 4. The tree is serialized with all container sizes patched
//!
//! The result may then be muxed with a second track or split into chunks.

pub mod boxes;
pub mod chunk;
pub mod error;
pub mod fmp4;
pub mod init;
pub mod mux;
pub mod rewrite;
pub mod scte35;
pub mod segment_timeline;
pub mod structops;

pub use boxes::{BoxFilter, BoxId, BoxTree, BoxType};
pub use chunk::{Chunk, Chunker};
pub use error::{Error, Result};
pub use fmp4::{HandlerType, InitSegmentBuilder, MoofBuilder, Sample};
pub use init::{inspect_init, live_init, TrackInfo};
pub use mux::{mux_init, mux_media};
pub use rewrite::{
    rewrite_segment, segment_timing, MediaSegmentRewriter, RewriteOptions, RewrittenSegment,
};
pub use segment_timeline::{
    SegTimeRun, SegmentPosition, SegmentTimelineBuilder, SegmentTimelineIndex, TimelineEntry,
};
