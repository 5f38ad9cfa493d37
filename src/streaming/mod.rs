//! Live segment serving.
//!
//! [`LiveSource`] answers requests of the form
//! `(now, representation, segment number | init)`:
//!
//! - `init_segment` / `muxed_init_segment` - Init segments with durations zeroed
//! - `media_segment` / `muxed_media_segment` - Rewritten live media segments
//! - `media_chunks` - Low-latency chunks of a segment under production
//! - `availability_window` / `timeline` - Data for manifest generation
//!
//! Boundary conditions come back as [`LiveError`](crate::LiveError) variants
//! that map to "not found".

mod live;

pub use live::{LiveSource, Representation, RequestOptions, SegmentRequest};
