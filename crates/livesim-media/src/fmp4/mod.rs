//! Fragmented MP4 (fMP4) structures.
//!
//! - `tfhd`/`trun` parsing and re-encoding ([`TrackFragmentHeader`], [`TrackRun`])
//! - Single-track init segment synthesis ([`InitSegmentBuilder`])
//! - Movie fragment synthesis ([`MoofBuilder`])
//! - `styp` and `sidx` writers

mod fragment;
mod moof;

pub use fragment::{
    Sample, TrackFragmentHeader, TrackRun, TrunEntry, TFHD_BASE_DATA_OFFSET,
    TFHD_DEFAULT_BASE_IS_MOOF, TFHD_DEFAULT_DURATION, TFHD_DEFAULT_FLAGS, TFHD_DEFAULT_SIZE,
    TFHD_SAMPLE_DESCRIPTION_INDEX, TRUN_DATA_OFFSET, TRUN_FIRST_SAMPLE_FLAGS,
    TRUN_SAMPLE_CTO, TRUN_SAMPLE_DURATION, TRUN_SAMPLE_FLAGS, TRUN_SAMPLE_SIZE,
};
pub use moof::MoofBuilder;

use bytes::{BufMut, BytesMut};

/// Media handler of a track (`hdlr` handler_type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub enum HandlerType {
    Video,
    Audio,
    Subtitle,
    Text,
    Unknown([u8; 4]),
}

impl HandlerType {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        match &bytes {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            b"subt" => Self::Subtitle,
            b"text" => Self::Text,
            _ => Self::Unknown(bytes),
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        match self {
            Self::Video => *b"vide",
            Self::Audio => *b"soun",
            Self::Subtitle => *b"subt",
            Self::Text => *b"text",
            Self::Unknown(bytes) => bytes,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, Self::Audio)
    }

    /// Subtitle and timed text tracks carry one document per segment.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Subtitle | Self::Text)
    }
}

/// Start a box with a size placeholder; returns its start position.
fn begin_box(buf: &mut BytesMut, box_type: &[u8; 4]) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(box_type);
    start
}

/// Patch the size of the box started at `start`.
fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

/// Builder for single-track init segments.
pub struct InitSegmentBuilder {
    track_id: u32,
    timescale: u32,
    duration: u64,
    handler: HandlerType,
    header_version: u8,
    fragment_duration: Option<u64>,
    width: u32,
    height: u32,
    channels: u16,
    sample_rate: u32,
}

impl InitSegmentBuilder {
    /// Create a new builder for a video track.
    pub fn new() -> Self {
        Self {
            track_id: 1,
            timescale: 90000,
            duration: 0,
            handler: HandlerType::Video,
            header_version: 0,
            fragment_duration: None,
            width: 1280,
            height: 720,
            channels: 2,
            sample_rate: 48000,
        }
    }

    pub fn track_id(mut self, id: u32) -> Self {
        self.track_id = id;
        self
    }

    /// Set media timescale (also used for the movie header).
    pub fn timescale(mut self, ts: u32) -> Self {
        self.timescale = ts;
        self
    }

    /// Set duration written to mvhd, tkhd and mdhd.
    pub fn duration(mut self, d: u64) -> Self {
        self.duration = d;
        self
    }

    pub fn handler(mut self, handler: HandlerType) -> Self {
        self.handler = handler;
        self
    }

    /// Write version 1 (64-bit time fields) movie, track and media headers.
    pub fn wide_headers(mut self) -> Self {
        self.header_version = 1;
        self
    }

    /// Add an `mvex/mehd` box with the given fragment duration.
    pub fn fragment_duration(mut self, d: u64) -> Self {
        self.fragment_duration = Some(d);
        self
    }

    /// Set video dimensions.
    pub fn dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Set audio channel count and sample rate.
    pub fn audio(mut self, channels: u16, sample_rate: u32) -> Self {
        self.channels = channels;
        self.sample_rate = sample_rate;
        self
    }

    /// Build the init segment (ftyp + moov).
    pub fn build(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(1024);

        let brands = [b"iso6", b"dash", b"cmfc"];
        buf.put_u32((16 + brands.len() * 4) as u32);
        buf.put_slice(b"ftyp");
        buf.put_slice(b"iso6"); // major brand
        buf.put_u32(0); // minor version
        for brand in brands {
            buf.put_slice(brand);
        }

        let moov = begin_box(&mut buf, b"moov");
        self.write_mvhd(&mut buf);
        self.write_trak(&mut buf);
        self.write_mvex(&mut buf);
        end_box(&mut buf, moov);

        buf.to_vec()
    }

    fn put_times(&self, buf: &mut BytesMut) {
        if self.header_version == 1 {
            buf.put_u64(0); // creation time
            buf.put_u64(0); // modification time
        } else {
            buf.put_u32(0);
            buf.put_u32(0);
        }
    }

    fn put_duration(&self, buf: &mut BytesMut) {
        if self.header_version == 1 {
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(self.duration as u32);
        }
    }

    fn put_matrix(buf: &mut BytesMut) {
        for value in [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000u32] {
            buf.put_u32(value);
        }
    }

    fn write_mvhd(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, b"mvhd");
        buf.put_u32((self.header_version as u32) << 24);
        self.put_times(buf);
        buf.put_u32(self.timescale);
        self.put_duration(buf);
        buf.put_u32(0x0001_0000); // rate = 1.0
        buf.put_u16(0x0100); // volume = 1.0
        buf.put_slice(&[0; 10]); // reserved
        Self::put_matrix(buf);
        buf.put_slice(&[0; 24]); // pre-defined
        buf.put_u32(self.track_id + 1); // next track ID
        end_box(buf, start);
    }

    fn write_trak(&self, buf: &mut BytesMut) {
        let trak = begin_box(buf, b"trak");

        let tkhd = begin_box(buf, b"tkhd");
        buf.put_u32(((self.header_version as u32) << 24) | 7); // enabled, in_movie, in_preview
        self.put_times(buf);
        buf.put_u32(self.track_id);
        buf.put_u32(0); // reserved
        self.put_duration(buf);
        buf.put_u64(0); // reserved
        buf.put_u16(0); // layer
        buf.put_u16(0); // alternate group
        buf.put_u16(if self.handler.is_audio() { 0x0100 } else { 0 });
        buf.put_u16(0); // reserved
        Self::put_matrix(buf);
        if self.handler.is_video() {
            buf.put_u32(self.width << 16);
            buf.put_u32(self.height << 16);
        } else {
            buf.put_u64(0);
        }
        end_box(buf, tkhd);

        let mdia = begin_box(buf, b"mdia");

        let mdhd = begin_box(buf, b"mdhd");
        buf.put_u32((self.header_version as u32) << 24);
        self.put_times(buf);
        buf.put_u32(self.timescale);
        self.put_duration(buf);
        buf.put_u16(0x55C4); // language: und
        buf.put_u16(0); // pre_defined
        end_box(buf, mdhd);

        let hdlr = begin_box(buf, b"hdlr");
        buf.put_u32(0); // version/flags
        buf.put_u32(0); // pre_defined
        buf.put_slice(&self.handler.to_bytes());
        buf.put_slice(&[0; 12]); // reserved
        buf.put_slice(b"livesim\0");
        end_box(buf, hdlr);

        self.write_minf(buf);

        end_box(buf, mdia);
        end_box(buf, trak);
    }

    fn write_minf(&self, buf: &mut BytesMut) {
        let minf = begin_box(buf, b"minf");

        match self.handler {
            HandlerType::Video => {
                buf.put_u32(20);
                buf.put_slice(b"vmhd");
                buf.put_u32(1); // version/flags
                buf.put_u64(0); // graphics mode + opcolor
            }
            HandlerType::Audio => {
                buf.put_u32(16);
                buf.put_slice(b"smhd");
                buf.put_u32(0);
                buf.put_u32(0); // balance + reserved
            }
            _ => {
                buf.put_u32(12);
                buf.put_slice(b"sthd");
                buf.put_u32(0);
            }
        }

        // dinf/dref with a self-contained url entry
        buf.put_u32(36);
        buf.put_slice(b"dinf");
        buf.put_u32(28);
        buf.put_slice(b"dref");
        buf.put_u32(0);
        buf.put_u32(1);
        buf.put_u32(12);
        buf.put_slice(b"url ");
        buf.put_u32(1);

        let stbl = begin_box(buf, b"stbl");
        self.write_stsd(buf);
        for (kind, entries) in [(b"stts", 1), (b"stsc", 1), (b"stsz", 2), (b"stco", 1)] {
            buf.put_u32(12 + entries * 4);
            buf.put_slice(kind);
            buf.put_u32(0); // version/flags
            for _ in 0..entries {
                buf.put_u32(0);
            }
        }
        end_box(buf, stbl);

        end_box(buf, minf);
    }

    fn write_stsd(&self, buf: &mut BytesMut) {
        let stsd = begin_box(buf, b"stsd");
        buf.put_u32(0); // version/flags
        buf.put_u32(1); // entry count

        match self.handler {
            HandlerType::Video => {
                let entry = begin_box(buf, b"avc1");
                buf.put_slice(&[0; 6]); // reserved
                buf.put_u16(1); // data reference index
                buf.put_slice(&[0; 16]); // pre_defined + reserved
                buf.put_u16(self.width as u16);
                buf.put_u16(self.height as u16);
                buf.put_u32(0x0048_0000); // 72 dpi
                buf.put_u32(0x0048_0000);
                buf.put_u32(0); // reserved
                buf.put_u16(1); // frame count
                buf.put_slice(&[0; 32]); // compressor name
                buf.put_u16(0x0018); // depth
                buf.put_i16(-1);
                end_box(buf, entry);
            }
            HandlerType::Audio => {
                let entry = begin_box(buf, b"mp4a");
                buf.put_slice(&[0; 6]);
                buf.put_u16(1);
                buf.put_u64(0); // reserved
                buf.put_u16(self.channels);
                buf.put_u16(16); // sample size
                buf.put_u32(0); // pre_defined + reserved
                buf.put_u32(self.sample_rate << 16);
                end_box(buf, entry);
            }
            _ => {
                let entry = begin_box(buf, b"stpp");
                buf.put_slice(&[0; 6]);
                buf.put_u16(1);
                buf.put_slice(b"http://www.w3.org/ns/ttml\0");
                buf.put_u8(0); // schema location
                buf.put_u8(0); // auxiliary mime types
                end_box(buf, entry);
            }
        }

        end_box(buf, stsd);
    }

    fn write_mvex(&self, buf: &mut BytesMut) {
        let mvex = begin_box(buf, b"mvex");

        if let Some(fragment_duration) = self.fragment_duration {
            if self.header_version == 1 {
                buf.put_u32(20);
                buf.put_slice(b"mehd");
                buf.put_u32(0x0100_0000);
                buf.put_u64(fragment_duration);
            } else {
                buf.put_u32(16);
                buf.put_slice(b"mehd");
                buf.put_u32(0);
                buf.put_u32(fragment_duration as u32);
            }
        }

        buf.put_u32(32);
        buf.put_slice(b"trex");
        buf.put_u32(0); // version/flags
        buf.put_u32(self.track_id);
        buf.put_u32(1); // default sample description index
        buf.put_u32(0); // default sample duration
        buf.put_u32(0); // default sample size
        buf.put_u32(0); // default sample flags

        end_box(buf, mvex);
    }
}

impl Default for InitSegmentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write an `styp` box with the given major brand and compatible brands.
pub fn write_styp(major: [u8; 4], compatible: &[[u8; 4]]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(16 + compatible.len() * 4);
    buf.put_u32((16 + compatible.len() * 4) as u32);
    buf.put_slice(b"styp");
    buf.put_slice(&major);
    buf.put_u32(0); // minor version
    for brand in compatible {
        buf.put_slice(brand);
    }
    buf.to_vec()
}

/// Write a version 0 `sidx` box with a single media reference.
pub fn write_sidx(
    reference_id: u32,
    timescale: u32,
    earliest_presentation_time: u32,
    referenced_size: u32,
    subsegment_duration: u32,
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(44);
    buf.put_u32(44);
    buf.put_slice(b"sidx");
    buf.put_u32(0); // version/flags
    buf.put_u32(reference_id);
    buf.put_u32(timescale);
    buf.put_u32(earliest_presentation_time);
    buf.put_u32(0); // first offset
    buf.put_u16(0); // reserved
    buf.put_u16(1); // reference count
    buf.put_u32(referenced_size & 0x7FFF_FFFF);
    buf.put_u32(subsegment_duration);
    buf.put_u32(0x9000_0000); // starts with SAP, SAP type 1
    buf.to_vec()
}
