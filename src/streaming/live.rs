//! Per-request live segment production.

use crate::analysis::{ContentAnalyzer, RepresentationAnalysis};
use crate::config::{Config, MediaKind};
use crate::error::{LiveError, Result};
use crate::timing::{
    AvailabilityTimeOffset, AvailabilityWindow, LoopTimeMapper, SegmentMapping, Verdict,
};
use bytes::Bytes;
use livesim_media::{
    live_init, mux_init, mux_media, Chunker, MediaSegmentRewriter, RewriteOptions, TimelineEntry,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-request rewrite switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Keep `sidx` boxes, shifted to live time.
    pub keep_sidx: bool,
    /// SCTE-35 splice density; zero disables splice events.
    pub splices_per_minute: u32,
}

/// A segment request served by [`LiveSource::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentRequest {
    Init { representation: String },
    Media { representation: String, number: u32 },
    MuxedInit { first: String, second: String },
    MuxedMedia { first: String, second: String, number: u32 },
}

/// A loaded representation.
#[derive(Debug, Clone)]
pub struct Representation {
    pub kind: MediaKind,
    pub analysis: RepresentationAnalysis,
}

/// Produces live init and media segments from looping VoD content.
///
/// All state is read-only after construction, so one source can serve
/// concurrent requests through an `Arc`.
pub struct LiveSource {
    analyzer: ContentAnalyzer,
    mapper: LoopTimeMapper,
    representations: HashMap<String, Representation>,
    rewriter: MediaSegmentRewriter,
    options: RequestOptions,
}

impl LiveSource {
    /// Load every configured representation, analyzing content that has no
    /// persisted timeline.
    pub fn from_config(config: &Config) -> Result<Self> {
        let analyzer = ContentAnalyzer::new(&config.content);
        let live = &config.live;
        let mapper = LoopTimeMapper::from_config(config);

        let mut representations = HashMap::new();
        for media in &config.media {
            for name in &media.representations {
                let analysis = analyzer.load(name, media.timescale)?;
                representations.insert(
                    name.clone(),
                    Representation {
                        kind: media.kind,
                        analysis,
                    },
                );
            }
        }
        info!(
            representations = representations.len(),
            wrap_s = mapper.descriptor().wrap_duration_s(),
            "Loaded live source"
        );

        Ok(Self {
            analyzer,
            mapper,
            representations,
            rewriter: MediaSegmentRewriter::new(),
            options: RequestOptions {
                keep_sidx: live.keep_sidx,
                splices_per_minute: live.splices_per_minute,
            },
        })
    }

    pub fn mapper(&self) -> &LoopTimeMapper {
        &self.mapper
    }

    /// Options taken from the configuration.
    pub fn default_options(&self) -> RequestOptions {
        self.options
    }

    pub fn representation(&self, name: &str) -> Result<&Representation> {
        self.representations
            .get(name)
            .ok_or_else(|| LiveError::UnknownRepresentation(name.to_string()))
    }

    pub fn representation_names(&self) -> impl Iterator<Item = &str> {
        self.representations.keys().map(String::as_str)
    }

    /// Init segment with all durations zeroed.
    pub fn init_segment(&self, representation: &str) -> Result<Vec<u8>> {
        self.representation(representation)?;
        let data = std::fs::read(self.analyzer.init_path(representation))?;
        Ok(live_init(&data)?)
    }

    /// Two-track init segment of two representations.
    pub fn muxed_init_segment(&self, first: &str, second: &str) -> Result<Vec<u8>> {
        let first = self.init_segment(first)?;
        let second = self.init_segment(second)?;
        Ok(mux_init(&first, &second)?)
    }

    /// Map `number` and check its availability at `now`.
    pub fn check_availability(&self, now: f64, number: u32) -> Result<SegmentMapping> {
        admit(self.mapper.availability(now, number), number)
    }

    fn rewrite(
        &self,
        representation: &str,
        mapping: &SegmentMapping,
        options: RequestOptions,
    ) -> Result<Vec<u8>> {
        let rep = self.representation(representation)?;
        let path = self.analyzer.segment_path(representation, mapping.vod_nr);
        let data = std::fs::read(&path)?;

        let rewrite_options = RewriteOptions {
            sequence_number: mapping.live_nr,
            offset_seconds: mapping.presentation_offset_s,
            timescale: rep.analysis.track.timescale,
            is_last: mapping.is_last,
            keep_sidx: options.keep_sidx,
            splices_per_minute: options.splices_per_minute,
            text_payload: rep.analysis.track.handler.is_text(),
        };
        let rewritten = self.rewriter.rewrite(&data, &rewrite_options)?;

        info!(
            representation,
            live_nr = mapping.live_nr,
            vod_nr = mapping.vod_nr,
            decode_time = rewritten.base_media_decode_time,
            size = rewritten.data.len(),
            "Serving media segment"
        );
        Ok(rewritten.data)
    }

    /// Live media segment `number` of `representation` at wall-clock `now`.
    pub fn media_segment(
        &self,
        now: f64,
        representation: &str,
        number: u32,
        options: RequestOptions,
    ) -> Result<Vec<u8>> {
        self.representation(representation)?;
        let mapping = self.check_availability(now, number)?;
        self.rewrite(representation, &mapping, options)
    }

    /// Live media segment of two representations sharing one `mdat`.
    pub fn muxed_media_segment(
        &self,
        now: f64,
        first: &str,
        second: &str,
        number: u32,
        options: RequestOptions,
    ) -> Result<Vec<u8>> {
        self.representation(first)?;
        self.representation(second)?;
        let mapping = self.check_availability(now, number)?;
        let first = self.rewrite(first, &mapping, options)?;
        let second = self.rewrite(second, &mapping, options)?;
        Ok(mux_media(&first, &second)?)
    }

    /// Low-latency chunks of a live media segment.
    ///
    /// The segment may be requested while it is still being produced; each
    /// chunk reports the wall-clock instant it completes.
    pub fn media_chunks(
        &self,
        now: f64,
        representation: &str,
        number: u32,
        samples_per_chunk: usize,
        options: RequestOptions,
    ) -> Result<Chunker> {
        let rep = self.representation(representation)?;
        // Chunks become available from the start of the segment.
        let segment_duration = self.mapper.descriptor().segment_duration_s as f64;
        let mapper = self
            .mapper
            .clone()
            .availability_time_offset(AvailabilityTimeOffset::Finite(segment_duration));
        let mapping = admit(mapper.availability(now, number), number)?;
        let data = self.rewrite(representation, &mapping, options)?;

        let segment_start = self.mapper.availability_start_time() + mapping.segment_time_s as f64;
        Ok(Chunker::new(
            Bytes::from(data),
            samples_per_chunk,
            segment_start,
            rep.analysis.track.timescale,
        )?)
    }

    pub fn availability_window(&self, now: f64) -> AvailabilityWindow {
        self.mapper.availability_window(now)
    }

    /// Timeline entries of `representation` for the live tick window `[start, end)`.
    pub fn timeline(&self, representation: &str, start: u64, end: u64) -> Result<Vec<TimelineEntry>> {
        let rep = self.representation(representation)?;
        Ok(rep.analysis.timeline.timeline(start, end))
    }

    /// Serve `request` on the blocking thread pool.
    pub async fn fetch(
        self: &Arc<Self>,
        now: f64,
        request: SegmentRequest,
        options: RequestOptions,
    ) -> Result<Bytes> {
        let source = Arc::clone(self);
        let data = tokio::task::spawn_blocking(move || match request {
            SegmentRequest::Init { representation } => source.init_segment(&representation),
            SegmentRequest::Media {
                representation,
                number,
            } => source.media_segment(now, &representation, number, options),
            SegmentRequest::MuxedInit { first, second } => source.muxed_init_segment(&first, &second),
            SegmentRequest::MuxedMedia {
                first,
                second,
                number,
            } => source.muxed_media_segment(now, &first, &second, number, options),
        })
        .await
        .map_err(|e| LiveError::Task(e.to_string()))??;
        Ok(Bytes::from(data))
    }
}

/// Turn a verdict into a mapping or a boundary error.
fn admit(verdict: Verdict, number: u32) -> Result<SegmentMapping> {
    match verdict {
        Verdict::Available(mapping) => Ok(mapping),
        Verdict::NotYetAvailable { wait_s, .. } => {
            warn!(number, wait_s, "Segment requested too early");
            Err(LiveError::NotYetAvailable {
                segment: number,
                wait_s,
            })
        }
        Verdict::ExpiredFromWindow { age_s } => {
            warn!(number, age_s, "Segment requested after expiry");
            Err(LiveError::ExpiredFromWindow {
                segment: number,
                age_s,
            })
        }
        Verdict::BeyondEnd => {
            debug!(number, "Segment requested beyond the end");
            Err(LiveError::BeyondEnd { segment: number })
        }
    }
}
