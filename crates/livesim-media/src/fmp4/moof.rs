//! Movie fragment (moof + mdat) builder.

use super::fragment::{
    Sample, TFHD_DEFAULT_BASE_IS_MOOF, TRUN_DATA_OFFSET, TRUN_SAMPLE_CTO, TRUN_SAMPLE_DURATION,
    TRUN_SAMPLE_FLAGS, TRUN_SAMPLE_SIZE,
};
use bytes::{BufMut, BytesMut};

/// Builder for single-track movie fragments.
pub struct MoofBuilder {
    sequence_number: u32,
    track_id: u32,
    base_media_decode_time: u64,
    tfdt_version: Option<u8>,
}

impl MoofBuilder {
    /// Create a new moof builder.
    pub fn new(sequence_number: u32, track_id: u32) -> Self {
        Self {
            sequence_number,
            track_id,
            base_media_decode_time: 0,
            tfdt_version: None,
        }
    }

    /// Set base media decode time.
    pub fn base_media_decode_time(mut self, time: u64) -> Self {
        self.base_media_decode_time = time;
        self
    }

    /// Force the tfdt version. By default version 0 is used whenever the
    /// decode time fits in 32 bits.
    pub fn tfdt_version(mut self, version: u8) -> Self {
        self.tfdt_version = Some(version);
        self
    }

    /// Build a complete `moof` + `mdat` pair carrying the samples' payloads.
    pub fn build(&self, samples: &[Sample]) -> Vec<u8> {
        let payload_size: usize = samples.iter().map(|s| s.data.len()).sum();
        let mut buf = BytesMut::with_capacity(256 + samples.len() * 16 + payload_size);

        self.write_moof(&mut buf, samples);

        buf.put_u32((payload_size + 8) as u32);
        buf.put_slice(b"mdat");
        for sample in samples {
            buf.put_slice(&sample.data);
        }

        buf.to_vec()
    }

    /// Build just the moof box without mdat.
    pub fn build_moof_only(&self, samples: &[Sample]) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(256 + samples.len() * 16);
        self.write_moof(&mut buf, samples);
        buf.to_vec()
    }

    fn write_moof(&self, buf: &mut BytesMut, samples: &[Sample]) {
        let moof_start = buf.len();
        buf.put_u32(0); // placeholder
        buf.put_slice(b"moof");

        buf.put_u32(16);
        buf.put_slice(b"mfhd");
        buf.put_u32(0); // version/flags
        buf.put_u32(self.sequence_number);

        let traf_start = buf.len();
        buf.put_u32(0); // placeholder
        buf.put_slice(b"traf");

        buf.put_u32(16);
        buf.put_slice(b"tfhd");
        buf.put_u32(TFHD_DEFAULT_BASE_IS_MOOF);
        buf.put_u32(self.track_id);

        self.write_tfdt(buf);
        let data_offset_pos = self.write_trun(buf, samples);

        let traf_size = (buf.len() - traf_start) as u32;
        buf[traf_start..traf_start + 4].copy_from_slice(&traf_size.to_be_bytes());

        let moof_size = (buf.len() - moof_start) as u32;
        buf[moof_start..moof_start + 4].copy_from_slice(&moof_size.to_be_bytes());

        // With default-base-is-moof the offset counts from the moof start and
        // the payload begins right after the 8-byte mdat header.
        let data_offset = (moof_size + 8) as i32;
        buf[data_offset_pos..data_offset_pos + 4].copy_from_slice(&data_offset.to_be_bytes());
    }

    fn write_tfdt(&self, buf: &mut BytesMut) {
        let version = self
            .tfdt_version
            .unwrap_or(if self.base_media_decode_time > u32::MAX as u64 { 1 } else { 0 });
        if version == 1 {
            buf.put_u32(20);
            buf.put_slice(b"tfdt");
            buf.put_u32(0x0100_0000);
            buf.put_u64(self.base_media_decode_time);
        } else {
            buf.put_u32(16);
            buf.put_slice(b"tfdt");
            buf.put_u32(0);
            buf.put_u32(self.base_media_decode_time as u32);
        }
    }

    /// Returns the buffer position of the data_offset field.
    fn write_trun(&self, buf: &mut BytesMut, samples: &[Sample]) -> usize {
        let flags = TRUN_DATA_OFFSET
            | TRUN_SAMPLE_DURATION
            | TRUN_SAMPLE_SIZE
            | TRUN_SAMPLE_FLAGS
            | TRUN_SAMPLE_CTO;
        let size = 20 + samples.len() * 16;

        buf.put_u32(size as u32);
        buf.put_slice(b"trun");
        buf.put_u32(0x0100_0000 | flags); // version 1: signed composition offsets
        buf.put_u32(samples.len() as u32);

        let data_offset_pos = buf.len();
        buf.put_i32(0); // placeholder

        for sample in samples {
            buf.put_u32(sample.duration);
            buf.put_u32(sample.data.len() as u32);
            buf.put_u32(sample.flags());
            buf.put_i32(sample.cto);
        }

        data_offset_pos
    }
}
