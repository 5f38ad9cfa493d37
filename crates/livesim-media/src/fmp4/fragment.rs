//! Track fragment header and track run parsing.
//!
//! Both boxes have flag-dependent layouts. Parsed values keep the original
//! flags so that [`TrackFragmentHeader::encode`] and [`TrackRun::encode`]
//! reproduce the source layout byte for byte.

use crate::structops;
use bytes::{BufMut, Bytes, BytesMut};

pub const TFHD_BASE_DATA_OFFSET: u32 = 0x00_0001;
pub const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x00_0002;
pub const TFHD_DEFAULT_DURATION: u32 = 0x00_0008;
pub const TFHD_DEFAULT_SIZE: u32 = 0x00_0010;
pub const TFHD_DEFAULT_FLAGS: u32 = 0x00_0020;
pub const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x02_0000;

pub const TRUN_DATA_OFFSET: u32 = 0x00_0001;
pub const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x00_0004;
pub const TRUN_SAMPLE_DURATION: u32 = 0x00_0100;
pub const TRUN_SAMPLE_SIZE: u32 = 0x00_0200;
pub const TRUN_SAMPLE_FLAGS: u32 = 0x00_0400;
pub const TRUN_SAMPLE_CTO: u32 = 0x00_0800;

/// Upper bound on the sample count of a run without per-sample fields.
pub const MAX_DEFAULTED_SAMPLES: usize = 1 << 20;

/// `sample_is_non_sync_sample` bit of the sample flags word.
const NON_SYNC_SAMPLE: u32 = 0x0001_0000;

/// A media sample reconstructed from a track run and its mdat payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub duration: u32,
    pub size: u32,
    pub is_sync: bool,
    pub cto: i32,
    pub data: Bytes,
}

impl Sample {
    /// Sample flags word as written by the fragment builders.
    pub fn flags(&self) -> u32 {
        if self.is_sync {
            0x0200_0000
        } else {
            0x0101_0000
        }
    }
}

/// Parsed `tfhd` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackFragmentHeader {
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<u32>,
}

impl TrackFragmentHeader {
    /// Parse a complete `tfhd` box, header included.
    ///
    /// Returns `None` if the box is shorter than its flags require.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 16 {
            return None;
        }
        let (_, flags) = structops::version_and_flags(data, 8);
        let mut pos = 16;
        let mut take = |width: usize| -> Option<usize> {
            let at = pos;
            pos += width;
            (pos <= data.len()).then_some(at)
        };

        let base_data_offset = match flags & TFHD_BASE_DATA_OFFSET {
            0 => None,
            _ => Some(structops::get_u64(data, take(8)?)),
        };
        let mut optional_u32 = |flag: u32| -> Option<Option<u32>> {
            if flags & flag == 0 {
                return Some(None);
            }
            take(4).map(|at| Some(structops::get_u32(data, at)))
        };
        let sample_description_index = optional_u32(TFHD_SAMPLE_DESCRIPTION_INDEX)?;
        let default_sample_duration = optional_u32(TFHD_DEFAULT_DURATION)?;
        let default_sample_size = optional_u32(TFHD_DEFAULT_SIZE)?;
        let default_sample_flags = optional_u32(TFHD_DEFAULT_FLAGS)?;

        Some(Self {
            flags,
            track_id: structops::get_u32(data, 12),
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        })
    }

    pub fn has_base_data_offset(&self) -> bool {
        self.flags & TFHD_BASE_DATA_OFFSET != 0
    }

    pub fn default_base_is_moof(&self) -> bool {
        self.flags & TFHD_DEFAULT_BASE_IS_MOOF != 0
    }

    /// Serialize as a complete box. Optional fields follow `flags`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(40);
        buf.put_u32(0);
        buf.put_slice(b"tfhd");
        buf.put_u32(self.flags & 0x00FF_FFFF);
        buf.put_u32(self.track_id);
        if self.flags & TFHD_BASE_DATA_OFFSET != 0 {
            buf.put_u64(self.base_data_offset.unwrap_or(0));
        }
        for (flag, value) in [
            (TFHD_SAMPLE_DESCRIPTION_INDEX, self.sample_description_index),
            (TFHD_DEFAULT_DURATION, self.default_sample_duration),
            (TFHD_DEFAULT_SIZE, self.default_sample_size),
            (TFHD_DEFAULT_FLAGS, self.default_sample_flags),
        ] {
            if self.flags & flag != 0 {
                buf.put_u32(value.unwrap_or(0));
            }
        }
        let size = buf.len() as u32;
        structops::set_u32(&mut buf, 0, size);
        buf.to_vec()
    }
}

/// One `trun` sample record. Fields absent from the run's flags are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrunEntry {
    pub duration: u32,
    pub size: u32,
    pub flags: u32,
    pub cto: i32,
}

/// Parsed `trun` box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRun {
    pub version: u8,
    pub flags: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<u32>,
    pub entries: Vec<TrunEntry>,
}

impl TrackRun {
    /// Parse a complete `trun` box, header included.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 16 {
            return None;
        }
        let (version, flags) = structops::version_and_flags(data, 8);
        let sample_count = structops::get_u32(data, 12) as usize;
        let mut pos = 16;

        let data_offset = if flags & TRUN_DATA_OFFSET != 0 {
            if pos + 4 > data.len() {
                return None;
            }
            pos += 4;
            Some(structops::get_i32(data, pos - 4))
        } else {
            None
        };
        let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            if pos + 4 > data.len() {
                return None;
            }
            pos += 4;
            Some(structops::get_u32(data, pos - 4))
        } else {
            None
        };

        let entry_size = Self::entry_size(flags);
        let needed = sample_count.checked_mul(entry_size)?.checked_add(pos)?;
        if data.len() < needed || (entry_size == 0 && sample_count > MAX_DEFAULTED_SAMPLES) {
            return None;
        }

        let mut entries = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            let mut entry = TrunEntry::default();
            if flags & TRUN_SAMPLE_DURATION != 0 {
                entry.duration = structops::get_u32(data, pos);
                pos += 4;
            }
            if flags & TRUN_SAMPLE_SIZE != 0 {
                entry.size = structops::get_u32(data, pos);
                pos += 4;
            }
            if flags & TRUN_SAMPLE_FLAGS != 0 {
                entry.flags = structops::get_u32(data, pos);
                pos += 4;
            }
            if flags & TRUN_SAMPLE_CTO != 0 {
                entry.cto = structops::get_i32(data, pos);
                pos += 4;
            }
            entries.push(entry);
        }

        Some(Self {
            version,
            flags,
            data_offset,
            first_sample_flags,
            entries,
        })
    }

    fn entry_size(flags: u32) -> usize {
        [
            TRUN_SAMPLE_DURATION,
            TRUN_SAMPLE_SIZE,
            TRUN_SAMPLE_FLAGS,
            TRUN_SAMPLE_CTO,
        ]
        .iter()
        .filter(|&&f| flags & f != 0)
        .count()
            * 4
    }

    /// Byte position of the `data_offset` field inside the box, if present.
    pub fn data_offset_position(&self) -> Option<usize> {
        (self.flags & TRUN_DATA_OFFSET != 0).then_some(16)
    }

    pub fn has_sample_sizes(&self) -> bool {
        self.flags & TRUN_SAMPLE_SIZE != 0
    }

    /// Serialize as a complete box.
    pub fn encode(&self) -> Vec<u8> {
        let entry_size = Self::entry_size(self.flags);
        let mut buf = BytesMut::with_capacity(24 + self.entries.len() * entry_size);
        buf.put_u32(0);
        buf.put_slice(b"trun");
        buf.put_u32(((self.version as u32) << 24) | (self.flags & 0x00FF_FFFF));
        buf.put_u32(self.entries.len() as u32);
        if self.flags & TRUN_DATA_OFFSET != 0 {
            buf.put_i32(self.data_offset.unwrap_or(0));
        }
        if self.flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            buf.put_u32(self.first_sample_flags.unwrap_or(0));
        }
        for entry in &self.entries {
            if self.flags & TRUN_SAMPLE_DURATION != 0 {
                buf.put_u32(entry.duration);
            }
            if self.flags & TRUN_SAMPLE_SIZE != 0 {
                buf.put_u32(entry.size);
            }
            if self.flags & TRUN_SAMPLE_FLAGS != 0 {
                buf.put_u32(entry.flags);
            }
            if self.flags & TRUN_SAMPLE_CTO != 0 {
                buf.put_i32(entry.cto);
            }
        }
        let size = buf.len() as u32;
        structops::set_u32(&mut buf, 0, size);
        buf.to_vec()
    }

    /// Duration of sample `i`, falling back to the tfhd default.
    pub fn sample_duration(&self, i: usize, tfhd: &TrackFragmentHeader) -> Option<u32> {
        if self.flags & TRUN_SAMPLE_DURATION != 0 {
            self.entries.get(i).map(|e| e.duration)
        } else {
            tfhd.default_sample_duration
        }
    }

    /// Size of sample `i`, falling back to the tfhd default.
    pub fn sample_size(&self, i: usize, tfhd: &TrackFragmentHeader) -> Option<u32> {
        if self.flags & TRUN_SAMPLE_SIZE != 0 {
            self.entries.get(i).map(|e| e.size)
        } else {
            tfhd.default_sample_size
        }
    }

    fn sample_flags(&self, i: usize, tfhd: &TrackFragmentHeader) -> u32 {
        if self.flags & TRUN_SAMPLE_FLAGS != 0 {
            self.entries.get(i).map_or(0, |e| e.flags)
        } else if let (0, Some(first)) = (i, self.first_sample_flags) {
            first
        } else {
            tfhd.default_sample_flags.unwrap_or(0)
        }
    }

    /// Sum of all sample durations, or `None` if a duration is unknown.
    pub fn total_duration(&self, tfhd: &TrackFragmentHeader) -> Option<u64> {
        (0..self.entries.len())
            .map(|i| self.sample_duration(i, tfhd).map(u64::from))
            .sum()
    }

    /// Sum of all sample sizes, or `None` if a size is unknown.
    pub fn total_size(&self, tfhd: &TrackFragmentHeader) -> Option<u64> {
        (0..self.entries.len())
            .map(|i| self.sample_size(i, tfhd).map(u64::from))
            .sum()
    }

    /// Reconstruct the samples from `payload`, the run's bytes in mdat.
    ///
    /// Returns `None` if a duration or size is unknown or the payload is
    /// shorter than the run.
    pub fn samples(&self, tfhd: &TrackFragmentHeader, payload: &Bytes) -> Option<Vec<Sample>> {
        let mut samples = Vec::with_capacity(self.entries.len());
        let mut pos = 0usize;
        for (i, entry) in self.entries.iter().enumerate() {
            let size = self.sample_size(i, tfhd)?;
            let end = pos + size as usize;
            if end > payload.len() {
                return None;
            }
            samples.push(Sample {
                duration: self.sample_duration(i, tfhd)?,
                size,
                is_sync: self.sample_flags(i, tfhd) & NON_SYNC_SAMPLE == 0,
                cto: entry.cto,
                data: payload.slice(pos..end),
            });
            pos = end;
        }
        Some(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trun_bytes() -> Vec<u8> {
        TrackRun {
            version: 0,
            flags: TRUN_DATA_OFFSET | TRUN_SAMPLE_DURATION | TRUN_SAMPLE_SIZE | TRUN_SAMPLE_FLAGS,
            data_offset: Some(120),
            first_sample_flags: None,
            entries: vec![
                TrunEntry { duration: 3000, size: 4, flags: 0x0200_0000, cto: 0 },
                TrunEntry { duration: 3000, size: 2, flags: 0x0101_0000, cto: 0 },
            ],
        }
        .encode()
    }

    #[test]
    fn test_trun_sample_count_is_bounded() {
        let mut data = vec![0, 0, 0, 20, b't', b'r', b'u', b'n', 0, 0, 0, 0];
        data.extend_from_slice(&u32::MAX.to_be_bytes());
        data.extend_from_slice(&[0; 4]);
        assert_eq!(TrackRun::parse(&data), None);

        // Defaulted samples within the bound still parse.
        structops::set_u32(&mut data, 12, 30);
        assert_eq!(TrackRun::parse(&data).map(|run| run.entries.len()), Some(30));

        // Per-sample fields must fit in the box.
        let mut sized = data.clone();
        structops::set_u32(&mut sized, 8, TRUN_SAMPLE_SIZE);
        assert_eq!(TrackRun::parse(&sized), None);
    }

    #[test]
    fn test_trun_layout_and_parse() {
        let data = trun_bytes();
        assert_eq!(data.len(), 20 + 2 * 12);
        assert_eq!(structops::get_i32(&data, 16), 120);

        let trun = TrackRun::parse(&data).unwrap();
        assert_eq!(trun.encode(), data);
        assert_eq!(trun.data_offset_position(), Some(16));
    }

    #[test]
    fn test_trun_samples_split_payload() {
        let trun = TrackRun::parse(&trun_bytes()).unwrap();
        let tfhd = TrackFragmentHeader::parse(&[0, 0, 0, 16, b't', b'f', b'h', b'd', 0, 2, 0, 0, 0, 0, 0, 1]).unwrap();
        let payload = Bytes::from_static(b"abcdef");

        let samples = trun.samples(&tfhd, &payload).unwrap();
        assert_eq!(samples.len(), 2);
        assert!(samples[0].is_sync);
        assert!(!samples[1].is_sync);
        assert_eq!(&samples[1].data[..], b"ef");
        assert_eq!(trun.total_duration(&tfhd), Some(6000));
    }

    #[test]
    fn test_tfhd_defaults_fill_missing_fields() {
        let tfhd = TrackFragmentHeader {
            flags: TFHD_DEFAULT_DURATION | TFHD_DEFAULT_SIZE | TFHD_DEFAULT_BASE_IS_MOOF,
            track_id: 2,
            base_data_offset: None,
            sample_description_index: None,
            default_sample_duration: Some(1024),
            default_sample_size: Some(10),
            default_sample_flags: None,
        };
        let encoded = tfhd.encode();
        assert_eq!(encoded.len(), 24);
        assert_eq!(TrackFragmentHeader::parse(&encoded), Some(tfhd.clone()));

        let trun = TrackRun {
            version: 0,
            flags: 0,
            data_offset: None,
            first_sample_flags: None,
            entries: vec![TrunEntry::default(); 3],
        };
        assert_eq!(trun.total_duration(&tfhd), Some(3072));
        assert_eq!(trun.total_size(&tfhd), Some(30));
    }

    #[test]
    fn test_truncated_boxes() {
        let data = trun_bytes();
        assert!(TrackRun::parse(&data[..30]).is_none());

        let mut tfhd = vec![0, 0, 0, 16, b't', b'f', b'h', b'd', 0, 0, 0, 1, 0, 0, 0, 1];
        assert!(TrackFragmentHeader::parse(&tfhd).is_none());
        tfhd.extend_from_slice(&[0; 8]);
        assert_eq!(TrackFragmentHeader::parse(&tfhd).unwrap().base_data_offset, Some(0));
    }
}
