//! SCTE-35 splice events carried in DASH `emsg` boxes.
//!
//! Splices follow a fixed per-minute schedule: with `n` splices per minute
//! they fall at `m * 60 + floor(k * 60 / n)` seconds of media time, so every
//! minute starts with a splice even when `n` does not divide 60. A segment
//! announces a splice when one of its pre-warning instants, 8 or 6 seconds
//! before the splice, falls inside the segment's `[start, end]` interval.
//! Both bounds are inclusive, so a lookback instant that lands exactly on a
//! segment boundary announces the splice in both adjacent segments.

use bytes::{BufMut, BytesMut};
use crc::{Crc, CRC_32_MPEG_2};

/// Scheme of binary SCTE-35 cues in `emsg`.
pub const SCHEME_ID_URI: &str = "urn:scte:scte35:2013:bin";

/// Timescale of splice times and event durations.
pub const TIMESCALE: u32 = 90_000;

/// Length of every scheduled ad break.
pub const BREAK_DURATION_S: u64 = 10;

/// Lookback instants before a splice that trigger its announcement.
const PRE_WARNINGS_S: [f64; 2] = [8.0, 6.0];

const CRC_MPEG2: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

/// One scheduled splice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpliceEvent {
    /// Index of the splice in the schedule, used as the event id.
    pub event_id: u32,
    /// Splice instant in seconds of media time.
    pub splice_time_s: u64,
    pub duration_s: u64,
}

impl SpliceEvent {
    /// Splice instant in [`TIMESCALE`] units.
    pub fn splice_time(&self) -> u64 {
        self.splice_time_s * TIMESCALE as u64
    }

    /// Encode as a version 1 `emsg` box with a binary splice_insert cue.
    pub fn to_emsg(&self) -> Vec<u8> {
        let message = splice_insert_section(
            self.event_id,
            self.splice_time(),
            self.duration_s * TIMESCALE as u64,
        );

        let mut buf = BytesMut::with_capacity(64 + message.len());
        buf.put_u32(0); // placeholder
        buf.put_slice(b"emsg");
        buf.put_u32(0x0100_0000); // version 1
        buf.put_u32(TIMESCALE);
        buf.put_u64(self.splice_time());
        buf.put_u32((self.duration_s * TIMESCALE as u64) as u32);
        buf.put_u32(self.event_id);
        buf.put_slice(SCHEME_ID_URI.as_bytes());
        buf.put_u8(0);
        buf.put_u8(0); // empty value
        buf.put_slice(&message);

        let size = (buf.len() as u32).to_be_bytes();
        buf[0..4].copy_from_slice(&size);
        buf.to_vec()
    }
}

/// Splices announced by a segment covering `[start_s, end_s]` media seconds.
///
/// A splice may be announced by two consecutive segments when a lookback
/// instant coincides with their shared boundary.
pub fn splices_for_segment(start_s: f64, end_s: f64, splices_per_minute: u32) -> Vec<SpliceEvent> {
    if splices_per_minute == 0 || end_s < start_s {
        return Vec::new();
    }
    let per_minute = splices_per_minute.min(60) as u64;

    // Any announced splice lies in [start + 6, end + 8].
    let first_minute = ((start_s + PRE_WARNINGS_S[1]) / 60.0).floor().max(0.0) as u64;
    let last_minute = ((end_s + PRE_WARNINGS_S[0]) / 60.0).floor().max(0.0) as u64;

    (first_minute..=last_minute)
        .flat_map(|minute| (0..per_minute).map(move |k| (minute, k)))
        .filter_map(|(minute, k)| {
            let splice_time_s = minute * 60 + k * 60 / per_minute;
            let splice = splice_time_s as f64;
            let announced = PRE_WARNINGS_S
                .iter()
                .any(|lookback| (start_s..=end_s).contains(&(splice - lookback)));
            announced.then(|| SpliceEvent {
                event_id: (minute * per_minute + k) as u32,
                splice_time_s,
                duration_s: BREAK_DURATION_S,
            })
        })
        .collect()
}

/// Build a `splice_info_section` holding one out-of-network `splice_insert`.
///
/// `pts` and `duration` are 90 kHz ticks, truncated to 33 bits.
pub fn splice_insert_section(event_id: u32, pts: u64, duration: u64) -> Vec<u8> {
    const PTS_MASK: u64 = (1 << 33) - 1;
    let pts = pts & PTS_MASK;
    let duration = duration & PTS_MASK;

    let mut command = BytesMut::with_capacity(20);
    command.put_u32(event_id);
    command.put_u8(0x7F); // not cancelled, reserved bits set
    command.put_u8(0xEF); // out_of_network, program_splice, duration_flag, not immediate
    command.put_u8(0xFE | (pts >> 32) as u8); // time_specified_flag + pts bit 32
    command.put_u32(pts as u32);
    command.put_u8(0xFE | (duration >> 32) as u8); // auto_return + duration bit 32
    command.put_u32(duration as u32);
    command.put_u16(0); // unique_program_id
    command.put_u8(0); // avail_num
    command.put_u8(0); // avails_expected

    let mut section = BytesMut::with_capacity(40);
    section.put_u8(0xFC); // table_id
    section.put_u16(0); // section_length placeholder
    section.put_u8(0); // protocol_version
    section.put_u8(0); // not encrypted, pts_adjustment bit 32
    section.put_u32(0); // pts_adjustment
    section.put_u8(0); // cw_index
    section.put_u8(0xFF); // tier (12 bits) + command length (12 bits)
    section.put_u16(0xF000 | command.len() as u16);
    section.put_u8(0x05); // splice_insert
    section.put_slice(&command);
    section.put_u16(0); // descriptor_loop_length

    // section_length counts everything after itself, CRC included.
    let section_length = (section.len() + 4 - 3) as u16;
    section[1..3].copy_from_slice(&(0x3000 | section_length).to_be_bytes());

    let crc = CRC_MPEG2.checksum(&section);
    section.put_u32(crc);
    section.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structops;

    #[test]
    fn test_schedule_one_per_minute() {
        // The 6 s segment [48, 54] contains 60 - 8.
        let events = splices_for_segment(48.0, 54.0, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].splice_time_s, 60);
        assert_eq!(events[0].event_id, 1);

        assert!(splices_for_segment(36.0, 42.0, 1).is_empty());
        assert!(splices_for_segment(48.0, 54.0, 0).is_empty());
    }

    #[test]
    fn test_lookback_on_boundary_places_splice_twice() {
        // 60 - 6 = 54 is the end of [48, 54] and the start of [54, 60].
        let before = splices_for_segment(48.0, 54.0, 1);
        let after = splices_for_segment(54.0, 60.0, 1);
        assert_eq!(before, after);
        assert_eq!(after[0].splice_time_s, 60);

        // Shifted by one second only the 6 s lookback hits.
        assert_eq!(splices_for_segment(49.0, 55.0, 1).len(), 1);
        assert!(splices_for_segment(55.0, 61.0, 1).is_empty());
    }

    #[test]
    fn test_schedule_with_several_splices_per_minute() {
        let times: Vec<u64> = splices_for_segment(0.0, 30.0, 4)
            .iter()
            .map(|e| e.splice_time_s)
            .collect();
        assert_eq!(times, vec![15, 30]);
    }

    #[test]
    fn test_schedule_restarts_every_minute() {
        // Seven per minute: 0, 8, 17, 25, 34, 42, 51, then 60.
        let times: Vec<u64> = splices_for_segment(44.0, 54.0, 7)
            .iter()
            .map(|e| e.splice_time_s)
            .collect();
        assert_eq!(times, vec![51, 60]);

        let events = splices_for_segment(54.0, 60.0, 7);
        assert_eq!(events.iter().map(|e| e.splice_time_s).collect::<Vec<_>>(), vec![60, 68]);
        assert_eq!(events[0].event_id, 7);
    }

    #[test]
    fn test_section_crc_and_length() {
        let section = splice_insert_section(7, 60 * 90_000, 10 * 90_000);
        assert_eq!(section[0], 0xFC);
        let section_length = (structops::get_u32(&[0, 0, section[1], section[2]], 0) & 0x0FFF) as usize;
        assert_eq!(section_length + 3, section.len());
        assert_eq!(section[13], 0x05);

        // CRC over the whole section including its own checksum is zero.
        assert_eq!(CRC_MPEG2.checksum(&section), 0);
    }

    #[test]
    fn test_emsg_layout() {
        let event = SpliceEvent {
            event_id: 3,
            splice_time_s: 180,
            duration_s: BREAK_DURATION_S,
        };
        let emsg = event.to_emsg();
        assert_eq!(&emsg[4..8], b"emsg");
        assert_eq!(structops::get_u32(&emsg, 0) as usize, emsg.len());
        assert_eq!(emsg[8], 1);
        assert_eq!(structops::get_u32(&emsg, 12), TIMESCALE);
        assert_eq!(structops::get_u64(&emsg, 16), 180 * 90_000);
        assert_eq!(structops::get_u32(&emsg, 24), 900_000);
        assert_eq!(structops::get_u32(&emsg, 28), 3);
        assert_eq!(&emsg[32..32 + SCHEME_ID_URI.len()], SCHEME_ID_URI.as_bytes());
    }
}
