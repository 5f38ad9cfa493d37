//! Timed text (TTML) payload regeneration.

use regex::bytes::{Captures, Regex};
use std::sync::OnceLock;

/// Token replaced by the live segment number.
pub const NUMBER_TOKEN: &str = "$Number$";

fn timestamp_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(begin|end)="(\d+):(\d{2}):(\d{2})\.(\d{3})""#)
            .expect("static timestamp pattern is valid")
    })
}

fn parse_u64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, b| acc.saturating_mul(10).saturating_add((b - b'0') as u64))
}

/// Format milliseconds as `HH:MM:SS.mmm`.
pub fn format_clock(ms: u64) -> String {
    let (secs, millis) = (ms / 1000, ms % 1000);
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        millis
    )
}

/// Shift every `begin`/`end` clock time by `offset_ms` and substitute the
/// segment number token.
pub fn regenerate_ttml(document: &[u8], offset_ms: u64, segment_number: u64) -> Vec<u8> {
    let shifted = timestamp_pattern().replace_all(document, |caps: &Captures<'_>| {
        let ms = parse_u64(&caps[2])
            .saturating_mul(3_600_000)
            .saturating_add(parse_u64(&caps[3]) * 60_000)
            .saturating_add(parse_u64(&caps[4]) * 1000)
            .saturating_add(parse_u64(&caps[5]));
        let attribute = String::from_utf8_lossy(&caps[1]);
        format!(r#"{attribute}="{}""#, format_clock(ms.saturating_add(offset_ms))).into_bytes()
    });

    let number = segment_number.to_string();
    let token = NUMBER_TOKEN.as_bytes();
    let mut out = Vec::with_capacity(shifted.len() + 16);
    let mut rest: &[u8] = &shifted;
    while let Some(pos) = rest.windows(token.len()).position(|w| w == token) {
        out.extend_from_slice(&rest[..pos]);
        out.extend_from_slice(number.as_bytes());
        rest = &rest[pos + token.len()..];
    }
    out.extend_from_slice(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift_clock_times() {
        let doc = br#"<p begin="00:00:01.500" end="00:00:03.000">Segment $Number$</p>"#;
        let out = regenerate_ttml(doc, 2_100_000, 350);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<p begin="00:35:01.500" end="00:35:03.000">Segment 350</p>"#
        );
    }

    #[test]
    fn test_hours_roll_past_two_digits() {
        assert_eq!(format_clock(360_000_000 + 61_001), "100:01:01.001");
    }

    #[test]
    fn test_oversized_hours_saturate() {
        let doc = br#"<p begin="99999999999999999999:00:00.000">x</p>"#;
        let out = String::from_utf8(regenerate_ttml(doc, 6000, 1)).unwrap();
        assert!(out.starts_with(r#"<p begin=""#));
        assert!(out.contains(&format_clock(u64::MAX)));
    }

    #[test]
    fn test_untouched_without_matches() {
        let doc = b"<tt><body/></tt>";
        assert_eq!(regenerate_ttml(doc, 6000, 1), doc.to_vec());
    }

    #[test]
    fn test_repeated_tokens() {
        let out = regenerate_ttml(b"$Number$-$Number$", 0, 12);
        assert_eq!(out, b"12-12");
    }
}
