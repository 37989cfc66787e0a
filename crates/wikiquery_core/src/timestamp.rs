use std::fmt;

use serde::{Serialize, Serializer};

/// A UTC timestamp held in MediaWiki's 14-digit `YYYYMMDDHHMMSS` form.
///
/// The stored form sorts lexically in chronological order, which is what the
/// sort-key columns rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MwTimestamp(String);

impl MwTimestamp {
    /// Accepts either `YYYYMMDDHHMMSS` or `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.len() {
            14 => parse_mw_form(value),
            20 => parse_iso_form(value),
            _ => None,
        }
    }

    pub fn from_parts(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<Self> {
        if !(1..=9999).contains(&year) || !fields_in_range(year, month, day, hour, minute, second) {
            return None;
        }
        Some(Self(format!(
            "{year:04}{month:02}{day:02}{hour:02}{minute:02}{second:02}"
        )))
    }

    pub fn as_mw(&self) -> &str {
        &self.0
    }

    pub fn to_iso(&self) -> String {
        let raw = &self.0;
        format!(
            "{}-{}-{}T{}:{}:{}Z",
            &raw[0..4],
            &raw[4..6],
            &raw[6..8],
            &raw[8..10],
            &raw[10..12],
            &raw[12..14]
        )
    }
}

impl fmt::Display for MwTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for MwTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

fn parse_mw_form(value: &str) -> Option<MwTimestamp> {
    if !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    let year = value.get(0..4)?.parse::<u32>().ok()?;
    let month = value.get(4..6)?.parse::<u32>().ok()?;
    let day = value.get(6..8)?.parse::<u32>().ok()?;
    let hour = value.get(8..10)?.parse::<u32>().ok()?;
    let minute = value.get(10..12)?.parse::<u32>().ok()?;
    let second = value.get(12..14)?.parse::<u32>().ok()?;
    MwTimestamp::from_parts(year, month, day, hour, minute, second)
}

fn parse_iso_form(value: &str) -> Option<MwTimestamp> {
    let bytes = value.as_bytes();
    if bytes.get(4) != Some(&b'-')
        || bytes.get(7) != Some(&b'-')
        || bytes.get(10) != Some(&b'T')
        || bytes.get(13) != Some(&b':')
        || bytes.get(16) != Some(&b':')
        || bytes.get(19) != Some(&b'Z')
    {
        return None;
    }
    let digits = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = value.get(range)?;
        if !part.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        part.parse::<u32>().ok()
    };
    MwTimestamp::from_parts(
        digits(0..4)?,
        digits(5..7)?,
        digits(8..10)?,
        digits(11..13)?,
        digits(14..16)?,
        digits(17..19)?,
    )
}

fn fields_in_range(year: u32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> bool {
    (1..=12).contains(&month)
        && day >= 1
        && day <= days_in_month(year, month)
        && hour < 24
        && minute < 60
        && second < 60
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: u32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::MwTimestamp;

    #[test]
    fn parses_both_input_forms_to_the_same_value() {
        let mw = MwTimestamp::parse("20240229123005").expect("mw form");
        let iso = MwTimestamp::parse("2024-02-29T12:30:05Z").expect("iso form");
        assert_eq!(mw, iso);
        assert_eq!(mw.as_mw(), "20240229123005");
        assert_eq!(mw.to_iso(), "2024-02-29T12:30:05Z");
    }

    #[test]
    fn rejects_out_of_range_fields() {
        assert!(MwTimestamp::parse("20230229000000").is_none());
        assert!(MwTimestamp::parse("20241301000000").is_none());
        assert!(MwTimestamp::parse("20240101246000").is_none());
        assert!(MwTimestamp::parse("2024-01-01 00:00:00").is_none());
        assert!(MwTimestamp::parse("2024010100000x").is_none());
        assert!(MwTimestamp::parse("").is_none());
    }

    #[test]
    fn lexical_order_is_chronological() {
        let earlier = MwTimestamp::parse("2023-12-31T23:59:59Z").expect("earlier");
        let later = MwTimestamp::parse("2024-01-01T00:00:00Z").expect("later");
        assert!(earlier < later);
        assert!(earlier.as_mw() < later.as_mw());
    }
}
