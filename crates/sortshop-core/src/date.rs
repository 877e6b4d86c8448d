use std::sync::LazyLock;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

/// Fields a creation date is resolved from, in lookup order.
pub const CREATION_DATE_FIELDS: [&str; 4] =
    ["FileModifyDate", "ModifyDate", "CreateDate", "DateTimeOriginal"];

/// Fields written by date unification, highest priority first.
pub const UNIFY_DATE_FIELDS: [&str; 4] =
    ["DateTimeOriginal", "CreateDate", "ModifyDate", "FileModifyDate"];

static EXIF_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(\d{4}[:\-]\d{2}[:\-]\d{2}[ T]\d{2}:\d{2}:\d{2})(?:\.\d+)?\s*(Z|[+\-]\d{2}:?\d{2})?$",
    )
    .unwrap()
});

/// Parse an exiftool date like `2020:04:23 20:53:00+01:00`.
///
/// exiftool prints offsets as `+HH:MM`, `+HHMM` or not at all; a missing
/// offset is taken as UTC. Sub-second digits are dropped.
pub fn parse_exiftool_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let caps = EXIF_DATE_RE.captures(s.trim())?;
    let stamp = caps.get(1)?.as_str().replace('-', ":").replace('T', " ");
    let offset = match caps.get(2).map(|m| m.as_str()) {
        None | Some("Z") => "+0000".to_string(),
        Some(o) => o.replace(':', ""),
    };
    DateTime::parse_from_str(&format!("{}{}", stamp, offset), "%Y:%m:%d %H:%M:%S%z").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn offsets_are_normalized() {
        let a = parse_exiftool_date("2020:04:23 20:53:00+01:00").unwrap();
        let b = parse_exiftool_date("2020:04:23 20:53:00+0100").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.offset().local_minus_utc(), 3600);
        assert_eq!((a.year(), a.month(), a.day(), a.hour()), (2020, 4, 23, 20));
    }

    #[test]
    fn missing_offset_is_utc() {
        let d = parse_exiftool_date("2019:12:31 23:59:59").unwrap();
        assert_eq!(d.offset().local_minus_utc(), 0);
        assert_eq!(d.second(), 59);
    }

    #[test]
    fn subseconds_and_garbage() {
        assert!(parse_exiftool_date("2019:12:31 23:59:59.123+02:00").is_some());
        assert!(parse_exiftool_date("0000:00:00 00:00:00").is_none());
        assert!(parse_exiftool_date("yesterday").is_none());
    }
}
