//! Retention policy: which stored artifacts are old enough to delete.
//!
//! Dates are calendar dates on the local clock of this process. There is no
//! timezone anchoring, so near DST changes (or when the storage host's clock
//! disagrees with ours) the boundary can move by one day.

use chrono::{Days, Local, NaiveDate};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Today's date on the local clock.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// `today - retention_days`. Artifacts dated strictly before this are expired.
pub fn cutoff_date(today: NaiveDate, retention_days: u32) -> NaiveDate {
    today
        .checked_sub_days(Days::new(u64::from(retention_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// An artifact dated exactly on the cutoff is kept.
pub fn is_expired(date: NaiveDate, cutoff: NaiveDate) -> bool {
    date < cutoff
}

/// Parses a `YYYY-MM-DD` path segment. Anything else (including `2024-1-5`) is rejected.
pub fn parse_date_segment(segment: &str) -> Option<NaiveDate> {
    let bytes = segment.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    NaiveDate::parse_from_str(segment, DATE_FORMAT).ok()
}

/// Extracts the date segment of `{prefix}/{database}/{date}/{filename}`.
/// Returns `None` for keys outside `prefix` or with a different shape.
pub fn date_segment_of_key<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    let rest = if prefix.is_empty() {
        key
    } else {
        key.strip_prefix(prefix)?.strip_prefix('/')?
    };

    let mut parts = rest.split('/');
    let database = parts.next()?;
    let date = parts.next()?;
    let filename = parts.next()?;
    if database.is_empty() || filename.is_empty() || parts.next().is_some() {
        return None;
    }
    Some(date)
}
