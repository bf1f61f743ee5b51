//! FILETIME helpers.

/// Seconds between 1601-01-01 and 1970-01-01.
const WINDOWS_EPOCH_OFFSET: u64 = 11_644_473_600;

/// Convert Windows FILETIME (100ns since 1601-01-01) to an RFC 3339 string.
///
/// Zero means "not set" and values before the Unix epoch are treated as
/// garbage; both return `None`.
pub fn filetime_to_iso(filetime: u64) -> Option<String> {
    if filetime == 0 {
        return None;
    }
    let seconds = filetime / 10_000_000;
    if seconds < WINDOWS_EPOCH_OFFSET {
        return None;
    }
    let unix_seconds = seconds - WINDOWS_EPOCH_OFFSET;
    let nanos = ((filetime % 10_000_000) * 100) as u32;

    chrono::DateTime::from_timestamp(unix_seconds as i64, nanos)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}
