//! Deterministic identity and timestamp resolution.
//!
//! Sources hand us ids as native integers, hex strings, or opaque
//! composites, and timestamps in four encodings. Both resolvers are pure:
//! the same hint always yields the same `post_id` across process runs
//! (CRC32 is content-stable, unlike the seeded default hasher), and
//! timestamp parsing is a fixed-precedence chain of small strategies so
//! fallback behavior stays independently testable.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Derive a stable integer id from whatever identity hint a source
/// provides.
///
/// Decimal hints parse directly so native forum ids stay recognizable.
/// Hex hints up to 15 digits parse base-16; longer hex (Mongo-style
/// object ids) and arbitrary strings take the CRC32 path.
pub fn resolve_post_id(hint: &str) -> i64 {
    let hint = hint.trim();
    if let Ok(n) = hint.parse::<i64>() {
        return n;
    }
    if !hint.is_empty() && hint.len() <= 15 && hint.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(n) = i64::from_str_radix(hint, 16) {
            return n;
        }
    }
    i64::from(crc32fast::hash(hint.as_bytes()))
}

/// A resolved instant plus whether it came from the last-resort fallback.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedInstant {
    pub instant: DateTime<Utc>,
    /// True when the post carried no usable timestamp data and we fell
    /// back to processing time. Counted upstream, never silent.
    pub degraded: bool,
}

/// Timestamp parser strategies, tried in precedence order:
/// ISO-with-offset, ISO-with-Z, epoch-seconds, naive-local (assumed UTC).
const STRATEGIES: &[fn(&str) -> Option<DateTime<Utc>>] = &[
    parse_iso_with_offset,
    parse_iso_with_z,
    parse_epoch_seconds,
    parse_naive_local,
];

/// Parse one timestamp string through the strategy chain.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    STRATEGIES.iter().find_map(|strategy| strategy(raw))
}

/// Resolve a created/updated instant from the fields a record actually
/// carries: explicit ISO timestamp first, then epoch seconds, then `now`
/// as a flagged last resort.
pub fn resolve_instant(
    iso: Option<&str>,
    epoch_seconds: Option<i64>,
    now: DateTime<Utc>,
) -> ResolvedInstant {
    if let Some(instant) = iso.and_then(parse_instant) {
        return ResolvedInstant {
            instant,
            degraded: false,
        };
    }
    if let Some(instant) = epoch_seconds.and_then(|s| DateTime::from_timestamp(s, 0)) {
        return ResolvedInstant {
            instant,
            degraded: false,
        };
    }
    ResolvedInstant {
        instant: now,
        degraded: true,
    }
}

fn parse_iso_with_offset(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_iso_with_z(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.fZ")
        .ok()
        .map(|dt| dt.and_utc())
}

fn parse_epoch_seconds(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// "YYYY-MM-DD HH:MM:SS" with no zone. Assumed UTC; WATI exports are the
/// documented exception that is knowingly treated the same way.
fn parse_naive_local(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc())
}
