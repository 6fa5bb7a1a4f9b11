//! Facebook group scrape adapter.
//!
//! Scrape records are flat: no reply graph and no per-message timestamp,
//! only the capture time. Records group into one stream per
//! `(group_name, url)`, order by capture time with the raw id as a
//! tie-break, and get sequence numbers 1..N over the surviving records
//! (empty-after-strip posts are dropped before numbering).

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

use crate::identity::{resolve_instant, resolve_post_id};
use crate::models::{CanonicalPost, IngestStats};
use crate::normalize::clean_chat_text;

#[derive(Debug, Deserialize)]
struct FacebookRecord {
    group: String,
    url: String,
    author: String,
    text: String,
    /// "YYYY-MM-DD HH:MM:SS" capture time, assumed UTC.
    scraped_at: String,
    post_id: String,
}

struct PendingPost {
    record: FacebookRecord,
    text: String,
    captured_at: DateTime<Utc>,
}

/// Build canonical posts from a flat Facebook scrape batch.
pub fn build_posts(
    raw: &Value,
    now: DateTime<Utc>,
    stats: &mut IngestStats,
) -> Result<Vec<CanonicalPost>> {
    let Some(records) = raw.as_array() else {
        bail!("facebook batch must be a JSON array of scrape records");
    };

    // One stream per (group, url); BTreeMap keeps stream order reproducible.
    let mut streams: BTreeMap<(String, String), Vec<PendingPost>> = BTreeMap::new();

    for record in records {
        stats.records_seen += 1;
        let record: FacebookRecord = match serde_json::from_value(record.clone()) {
            Ok(r) => r,
            Err(err) => {
                stats.skipped_malformed += 1;
                warn!(%err, "skipping malformed facebook record");
                continue;
            }
        };

        let text = clean_chat_text(&record.text, &record.author);
        if text.is_empty() {
            stats.dropped_empty += 1;
            continue;
        }

        let captured = resolve_instant(Some(&record.scraped_at), None, now);
        if captured.degraded {
            stats.missing_timestamps += 1;
        }

        streams
            .entry((record.group.clone(), record.url.clone()))
            .or_default()
            .push(PendingPost {
                captured_at: captured.instant,
                text,
                record,
            });
    }

    let mut posts = Vec::new();
    for ((group, url), mut pending) in streams {
        pending.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.record.post_id.cmp(&b.record.post_id))
        });

        let stream_id = format!("facebook:{}:{}", group, url);
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut sequence = 0i64;

        for item in pending {
            let post_id = resolve_post_id(&item.record.post_id);
            if !seen_ids.insert(post_id) {
                stats.duplicate_ids += 1;
                continue;
            }
            sequence += 1;

            posts.push(
                CanonicalPost {
                    stream_id: stream_id.clone(),
                    source_url: url.clone(),
                    post_id,
                    sequence_number: sequence,
                    author: item.record.author,
                    created_at: item.captured_at,
                    updated_at: item.captured_at,
                    text: item.text,
                    reply_to_sequence_number: None,
                    stream_title: group.clone(),
                    calendar_date: item.captured_at.date_naive(),
                    iso_week_year: 0,
                    iso_week_number: 0,
                    is_sender_internal: None,
                }
                .with_derived_dates(),
            );
        }
    }

    Ok(posts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(group: &str, author: &str, text: &str, scraped_at: &str, id: &str) -> Value {
        json!({
            "group": group,
            "url": format!("https://facebook.com/groups/{}", group),
            "author": author,
            "text": text,
            "scraped_at": scraped_at,
            "post_id": id
        })
    }

    #[test]
    fn groups_by_group_and_url_and_numbers_in_capture_order() {
        let raw = json!([
            record("cars", "Ann", "Ann\nBrakes squeal\n2d\nLike", "2023-05-02 10:00:00", "b2"),
            record("cars", "Bob", "Bob\nOil light is on", "2023-05-01 10:00:00", "a1"),
            record("boats", "Cid", "Cid\nHull cracked", "2023-05-01 11:00:00", "c3"),
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();

        let cars: Vec<_> = posts.iter().filter(|p| p.stream_title == "cars").collect();
        assert_eq!(cars.len(), 2);
        assert_eq!(cars[0].author, "Bob");
        assert_eq!(cars[0].sequence_number, 1);
        assert_eq!(cars[1].author, "Ann");
        assert_eq!(cars[1].sequence_number, 2);
        assert_eq!(cars[1].text, "Brakes squeal");

        assert!(posts.iter().any(|p| p.stream_title == "boats"));
        assert!(posts.iter().all(|p| p.reply_to_sequence_number.is_none()));
    }

    #[test]
    fn tie_on_capture_time_breaks_by_raw_id() {
        let raw = json!([
            record("g", "A", "second by id", "2023-05-01 10:00:00", "zz"),
            record("g", "B", "first by id", "2023-05-01 10:00:00", "aa"),
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts[0].text, "first by id");
        assert_eq!(posts[1].text, "second by id");
    }

    #[test]
    fn empty_after_strip_is_dropped_before_numbering() {
        // Only the author line and whitespace: nothing survives the strip.
        let raw = json!([
            record("g", "A", "A\n   ", "2023-05-01 10:00:00", "a"),
            record("g", "B", "B\nReal content here", "2023-05-02 10:00:00", "b"),
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].sequence_number, 1);
        assert_eq!(stats.dropped_empty, 1);
    }

    #[test]
    fn wrong_top_level_shape_fails_fast() {
        let mut stats = IngestStats::default();
        assert!(build_posts(&json!({"group": "x"}), Utc::now(), &mut stats).is_err());
    }

    #[test]
    fn resolved_ids_are_deterministic() {
        let raw = json!([record("g", "A", "A\nhello world", "2023-05-01 10:00:00", "pfbid9xYz")]);
        let mut s1 = IngestStats::default();
        let mut s2 = IngestStats::default();
        let a = build_posts(&raw, Utc::now(), &mut s1).unwrap();
        let b = build_posts(&raw, Utc::now(), &mut s2).unwrap();
        assert_eq!(a[0].post_id, b[0].post_id);
    }
}
