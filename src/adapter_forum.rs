//! Forum thread adapter.
//!
//! Consumes one thread's JSON (topic, url, ordered posts with native
//! post numbers, HTML bodies, and optional reply pointers) and emits
//! canonical posts. The native `post_number` becomes the sequence number
//! and `reply_to_post_number` maps straight onto the reply graph the
//! grouper walks.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::warn;

use crate::identity::{resolve_instant, resolve_post_id};
use crate::models::{CanonicalPost, IngestStats};
use crate::normalize::html_to_text;

#[derive(Debug, Deserialize)]
struct ForumThread {
    topic: String,
    url: String,
    posts: Vec<Value>,
}

/// One post record. Engagement counters and other extra fields in the
/// source payload are accepted and ignored.
#[derive(Debug, Deserialize)]
struct ForumPostRecord {
    post_number: i64,
    username: String,
    created_at: String,
    #[serde(default)]
    updated_at: Option<String>,
    cooked: String,
    #[serde(default)]
    reply_to_post_number: Option<i64>,
    #[serde(default)]
    post_id: Option<Value>,
}

/// Build canonical posts from one forum thread batch.
///
/// A malformed post record is skipped and counted; a malformed top-level
/// shape is a caller contract violation and fails fast.
pub fn build_posts(
    raw: &Value,
    now: DateTime<Utc>,
    stats: &mut IngestStats,
) -> Result<Vec<CanonicalPost>> {
    let thread: ForumThread = serde_json::from_value(raw.clone())
        .context("forum batch must be an object with topic, url, and posts fields")?;

    let stream_id = format!("forum:{}", thread.url);
    let mut seen_ids: HashSet<i64> = HashSet::new();
    let mut posts = Vec::with_capacity(thread.posts.len());

    for record in &thread.posts {
        stats.records_seen += 1;
        let record: ForumPostRecord = match serde_json::from_value(record.clone()) {
            Ok(r) => r,
            Err(err) => {
                stats.skipped_malformed += 1;
                warn!(%err, "skipping malformed forum post record");
                continue;
            }
        };

        let text = html_to_text(&record.cooked);
        if text.is_empty() {
            stats.dropped_empty += 1;
            continue;
        }

        let post_id = match &record.post_id {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(record.post_number),
            Some(Value::String(s)) => resolve_post_id(s),
            _ => record.post_number,
        };
        if !seen_ids.insert(post_id) {
            stats.duplicate_ids += 1;
            continue;
        }

        let created = resolve_instant(Some(&record.created_at), None, now);
        if created.degraded {
            stats.missing_timestamps += 1;
        }
        let updated = record
            .updated_at
            .as_deref()
            .and_then(crate::identity::parse_instant)
            .unwrap_or(created.instant)
            // created <= updated is a model invariant
            .max(created.instant);

        posts.push(
            CanonicalPost {
                stream_id: stream_id.clone(),
                source_url: thread.url.clone(),
                post_id,
                sequence_number: record.post_number,
                author: record.username,
                created_at: created.instant,
                updated_at: updated,
                text,
                reply_to_sequence_number: record.reply_to_post_number,
                stream_title: thread.topic.clone(),
                calendar_date: created.instant.date_naive(),
                iso_week_year: 0,
                iso_week_number: 0,
                is_sender_internal: None,
            }
            .with_derived_dates(),
        );
    }

    posts.sort_by_key(|p| p.sequence_number);
    Ok(posts)
}
