//! Core data models used throughout Convo Harness.
//!
//! These types represent the canonical posts and conversation blocks that
//! flow through the reconstruction pipeline. Every field round-trips JSON,
//! with timestamps rendered as RFC 3339 strings.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The raw-record source a batch was exported from.
///
/// Selects the adapter and the grouping strategy: forum posts carry an
/// explicit reply graph, Facebook streams are chunked by size, and
/// WhatsApp streams are kept whole per contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Forum,
    Facebook,
    Whatsapp,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forum => "forum",
            Self::Facebook => "facebook",
            Self::Whatsapp => "whatsapp",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "forum" => Ok(Self::Forum),
            "facebook" => Ok(Self::Facebook),
            "whatsapp" => Ok(Self::Whatsapp),
            other => anyhow::bail!(
                "Unknown source kind: '{}'. Available: forum, facebook, whatsapp",
                other
            ),
        }
    }
}

/// Unified, source-agnostic message representation produced by an adapter.
///
/// Instances are built once per raw record and immutable afterwards.
/// Within a stream, `post_id` is unique (after dedup) and
/// `sequence_number` is strictly increasing in chronological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalPost {
    /// Logical conversation stream this post belongs to. Stable across
    /// re-imports of the same source.
    pub stream_id: String,
    /// Origin locator.
    pub source_url: String,
    /// Deterministic integer identity, stable across runs for the same
    /// logical message.
    pub post_id: i64,
    /// 1-based position within the stream as observed at processing time.
    pub sequence_number: i64,
    /// Display name of the sender.
    pub author: String,
    pub created_at: DateTime<Utc>,
    /// Equals `created_at` when the source has no edit timestamp.
    pub updated_at: DateTime<Utc>,
    /// Normalized plain-text body; never raw markup.
    pub text: String,
    /// Pointer to another post's `sequence_number` in the same stream,
    /// absent when the source provides no reply graph.
    pub reply_to_sequence_number: Option<i64>,
    /// Human-readable label for the stream.
    pub stream_title: String,
    pub calendar_date: NaiveDate,
    pub iso_week_year: i32,
    pub iso_week_number: u32,
    /// True when the sender is the business/agent side, false for the
    /// customer, `None` when the source carries no role signal.
    pub is_sender_internal: Option<bool>,
}

impl CanonicalPost {
    /// Fill the time-bucketing fields from `created_at`.
    pub fn with_derived_dates(mut self) -> Self {
        let week = self.created_at.iso_week();
        self.calendar_date = self.created_at.date_naive();
        self.iso_week_year = week.year();
        self.iso_week_number = week.week();
        self
    }
}

/// A root post plus its replies, or one fixed-size chunk of a
/// non-threaded stream. Recomputed wholesale on every pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationBlock {
    /// `{stream_id}:{root.sequence_number}`; unique across the corpus.
    pub block_id: String,
    pub stream_id: String,
    pub source_url: String,
    pub stream_title: String,
    pub root_post: CanonicalPost,
    /// Chronological, excluding the root.
    pub replies: Vec<CanonicalPost>,
    /// Newline-delimited transcript of root then replies.
    pub flattened_text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Domain key for cross-block customer grouping (e.g. a phone
    /// number); absent for forum blocks.
    pub external_key: Option<String>,
}

/// Per-run counters for skipped and degraded records.
///
/// Skips are never silent: a systematic data-quality regression shows up
/// here rather than as quietly missing posts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// Raw records inspected, including ones later skipped or dropped.
    pub records_seen: u64,
    /// Canonical posts that made it into a block.
    pub posts_kept: u64,
    /// Records whose shape did not match the source contract.
    pub skipped_malformed: u64,
    /// Records whose text was empty after normalization.
    pub dropped_empty: u64,
    /// Records whose `post_id` was already present in their stream.
    pub duplicate_ids: u64,
    /// Posts that carried no usable timestamp and fell back to
    /// processing time.
    pub missing_timestamps: u64,
}

/// Result of one pipeline run over a single raw batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub blocks: Vec<ConversationBlock>,
    pub stats: IngestStats,
}
