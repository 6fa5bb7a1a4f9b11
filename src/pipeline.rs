//! Pipeline orchestration.
//!
//! Coordinates the full reconstruction flow: adapter → stream partition →
//! grouping → block assembly → deterministic output ordering. The core is
//! a pure, synchronous batch transform; every grouping and identity
//! structure is local to one invocation, so independent batches (one per
//! tenant, say) can run concurrently without shared state.

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;

use crate::adapter_facebook;
use crate::adapter_forum;
use crate::adapter_whatsapp;
use crate::assemble::{assemble_block, sort_blocks};
use crate::config::PipelineConfig;
use crate::group;
use crate::models::{IngestStats, PipelineOutput, SourceKind};

/// Run the reconstruction pipeline over one raw batch.
///
/// `raw` is the already-fetched JSON payload for the given source kind
/// (fetching and persistence belong to the surrounding application). An
/// empty batch is not an error and produces an empty block list; a batch
/// whose top-level shape violates the source contract fails fast.
pub fn run_pipeline(
    config: &PipelineConfig,
    kind: SourceKind,
    raw: &Value,
) -> Result<PipelineOutput> {
    let now = Utc::now();
    let mut stats = IngestStats::default();

    let posts = match kind {
        SourceKind::Forum => adapter_forum::build_posts(raw, now, &mut stats)?,
        SourceKind::Facebook => adapter_facebook::build_posts(raw, now, &mut stats)?,
        SourceKind::Whatsapp => adapter_whatsapp::build_posts(raw, now, &mut stats)?,
    };
    stats.posts_kept = posts.len() as u64;

    let mut blocks = Vec::new();
    for (stream_id, stream_posts) in group::partition_streams(posts) {
        let external_key = match kind {
            // the phone number (or conversation fallback) behind the stream
            SourceKind::Whatsapp => Some(
                stream_id
                    .strip_prefix("whatsapp:")
                    .unwrap_or(&stream_id)
                    .to_string(),
            ),
            _ => None,
        };

        let groups = match kind {
            SourceKind::Forum => group::group_by_reply_graph(stream_posts),
            SourceKind::Facebook => {
                group::chunk_stream(stream_posts, config.grouping.max_posts_per_block)
            }
            SourceKind::Whatsapp => group::lifetime_stream(stream_posts),
        };

        blocks.extend(
            groups
                .into_iter()
                .filter_map(|g| assemble_block(g, external_key.clone())),
        );
    }

    sort_blocks(&mut blocks);
    Ok(PipelineOutput { blocks, stats })
}
