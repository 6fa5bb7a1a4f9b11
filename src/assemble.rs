//! Conversation block assembly.
//!
//! Turns one grouped post list into a [`ConversationBlock`]: pick the
//! root, split off the replies, flatten everything into a readable
//! transcript, and compute the block's time bounds. Blocks are value
//! objects recomputed wholesale each run; `block_id` is derived, never
//! stored, so re-imports land on the same ids.

use crate::group::PostGroup;
use crate::models::{CanonicalPost, ConversationBlock};

/// Transcript timestamp rendering: date + time with an explicit UTC
/// designation, unambiguous across chat sources.
const TRANSCRIPT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M UTC";

/// Assemble one group into a block. Returns `None` for an empty group.
///
/// Root selection: the post matching the group's root sequence number
/// for reply-graph groups, else the chronologically first post. Replies
/// keep chronological order.
pub fn assemble_block(group: PostGroup, external_key: Option<String>) -> Option<ConversationBlock> {
    let PostGroup {
        root_sequence,
        mut posts,
    } = group;
    if posts.is_empty() {
        return None;
    }
    crate::group::sort_chronological(&mut posts);

    let start_time = posts.first()?.created_at;
    let end_time = posts.last()?.created_at;

    let root_index = match root_sequence {
        Some(root) => posts
            .iter()
            .position(|p| p.sequence_number == root)
            .unwrap_or(0),
        None => 0,
    };
    let root_post = posts.remove(root_index);
    let replies = posts;

    let flattened_text = flatten_transcript(&root_post, &replies);

    Some(ConversationBlock {
        block_id: format!("{}:{}", root_post.stream_id, root_post.sequence_number),
        stream_id: root_post.stream_id.clone(),
        source_url: root_post.source_url.clone(),
        stream_title: root_post.stream_title.clone(),
        root_post,
        replies,
        flattened_text,
        start_time,
        end_time,
        external_key,
    })
}

/// Sort the final block list by start time, block id as tie-break, so a
/// corpus with equal timestamps still renders byte-identically.
pub fn sort_blocks(blocks: &mut [ConversationBlock]) {
    blocks.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.block_id.cmp(&b.block_id))
    });
}

fn flatten_transcript(root: &CanonicalPost, replies: &[CanonicalPost]) -> String {
    let mut entries = Vec::with_capacity(replies.len() + 1);
    entries.push(render_entry(root));
    entries.extend(replies.iter().map(render_entry));
    entries.join("\n\n")
}

fn render_entry(post: &CanonicalPost) -> String {
    format!(
        "[{} @ {}]\n{}",
        post.author,
        post.created_at.format(TRANSCRIPT_TIME_FORMAT),
        post.text.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn post(seq: i64, minutes: i64, text: &str) -> CanonicalPost {
        let created =
            Utc.with_ymd_and_hms(2023, 4, 10, 6, 0, 0).unwrap() + Duration::minutes(minutes);
        CanonicalPost {
            stream_id: "forum:t".to_string(),
            source_url: "https://forum.example.com/t/42".to_string(),
            post_id: seq,
            sequence_number: seq,
            author: format!("user{}", seq),
            created_at: created,
            updated_at: created,
            text: text.to_string(),
            reply_to_sequence_number: None,
            stream_title: "Thread".to_string(),
            calendar_date: created.date_naive(),
            iso_week_year: 2023,
            iso_week_number: 15,
            is_sender_internal: None,
        }
    }

    #[test]
    fn reply_graph_root_is_selected_by_sequence() {
        let group = PostGroup {
            root_sequence: Some(1),
            posts: vec![post(2, 10, "reply"), post(1, 0, "root")],
        };
        let block = assemble_block(group, None).unwrap();
        assert_eq!(block.root_post.sequence_number, 1);
        assert_eq!(block.replies.len(), 1);
        assert_eq!(block.block_id, "forum:t:1");
    }

    #[test]
    fn chunk_root_is_chronologically_first() {
        let group = PostGroup {
            root_sequence: None,
            posts: vec![post(3, 20, "late"), post(2, 5, "early")],
        };
        let block = assemble_block(group, None).unwrap();
        assert_eq!(block.root_post.sequence_number, 2);
        assert_eq!(block.block_id, "forum:t:2");
    }

    #[test]
    fn transcript_renders_author_timestamp_and_text() {
        let group = PostGroup {
            root_sequence: Some(1),
            posts: vec![post(1, 0, "Hello there"), post(2, 90, "Hi back")],
        };
        let block = assemble_block(group, None).unwrap();
        assert_eq!(
            block.flattened_text,
            "[user1 @ 2023-04-10 06:00 UTC]\nHello there\n\n[user2 @ 2023-04-10 07:30 UTC]\nHi back"
        );
    }

    #[test]
    fn time_bounds_cover_root_and_replies() {
        let group = PostGroup {
            root_sequence: Some(2),
            // root is not the chronologically first post
            posts: vec![post(1, 0, "earlier"), post(2, 30, "root"), post(3, 60, "later")],
        };
        let block = assemble_block(group, None).unwrap();
        assert_eq!(block.start_time, block.replies[0].created_at);
        assert_eq!(block.end_time.signed_duration_since(block.start_time), Duration::minutes(60));
        assert!(block.start_time <= block.end_time);
    }

    #[test]
    fn replies_stay_chronological() {
        let group = PostGroup {
            root_sequence: Some(1),
            posts: vec![post(3, 40, "c"), post(1, 0, "a"), post(2, 20, "b")],
        };
        let block = assemble_block(group, None).unwrap();
        let times: Vec<_> = block.replies.iter().map(|r| r.created_at).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn external_key_is_carried_through() {
        let group = PostGroup {
            root_sequence: None,
            posts: vec![post(1, 0, "msg")],
        };
        let block = assemble_block(group, Some("+919876543210".to_string())).unwrap();
        assert_eq!(block.external_key.as_deref(), Some("+919876543210"));
    }

    #[test]
    fn empty_group_assembles_to_none() {
        let group = PostGroup {
            root_sequence: None,
            posts: Vec::new(),
        };
        assert!(assemble_block(group, None).is_none());
    }

    #[test]
    fn block_ordering_is_deterministic() {
        let early = assemble_block(
            PostGroup {
                root_sequence: None,
                posts: vec![post(1, 0, "a")],
            },
            None,
        )
        .unwrap();
        let late = assemble_block(
            PostGroup {
                root_sequence: None,
                posts: vec![post(9, 500, "b")],
            },
            None,
        )
        .unwrap();
        let mut blocks = vec![late, early];
        sort_blocks(&mut blocks);
        assert_eq!(blocks[0].root_post.sequence_number, 1);
    }
}
