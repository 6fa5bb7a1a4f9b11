//! Conversation grouping.
//!
//! Two strategies, selected by whether the source provides a reply graph.
//! Forum posts carry reply pointers: each post walks its pointer chain to
//! a terminal root and all posts sharing that root form one group. The
//! walk is iterative with a visited set, so orphaned pointers and cycles
//! terminate safely by treating the offending post as its own root.
//! Non-threaded streams are instead chunked by size (Facebook) or kept
//! whole as one lifetime conversation (WhatsApp).

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::models::CanonicalPost;

/// One grouped conversation before assembly.
pub struct PostGroup {
    /// Root sequence number for reply-graph groups; `None` for chunked
    /// and lifetime groups, whose root is the chronologically first post.
    pub root_sequence: Option<i64>,
    pub posts: Vec<CanonicalPost>,
}

/// Partition a flat canonical post list into per-stream lists, ordered by
/// stream id for reproducible output.
pub fn partition_streams(posts: Vec<CanonicalPost>) -> BTreeMap<String, Vec<CanonicalPost>> {
    let mut streams: BTreeMap<String, Vec<CanonicalPost>> = BTreeMap::new();
    for post in posts {
        streams.entry(post.stream_id.clone()).or_default().push(post);
    }
    streams
}

/// Sort posts chronologically, sequence number as tie-break.
pub fn sort_chronological(posts: &mut [CanonicalPost]) {
    posts.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.sequence_number.cmp(&b.sequence_number))
    });
}

/// Group one stream's posts by walking the reply graph to each post's
/// root. Posts with no parent pointer, a parent missing from the index,
/// or a cyclic pointer chain terminate as their own root.
pub fn group_by_reply_graph(posts: Vec<CanonicalPost>) -> Vec<PostGroup> {
    // sequence number -> parent pointer, for every post in the stream
    let parents: HashMap<i64, Option<i64>> = posts
        .iter()
        .map(|p| (p.sequence_number, p.reply_to_sequence_number))
        .collect();

    let mut groups: BTreeMap<i64, Vec<CanonicalPost>> = BTreeMap::new();
    for post in posts {
        let root = find_root(post.sequence_number, &parents);
        groups.entry(root).or_default().push(post);
    }

    groups
        .into_iter()
        .map(|(root, mut posts)| {
            sort_chronological(&mut posts);
            PostGroup {
                root_sequence: Some(root),
                posts,
            }
        })
        .collect()
}

fn find_root(start: i64, parents: &HashMap<i64, Option<i64>>) -> i64 {
    let mut visited: HashSet<i64> = HashSet::new();
    let mut current = start;
    visited.insert(current);

    loop {
        match parents.get(&current) {
            // terminal: no parent pointer
            Some(None) => return current,
            Some(Some(parent)) => {
                if !parents.contains_key(parent) {
                    // orphan pointer: the chain ends here
                    debug!(post = current, parent, "reply parent not in stream, treating as root");
                    return current;
                }
                if !visited.insert(*parent) {
                    debug!(post = start, "reply cycle detected, treating post as its own root");
                    return start;
                }
                current = *parent;
            }
            // start itself unknown; only possible with a foreign index
            None => return current,
        }
    }
}

/// Slice one non-threaded stream into fixed-size chronological chunks.
/// Each chunk becomes a group whose leader is its root.
pub fn chunk_stream(mut posts: Vec<CanonicalPost>, max_posts_per_block: usize) -> Vec<PostGroup> {
    sort_chronological(&mut posts);
    let max = max_posts_per_block.max(1);

    let mut groups = Vec::new();
    let mut current: Vec<CanonicalPost> = Vec::new();
    for post in posts {
        if current.len() >= max {
            groups.push(PostGroup {
                root_sequence: None,
                posts: std::mem::take(&mut current),
            });
        }
        current.push(post);
    }
    if !current.is_empty() {
        groups.push(PostGroup {
            root_sequence: None,
            posts: current,
        });
    }
    groups
}

/// Keep one contact's entire history as a single group, regardless of
/// time span. Trades block size for full customer-history continuity.
pub fn lifetime_stream(mut posts: Vec<CanonicalPost>) -> Vec<PostGroup> {
    if posts.is_empty() {
        return Vec::new();
    }
    sort_chronological(&mut posts);
    vec![PostGroup {
        root_sequence: None,
        posts,
    }]
}
