//! Text normalization for raw message bodies.
//!
//! Two entry points, one per input family: [`html_to_text`] converts
//! forum-style HTML into plain text, rendering quoted replies as `"> "`
//! prefixed lines, and [`clean_chat_text`] strips the UI chrome that chat
//! exports (Facebook, WhatsApp) leak into message text.
//!
//! Neither function fails: malformed markup degrades to the raw input
//! trimmed, and chrome stripping falls back rather than producing an
//! empty message. The pipeline never drops a post here.

use std::sync::OnceLock;

use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;

/// Exact-match UI chrome lines found in chat exports.
const CHROME_TOKENS: &[&str] = &[
    "Like",
    "Reply",
    "Share",
    "Comment",
    "Send",
    "Follow",
    "See translation",
];

fn counter_re() -> &'static Regex {
    static COUNTER_RE: OnceLock<Regex> = OnceLock::new();
    COUNTER_RE.get_or_init(|| Regex::new(r"^\d+$").expect("valid counter regex"))
}

fn relative_time_re() -> &'static Regex {
    static RELATIVE_TIME_RE: OnceLock<Regex> = OnceLock::new();
    RELATIVE_TIME_RE
        .get_or_init(|| Regex::new(r"^\d{1,3} ?(s|m|h|d|w|mo|y)$").expect("valid reltime regex"))
}

/// Convert forum HTML into plain text.
///
/// Block-level elements become paragraphs separated by one blank line.
/// `<aside>` and `<blockquote>` content is rendered with every line
/// prefixed `"> "` and separated from surrounding text. HTML entities are
/// decoded; runs of horizontal whitespace collapse to a single space and
/// runs of three or more newlines collapse to one blank line.
///
/// On any markup parse failure the raw input is returned trimmed.
pub fn html_to_text(html: &str) -> String {
    match walk_markup(html) {
        Some(text) => text,
        None => html.trim().to_string(),
    }
}

/// One extracted block of output text, quoted or not.
struct Block {
    text: String,
    quoted: bool,
}

fn walk_markup(html: &str) -> Option<String> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;

    let mut blocks: Vec<Block> = Vec::new();
    let mut current = String::new();
    let mut quote_depth = 0usize;
    let mut skip_depth = 0usize;

    // Elements that terminate the current text block.
    fn is_block_boundary(name: &[u8]) -> bool {
        matches!(
            name,
            b"p" | b"div"
                | b"li"
                | b"ul"
                | b"ol"
                | b"h1"
                | b"h2"
                | b"h3"
                | b"h4"
                | b"h5"
                | b"h6"
                | b"pre"
                | b"table"
                | b"tr"
        )
    }

    fn flush(blocks: &mut Vec<Block>, current: &mut String, quote_depth: usize) {
        let text = collapse_whitespace(current);
        current.clear();
        if !text.is_empty() {
            blocks.push(Block {
                text,
                quoted: quote_depth > 0,
            });
        }
    }

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"aside" | b"blockquote" => {
                        flush(&mut blocks, &mut current, quote_depth);
                        quote_depth += 1;
                    }
                    b"script" | b"style" => skip_depth += 1,
                    b"br" => current.push('\n'),
                    n if is_block_boundary(n) => flush(&mut blocks, &mut current, quote_depth),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"aside" | b"blockquote" => {
                        flush(&mut blocks, &mut current, quote_depth);
                        quote_depth = quote_depth.saturating_sub(1);
                    }
                    b"script" | b"style" => skip_depth = skip_depth.saturating_sub(1),
                    n if is_block_boundary(n) => flush(&mut blocks, &mut current, quote_depth),
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"br" {
                    current.push('\n');
                }
            }
            Ok(Event::Text(e)) => {
                if skip_depth == 0 {
                    let raw = String::from_utf8_lossy(e.as_ref()).into_owned();
                    current.push_str(&html_escape::decode_html_entities(&raw));
                }
            }
            Ok(Event::CData(e)) => {
                if skip_depth == 0 {
                    current.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    flush(&mut blocks, &mut current, quote_depth);

    let mut out = String::new();
    for block in blocks {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        if block.quoted {
            for (i, line) in block.text.lines().enumerate() {
                if i > 0 {
                    out.push('\n');
                }
                out.push_str("> ");
                out.push_str(line);
            }
        } else {
            out.push_str(&block.text);
        }
    }
    Some(out.trim().to_string())
}

/// Strip UI chrome from chat-export text.
///
/// Removes a leading line that exactly duplicates the author's display
/// name, exact-match reaction labels, bare numeric counters, and relative
/// time tokens ("3w", "2d", "5h"). If stripping would remove all content
/// the pre-strip text (minus only the author line) is returned instead.
pub fn clean_chat_text(raw: &str, author: &str) -> String {
    let author = author.trim();
    let mut lines: Vec<&str> = raw.lines().collect();

    // Leading author-name line is a common export artifact.
    if let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) {
        if !author.is_empty() && lines[first].trim() == author {
            lines.remove(first);
        }
    }
    let author_removed = lines.join("\n");

    let kept: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| !is_chrome_line(line.trim()))
        .collect();

    let stripped = collapse_whitespace(&kept.join("\n"));
    if stripped.is_empty() {
        return author_removed.trim().to_string();
    }
    stripped
}

fn is_chrome_line(line: &str) -> bool {
    if line.is_empty() {
        return false;
    }
    CHROME_TOKENS.contains(&line)
        || counter_re().is_match(line)
        || relative_time_re().is_match(line)
}

/// Collapse horizontal whitespace runs to one space, trim each line, and
/// clamp runs of blank lines to a single blank line.
fn collapse_whitespace(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines() {
        let mut collapsed = String::with_capacity(line.len());
        let mut in_space = false;
        for ch in line.chars() {
            if ch.is_whitespace() {
                if !in_space {
                    collapsed.push(' ');
                    in_space = true;
                }
            } else {
                collapsed.push(ch);
                in_space = false;
            }
        }
        lines.push(collapsed.trim().to_string());
    }

    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0usize;
    for line in &lines {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line);
    }
    out.join("\n").trim().to_string()
}
