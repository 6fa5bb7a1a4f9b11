//! WhatsApp/WATI event export adapter.
//!
//! The export is a flat event list mixing message events with ticket
//! bookkeeping events. Text messages become canonical posts, grouped into
//! one stream per normalized phone number; ticket events contribute the
//! contact's display name and the stream title. WATI timestamps carry no
//! zone and are treated as UTC, a documented upstream simplification.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;
use tracing::warn;

use crate::identity::{resolve_instant, resolve_post_id};
use crate::models::{CanonicalPost, IngestStats};
use crate::normalize::clean_chat_text;

const DEFAULT_CONTACT_NAME: &str = "Contact";
const DEFAULT_STREAM_TITLE: &str = "WhatsApp Conversation";

/// Fields that may carry the contact's phone number, in probe order.
const PHONE_FIELDS: &[&str] = &["waId", "whatsappNumber", "phone"];
/// Fallback stream keys when no phone field is present.
const CONVERSATION_FIELDS: &[&str] = &["conversationId", "ticketId"];

fn contact_name_re() -> &'static Regex {
    static CONTACT_NAME_RE: OnceLock<Regex> = OnceLock::new();
    CONTACT_NAME_RE.get_or_init(|| {
        Regex::new(r"initialized by contact\s+(.+)").expect("valid contact name regex")
    })
}

/// Stream metadata harvested from ticket events. First value wins.
#[derive(Default)]
struct TicketMeta {
    contact_name: Option<String>,
    title: Option<String>,
}

struct PendingMessage {
    instant: DateTime<Utc>,
    owner: Option<bool>,
    operator_name: Option<String>,
    raw_text: String,
    id_hint: Option<String>,
}

/// Build canonical posts from a WATI event export.
///
/// Keeps only `eventType == "message"` events of `type == "text"` whose
/// normalized text is non-empty; everything else is filtered, and a
/// record with no usable stream key is counted as malformed.
pub fn build_posts(
    raw: &Value,
    now: DateTime<Utc>,
    stats: &mut IngestStats,
) -> Result<Vec<CanonicalPost>> {
    let Some(events) = raw.as_array() else {
        bail!("whatsapp batch must be a JSON array of WATI events");
    };

    // Ticket pass first: display names and titles apply to the whole
    // stream regardless of where the ticket sits in the event list.
    let mut metas: HashMap<String, TicketMeta> = HashMap::new();
    for event in events {
        if field_str(event, "eventType") != Some("ticket") {
            continue;
        }
        let Some(key) = stream_key(event) else {
            continue;
        };
        let meta = metas.entry(key).or_default();

        if meta.contact_name.is_none() {
            meta.contact_name = event
                .get("detailedEventDescription")
                .and_then(|d| d.get("agentName"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| {
                    field_str(event, "eventDescription").and_then(|desc| {
                        contact_name_re()
                            .captures(desc)
                            .map(|c| c[1].trim().to_string())
                    })
                });
        }
        if meta.title.is_none() {
            meta.title = field_str(event, "topicName")
                .map(str::to_string)
                .or_else(|| {
                    event
                        .get("detailedEventDescription")
                        .and_then(|d| d.get("flowName"))
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                });
        }
    }

    let mut streams: BTreeMap<String, Vec<PendingMessage>> = BTreeMap::new();
    for event in events {
        stats.records_seen += 1;
        if field_str(event, "eventType") != Some("message") {
            continue;
        }
        if field_str(event, "type") != Some("text") {
            continue;
        }
        let Some(text) = field_str(event, "text") else {
            stats.dropped_empty += 1;
            continue;
        };
        let Some(key) = stream_key(event) else {
            stats.skipped_malformed += 1;
            warn!("skipping whatsapp message with no phone or conversation id");
            continue;
        };

        let resolved = resolve_instant(field_str(event, "created"), epoch_field(event), now);
        if resolved.degraded {
            stats.missing_timestamps += 1;
        }

        streams.entry(key).or_default().push(PendingMessage {
            instant: resolved.instant,
            owner: event.get("owner").and_then(Value::as_bool),
            operator_name: field_str(event, "operatorName").map(str::to_string),
            raw_text: text.to_string(),
            id_hint: field_str(event, "id").map(str::to_string),
        });
    }

    let mut posts = Vec::new();
    for (key, mut pending) in streams {
        // Stable sort keeps export order for equal timestamps.
        pending.sort_by_key(|m| m.instant);

        let meta = metas.get(&key);
        let contact_name = meta
            .and_then(|m| m.contact_name.as_deref())
            .unwrap_or(DEFAULT_CONTACT_NAME);
        let stream_title = meta
            .and_then(|m| m.title.as_deref())
            .unwrap_or(DEFAULT_STREAM_TITLE);

        let stream_id = format!("whatsapp:{}", key);
        let source_url = format!("wati:{}", key);
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut sequence = 0i64;

        for message in pending {
            let author = match message.owner {
                Some(true) => message.operator_name.as_deref().unwrap_or("Agent"),
                _ => contact_name,
            }
            .to_string();

            let text = clean_chat_text(&message.raw_text, &author);
            if text.is_empty() {
                stats.dropped_empty += 1;
                continue;
            }

            let post_id = match &message.id_hint {
                Some(hint) => resolve_post_id(hint),
                None => resolve_post_id(&format!(
                    "{}|{}|{}",
                    key,
                    message.instant.timestamp(),
                    text
                )),
            };
            if !seen_ids.insert(post_id) {
                stats.duplicate_ids += 1;
                continue;
            }
            sequence += 1;

            posts.push(
                CanonicalPost {
                    stream_id: stream_id.clone(),
                    source_url: source_url.clone(),
                    post_id,
                    sequence_number: sequence,
                    author,
                    created_at: message.instant,
                    updated_at: message.instant,
                    text,
                    reply_to_sequence_number: None,
                    stream_title: stream_title.to_string(),
                    calendar_date: message.instant.date_naive(),
                    iso_week_year: 0,
                    iso_week_number: 0,
                    is_sender_internal: message.owner,
                }
                .with_derived_dates(),
            );
        }
    }

    Ok(posts)
}

fn field_str<'a>(event: &'a Value, key: &str) -> Option<&'a str> {
    event
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// WATI `timestamp` arrives as either a number or a numeric string.
fn epoch_field(event: &Value) -> Option<i64> {
    match event.get("timestamp") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Group key for an event: normalized phone number from whichever field
/// carries it, else a conversation identifier.
fn stream_key(event: &Value) -> Option<String> {
    for field in PHONE_FIELDS {
        if let Some(raw) = field_str(event, field) {
            let phone = normalize_phone(raw);
            if !phone.is_empty() {
                return Some(phone);
            }
        }
    }
    for field in CONVERSATION_FIELDS {
        if let Some(raw) = field_str(event, field) {
            return Some(raw.to_string());
        }
    }
    None
}

/// Keep digits and a leading '+' only.
fn normalize_phone(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        if ch.is_ascii_digit() {
            out.push(ch);
        } else if ch == '+' && out.is_empty() {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(wa_id: &str, text: &str, created: &str, owner: bool, id: &str) -> Value {
        json!({
            "eventType": "message",
            "type": "text",
            "waId": wa_id,
            "text": text,
            "created": created,
            "owner": owner,
            "operatorName": (if owner { "Priya" } else { "" }),
            "id": id
        })
    }

    #[test]
    fn keeps_only_text_message_events() {
        let raw = json!([
            message("919876543210", "My order is late", "2023-04-14T06:15:00Z", false, "aa01"),
            { "eventType": "message", "type": "image", "waId": "919876543210", "id": "aa02" },
            { "eventType": "ticket", "waId": "919876543210", "topicName": "Order delays" },
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].text, "My order is late");
        assert_eq!(posts[0].stream_title, "Order delays");
        assert_eq!(stats.records_seen, 3);
    }

    #[test]
    fn groups_by_normalized_phone() {
        let raw = json!([
            message("+91 98765-43210", "first", "2023-04-14T06:00:00Z", false, "a1"),
            message("+91 9876543210", "second", "2023-04-14T07:00:00Z", false, "a2"),
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].stream_id, "whatsapp:+919876543210");
        assert_eq!(posts[0].stream_id, posts[1].stream_id);
        assert_eq!(posts[0].sequence_number, 1);
        assert_eq!(posts[1].sequence_number, 2);
    }

    #[test]
    fn owner_flag_maps_to_sender_role_and_author() {
        let raw = json!([
            message("911", "how can I help?", "2023-04-14T06:00:00Z", true, "b1"),
            message("911", "my invoice is wrong", "2023-04-14T06:05:00Z", false, "b2"),
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts[0].is_sender_internal, Some(true));
        assert_eq!(posts[0].author, "Priya");
        assert_eq!(posts[1].is_sender_internal, Some(false));
        assert_eq!(posts[1].author, "Contact");
    }

    #[test]
    fn contact_name_comes_from_ticket_description() {
        let raw = json!([
            {
                "eventType": "ticket",
                "waId": "912",
                "eventDescription": "Conversation initialized by contact Meera Nair"
            },
            message("912", "warranty question", "2023-04-14T06:00:00Z", false, "c1"),
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts[0].author, "Meera Nair");
        assert_eq!(posts[0].stream_title, "WhatsApp Conversation");
    }

    #[test]
    fn agent_name_field_wins_over_description() {
        let raw = json!([
            {
                "eventType": "ticket",
                "waId": "913",
                "detailedEventDescription": { "agentName": "Sam K", "flowName": "Support flow" },
                "eventDescription": "Conversation initialized by contact Someone Else"
            },
            message("913", "hello", "2023-04-14T06:00:00Z", false, "d1"),
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts[0].author, "Sam K");
        assert_eq!(posts[0].stream_title, "Support flow");
    }

    #[test]
    fn epoch_timestamp_fallback_orders_messages() {
        let raw = json!([
            { "eventType": "message", "type": "text", "waId": "914",
              "text": "later", "timestamp": 1681460000, "id": "e2" },
            { "eventType": "message", "type": "text", "waId": "914",
              "text": "earlier", "timestamp": "1681450000", "id": "e1" },
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts[0].text, "earlier");
        assert_eq!(posts[1].text, "later");
        assert_eq!(stats.missing_timestamps, 0);
    }

    #[test]
    fn missing_timestamp_is_counted_as_degraded() {
        let raw = json!([
            { "eventType": "message", "type": "text", "waId": "915", "text": "undated", "id": "f1" },
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(stats.missing_timestamps, 1);
    }

    #[test]
    fn missing_id_gets_deterministic_composite() {
        let raw = json!([
            { "eventType": "message", "type": "text", "waId": "916",
              "text": "no id here", "created": "2023-04-14T06:00:00Z" },
        ]);
        let now = Utc::now();
        let mut s1 = IngestStats::default();
        let mut s2 = IngestStats::default();
        let a = build_posts(&raw, now, &mut s1).unwrap();
        let b = build_posts(&raw, now, &mut s2).unwrap();
        assert_eq!(a[0].post_id, b[0].post_id);
    }

    #[test]
    fn conversation_id_fallback_when_no_phone() {
        let raw = json!([
            { "eventType": "message", "type": "text", "conversationId": "conv-77",
              "text": "hello", "created": "2023-04-14T06:00:00Z", "id": "g1" },
        ]);
        let mut stats = IngestStats::default();
        let posts = build_posts(&raw, Utc::now(), &mut stats).unwrap();
        assert_eq!(posts[0].stream_id, "whatsapp:conv-77");
    }

    #[test]
    fn wrong_top_level_shape_fails_fast() {
        let mut stats = IngestStats::default();
        assert!(build_posts(&json!({"events": []}), Utc::now(), &mut stats).is_err());
    }
}
