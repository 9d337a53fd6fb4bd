//! Closed tagged-variant parser for the Meta messaging envelope (spec §9:
//! "treat each external envelope as a versioned tagged variant; parse into
//! a closed set of interaction records; unknown variants are logged and
//! dropped, not coerced").

use serde::Deserialize;
use serde_json::Value;

/// One interaction worth of `process_webhook` work, fanned out 1:1 by the
/// router (spec §4.4 step 4).
#[derive(Debug, Clone)]
pub struct Interaction {
    pub platform_account_id: String,
    pub customer_id: String,
    pub kind: InteractionKind,
}

#[derive(Debug, Clone)]
pub enum InteractionKind {
    Message { mid: String, text: Option<String>, attachment_type: Option<String> },
    StoryMention { mid: String },
    Comment { comment_id: String, text: String },
}

#[derive(Deserialize)]
struct MetaEnvelope {
    #[allow(dead_code)]
    object: Option<String>,
    #[serde(default)]
    entry: Vec<MetaEntry>,
}

#[derive(Deserialize)]
struct MetaEntry {
    id: String,
    #[serde(default)]
    messaging: Vec<MessagingEvent>,
    #[serde(default)]
    changes: Vec<ChangeEvent>,
}

#[derive(Deserialize)]
struct MessagingEvent {
    sender: Participant,
    #[serde(default)]
    message: Option<MessageBody>,
    #[serde(default)]
    story_mention: Option<StoryMentionBody>,
}

#[derive(Deserialize)]
struct Participant {
    id: String,
}

#[derive(Deserialize)]
struct MessageBody {
    mid: String,
    text: Option<String>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Deserialize)]
struct Attachment {
    #[serde(rename = "type")]
    attachment_type: String,
}

#[derive(Deserialize)]
struct StoryMentionBody {
    mid: String,
}

#[derive(Deserialize)]
struct ChangeEvent {
    field: String,
    value: Value,
}

/// Parses a raw Instagram/Facebook webhook body into a flat list of
/// interactions. Unknown nested shapes are dropped with a warning rather
/// than coerced into a best-effort guess (spec §9).
pub fn parse(body: &[u8]) -> Result<Vec<Interaction>, String> {
    let envelope: MetaEnvelope = serde_json::from_slice(body).map_err(|e| e.to_string())?;
    let mut interactions = Vec::new();

    for entry in envelope.entry {
        for event in entry.messaging {
            let customer_id = event.sender.id.clone();
            if let Some(msg) = event.message {
                let attachment_type = msg.attachments.first().map(|a| a.attachment_type.clone());
                interactions.push(Interaction {
                    platform_account_id: entry.id.clone(),
                    customer_id,
                    kind: InteractionKind::Message { mid: msg.mid, text: msg.text, attachment_type },
                });
            } else if let Some(story) = event.story_mention {
                interactions.push(Interaction {
                    platform_account_id: entry.id.clone(),
                    customer_id,
                    kind: InteractionKind::StoryMention { mid: story.mid },
                });
            } else {
                tracing::warn!(entry_id = %entry.id, "messaging event with no recognized body, dropping");
            }
        }

        for change in entry.changes {
            if change.field != "comments" {
                tracing::warn!(field = %change.field, "unrecognized change field, dropping");
                continue;
            }
            match parse_comment_change(&entry.id, &change.value) {
                Some(interaction) => interactions.push(interaction),
                None => tracing::warn!(entry_id = %entry.id, "malformed comment change, dropping"),
            }
        }
    }

    Ok(interactions)
}

fn parse_comment_change(platform_account_id: &str, value: &Value) -> Option<Interaction> {
    let comment_id = value.get("id")?.as_str()?.to_string();
    let text = value.get("text")?.as_str()?.to_string();
    let customer_id = value.get("from")?.get("id")?.as_str()?.to_string();
    Some(Interaction {
        platform_account_id: platform_account_id.to_string(),
        customer_id,
        kind: InteractionKind::Comment { comment_id, text },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_text_message() {
        let body = br#"{"object":"instagram","entry":[{"id":"IGBA1","time":1700000000,"messaging":[{"sender":{"id":"U1"},"recipient":{"id":"IGBA1"},"timestamp":1700000000,"message":{"mid":"mid.1","text":"hello"}}]}]}"#;
        let interactions = parse(body).unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].platform_account_id, "IGBA1");
        assert_eq!(interactions[0].customer_id, "U1");
        match &interactions[0].kind {
            InteractionKind::Message { mid, text, .. } => {
                assert_eq!(mid, "mid.1");
                assert_eq!(text.as_deref(), Some("hello"));
            }
            _ => panic!("expected Message"),
        }
    }

    #[test]
    fn empty_entry_list_yields_zero_interactions() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        assert!(parse(body).unwrap().is_empty());
    }

    #[test]
    fn unparseable_json_is_an_error() {
        assert!(parse(b"not json").is_err());
    }

    #[test]
    fn comment_change_is_parsed() {
        let body = br#"{"object":"instagram","entry":[{"id":"IGBA1","changes":[{"field":"comments","value":{"id":"c1","text":"nice","from":{"id":"U2"}}}]}]}"#;
        let interactions = parse(body).unwrap();
        assert_eq!(interactions.len(), 1);
        match &interactions[0].kind {
            InteractionKind::Comment { comment_id, text } => {
                assert_eq!(comment_id, "c1");
                assert_eq!(text, "nice");
            }
            _ => panic!("expected Comment"),
        }
    }

    #[test]
    fn unrecognized_change_field_is_dropped() {
        let body = br#"{"object":"instagram","entry":[{"id":"IGBA1","changes":[{"field":"ratings","value":{}}]}]}"#;
        assert!(parse(body).unwrap().is_empty());
    }
}
