//! Literal match highlighting
//!
//! Queries are matched as plain text, case-insensitively, one char at a
//! time. Nothing is ever compiled into a pattern, so `.`, `*`, `(` and
//! friends in a query only ever match themselves.

use crate::types::{Highlight, Highlights, Message};

/// First case-insensitive occurrence of `needle` in `haystack`
///
/// The returned span is in bytes of `haystack` and always falls on char
/// boundaries. Surrounding whitespace in the needle is ignored; a blank
/// needle never matches.
pub fn find_literal(haystack: &str, needle: &str) -> Option<Highlight> {
    let needle: Vec<char> = needle.trim().chars().flat_map(char::to_lowercase).collect();
    if needle.is_empty() {
        return None;
    }

    haystack.char_indices().find_map(|(start, _)| {
        match_at(&haystack[start..], &needle).map(|len| Highlight {
            start,
            end: start + len,
            matched: haystack[start..start + len].to_string(),
        })
    })
}

/// Byte length of the match at the head of `rest`, if any
fn match_at(rest: &str, needle: &[char]) -> Option<usize> {
    let mut matched = 0;
    for (offset, ch) in rest.char_indices() {
        for lower in ch.to_lowercase() {
            if needle.get(matched) != Some(&lower) {
                return None;
            }
            matched += 1;
        }
        if matched == needle.len() {
            return Some(offset + ch.len_utf8());
        }
    }
    None
}

/// Highlights for one message as seen by `user_id`
///
/// The participant highlight looks at whoever is on the other side of the
/// message: the recipient for outgoing mail, the sender otherwise.
pub fn compute_highlights(query: &str, message: &Message, user_id: &str) -> Highlights {
    let counterpart = if message.is_from(user_id) {
        &message.recipient
    } else {
        &message.sender
    };

    Highlights {
        subject: find_literal(&message.subject, query),
        content: find_literal(&message.content, query),
        participant: find_literal(&counterpart.display_name, query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessageStatus, MessageType, Participant, Priority};
    use chrono::Utc;

    fn message(subject: &str, content: &str) -> Message {
        Message {
            id: "m1".into(),
            thread_id: "t1".into(),
            sender: Participant::new("ann", "Ann Lee"),
            recipient: Participant::new("me", "Me"),
            subject: subject.into(),
            content: content.into(),
            message_type: MessageType::Direct,
            priority: Priority::Normal,
            status: MessageStatus::Delivered,
            is_starred: false,
            attachments: vec![],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_case_insensitive_first_occurrence() {
        let hit = find_literal("Homework due. HOMEWORK late.", "homework").unwrap();
        assert_eq!((hit.start, hit.end), (0, 8));
        assert_eq!(hit.matched, "Homework");

        let hit = find_literal("see the Report", "  report ").unwrap();
        assert_eq!(hit.matched, "Report");
        assert_eq!(hit.start, 8);
    }

    #[test]
    fn test_metacharacters_are_literal() {
        assert!(find_literal("abc", "a.c").is_none());
        assert!(find_literal("aaaa", "a*").is_none());

        let hit = find_literal("formula: a.b*(c) holds", "A.B*(C)").unwrap();
        assert_eq!(hit.matched, "a.b*(c)");
        assert_eq!(hit.start, 9);
    }

    #[test]
    fn test_blank_needle_and_misses() {
        assert!(find_literal("anything", "   ").is_none());
        assert!(find_literal("", "x").is_none());
        assert!(find_literal("short", "shorter").is_none());
    }

    #[test]
    fn test_spans_are_byte_offsets_on_char_boundaries() {
        let text = "Résumé für Jürgen";
        let hit = find_literal(text, "JÜRGEN").unwrap();
        assert_eq!(&text[hit.start..hit.end], "Jürgen");
        assert_eq!(hit.matched, "Jürgen");

        let hit = find_literal(text, "é").unwrap();
        assert_eq!(hit.start, 1);
        assert_eq!(hit.end, 3);
    }

    #[test]
    fn test_message_highlights_use_counterpart() {
        let msg = message("Lab report", "Please send the lab notes");
        let highlights = compute_highlights("lab", &msg, "me");
        assert_eq!(highlights.subject.as_ref().unwrap().start, 0);
        assert_eq!(highlights.content.as_ref().unwrap().matched, "lab");
        assert!(highlights.participant.is_none());

        let highlights = compute_highlights("lee", &msg, "me");
        assert_eq!(highlights.participant.unwrap().matched, "Lee");

        // Outgoing: the counterpart is the recipient
        let highlights = compute_highlights("me", &msg, "ann");
        assert_eq!(highlights.participant.unwrap().matched, "Me");
    }
}
