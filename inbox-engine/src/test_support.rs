//! Fixtures shared by the inline test modules

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use crate::backend::InMemoryBackend;
use crate::state::{Identity, SessionContext};
use crate::types::{Message, MessageStatus, MessageType, Participant, Priority};

pub const ME: &str = "me";

pub fn me() -> Participant {
    Participant::new(ME, "Me")
}

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

pub fn at(minutes: i64) -> DateTime<Utc> {
    base_time() + Duration::minutes(minutes)
}

/// An unread message to the session user
pub fn incoming(id: &str, thread_id: &str, from: &str, subject: &str, minute: i64) -> Message {
    Message {
        id: id.into(),
        thread_id: thread_id.into(),
        sender: Participant::new(from, display_name(from)),
        recipient: me(),
        subject: subject.into(),
        content: format!("{} body", subject),
        message_type: MessageType::Direct,
        priority: Priority::Normal,
        status: MessageStatus::Delivered,
        is_starred: false,
        attachments: vec![],
        created_at: at(minute),
    }
}

/// A message the session user sent
pub fn outgoing(id: &str, thread_id: &str, to: &str, subject: &str, minute: i64) -> Message {
    Message {
        sender: me(),
        recipient: Participant::new(to, display_name(to)),
        status: MessageStatus::Sent,
        ..incoming(id, thread_id, to, subject, minute)
    }
}

fn display_name(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn backend() -> Arc<InMemoryBackend> {
    let backend = InMemoryBackend::new(me());
    for id in ["ann", "bob", "cat"] {
        backend.add_contact(Participant::new(id, display_name(id)));
    }
    Arc::new(backend)
}

/// Five inbox threads `t1..t5`, one unread message each
pub fn seeded_backend() -> Arc<InMemoryBackend> {
    let backend = backend();
    for n in 1..=5 {
        backend.insert_message(incoming(
            &format!("m{}", n),
            &format!("t{}", n),
            "ann",
            &format!("Topic {}", n),
            n,
        ));
    }
    backend
}

pub fn session() -> SessionContext {
    SessionContext::new(Identity::new(ME, "Me"))
}
