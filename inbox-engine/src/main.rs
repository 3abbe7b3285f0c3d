use chrono::{Duration, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use inbox_engine::config::{init_config, init_config_from_path};
use inbox_engine::types::{
    FolderRef, Message, MessageStatus, MessageType, Participant, Priority, ThreadFilters,
};
use inbox_engine::{init_tracing, InMemoryBackend, InboxService, Result, SessionContext};

/// Seed a small mailbox so the smoke run has something to show
fn demo_backend(owner: &Participant) -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new(owner.clone()));
    let senders = [
        Participant::new("prof-lee", "Prof. Lee"),
        Participant::new("ta-kim", "TA Kim"),
        Participant::new("registrar", "Registrar"),
    ];
    let subjects = [
        ("Midterm review session", MessageType::Announcement, Priority::High),
        ("Feedback on lab 3", MessageType::AssignmentFeedback, Priority::Normal),
        ("Enrollment deadline", MessageType::Direct, Priority::Urgent),
    ];

    let now = Utc::now();
    for (n, (sender, (subject, message_type, priority))) in senders.iter().zip(subjects).enumerate() {
        backend.add_contact(sender.clone());
        backend.insert_message(Message {
            id: format!("demo-m{}", n + 1),
            thread_id: format!("demo-t{}", n + 1),
            sender: sender.clone(),
            recipient: owner.clone(),
            subject: subject.to_string(),
            content: format!("{} - details inside.", subject),
            message_type,
            priority,
            status: MessageStatus::Delivered,
            is_starred: false,
            attachments: vec![],
            created_at: now - Duration::hours(n as i64 + 1),
        });
    }
    backend
}

async fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => init_config_from_path(Path::new(&path))?,
        None => init_config()?,
    };
    config.validate()?;

    let owner = Participant::new("student-1", "Sam Student");
    let backend = demo_backend(&owner);
    let service = InboxService::open(backend, owner.id.clone(), config)?;
    let session = SessionContext::new(inbox_engine::Identity::new(owner.id, owner.display_name));

    let inbox = service
        .list_threads(&session, &FolderRef::default(), &ThreadFilters::default(), 1, None)
        .await?;

    println!("Folders:");
    for folder in service.list_folders(&session).await? {
        match folder.counters {
            Some(c) => println!("  {:<10} {:>3} messages, {:>3} unread", folder.name, c.message_count, c.unread_count),
            None => println!("  {:<10}   ? messages", folder.name),
        }
    }

    println!("\nInbox (page {} of {}):", inbox.pagination.page, inbox.pagination.total_pages);
    for thread in &inbox.data {
        let from = thread
            .other_participant(service.owner())
            .map(|p| p.display_name.as_str())
            .unwrap_or("?");
        println!(
            "  {} {:<24} {:<12} {}",
            if thread.is_read() { " " } else { "*" },
            thread.subject,
            from,
            thread.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    info!("Starting inbox engine smoke run");

    if let Err(e) = run().await {
        error!("Smoke run failed: {}", e);
        std::process::exit(1);
    }
}
