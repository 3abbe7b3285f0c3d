use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::message::{Message, MessageType, Priority};
use crate::types::thread::ThreadSummary;

/// Paging metadata attached to every paged query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    /// Pages are 1-based
    pub fn new(page: u32, limit: u32, total: u32) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        let total_pages = total.div_ceil(limit);
        Self {
            page,
            limit,
            total,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        }
    }

    /// Index range of this page within the full result set
    pub fn window(&self) -> std::ops::Range<usize> {
        let start = ((self.page - 1) as usize).saturating_mul(self.limit as usize);
        let start = start.min(self.total as usize);
        let end = (start + self.limit as usize).min(self.total as usize);
        start..end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paged<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Paged<T> {
    /// Cut one page out of a fully materialized, already ordered list
    pub fn from_items(mut items: Vec<T>, page: u32, limit: u32) -> Self {
        let pagination = Pagination::new(page, limit, items.len() as u32);
        let window = pagination.window();
        items.truncate(window.end);
        let data = items.split_off(window.start);
        Self { data, pagination }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            data: self.data.into_iter().map(f).collect(),
            pagination: self.pagination,
        }
    }
}

/// Search filters; `None` means "any"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub message_type: Option<MessageType>,
    pub priority: Option<Priority>,
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
}

impl SearchFilters {
    pub fn matches(&self, message: &Message) -> bool {
        self.message_type.map_or(true, |t| message.message_type == t)
            && self.priority.map_or(true, |p| message.priority == p)
            && self.is_read.map_or(true, |r| message.is_read() == r)
            && self.is_starred.map_or(true, |s| message.is_starred == s)
    }
}

/// A raw match returned by the remote search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub message: Message,
    pub thread: ThreadSummary,
    /// Opaque score from the backend, when it provides one
    pub relevance_score: Option<f32>,
}

/// Byte span of a query match inside one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub matched: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlights {
    pub subject: Option<Highlight>,
    pub content: Option<Highlight>,
    pub participant: Option<Highlight>,
}

impl Highlights {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.content.is_none() && self.participant.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub message: Message,
    pub thread: ThreadSummary,
    pub relevance_score: f32,
    pub highlights: Highlights,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsPeriod {
    Day,
    Week,
    Month,
    Year,
    All,
}

impl StatsPeriod {
    /// Earliest instant covered by the period, `None` for all time
    pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            StatsPeriod::Day => Some(now - Duration::days(1)),
            StatsPeriod::Week => Some(now - Duration::weeks(1)),
            StatsPeriod::Month => Some(now - Duration::days(30)),
            StatsPeriod::Year => Some(now - Duration::days(365)),
            StatsPeriod::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxStats {
    pub period: StatsPeriod,
    pub total_threads: u32,
    pub unread_threads: u32,
    pub unread_messages: u32,
    pub starred_threads: u32,
    pub messages_sent: u32,
    pub messages_received: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_flags() {
        let p = Pagination::new(1, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(!p.has_prev);

        let p = Pagination::new(3, 10, 25);
        assert!(!p.has_next);
        assert!(p.has_prev);
        assert_eq!(p.window(), 20..25);

        let p = Pagination::new(0, 10, 0);
        assert_eq!(p.page, 1);
        assert_eq!(p.total_pages, 0);
        assert_eq!(p.window(), 0..0);
    }

    #[test]
    fn test_from_items_slices_requested_page() {
        let items: Vec<u32> = (1..=7).collect();
        let page = Paged::from_items(items.clone(), 2, 3);
        assert_eq!(page.data, vec![4, 5, 6]);

        let page = Paged::from_items(items, 9, 3);
        assert!(page.data.is_empty());
        assert_eq!(page.pagination.total, 7);
    }
}
