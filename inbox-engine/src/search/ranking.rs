use crate::search::highlight::find_literal;
use crate::types::{Message, SearchResult};

/// Relevance of a message to a query, in `[0, 1]`
///
/// Used whenever the remote does not supply a score of its own.
pub trait RelevanceScorer: Send + Sync {
    fn score(&self, query: &str, message: &Message) -> f32;
}

/// Field-weighted literal match scorer
#[derive(Debug, Clone, Copy)]
pub struct HeuristicScorer {
    pub subject_weight: f32,
    /// Extra when the subject starts with the query
    pub subject_prefix_bonus: f32,
    pub content_weight: f32,
    /// Extra per repeated content occurrence, capped at three
    pub occurrence_bonus: f32,
    pub sender_weight: f32,
}

impl Default for HeuristicScorer {
    fn default() -> Self {
        Self {
            subject_weight: 0.5,
            subject_prefix_bonus: 0.1,
            content_weight: 0.3,
            occurrence_bonus: 0.02,
            sender_weight: 0.1,
        }
    }
}

impl HeuristicScorer {
    fn occurrences(haystack: &str, needle: &str) -> usize {
        let mut count = 0;
        let mut rest = haystack;
        while let Some(hit) = find_literal(rest, needle) {
            count += 1;
            rest = &rest[hit.end..];
        }
        count
    }
}

impl RelevanceScorer for HeuristicScorer {
    fn score(&self, query: &str, message: &Message) -> f32 {
        let mut score = 0.0;

        if let Some(hit) = find_literal(&message.subject, query) {
            score += self.subject_weight;
            if hit.start == 0 {
                score += self.subject_prefix_bonus;
            }
        }

        let occurrences = Self::occurrences(&message.content, query);
        if occurrences > 0 {
            score += self.content_weight;
            score += self.occurrence_bonus * (occurrences - 1).min(3) as f32;
        }

        if find_literal(&message.sender.display_name, query).is_some() {
            score += self.sender_weight;
        }

        clamp_score(score)
    }
}

/// Force a score into `[0, 1]`; NaN counts as no relevance
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Score descending, then newest first; ids break remaining ties
pub fn order_results(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.relevance_score
            .total_cmp(&a.relevance_score)
            .then_with(|| b.message.created_at.cmp(&a.message.created_at))
            .then_with(|| a.message.id.cmp(&b.message.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Highlights, MessageStatus, MessageType, Participant, Priority, ThreadSummary,
    };
    use chrono::{DateTime, Duration, Utc};

    fn message(id: &str, subject: &str, content: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.into(),
            thread_id: "t1".into(),
            sender: Participant::new("ann", "Ann"),
            recipient: Participant::new("me", "Me"),
            subject: subject.into(),
            content: content.into(),
            message_type: MessageType::Direct,
            priority: Priority::Normal,
            status: MessageStatus::Delivered,
            is_starred: false,
            attachments: vec![],
            created_at: at,
        }
    }

    fn result(id: &str, score: f32, at: DateTime<Utc>) -> SearchResult {
        SearchResult {
            message: message(id, "s", "c", at),
            thread: ThreadSummary {
                id: "t1".into(),
                subject: "s".into(),
                participants: vec![],
            },
            relevance_score: score,
            highlights: Highlights::default(),
        }
    }

    #[test]
    fn test_order_by_score_then_recency() {
        let t0 = Utc::now();
        let mut results = vec![
            result("r1", 0.9, t0),
            result("r2", 0.4, t0 + Duration::minutes(5)),
            result("r3", 0.9, t0 + Duration::minutes(1)),
        ];
        order_results(&mut results);
        let ids: Vec<&str> = results.iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r1", "r2"]);
    }

    #[test]
    fn test_subject_outranks_content() {
        let scorer = HeuristicScorer::default();
        let now = Utc::now();
        let in_subject = scorer.score("exam", &message("a", "Exam dates", "see below", now));
        let in_content = scorer.score("exam", &message("b", "Dates", "the exam is friday", now));
        let nowhere = scorer.score("exam", &message("c", "Dates", "friday", now));

        assert!(in_subject > in_content);
        assert!(in_content > nowhere);
        assert_eq!(nowhere, 0.0);
    }

    #[test]
    fn test_scores_stay_in_unit_range() {
        let scorer = HeuristicScorer {
            subject_weight: 0.9,
            content_weight: 0.9,
            ..HeuristicScorer::default()
        };
        let score = scorer.score("ann", &message("a", "ann", "ann ann ann ann", Utc::now()));
        assert_eq!(score, 1.0);

        assert_eq!(clamp_score(f32::NAN), 0.0);
        assert_eq!(clamp_score(-0.5), 0.0);
        assert_eq!(clamp_score(0.25), 0.25);
    }
}
