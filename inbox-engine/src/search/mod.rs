//! Search & ranking
//!
//! Queries go to the remote backend; the engine only ranks, highlights and
//! orders what comes back. Nothing here touches the thread store.

pub mod highlight;
pub mod ranking;

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{with_timeout, MessageBackend};
use crate::config::EngineConfig;
use crate::services::scheduler::ScheduledTask;
use crate::state::SessionContext;
use crate::types::error::{InboxError, Result};
use crate::types::{Paged, SearchFilters, SearchHit, SearchResult};

use highlight::compute_highlights;
use ranking::{clamp_score, order_results, HeuristicScorer, RelevanceScorer};

#[derive(Debug, Clone, PartialEq)]
pub enum SearchState {
    /// The query is blank; nothing was searched
    AwaitingInput,
    Results(Paged<SearchResult>),
}

impl SearchState {
    pub fn results(&self) -> &[SearchResult] {
        match self {
            SearchState::AwaitingInput => &[],
            SearchState::Results(page) => &page.data,
        }
    }
}

/// Query text, filters and page as edited by the user
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub filters: SearchFilters,
    pub page: u32,
    pub page_size: Option<u32>,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            filters: SearchFilters::default(),
            page: 1,
            page_size: None,
        }
    }
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A new query starts over from the first page
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.page = 1;
    }

    pub fn set_filters(&mut self, filters: SearchFilters) {
        if self.filters != filters {
            self.filters = filters;
            self.page = 1;
        }
    }

    pub fn set_page(&mut self, page: u32) {
        self.page = page.max(1);
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

pub struct SearchEngine {
    backend: Arc<dyn MessageBackend>,
    scorer: Arc<dyn RelevanceScorer>,
    config: EngineConfig,
}

impl SearchEngine {
    pub fn new(backend: Arc<dyn MessageBackend>, config: EngineConfig) -> Self {
        Self {
            backend,
            scorer: Arc::new(HeuristicScorer::default()),
            config,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub async fn search(&self, session: &SessionContext, query: &SearchQuery) -> Result<SearchState> {
        if query.is_blank() {
            return Ok(SearchState::AwaitingInput);
        }

        let text = query.text.trim();
        let page_size = self.config.page_size(query.page_size);
        debug!("Searching {:?} (page {}, size {})", text, query.page, page_size);

        let hits = with_timeout(
            self.config.remote_timeout(),
            "search",
            self.backend
                .search(session.user_id(), text, &query.filters, query.page, page_size),
        )
        .await?;

        Ok(SearchState::Results(self.rank(session, text, hits)))
    }

    /// Score, highlight and order one page of raw hits
    fn rank(&self, session: &SessionContext, query: &str, hits: Paged<SearchHit>) -> Paged<SearchResult> {
        let user_id = session.user_id();
        let pagination = hits.pagination;

        let mut results: Vec<SearchResult> = hits
            .data
            .into_iter()
            .filter(|hit| {
                let visible = hit.message.sender.id == *user_id || hit.message.recipient.id == *user_id;
                if !visible {
                    warn!("Dropping search hit {} not addressed to the user", hit.message.id);
                }
                visible
            })
            .map(|hit| {
                let relevance_score = match hit.relevance_score {
                    Some(score) => clamp_score(score),
                    None => clamp_score(self.scorer.score(query, &hit.message)),
                };
                let highlights = compute_highlights(query, &hit.message, user_id);
                SearchResult {
                    message: hit.message,
                    thread: hit.thread,
                    relevance_score,
                    highlights,
                }
            })
            .collect();

        order_results(&mut results);
        Paged { data: results, pagination }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Completed { query: SearchQuery, state: SearchState },
    Failed { query: SearchQuery, error: InboxError },
}

/// Runs a search once typing has paused
///
/// Every submission replaces the pending one, so only the last query of a
/// burst reaches the remote.
pub struct SearchDebouncer {
    engine: Arc<SearchEngine>,
    session: SessionContext,
    quiet_period: Duration,
    pending: Option<ScheduledTask>,
    tx: flume::Sender<SearchEvent>,
}

impl SearchDebouncer {
    pub fn new(engine: Arc<SearchEngine>, session: SessionContext) -> (Self, flume::Receiver<SearchEvent>) {
        let quiet_period = engine.config.search_debounce();
        let (tx, rx) = flume::unbounded();
        let debouncer = Self {
            engine,
            session,
            quiet_period,
            pending: None,
            tx,
        };
        (debouncer, rx)
    }

    pub fn submit(&mut self, query: SearchQuery) {
        let engine = self.engine.clone();
        let session = self.session.clone();
        let tx = self.tx.clone();

        // Assigning drops (and aborts) the previous pending search
        self.pending = Some(ScheduledTask::after("search_debounce", self.quiet_period, async move {
            let event = match engine.search(&session, &query).await {
                Ok(state) => SearchEvent::Completed { query, state },
                Err(error) => SearchEvent::Failed { query, error },
            };
            if tx.send(event).is_err() {
                debug!("Search result dropped, no listener");
            }
        }));
    }

    pub fn is_pending(&self) -> bool {
        self.pending.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{incoming, outgoing, seeded_backend, session};

    fn engine(backend: Arc<crate::backend::InMemoryBackend>) -> SearchEngine {
        SearchEngine::new(backend, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_blank_query_makes_no_remote_call() {
        let backend = seeded_backend();
        let engine = engine(backend.clone());

        for text in ["", "   ", "\t\n"] {
            let state = engine.search(&session(), &SearchQuery::new(text)).await.unwrap();
            assert_eq!(state, SearchState::AwaitingInput);
        }
        assert_eq!(backend.calls("search"), 0);
    }

    #[tokio::test]
    async fn test_remote_scores_win_and_results_are_ordered() {
        let backend = seeded_backend();
        backend.insert_message(incoming("r1", "t10", "bob", "Quiz one", 10));
        backend.insert_message(incoming("r2", "t11", "bob", "Quiz two", 20));
        backend.insert_message(incoming("r3", "t12", "bob", "Quiz three", 15));
        backend.set_score("r1", Some(0.9));
        backend.set_score("r2", Some(0.4));
        backend.set_score("r3", Some(0.9));

        let state = engine(backend).search(&session(), &SearchQuery::new("quiz")).await.unwrap();
        let ids: Vec<&str> = state.results().iter().map(|r| r.message.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r1", "r2"]);

        let first = &state.results()[0];
        assert_eq!(first.highlights.subject.as_ref().unwrap().matched, "Quiz");
    }

    #[tokio::test]
    async fn test_missing_or_wild_scores_are_normalized() {
        let backend = seeded_backend();
        backend.insert_message(outgoing("x1", "t20", "cat", "Lab notes", 30));
        backend.insert_message(incoming("x2", "t21", "cat", "Other lab", 31));
        backend.set_score("x1", None);
        backend.set_score("x2", Some(7.5));

        let state = engine(backend).search(&session(), &SearchQuery::new("lab")).await.unwrap();
        for result in state.results() {
            assert!((0.0..=1.0).contains(&result.relevance_score));
        }
        let x2 = state.results().iter().find(|r| r.message.id == "x2").unwrap();
        assert_eq!(x2.relevance_score, 1.0);
        let x1 = state.results().iter().find(|r| r.message.id == "x1").unwrap();
        assert!(x1.relevance_score > 0.0);
    }

    #[tokio::test]
    async fn test_query_without_matches_is_empty_not_an_error() {
        let backend = seeded_backend();
        let engine = engine(backend.clone());

        let state = engine.search(&session(), &SearchQuery::new("xyz-no-match")).await.unwrap();
        assert!(matches!(state, SearchState::Results(_)));
        assert!(state.results().is_empty());
        if let SearchState::Results(page) = &state {
            assert_eq!(page.pagination.total, 0);
            assert!(!page.pagination.has_next);
        }
        assert_eq!(backend.calls("search"), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_propagates() {
        let backend = seeded_backend();
        backend.set_offline(true);
        let err = engine(backend).search(&session(), &SearchQuery::new("topic")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_query_changes_reset_page() {
        let mut query = SearchQuery::new("exam");
        query.set_page(3);
        query.set_filters(SearchFilters {
            is_starred: Some(true),
            ..Default::default()
        });
        assert_eq!(query.page, 1);

        query.set_page(2);
        query.set_text("exams");
        assert_eq!(query.page, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_only_searches_last_keystroke() {
        let backend = seeded_backend();
        let engine = Arc::new(engine(backend.clone()));
        let (mut debouncer, rx) = SearchDebouncer::new(engine, session());

        for text in ["t", "to", "top", "topic"] {
            debouncer.submit(SearchQuery::new(text));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(backend.calls("search"), 0);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(backend.calls("search"), 1);

        match rx.recv_async().await.unwrap() {
            SearchEvent::Completed { query, state } => {
                assert_eq!(query.text, "topic");
                assert_eq!(state.results().len(), 5);
            }
            other => panic!("Expected results, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_debounce_never_fires() {
        let backend = seeded_backend();
        let engine = Arc::new(engine(backend.clone()));
        let (mut debouncer, rx) = SearchDebouncer::new(engine, session());

        debouncer.submit(SearchQuery::new("topic"));
        debouncer.cancel();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(backend.calls("search"), 0);
        assert!(rx.try_recv().is_err());
    }
}
