//! Fusion searcher and tier fallback against in-memory indexes

use async_trait::async_trait;
use citeforge_common::cancel::CancellationToken;
use citeforge_common::config::RetrievalConfig;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::models::{
    DocType, HitSource, IndexHit, RetrievalTier, SearchFilters, SignalKind, TierClassification,
};
use citeforge_common::resilience::{RetryPolicy, SearchPolicy};
use citeforge_search::{
    FusionRequest, FusionSearcher, LexicalIndex, SubQueryStatus, TieredRetriever, VectorIndex,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

enum Behaviour {
    /// Return hits whose content mentions the query's first word
    Matching(Vec<IndexHit>),
    Fail,
    Hang,
    /// Fail on the first call, then match
    FlakyOnce(Vec<IndexHit>),
}

struct FakeIndex {
    behaviour: Behaviour,
    calls: AtomicUsize,
}

impl FakeIndex {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn run(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let matching = |hits: &[IndexHit]| -> Vec<IndexHit> {
            let needle = query.split_whitespace().next().unwrap_or("").to_lowercase();
            hits.iter()
                .filter(|h| h.content.to_lowercase().contains(&needle) || h.title.to_lowercase().contains(&needle))
                .take(limit)
                .cloned()
                .collect()
        };
        match &self.behaviour {
            Behaviour::Matching(hits) => Ok(matching(hits)),
            Behaviour::Fail => Err(AppError::index("fake", "index offline")),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::FlakyOnce(_) if call == 0 => Err(AppError::index("fake", "transient")),
            Behaviour::FlakyOnce(hits) => Ok(matching(hits)),
        }
    }
}

#[async_trait]
impl LexicalIndex for FakeIndex {
    async fn search(&self, query: &str, _filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>> {
        self.run(query, limit).await
    }
}

#[async_trait]
impl VectorIndex for FakeIndex {
    async fn search(&self, query: &str, _filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>> {
        self.run(query, limit).await
    }
}

fn hit(document: &str, chunk: &str, score: f32, content: &str) -> IndexHit {
    IndexHit {
        document_id: document.to_string(),
        chunk_id: chunk.to_string(),
        chunk_index: 0,
        score,
        content: content.to_string(),
        title: format!("Document {}", document),
        doc_type: DocType::Patent,
        page_range: None,
        section_title: None,
        date_published: None,
    }
}

fn config() -> RetrievalConfig {
    RetrievalConfig {
        sub_query_timeout_ms: 50,
        ..RetrievalConfig::default()
    }
}

fn searcher(lexical: Arc<FakeIndex>, vector: Arc<FakeIndex>) -> FusionSearcher {
    FusionSearcher::new(lexical, vector, config()).with_policy(SearchPolicy::immediate())
}

fn classification(tier: RetrievalTier, signal: Option<(&str, SignalKind)>) -> TierClassification {
    TierClassification {
        tier,
        confidence: 0.9,
        matched_signal: signal.map(|(s, _)| s.to_string()),
        signal_kind: signal.map(|(_, k)| k),
        date_range: None,
        explanation: String::new(),
    }
}

#[tokio::test]
async fn test_both_indexes_fuse() {
    let lexical = FakeIndex::new(Behaviour::Matching(vec![hit("D1", "c1", 0.8, "battery separator")]));
    let vector = FakeIndex::new(Behaviour::Matching(vec![
        hit("D1", "c1", 0.9, "battery separator"),
        hit("D2", "c2", 0.6, "battery anode"),
    ]));
    let outcome = searcher(lexical, vector)
        .search(
            &FusionRequest::new("battery", RetrievalTier::ContentSearch, 5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.hits.len(), 2);
    assert_eq!(outcome.hits[0].chunk_id, "c1");
    assert_eq!(outcome.hits[0].source, HitSource::Both);
    assert_eq!(outcome.hits[1].source, HitSource::Vector);
    assert_eq!(outcome.vector, SubQueryStatus::Ok { hits: 2 });
}

#[tokio::test]
async fn test_failed_index_degrades_to_the_other() {
    let lexical = FakeIndex::new(Behaviour::Fail);
    let vector = FakeIndex::new(Behaviour::Matching(vec![hit("D1", "c1", 0.9, "battery separator")]));
    let outcome = searcher(lexical, vector)
        .search(
            &FusionRequest::new("battery", RetrievalTier::ContentSearch, 5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].source, HitSource::Vector);
    assert!(matches!(outcome.lexical, SubQueryStatus::Failed { .. }));
}

#[tokio::test]
async fn test_both_failing_is_empty_not_error() {
    let outcome = searcher(FakeIndex::new(Behaviour::Fail), FakeIndex::new(Behaviour::Fail))
        .search(
            &FusionRequest::new("battery", RetrievalTier::ContentSearch, 5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(outcome.hits.is_empty());
}

#[tokio::test]
async fn test_hanging_index_times_out() {
    let lexical = FakeIndex::new(Behaviour::Matching(vec![hit("D1", "c1", 0.9, "battery separator")]));
    let outcome = searcher(lexical, FakeIndex::new(Behaviour::Hang))
        .search(
            &FusionRequest::new("battery", RetrievalTier::ContentSearch, 5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.vector, SubQueryStatus::TimedOut);
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].source, HitSource::Bm25);
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_sub_queries() {
    let searcher = FusionSearcher::new(
        FakeIndex::new(Behaviour::Hang),
        FakeIndex::new(Behaviour::Hang),
        RetrievalConfig {
            sub_query_timeout_ms: 60_000,
            ..RetrievalConfig::default()
        },
    );
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        searcher.search(&FusionRequest::new("battery", RetrievalTier::ContentSearch, 5), &token),
    )
    .await
    .expect("search should observe cancellation");
    assert!(matches!(result, Err(AppError::Cancelled)));
}

#[tokio::test]
async fn test_empty_query_skips_indexes() {
    let lexical = FakeIndex::new(Behaviour::Fail);
    let outcome = searcher(lexical.clone(), FakeIndex::new(Behaviour::Fail))
        .search(
            &FusionRequest::new("   ", RetrievalTier::ContentSearch, 5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.lexical, SubQueryStatus::Skipped);
    assert_eq!(lexical.calls(), 0);
}

#[tokio::test]
async fn test_retry_policy_recovers_transient_failure() {
    let lexical = FakeIndex::new(Behaviour::FlakyOnce(vec![hit("D1", "c1", 0.7, "battery separator")]));
    let policy = SearchPolicy::new(
        None,
        RetryPolicy::Fixed {
            delay: Duration::ZERO,
            max_attempts: 2,
        },
    );
    let searcher = FusionSearcher::new(lexical.clone(), FakeIndex::new(Behaviour::Matching(Vec::new())), config())
        .with_policy(policy);

    let outcome = searcher
        .search(
            &FusionRequest::new("battery", RetrievalTier::ContentSearch, 5),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.lexical, SubQueryStatus::Ok { hits: 1 });
    assert_eq!(lexical.calls(), 2);
}

#[tokio::test]
async fn test_exact_lookup_uses_identifier_and_lexical_weight() {
    let lexical = FakeIndex::new(Behaviour::Matching(vec![hit(
        "US11281020B2",
        "claims-1",
        0.95,
        "US11281020B2 claims a solid electrolyte",
    )]));
    let retriever = TieredRetriever::new(searcher(lexical, FakeIndex::new(Behaviour::Matching(Vec::new()))));

    let outcome = retriever
        .retrieve(
            "Patent US11281020B2 claims",
            &classification(
                RetrievalTier::ExactLookup,
                Some(("US11281020B2", SignalKind::PatentNumber)),
            ),
            5,
            &SearchFilters::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.tier_used, RetrievalTier::ExactLookup);
    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].query, "US11281020B2");
    assert_eq!(outcome.hits.len(), 1);
    assert_eq!(outcome.hits[0].source, HitSource::Bm25);
    assert!((outcome.hits[0].score - 0.95 * 0.7).abs() < 1e-6);
}

#[tokio::test]
async fn test_fallback_walks_the_tier_chain() {
    // Only the full query's first word ("separator") matches anything.
    let vector = FakeIndex::new(Behaviour::Matching(vec![hit("D1", "c1", 0.8, "separator coating")]));
    let retriever = TieredRetriever::new(searcher(FakeIndex::new(Behaviour::Matching(Vec::new())), vector));

    let outcome = retriever
        .retrieve(
            "separator made by 10.1000/xyz123",
            &classification(RetrievalTier::ExactLookup, Some(("10.1000/xyz123", SignalKind::Doi))),
            5,
            &SearchFilters::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let tiers: Vec<RetrievalTier> = outcome.attempts.iter().map(|a| a.tier).collect();
    assert_eq!(tiers, vec![RetrievalTier::ExactLookup, RetrievalTier::MetadataSemantic]);
    assert!(!outcome.attempts[0].usable);
    assert_eq!(outcome.tier_used, RetrievalTier::MetadataSemantic);
    assert_eq!(outcome.fallbacks(), 1);
    assert_eq!(outcome.hits.len(), 1);
}

#[tokio::test]
async fn test_nothing_usable_returns_content_search_result() {
    let retriever = TieredRetriever::new(searcher(
        FakeIndex::new(Behaviour::Matching(Vec::new())),
        FakeIndex::new(Behaviour::Matching(Vec::new())),
    ));
    let outcome = retriever
        .retrieve(
            "who invented this",
            &classification(RetrievalTier::MetadataSemantic, None),
            5,
            &SearchFilters::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.hits.is_empty());
    assert_eq!(outcome.tier_used, RetrievalTier::ContentSearch);
    assert_eq!(outcome.attempts.len(), 2);
}
