//! In-memory collaborators shared by the engine and router tests

#![allow(dead_code)]

use async_trait::async_trait;
use citeforge_common::config::AppConfig;
use citeforge_common::conversation::{ConversationStore, InMemoryConversationStore};
use citeforge_common::errors::Result;
use citeforge_common::models::{
    ConversationMessage, ConversationState, DocType, IndexHit, SearchFilters,
};
use citeforge_common::resilience::SearchPolicy;
use citeforge_common::RetrievalStats;
use citeforge_context::RetrievalEngine;
use citeforge_search::{FusionSearcher, LexicalIndex, VectorIndex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Index answering from a fixed query -> hits table.
///
/// Serving the same table as both indexes makes a fused score equal the
/// scripted score for any tier whose weights sum to one.
#[derive(Default)]
pub struct ScriptedIndex {
    responses: HashMap<String, Vec<IndexHit>>,
    hang: bool,
    called: Notify,
    calls: AtomicUsize,
}

impl ScriptedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never answers; `wait_called` resolves once a search started
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn on(mut self, query: &str, hits: Vec<IndexHit>) -> Self {
        self.responses.insert(query.to_string(), hits);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn wait_called(&self) {
        self.called.notified().await;
    }

    async fn run(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.called.notify_one();
        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(self
            .responses
            .get(query)
            .map(|hits| hits.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl LexicalIndex for ScriptedIndex {
    async fn search(&self, query: &str, _filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>> {
        self.run(query, limit).await
    }
}

#[async_trait]
impl VectorIndex for ScriptedIndex {
    async fn search(&self, query: &str, _filters: &SearchFilters, limit: usize) -> Result<Vec<IndexHit>> {
        self.run(query, limit).await
    }
}

pub fn hit(document: &str, chunk_index: u32, score: f32, content: &str) -> IndexHit {
    IndexHit {
        document_id: document.to_string(),
        chunk_id: format!("{}-{}", document, chunk_index),
        chunk_index,
        score,
        content: content.to_string(),
        title: format!("Document {}", document),
        doc_type: DocType::Patent,
        page_range: None,
        section_title: None,
        date_published: None,
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retrieval.sub_query_timeout_ms = 5_000;
    config.rate_limit.enabled = false;
    config
}

pub struct Harness {
    pub engine: Arc<RetrievalEngine>,
    pub index: Arc<ScriptedIndex>,
    pub store: Arc<InMemoryConversationStore>,
    pub stats: Arc<RetrievalStats>,
}

pub fn harness(index: ScriptedIndex) -> Harness {
    harness_with(index, &test_config(), |engine| engine)
}

pub fn harness_with(
    index: ScriptedIndex,
    config: &AppConfig,
    customize: impl FnOnce(RetrievalEngine) -> RetrievalEngine,
) -> Harness {
    let index = Arc::new(index);
    let store = Arc::new(InMemoryConversationStore::new());
    let stats = Arc::new(RetrievalStats::new());
    let engine = build_engine(
        index.clone(),
        config,
        store.clone() as Arc<dyn ConversationStore>,
        stats.clone(),
    );

    Harness {
        engine: Arc::new(customize(engine)),
        index,
        store,
        stats,
    }
}

/// Engine over `index` persisting into an arbitrary store
pub fn engine_with_store(index: ScriptedIndex, store: Arc<dyn ConversationStore>) -> Arc<RetrievalEngine> {
    let config = test_config();
    Arc::new(build_engine(
        Arc::new(index),
        &config,
        store,
        Arc::new(RetrievalStats::new()),
    ))
}

fn build_engine(
    index: Arc<ScriptedIndex>,
    config: &AppConfig,
    store: Arc<dyn ConversationStore>,
    stats: Arc<RetrievalStats>,
) -> RetrievalEngine {
    let searcher = FusionSearcher::new(index.clone(), index, config.retrieval.clone())
        .with_policy(SearchPolicy::immediate());
    RetrievalEngine::new(config, searcher, store, stats)
}

/// In-memory store whose `commit_turn` blocks until released
#[derive(Default)]
pub struct GatedStore {
    inner: InMemoryConversationStore,
    entered: Notify,
    release: Notify,
    committed: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves once a commit is waiting for `release`
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    /// Resolves once a released commit was written
    pub async fn committed(&self) {
        self.committed.notified().await;
    }
}

#[async_trait]
impl ConversationStore for GatedStore {
    async fn load_state(&self, conversation_id: &str) -> Result<Option<ConversationState>> {
        self.inner.load_state(conversation_id).await
    }

    async fn save_state(&self, state: &ConversationState) -> Result<()> {
        self.inner.save_state(state).await
    }

    async fn append_message(&self, conversation_id: &str, message: ConversationMessage) -> Result<()> {
        self.inner.append_message(conversation_id, message).await
    }

    async fn commit_turn(&self, state: &ConversationState, message: ConversationMessage) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.commit_turn(state, message).await?;
        self.committed.notify_one();
        Ok(())
    }

    async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<ConversationMessage>> {
        self.inner.recent_messages(conversation_id, limit).await
    }

    fn backend(&self) -> &'static str {
        "gated"
    }
}
