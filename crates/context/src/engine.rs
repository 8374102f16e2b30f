//! Retrieval Engine - Runs one conversational turn end to end
//!
//! classify -> tiered fusion search -> carry-over -> blend -> cite -> gate
//!
//! Stages run strictly in sequence. The only shared mutable resource is
//! the conversation's carry-over state: a turn holds the conversation's
//! lock from load to commit. Cancellation and the deadline reach every
//! stage up to the gate; once those succeeded the commit runs to
//! completion on its own task, writing state and history together.

use crate::generation::{EvidenceSignal, GenerationCollaborator, GenerationInput};
use crate::locks::ConversationLocks;
use chrono::{DateTime, NaiveDate, Utc};
use citeforge_common::cancel::CancellationToken;
use citeforge_common::config::AppConfig;
use citeforge_common::context::{
    render_context, CarryOverManager, CarryOverUpdate, CitationAssembler, HybridBlender,
    ProvenanceScorer, RelevanceGate, TierClassifier, TurnClassifier,
};
use citeforge_common::conversation::ConversationStore;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::metrics::{self, RetrievalStats};
use citeforge_common::models::{
    Citation, CitationAssembly, CitationGroup, ConversationMessage, ConversationState, DateConflict,
    DateRange, DocType, GateDecision, HybridHit, ProvenanceScore, RetrievalTier, SearchFilters,
    TierClassification, TurnAnalysis,
};
use citeforge_search::{FusionSearcher, SubQueryStatus, TierAttempt, TieredOutcome, TieredRetriever};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Per-request knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetrieveOptions {
    /// Maximum fused hits, defaults to `retrieval.default_limit`
    #[validate(range(min = 1, max = 50))]
    pub limit: Option<usize>,

    #[serde(default)]
    pub doc_types: Vec<DocType>,

    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,

    /// Overrides `citations.group_by_source`
    pub group_by_source: Option<bool>,

    /// Bound on the whole turn
    #[validate(range(min = 1))]
    pub deadline_ms: Option<u64>,
}

impl RetrieveOptions {
    /// Search filters from the options, rejecting an inverted date window
    pub fn filters(&self) -> Result<SearchFilters> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                return Err(AppError::Validation {
                    message: format!("date_from {} is after date_to {}", from, to),
                    field: Some("options.date_from".to_string()),
                });
            }
        }

        let date_range = (self.date_from.is_some() || self.date_to.is_some()).then_some(DateRange {
            from: self.date_from,
            to: self.date_to,
        });

        Ok(SearchFilters {
            doc_types: self.doc_types.clone(),
            date_range,
        })
    }
}

/// One turn of a conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct RetrieveRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,

    /// Omit to start a new conversation
    #[validate(length(min = 1, max = 128))]
    pub conversation_id: Option<String>,

    /// Previous user queries, oldest first. Read from the conversation
    /// store when empty.
    #[serde(default)]
    pub recent_queries: Vec<String>,

    #[serde(default)]
    #[validate(nested)]
    pub options: RetrieveOptions,
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_options(mut self, options: RetrieveOptions) -> Self {
        self.options = options;
        self
    }
}

/// Diagnostics handed to the generation layer alongside the evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceHints {
    pub tier_used: RetrievalTier,
    pub classification: TierClassification,
    pub attempts: Vec<TierAttempt>,

    /// Documents offered by carry-over this turn
    pub carried_sources: Vec<String>,

    /// Documents dropped from the conversation this turn
    pub evicted_sources: Vec<String>,

    /// Citation number by document id
    pub citation_map: BTreeMap<String, usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<DateRange>,

    pub conflicts: Vec<DateConflict>,
    pub accessed_at: DateTime<Utc>,
    pub latency_ms: u64,
}

/// Evidence for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveResponse {
    /// Pass this back to continue the conversation
    pub conversation_id: String,
    pub query: String,
    pub hits: Vec<HybridHit>,
    pub citations: Vec<Citation>,
    pub citation_groups: Vec<CitationGroup>,

    /// Rendered context block, `None` when the gate withheld the evidence
    pub context: Option<String>,

    pub turn_analysis: TurnAnalysis,
    pub provenance_hints: ProvenanceHints,
    pub gate_decision: GateDecision,

    /// Message for the end user when no reliable source was found
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl RetrieveResponse {
    pub fn has_evidence(&self) -> bool {
        self.gate_decision.is_pass()
    }
}

/// Generated answer with its grounding score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub provenance: ProvenanceScore,
    pub retrieval: RetrieveResponse,
}

/// A turn that passed every stage and waits to be committed
struct PreparedTurn {
    guard: OwnedMutexGuard<()>,
    next_state: ConversationState,
    response: RetrieveResponse,
}

pub struct RetrievalEngine {
    classifier: TierClassifier,
    retriever: TieredRetriever,
    turns: TurnClassifier,
    carry_over: CarryOverManager,
    blender: HybridBlender,
    assembler: CitationAssembler,
    gate: RelevanceGate,
    provenance: ProvenanceScorer,
    store: Arc<dyn ConversationStore>,
    stats: Arc<RetrievalStats>,
    locks: ConversationLocks,
    generator: Option<Arc<dyn GenerationCollaborator>>,
    default_limit: usize,
    recent_query_window: usize,
}

impl RetrievalEngine {
    pub fn new(
        config: &AppConfig,
        searcher: FusionSearcher,
        store: Arc<dyn ConversationStore>,
        stats: Arc<RetrievalStats>,
    ) -> Self {
        Self {
            classifier: TierClassifier::new(),
            retriever: TieredRetriever::new(searcher),
            turns: TurnClassifier::new(&config.carry_over),
            carry_over: CarryOverManager::new(config.carry_over.clone()),
            blender: HybridBlender::new(config.blend.clone()),
            assembler: CitationAssembler::new(config.citations.clone()),
            gate: RelevanceGate::new(config.gate.clone()),
            provenance: ProvenanceScorer::new(),
            store,
            stats,
            locks: ConversationLocks::new(),
            generator: None,
            default_limit: config.retrieval.default_limit,
            recent_query_window: config.carry_over.recent_query_window,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationCollaborator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn stats(&self) -> &Arc<RetrievalStats> {
        &self.stats
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    /// Retrieve and cite evidence for one turn.
    ///
    /// Empty, weak or conflicting evidence is reported in the response,
    /// never as an error. Errors are invalid requests, cancellation,
    /// deadline expiry and infrastructure faults; none of them commit
    /// carry-over state.
    ///
    /// `deadline_ms` bounds the stages up to the gate. The commit that
    /// follows is not interrupted by it.
    pub async fn retrieve(
        &self,
        request: RetrieveRequest,
        cancel: &CancellationToken,
    ) -> Result<RetrieveResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AppError::Validation {
                message: "query must not be blank".to_string(),
                field: Some("query".to_string()),
            });
        }
        let filters = request.options.filters()?;
        let conversation_id = request
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let turn = self.prepare_turn(query, &conversation_id, &request, filters, cancel);
        let prepared = match request.options.deadline_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), turn).await {
                    Ok(result) => result,
                    Err(_) => Err(AppError::DeadlineExceeded { timeout_ms }),
                }
            }
            None => turn.await,
        };

        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                if matches!(e, AppError::Cancelled | AppError::DeadlineExceeded { .. }) {
                    self.stats.record_cancelled();
                    info!(
                        conversation_id = %conversation_id,
                        reason = %e,
                        "Turn abandoned, carry-over state not committed"
                    );
                }
                return Err(e);
            }
        };

        let PreparedTurn {
            guard,
            next_state,
            response,
        } = prepared;
        self.commit(guard, next_state, ConversationMessage::user(query))
            .await;

        info!(
            conversation_id = %response.conversation_id,
            tier = response.provenance_hints.tier_used.as_str(),
            turn_type = response.turn_analysis.turn_type.as_str(),
            hits = response.hits.len(),
            gate = response.gate_decision.status(),
            latency_ms = response.provenance_hints.latency_ms,
            "Turn complete"
        );
        Ok(response)
    }

    /// Every stage of a turn up to the gate. Dropping this future at any
    /// await leaves the conversation untouched.
    async fn prepare_turn(
        &self,
        query: &str,
        conversation_id: &str,
        request: &RetrieveRequest,
        filters: SearchFilters,
        cancel: &CancellationToken,
    ) -> Result<PreparedTurn> {
        let guard = self.locks.acquire(conversation_id).await;
        let start = Instant::now();

        let state = self.load_state(conversation_id).await;
        let recent = self
            .recent_queries(conversation_id, &request.recent_queries)
            .await;

        let classification = self.classifier.classify(query);
        let turn_analysis = self.turns.classify(query, &recent);
        let limit = request.options.limit.unwrap_or(self.default_limit);

        let tiered = self
            .retriever
            .retrieve(query, &classification, limit, &filters, cancel)
            .await?;

        let update = self
            .carry_over
            .manage(&state, turn_analysis.turn_type, &tiered.hits);
        let hits = self
            .blender
            .blend(&tiered.hits, &update.carried, turn_analysis.turn_type);

        let assembler = match request.options.group_by_source {
            Some(group_by_source) => self.assembler.with_group_by_source(group_by_source),
            None => self.assembler.clone(),
        };
        let accessed_at = Utc::now();
        let assembly = assembler.assemble(&hits, accessed_at);
        let gate_decision = self.gate.evaluate(&assembly, &classification);

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let latency_ms = start.elapsed().as_millis() as u64;
        self.record(&tiered, &hits, &update, &gate_decision, &turn_analysis, latency_ms);
        debug!(
            conversation_id,
            refreshed = update.refreshed.len(),
            inserted = update.inserted.len(),
            evicted = update.evicted.len(),
            "Carry-over update ready"
        );

        let passed = gate_decision.is_pass();
        let context = passed.then(|| render_context(&assembly));
        let (hits, assembly) = if passed {
            (hits, assembly)
        } else {
            (Vec::new(), CitationAssembly::default())
        };

        let response = RetrieveResponse {
            conversation_id: conversation_id.to_string(),
            query: query.to_string(),
            hits,
            citations: assembly.citations,
            citation_groups: assembly.groups,
            context,
            turn_analysis,
            provenance_hints: ProvenanceHints {
                tier_used: tiered.tier_used,
                classification,
                attempts: tiered.attempts,
                carried_sources: update
                    .carried
                    .iter()
                    .map(|c| c.source.document_id.clone())
                    .collect(),
                evicted_sources: update.evicted,
                citation_map: assembly.citation_map,
                date_range: assembly.date_range,
                conflicts: assembly.conflicts,
                accessed_at,
                latency_ms,
            },
            notice: gate_decision.user_notice().map(String::from),
            gate_decision,
        };

        Ok(PreparedTurn {
            guard,
            next_state: update.next_state,
            response,
        })
    }

    /// Retrieve, then have the generation collaborator write the answer.
    ///
    /// When the gate withholds the evidence the collaborator is told so
    /// explicitly instead of receiving an empty context.
    pub async fn answer(
        &self,
        request: RetrieveRequest,
        cancel: &CancellationToken,
    ) -> Result<AnswerResponse> {
        let generator = self
            .generator
            .clone()
            .ok_or_else(|| AppError::ServiceUnavailable {
                message: "no generation collaborator is configured".to_string(),
            })?;

        let retrieval = self.retrieve(request, cancel).await?;
        let evidence = match &retrieval.notice {
            None => EvidenceSignal::Grounded,
            Some(notice) => EvidenceSignal::NoReliableEvidence {
                notice: notice.clone(),
            },
        };
        let input = GenerationInput {
            query: retrieval.query.clone(),
            context: retrieval.context.clone(),
            citations: retrieval.citations.clone(),
            response_mode: retrieval.turn_analysis.response_mode,
            evidence,
        };

        let answer = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.stats.record_cancelled();
                return Err(AppError::Cancelled);
            }
            text = generator.generate(input) => text?,
        };

        let provenance = self.score_response(&answer, &retrieval);
        {
            let _guard = self.locks.acquire(&retrieval.conversation_id).await;
            let message = ConversationMessage::assistant(answer.clone());
            if let Err(e) = self
                .store
                .append_message(&retrieval.conversation_id, message)
                .await
            {
                warn!(
                    conversation_id = %retrieval.conversation_id,
                    error = %e,
                    "Failed to record generated answer"
                );
            }
        }

        debug!(
            conversation_id = %retrieval.conversation_id,
            generator = generator.name(),
            rag_weight = provenance.value,
            "Answer generated"
        );

        Ok(AnswerResponse {
            answer,
            provenance,
            retrieval,
        })
    }

    /// Score generated text against the evidence of a retrieval response
    pub fn score_response(&self, response: &str, retrieval: &RetrieveResponse) -> ProvenanceScore {
        let assembly = CitationAssembly {
            groups: retrieval.citation_groups.clone(),
            ..Default::default()
        };
        let score = self.provenance.score_assembly(response, &assembly);
        self.stats.record_provenance(score.value);
        score
    }

    /// State at the start of the turn. A store failure costs the carried
    /// context, not the request.
    async fn load_state(&self, conversation_id: &str) -> ConversationState {
        match self.store.load_state(conversation_id).await {
            Ok(Some(mut state)) => {
                let dropped = state.sanitize();
                if dropped > 0 {
                    warn!(conversation_id, dropped, "Discarded corrupt carry-over entries");
                }
                state
            }
            Ok(None) => ConversationState::new(conversation_id),
            Err(e) => {
                warn!(
                    conversation_id,
                    backend = self.store.backend(),
                    error = %e,
                    "Failed to load conversation state, starting empty"
                );
                ConversationState::new(conversation_id)
            }
        }
    }

    async fn recent_queries(&self, conversation_id: &str, provided: &[String]) -> Vec<String> {
        if !provided.is_empty() {
            let start = provided.len().saturating_sub(self.recent_query_window);
            return provided[start..].to_vec();
        }

        match self
            .store
            .recent_user_queries(conversation_id, self.recent_query_window)
            .await
        {
            Ok(queries) => queries,
            Err(e) => {
                warn!(conversation_id, error = %e, "Failed to read recent queries");
                Vec::new()
            }
        }
    }

    /// Write the turn's state and user message as one store operation.
    ///
    /// Runs on its own task holding the conversation lock, so a caller
    /// that stops waiting cannot leave half a turn behind. A store
    /// failure costs the carried context of later turns, not this
    /// response.
    async fn commit(
        &self,
        guard: OwnedMutexGuard<()>,
        next_state: ConversationState,
        message: ConversationMessage,
    ) {
        let store = self.store.clone();
        let conversation_id = next_state.conversation_id.clone();
        let task = tokio::spawn(async move {
            let _guard = guard;
            store.commit_turn(&next_state, message).await
        });

        match task.await {
            Ok(Ok(())) => debug!(conversation_id = %conversation_id, "Turn committed"),
            Ok(Err(e)) => warn!(
                conversation_id = %conversation_id,
                backend = self.store.backend(),
                error = %e,
                "Failed to commit turn"
            ),
            Err(e) => warn!(
                conversation_id = %conversation_id,
                error = %e,
                "Commit task did not complete"
            ),
        }
    }

    fn record(
        &self,
        tiered: &TieredOutcome,
        hits: &[HybridHit],
        update: &CarryOverUpdate,
        gate_decision: &GateDecision,
        turn_analysis: &TurnAnalysis,
        latency_ms: u64,
    ) {
        let tier = tiered.tier_used.as_str();
        let carried = hits.iter().filter(|h| h.is_carried_over).count();

        self.stats
            .record_retrieval(tier, latency_ms, tiered.fallbacks());
        for status in tiered.degraded_sub_queries() {
            self.stats
                .record_sub_query_failure(matches!(status, SubQueryStatus::TimedOut));
        }
        self.stats.record_gate(gate_decision.status());
        self.stats.record_carry_over(carried, update.evicted.len());

        metrics::record_retrieval(latency_ms as f64 / 1000.0, tier, hits.len());
        metrics::record_gate(gate_decision.status());
        metrics::record_carry_over(
            turn_analysis.turn_type.as_str(),
            carried,
            update.evicted.len(),
        );
    }
}
