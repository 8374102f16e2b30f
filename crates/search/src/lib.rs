//! CiteForge Hybrid Fusion Searcher
//!
//! Fuses lexical and vector index results for one query, with tier-aware
//! weights and a fallback chain across retrieval tiers.

pub mod retrieval;

pub use retrieval::{
    FusionOutcome, FusionRequest, FusionSearcher, FusionWeights, LexicalIndex, PgLexicalIndex,
    PgVectorIndex, SubQueryStatus, TierAttempt, TieredOutcome, TieredRetriever, VectorIndex,
    WeightedFusion,
};
