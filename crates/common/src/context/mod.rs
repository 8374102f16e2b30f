//! Context Engine Stages
//!
//! The per-turn pipeline stages that sit around the fusion searcher:
//! - Tier classification of the raw query
//! - Turn classification and cross-turn carry-over
//! - Blending of fresh and carried evidence
//! - Citation assembly and context rendering
//! - Relevance gating and provenance scoring

mod blender;
mod carry_over;
mod citation_assembler;
mod provenance;
mod relevance_gate;
mod tier_classifier;

pub use blender::HybridBlender;
pub use carry_over::{CarriedSource, CarryOverManager, CarryOverUpdate, TurnClassifier};
pub use citation_assembler::{citation_id, extract_snippet, render_context, CitationAssembler};
pub use provenance::ProvenanceScorer;
pub use relevance_gate::RelevanceGate;
pub use tier_classifier::{parse_date_filter, TierClassifier};
