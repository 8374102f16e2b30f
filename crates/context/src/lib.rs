//! CiteForge context engine
//!
//! Orchestrates one conversational turn: tier classification, hybrid
//! fusion search with tier fallback, conversation carry-over, blending,
//! citation assembly and the relevance gate. Generated answers are scored
//! for provenance. The `context` binary exposes the engine over HTTP.

pub mod engine;
pub mod generation;
pub mod locks;
pub mod routes;

pub use engine::{
    AnswerResponse, ProvenanceHints, RetrievalEngine, RetrieveOptions, RetrieveRequest,
    RetrieveResponse,
};
pub use generation::{
    create_generator, EvidenceSignal, GenerationCollaborator, GenerationInput,
    HttpGenerationCollaborator,
};
pub use locks::ConversationLocks;
pub use routes::{create_router, AppState};
