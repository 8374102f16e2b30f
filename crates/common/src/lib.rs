//! CiteForge Common Library
//!
//! Shared code for the CiteForge retrieval engine including:
//! - Error types and configuration
//! - Domain models for hits, citations and conversation state
//! - Context engine stages (tier classification, carry-over, blending,
//!   citation assembly, relevance gate, provenance)
//! - Conversation storage, cache and database pool
//! - Query embedding client
//! - Resilience policies, cancellation and metrics

pub mod cache;
pub mod cancel;
pub mod config;
pub mod context;
pub mod conversation;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod metrics;
pub mod models;
pub mod resilience;
pub mod text;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::AppConfig;
pub use conversation::ConversationStore;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use metrics::RetrievalStats;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
