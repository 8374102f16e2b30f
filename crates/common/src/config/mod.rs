//! Configuration management for CiteForge services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values
//!
//! Every retrieval tunable (fusion weights, carry-over decay, gate
//! thresholds, citation caps) lives here so it can be changed per
//! deployment without touching the algorithms.

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration (Postgres full-text + pgvector indexes)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Redis configuration (conversation state)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Query embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Fusion search and tier routing
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Cross-turn carry-over
    #[serde(default)]
    pub carry_over: CarryOverConfig,

    /// Blending of fresh and carried results
    #[serde(default)]
    pub blend: BlendConfig,

    /// Citation assembly
    #[serde(default)]
    pub citations: CitationConfig,

    /// Relevance gate
    #[serde(default)]
    pub gate: GateConfig,

    /// Answer generation collaborator
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedisConfig {
    /// Redis URL; the in-memory conversation store is used when unset
    pub url: Option<String>,

    /// Default TTL in seconds
    #[serde(default = "default_redis_ttl")]
    pub default_ttl_secs: u64,

    /// Key prefix for namespacing
    #[serde(default = "default_redis_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai (any OpenAI-compatible endpoint)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per embedding request
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,
}

/// Retry strategy applied to every index sub-query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Single attempt
    None,
    /// Constant delay between attempts
    Fixed,
    /// Exponential backoff with jitter
    Exponential,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Content-search vector weight
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Content-search BM25 weight
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f32,

    /// Metadata-semantic vector weight
    #[serde(default = "default_metadata_vector_weight")]
    pub metadata_vector_weight: f32,

    /// Metadata-semantic BM25 weight
    #[serde(default = "default_metadata_bm25_weight")]
    pub metadata_bm25_weight: f32,

    /// Exact-lookup vector weight
    #[serde(default = "default_exact_vector_weight")]
    pub exact_vector_weight: f32,

    /// Exact-lookup BM25 weight
    #[serde(default = "default_exact_bm25_weight")]
    pub exact_bm25_weight: f32,

    /// Word-set Jaccard similarity at which two chunks are duplicates
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Candidates kept before filtering/dedup, as a multiple of the limit
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Per sub-query timeout in milliseconds
    #[serde(default = "default_sub_query_timeout")]
    pub sub_query_timeout_ms: u64,

    /// Minimum fused score for a hit to count as usable during tier fallback
    #[serde(default = "default_min_usable_score")]
    pub min_usable_score: f32,

    /// Default number of hits per search
    #[serde(default = "default_search_limit")]
    pub default_limit: usize,

    /// Retry strategy for index calls
    #[serde(default = "default_retry_strategy")]
    pub retry_strategy: RetryStrategy,

    /// Maximum attempts per index call (including the first)
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    /// Delay before the first retry in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_initial_delay_ms: u64,

    /// Index calls per second (0 disables the limiter)
    #[serde(default)]
    pub index_requests_per_second: u32,

    /// Burst capacity of the index limiter
    #[serde(default = "default_index_burst")]
    pub index_burst: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CarryOverConfig {
    /// Multiplier applied to carry score each turn a source is not refreshed
    #[serde(default = "default_decay_factor")]
    pub decay_factor: f32,

    /// Turns a source may stay inactive before eviction
    #[serde(default = "default_retention_turns")]
    pub retention_turns: u32,

    /// Carry score under which a source is evicted
    #[serde(default = "default_score_floor")]
    pub score_floor: f32,

    /// Carried weight multiplier on a new topic
    #[serde(default = "default_new_topic_weight")]
    pub new_topic_weight: f32,

    /// Carried weight multiplier on a drill-down
    #[serde(default = "default_drill_down_boost")]
    pub drill_down_boost: f32,

    /// Carried weight multiplier when the same sources are requested
    #[serde(default = "default_same_sources_boost")]
    pub same_sources_boost: f32,

    /// Carried weight multiplier on a comparison
    #[serde(default = "default_compare_boost")]
    pub compare_boost: f32,

    /// Number of previous user queries considered by the turn classifier
    #[serde(default = "default_recent_query_window")]
    pub recent_query_window: usize,

    /// Lexical overlap with recent queries that signals a drill-down
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f32,

    /// TTL of persisted conversation state in seconds
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlendConfig {
    /// Cap on blended hits
    #[serde(default = "default_max_blended")]
    pub max_results: usize,

    /// Boost for a fresh hit whose document was carried over
    #[serde(default = "default_carried_match_boost")]
    pub carried_match_boost: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CitationConfig {
    /// Keep a single chunk per source
    #[serde(default = "default_enabled")]
    pub group_by_source: bool,

    /// Chunks kept per source when not grouping
    #[serde(default = "default_max_chunks_per_source")]
    pub max_chunks_per_source: usize,

    /// Cap on citation groups
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Snippet length in characters
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,

    /// Re-sort groups preferring newer publication dates
    #[serde(default = "default_enabled")]
    pub prefer_recent: bool,

    /// Date difference (days) that must be exceeded before recency wins
    #[serde(default = "default_recency_threshold_days")]
    pub recency_threshold_days: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// Minimum mean relevance of the citation groups
    #[serde(default = "default_min_average_relevance")]
    pub min_average_relevance: f32,

    /// Minimum number of relevant citation groups
    #[serde(default = "default_min_relevant_citations")]
    pub min_relevant_citations: usize,

    /// Relevance at which a citation group counts as relevant
    #[serde(default = "default_relevant_citation_threshold")]
    pub relevant_citation_threshold: f32,

    /// Metadata queries bypass the relevance thresholds
    #[serde(default = "default_enabled")]
    pub exempt_metadata_queries: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: none (retrieval only) or openai (any
    /// OpenAI-compatible chat completions endpoint)
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// API key for the generation service
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_generation_api_base")]
    pub api_base: String,

    /// Chat model
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Maximum output tokens
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or an EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 30 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_redis_ttl() -> u64 { 86_400 }
fn default_redis_prefix() -> String { "citeforge".to_string() }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_vector_weight() -> f32 { 0.7 }
fn default_bm25_weight() -> f32 { 0.3 }
fn default_metadata_vector_weight() -> f32 { 0.5 }
fn default_metadata_bm25_weight() -> f32 { 0.5 }
fn default_exact_vector_weight() -> f32 { 0.3 }
fn default_exact_bm25_weight() -> f32 { 0.7 }
fn default_dedup_threshold() -> f32 { 0.8 }
fn default_candidate_multiplier() -> usize { 2 }
fn default_sub_query_timeout() -> u64 { 2_500 }
fn default_min_usable_score() -> f32 { 0.05 }
fn default_search_limit() -> usize { 10 }
fn default_retry_strategy() -> RetryStrategy { RetryStrategy::Exponential }
fn default_retry_attempts() -> u32 { 2 }
fn default_retry_delay() -> u64 { 100 }
fn default_index_burst() -> u32 { 20 }
fn default_decay_factor() -> f32 { 0.8 }
fn default_retention_turns() -> u32 { 5 }
fn default_score_floor() -> f32 { 0.05 }
fn default_new_topic_weight() -> f32 { 0.7 }
fn default_drill_down_boost() -> f32 { 1.3 }
fn default_same_sources_boost() -> f32 { 1.5 }
fn default_compare_boost() -> f32 { 1.1 }
fn default_recent_query_window() -> usize { 3 }
fn default_overlap_threshold() -> f32 { 0.3 }
fn default_state_ttl() -> u64 { 86_400 }
fn default_max_blended() -> usize { 8 }
fn default_carried_match_boost() -> f32 { 1.2 }
fn default_max_chunks_per_source() -> usize { 3 }
fn default_max_sources() -> usize { 8 }
fn default_snippet_length() -> usize { 300 }
fn default_recency_threshold_days() -> i64 { 1 }
fn default_min_average_relevance() -> f32 { 0.3 }
fn default_min_relevant_citations() -> usize { 1 }
fn default_relevant_citation_threshold() -> f32 { 0.3 }
fn default_generation_provider() -> String { "none".to_string() }
fn default_generation_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_generation_model() -> String { "gpt-4o-mini".to_string() }
fn default_generation_max_tokens() -> u32 { 1000 }
fn default_generation_temperature() -> f32 { 0.2 }
fn default_generation_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__CARRY_OVER__DECAY_FACTOR=0.75
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject values the retrieval stages cannot work with
    pub fn validate(&self) -> Result<()> {
        let r = &self.retrieval;
        for (name, value) in [
            ("retrieval.vector_weight", r.vector_weight),
            ("retrieval.bm25_weight", r.bm25_weight),
            ("retrieval.metadata_vector_weight", r.metadata_vector_weight),
            ("retrieval.metadata_bm25_weight", r.metadata_bm25_weight),
            ("retrieval.exact_vector_weight", r.exact_vector_weight),
            ("retrieval.exact_bm25_weight", r.exact_bm25_weight),
            ("retrieval.dedup_threshold", r.dedup_threshold),
            ("gate.min_average_relevance", self.gate.min_average_relevance),
            ("gate.relevant_citation_threshold", self.gate.relevant_citation_threshold),
            ("carry_over.score_floor", self.carry_over.score_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Configuration {
                    message: format!("{} must be within [0, 1], got {}", name, value),
                });
            }
        }

        let decay = self.carry_over.decay_factor;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(AppError::Configuration {
                message: format!("carry_over.decay_factor must be within (0, 1], got {}", decay),
            });
        }

        for (name, value) in [
            ("retrieval.default_limit", r.default_limit),
            ("retrieval.candidate_multiplier", r.candidate_multiplier),
            ("blend.max_results", self.blend.max_results),
            ("citations.max_sources", self.citations.max_sources),
            ("citations.max_chunks_per_source", self.citations.max_chunks_per_source),
            ("citations.snippet_length", self.citations.snippet_length),
        ] {
            if value == 0 {
                return Err(AppError::Configuration {
                    message: format!("{} must be greater than zero", name),
                });
            }
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl RetrievalConfig {
    /// Get the sub-query timeout as Duration
    pub fn sub_query_timeout(&self) -> Duration {
        Duration::from_millis(self.sub_query_timeout_ms)
    }
}

impl DatabaseConfig {
    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.read_url.as_deref().unwrap_or(&self.url)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            default_ttl_secs: default_redis_ttl(),
            key_prefix: default_redis_prefix(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            metadata_vector_weight: default_metadata_vector_weight(),
            metadata_bm25_weight: default_metadata_bm25_weight(),
            exact_vector_weight: default_exact_vector_weight(),
            exact_bm25_weight: default_exact_bm25_weight(),
            dedup_threshold: default_dedup_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
            sub_query_timeout_ms: default_sub_query_timeout(),
            min_usable_score: default_min_usable_score(),
            default_limit: default_search_limit(),
            retry_strategy: default_retry_strategy(),
            retry_max_attempts: default_retry_attempts(),
            retry_initial_delay_ms: default_retry_delay(),
            index_requests_per_second: 0,
            index_burst: default_index_burst(),
        }
    }
}

impl Default for CarryOverConfig {
    fn default() -> Self {
        Self {
            decay_factor: default_decay_factor(),
            retention_turns: default_retention_turns(),
            score_floor: default_score_floor(),
            new_topic_weight: default_new_topic_weight(),
            drill_down_boost: default_drill_down_boost(),
            same_sources_boost: default_same_sources_boost(),
            compare_boost: default_compare_boost(),
            recent_query_window: default_recent_query_window(),
            overlap_threshold: default_overlap_threshold(),
            state_ttl_secs: default_state_ttl(),
        }
    }
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_blended(),
            carried_match_boost: default_carried_match_boost(),
        }
    }
}

impl Default for CitationConfig {
    fn default() -> Self {
        Self {
            group_by_source: true,
            max_chunks_per_source: default_max_chunks_per_source(),
            max_sources: default_max_sources(),
            snippet_length: default_snippet_length(),
            prefer_recent: true,
            recency_threshold_days: default_recency_threshold_days(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_average_relevance: default_min_average_relevance(),
            min_relevant_citations: default_min_relevant_citations(),
            relevant_citation_threshold: default_relevant_citation_threshold(),
            exempt_metadata_queries: true,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            api_base: default_generation_api_base(),
            model: default_generation_model(),
            max_tokens: default_generation_max_tokens(),
            temperature: default_generation_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.gate.min_average_relevance, 0.3);
        assert_eq!(config.carry_over.retention_turns, 5);
        assert_eq!(config.blend.max_results, 8);
        assert!(config.database.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_content_weights_sum_to_one() {
        let r = RetrievalConfig::default();
        assert!((r.vector_weight + r.bm25_weight - 1.0).abs() < 1e-6);
        assert!(r.bm25_weight < r.metadata_bm25_weight);
        assert!(r.metadata_bm25_weight < r.exact_bm25_weight);
    }

    #[test]
    fn test_validate_rejects_bad_decay() {
        let mut config = AppConfig::default();
        config.carry_over.decay_factor = 1.5;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_validate_rejects_zero_caps() {
        let mut config = AppConfig::default();
        config.citations.max_sources = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_read_database_fallback() {
        let db = DatabaseConfig {
            url: "postgres://localhost/citeforge".to_string(),
            read_url: None,
            max_connections: 5,
            min_connections: 1,
            connect_timeout_secs: 5,
            idle_timeout_secs: 60,
        };
        assert_eq!(db.read_database_url(), "postgres://localhost/citeforge");
    }
}
