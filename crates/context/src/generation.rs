//! Generation collaborator
//!
//! The engine hands assembled evidence to a generation service and gets
//! text back. Generation itself happens elsewhere; this module only
//! defines the hand-off and an OpenAI-compatible chat client.

use async_trait::async_trait;
use citeforge_common::config::GenerationConfig;
use citeforge_common::errors::{AppError, Result};
use citeforge_common::models::{Citation, ResponseMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Whether the hand-off carries trusted evidence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceSignal {
    Grounded,
    /// The gate withheld the evidence. The generated text must relay
    /// `notice` instead of answering from general knowledge.
    NoReliableEvidence { notice: String },
}

/// Everything the generation collaborator receives for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationInput {
    pub query: String,

    /// Rendered context block, `None` when evidence was withheld
    pub context: Option<String>,

    pub citations: Vec<Citation>,
    pub response_mode: ResponseMode,
    pub evidence: EvidenceSignal,
}

#[async_trait]
pub trait GenerationCollaborator: Send + Sync {
    async fn generate(&self, input: GenerationInput) -> Result<String>;

    fn name(&self) -> &str;
}

/// Build the configured collaborator, `None` for retrieval-only deployments
pub fn create_generator(config: &GenerationConfig) -> Result<Option<Arc<dyn GenerationCollaborator>>> {
    match config.provider.as_str() {
        "none" => Ok(None),
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| AppError::Configuration {
                    message: "generation.api_key is required for the openai provider".to_string(),
                })?;
            Ok(Some(Arc::new(HttpGenerationCollaborator::new(config, api_key)?)))
        }
        other => Err(AppError::Configuration {
            message: format!("Unknown generation provider: {}", other),
        }),
    }
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat-completions client for any OpenAI-compatible endpoint
pub struct HttpGenerationCollaborator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl HttpGenerationCollaborator {
    pub fn new(config: &GenerationConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl GenerationCollaborator for HttpGenerationCollaborator {
    async fn generate(&self, input: GenerationInput) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt(&input),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(&input),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ServiceUnavailable {
                message: format!("generation service returned {}: {}", status, body),
            });
        }

        let chat: ChatResponse = response.json().await?;
        let text = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AppError::ServiceUnavailable {
                message: "generation service returned no choices".to_string(),
            })?;

        debug!(model = %self.model, chars = text.len(), "Generation complete");
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn mode_instruction(mode: ResponseMode) -> &'static str {
    match mode {
        ResponseMode::Fact => "Answer in one or two sentences.",
        ResponseMode::Explain => "Explain the answer step by step.",
        ResponseMode::Conflicts => {
            "The sources disagree. Present each position with its source and date."
        }
    }
}

/// System prompt for one turn
pub fn system_prompt(input: &GenerationInput) -> String {
    match &input.evidence {
        EvidenceSignal::Grounded => format!(
            "You answer questions using only the numbered sources provided. \
             After every factual sentence append the marker of the source it comes from, \
             for example [^US11281020B2:claims]. If the sources do not answer the question, say so. {}",
            mode_instruction(input.response_mode)
        ),
        EvidenceSignal::NoReliableEvidence { notice } => format!(
            "No trustworthy source was retrieved for this question. Reply with this notice: \"{}\" \
             Do not answer from general knowledge and do not invent citations.",
            notice
        ),
    }
}

/// User prompt for one turn
pub fn user_prompt(input: &GenerationInput) -> String {
    match &input.context {
        Some(context) if !context.is_empty() => {
            format!("Sources:\n{}\n\nQuestion: {}", context, input.query)
        }
        _ => format!("Question: {}", input.query),
    }
}
