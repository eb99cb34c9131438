//! Generative AI provider abstractions and implementations.
//!
//! The gateway talks to a [`GenerativeProvider`] trait object, so the Gemini
//! backend can be swapped for the scripted mock in tests and offline runs.

pub mod gemini;
pub mod mock;

use crate::models::Coordinate;
use async_trait::async_trait;
use thiserror::Error;

/// Error type for provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Content filtered")]
    ContentFiltered,

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl ProviderError {
    /// Failures that may succeed if the caller tries again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimited | ProviderError::NetworkError(_))
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotConfigured(_) => "not_configured",
            ProviderError::Unauthorized(_) => "unauthorized",
            ProviderError::ApiError(_) => "api_error",
            ProviderError::InvalidRequest(_) => "invalid_request",
            ProviderError::MalformedResponse(_) => "malformed_response",
            ProviderError::RateLimited => "rate_limited",
            ProviderError::ContentFiltered => "content_filtered",
            ProviderError::NetworkError(_) => "network_error",
        }
    }
}

/// Author of a conversation turn, in provider terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Model,
}

/// A piece of turn content.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(String),
    InlineData { mime_type: String, data: String },
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Model,
            parts: vec![Part::Text(text.into())],
        }
    }
}

/// Provider-side retrieval attached to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum GroundingTool {
    /// Web search grounding.
    Search,
    /// Maps grounding, optionally biased towards a location.
    Maps { location: Option<Coordinate> },
}

/// A single generation request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub contents: Vec<Turn>,
    pub grounding: Option<GroundingTool>,
}

impl GenerateRequest {
    pub fn text(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            contents: vec![Turn::user_text(prompt)],
            grounding: None,
        }
    }

    pub fn with_grounding(mut self, tool: GroundingTool) -> Self {
        self.grounding = Some(tool);
        self
    }

    /// Text of the last user turn.
    pub fn last_user_text(&self) -> Option<&str> {
        self.contents
            .iter()
            .rev()
            .find(|turn| turn.role == TurnRole::User)
            .and_then(|turn| {
                turn.parts.iter().find_map(|part| match part {
                    Part::Text(text) => Some(text.as_str()),
                    Part::InlineData { .. } => None,
                })
            })
    }
}

/// A retrieved source the provider used to ground its answer.
#[derive(Debug, Clone, PartialEq)]
pub enum GroundingChunk {
    Web { title: String, uri: String },
    Maps { title: String, uri: String },
}

/// Reason why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Complete,
    Length,
    ContentFilter,
    Other,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Complete => "complete",
            FinishReason::Length => "length",
            FinishReason::ContentFilter => "content_filter",
            FinishReason::Other => "other",
        }
    }
}

/// Result of a provider call, reduced to the first candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub parts: Vec<Part>,
    pub grounding_chunks: Vec<GroundingChunk>,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub finish_reason: FinishReason,
}

impl ProviderResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::Text(text.into())],
            grounding_chunks: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Complete,
        }
    }

    pub fn from_parts(parts: Vec<Part>) -> Self {
        Self {
            parts,
            ..Self::from_text("")
        }
    }

    pub fn with_grounding(mut self, chunks: Vec<GroundingChunk>) -> Self {
        self.grounding_chunks = chunks;
        self
    }

    /// Concatenated text parts, `None` when there is no non-empty text.
    pub fn text(&self) -> Option<String> {
        let text: String = self
            .parts
            .iter()
            .filter_map(|part| match part {
                Part::Text(text) => Some(text.as_str()),
                Part::InlineData { .. } => None,
            })
            .collect();

        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// The first inline-data part, as `(mime_type, data)`.
    pub fn first_inline_data(&self) -> Option<(&str, &str)> {
        self.parts.iter().find_map(|part| match part {
            Part::InlineData { mime_type, data } => Some((mime_type.as_str(), data.as_str())),
            Part::Text(_) => None,
        })
    }
}

/// Trait for generative content providers (e.g., Gemini).
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Provider label for logs and metrics.
    fn name(&self) -> &'static str;

    /// Generate a response for a single request.
    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError>;

    /// Health check.
    async fn health_check(&self) -> Result<(), ProviderError>;
}
