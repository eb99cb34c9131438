//! Generative-request gateway.
//!
//! Each operation maps one application intent to one model and one request
//! shape, awaits a single provider call and extracts the field the caller
//! needs. There is no retry and no caching; every failure is returned to the
//! caller, which decides between a fallback and surfacing the error.

use crate::config::ModelConfig;
use crate::models::{Coordinate, DataUri, DataUriError, GroundedAnswer, GroundingSource};
use crate::services::metrics;
use crate::services::providers::{
    GenerateRequest, GenerativeProvider, GroundingChunk, GroundingTool, Part, ProviderError,
    ProviderResponse, Turn, TurnRole,
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Returned by [`ClinicGateway::quick_summary_or_fallback`] when the call fails.
pub const SUMMARY_FALLBACK: &str = "Unable to generate summary at this time.";

pub const EMPTY_SUMMARY: &str = "No summary available.";
pub const EMPTY_SEARCH_ANSWER: &str = "No information found.";
pub const EMPTY_PLACES_ANSWER: &str = "No locations found.";
pub const EMPTY_CHAT_REPLY: &str = "I apologize, I could not generate a response.";

/// Role-defining instruction for every assistant chat session.
pub const ASSISTANT_INSTRUCTION: &str = "You are an expert dental assistant and clinic manager. \
You help with patient triage, administrative tasks, and complex medical terminology explanations. \
Be professional, concise, and helpful.";

const MARKDOWN_LINK: &str = r"\[([^\]]+)\]\((https?://[^)\s]+)\)";

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid image: {0}")]
    InvalidImage(#[from] DataUriError),

    #[error("Malformed provider output: {0}")]
    MalformedOutput(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Provider(e) if e.is_transient())
    }
}

/// Entry point for every call to the generative API. Cheap to clone.
#[derive(Clone)]
pub struct ClinicGateway {
    provider: Arc<dyn GenerativeProvider>,
    models: Arc<ModelConfig>,
}

impl ClinicGateway {
    pub fn new(provider: Arc<dyn GenerativeProvider>, models: ModelConfig) -> Self {
        Self {
            provider,
            models: Arc::new(models),
        }
    }

    pub fn models(&self) -> &ModelConfig {
        &self.models
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn health_check(&self) -> Result<(), ProviderError> {
        self.provider.health_check().await
    }

    /// Issue exactly one provider call, recording latency and outcome.
    async fn call(
        &self,
        operation: &'static str,
        request: GenerateRequest,
    ) -> Result<ProviderResponse, GatewayError> {
        let provider = self.provider.name();
        let start = Instant::now();
        let result = self.provider.generate(&request).await;
        metrics::record_provider_latency(provider, &request.model, start.elapsed().as_secs_f64());

        match &result {
            Ok(response) => {
                metrics::record_tokens(&request.model, response.input_tokens, response.output_tokens);
                metrics::record_gateway_request(operation, &request.model, "ok");
                tracing::debug!(
                    operation,
                    model = %request.model,
                    input_tokens = response.input_tokens,
                    output_tokens = response.output_tokens,
                    finish_reason = response.finish_reason.as_str(),
                    "Gateway call completed"
                );
            }
            Err(e) => {
                metrics::record_provider_error(provider, e.kind());
                metrics::record_gateway_request(operation, &request.model, "error");
                tracing::error!(
                    operation,
                    model = %request.model,
                    error = %e,
                    transient = e.is_transient(),
                    "Gateway call failed"
                );
            }
        }

        result.map_err(GatewayError::from)
    }

    /// Short text summary from the lightweight model.
    #[tracing::instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub async fn quick_summary(&self, prompt: &str) -> Result<String, GatewayError> {
        require_text("prompt", prompt)?;

        let request = GenerateRequest::text(&self.models.summary_model, prompt);
        let response = self.call("quick_summary", request).await?;

        Ok(response.text().unwrap_or_else(|| EMPTY_SUMMARY.to_string()))
    }

    /// Like [`ClinicGateway::quick_summary`], but any failure becomes
    /// [`SUMMARY_FALLBACK`].
    pub async fn quick_summary_or_fallback(&self, prompt: &str) -> String {
        match self.quick_summary(prompt).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(error = %e, "Falling back to canned summary");
                SUMMARY_FALLBACK.to_string()
            }
        }
    }

    /// Apply a free-text edit instruction to an image.
    ///
    /// Returns `None` when the model answered without an image. The result is
    /// always labelled `image/png`, whatever the input or returned MIME type.
    #[tracing::instrument(skip(self, image, instruction), fields(mime_type = %image.mime_type()))]
    pub async fn edit_image(
        &self,
        image: &DataUri,
        instruction: &str,
    ) -> Result<Option<DataUri>, GatewayError> {
        require_text("instruction", instruction)?;
        if !image.is_image() {
            return Err(GatewayError::InvalidInput(format!(
                "expected an image, got {}",
                image.mime_type()
            )));
        }

        let request = GenerateRequest {
            model: self.models.image_model.clone(),
            system_instruction: None,
            contents: vec![Turn {
                role: TurnRole::User,
                parts: vec![
                    Part::InlineData {
                        mime_type: image.mime_type().to_string(),
                        data: image.data().to_string(),
                    },
                    Part::Text(instruction.to_string()),
                ],
            }],
            grounding: None,
        };

        let response = self.call("edit_image", request).await?;

        match response.first_inline_data() {
            Some((returned_mime, data)) => {
                if returned_mime != DataUri::DEFAULT_MIME_TYPE {
                    tracing::debug!(returned_mime, "Relabelling edited image as image/png");
                }
                DataUri::png(data)
                    .map(Some)
                    .map_err(|e| GatewayError::MalformedOutput(e.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Answer a question with web-search grounding.
    #[tracing::instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn search(&self, query: &str) -> Result<GroundedAnswer, GatewayError> {
        require_text("query", query)?;

        let request = GenerateRequest::text(&self.models.grounded_model, query)
            .with_grounding(GroundingTool::Search);
        let response = self.call("search", request).await?;

        let sources = response
            .grounding_chunks
            .iter()
            .filter_map(|chunk| match chunk {
                GroundingChunk::Web { title, uri } => source(title, uri),
                GroundingChunk::Maps { .. } => None,
            })
            .collect();

        Ok(GroundedAnswer {
            text: response
                .text()
                .unwrap_or_else(|| EMPTY_SEARCH_ANSWER.to_string()),
            sources,
        })
    }

    /// Find places with maps grounding, biased towards `location` when given.
    ///
    /// Citations come from the map grounding chunks; when there are none, the
    /// markdown links embedded in the answer are used instead.
    #[tracing::instrument(skip(self, query), fields(query_len = query.len()))]
    pub async fn find_places(
        &self,
        query: &str,
        location: Option<Coordinate>,
    ) -> Result<GroundedAnswer, GatewayError> {
        require_text("query", query)?;

        let request = GenerateRequest::text(&self.models.grounded_model, query)
            .with_grounding(GroundingTool::Maps { location });
        let response = self.call("find_places", request).await?;

        let text = response
            .text()
            .unwrap_or_else(|| EMPTY_PLACES_ANSWER.to_string());

        let mut sources: Vec<GroundingSource> = response
            .grounding_chunks
            .iter()
            .filter_map(|chunk| match chunk {
                GroundingChunk::Maps { title, uri } => source(title, uri),
                GroundingChunk::Web { .. } => None,
            })
            .collect();

        if sources.is_empty() {
            sources = markdown_links(&text);
        }

        Ok(GroundedAnswer { text, sources })
    }

    /// Start a conversation with the assistant model.
    pub fn create_chat_session(&self) -> ChatSession {
        ChatSession {
            id: Uuid::new_v4(),
            gateway: self.clone(),
            model: self.models.chat_model.clone(),
            system_instruction: ASSISTANT_INSTRUCTION.to_string(),
            history: Mutex::new(Vec::new()),
        }
    }
}

/// Creates chat sessions; the seam views use so tests can count creations.
pub trait ChatSessionFactory: Send + Sync {
    fn create_chat_session(&self) -> ChatSession;
}

impl ChatSessionFactory for ClinicGateway {
    fn create_chat_session(&self) -> ChatSession {
        ClinicGateway::create_chat_session(self)
    }
}

/// A stateful conversation. Sends are serialized; a turn is added to the
/// history only when the provider answered.
pub struct ChatSession {
    id: Uuid,
    gateway: ClinicGateway,
    model: String,
    system_instruction: String,
    history: Mutex<Vec<Turn>>,
}

impl ChatSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of turns (user and model) recorded so far.
    pub async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }

    #[tracing::instrument(skip(self, text), fields(session_id = %self.id))]
    pub async fn send_message(&self, text: &str) -> Result<String, GatewayError> {
        require_text("message", text)?;

        let mut history = self.history.lock().await;

        let user_turn = Turn::user_text(text);
        let mut contents = history.clone();
        contents.push(user_turn.clone());

        let request = GenerateRequest {
            model: self.model.clone(),
            system_instruction: Some(self.system_instruction.clone()),
            contents,
            grounding: None,
        };

        let response = self.gateway.call("chat", request).await?;
        let reply = response
            .text()
            .unwrap_or_else(|| EMPTY_CHAT_REPLY.to_string());

        history.push(user_turn);
        history.push(Turn::model_text(reply.clone()));

        Ok(reply)
    }
}

fn require_text(field: &str, value: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn source(title: &str, uri: &str) -> Option<GroundingSource> {
    let uri = uri.trim();
    if uri.is_empty() {
        return None;
    }
    let title = if title.trim().is_empty() { uri } else { title.trim() };
    Some(GroundingSource {
        title: title.to_string(),
        uri: uri.to_string(),
    })
}

fn markdown_links(text: &str) -> Vec<GroundingSource> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(MARKDOWN_LINK).expect("markdown link pattern is valid"));

    pattern
        .captures_iter(text)
        .filter_map(|captures| source(&captures[1], &captures[2]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::mock::MockProvider;

    const PNG_PAYLOAD: &str = "aGVsbG8=";

    fn gateway_with(provider: Arc<MockProvider>) -> ClinicGateway {
        ClinicGateway::new(provider, ModelConfig::default())
    }

    #[tokio::test]
    async fn summary_falls_back_when_provider_is_unavailable() {
        let gateway = gateway_with(Arc::new(MockProvider::failing()));
        let summary = gateway
            .quick_summary_or_fallback("Summarize: 5 appointments today")
            .await;
        assert_eq!(summary, "Unable to generate summary at this time.");
    }

    #[tokio::test]
    async fn summary_fallback_is_never_empty() {
        let gateway = gateway_with(Arc::new(MockProvider::failing()));
        for prompt in ["", "   ", "x", "Summarize the day"] {
            assert!(!gateway.quick_summary_or_fallback(prompt).await.is_empty());
        }
    }

    #[tokio::test]
    async fn summary_uses_lightweight_model_and_defaults_empty_text() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_text("")));
        let gateway = gateway_with(provider.clone());

        let summary = gateway.quick_summary("Summarize").await.unwrap();

        assert_eq!(summary, EMPTY_SUMMARY);
        assert_eq!(provider.requests()[0].model, "gemini-flash-lite-latest");
    }

    #[tokio::test]
    async fn summary_errors_propagate_from_the_strict_variant() {
        let gateway = gateway_with(Arc::new(MockProvider::failing()));
        let result = gateway.quick_summary("Summarize").await;
        assert!(matches!(result, Err(GatewayError::Provider(_))));
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn edit_image_sends_inline_data_and_returns_png_uri() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_parts(vec![
            Part::Text("Here you go".to_string()),
            Part::InlineData {
                mime_type: "image/jpeg".to_string(),
                data: PNG_PAYLOAD.to_string(),
            },
        ])));
        let gateway = gateway_with(provider.clone());

        let input = DataUri::parse(&format!("data:image/jpeg;base64,{}", PNG_PAYLOAD)).unwrap();
        let output = gateway
            .edit_image(&input, "Make the teeth whiter")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(output.to_string(), format!("data:image/png;base64,{}", PNG_PAYLOAD));

        let request = &provider.requests()[0];
        assert_eq!(request.model, "gemini-2.5-flash-image");
        assert_eq!(
            request.contents[0].parts[0],
            Part::InlineData {
                mime_type: "image/jpeg".to_string(),
                data: PNG_PAYLOAD.to_string(),
            }
        );
        assert_eq!(request.last_user_text(), Some("Make the teeth whiter"));
    }

    #[tokio::test]
    async fn edit_image_without_image_part_is_none() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_text("I cannot edit this image")));
        let gateway = gateway_with(provider);

        let input = DataUri::png(PNG_PAYLOAD).unwrap();
        assert_eq!(gateway.edit_image(&input, "Highlight the cavity").await.unwrap(), None);
    }

    #[tokio::test]
    async fn edit_image_rejects_empty_or_corrupt_payloads() {
        let provider = Arc::new(MockProvider::new());
        for data in ["", "%%%"] {
            provider.push_response(Ok(ProviderResponse::from_parts(vec![Part::InlineData {
                mime_type: "image/png".to_string(),
                data: data.to_string(),
            }])));
        }
        let gateway = gateway_with(provider);
        let input = DataUri::png(PNG_PAYLOAD).unwrap();

        for _ in 0..2 {
            let result = gateway.edit_image(&input, "Simulate veneers").await;
            assert!(matches!(result, Err(GatewayError::MalformedOutput(_))));
        }
    }

    #[tokio::test]
    async fn edit_image_validates_inputs_before_calling() {
        let provider = Arc::new(MockProvider::new());
        let gateway = gateway_with(provider.clone());

        let image = DataUri::png(PNG_PAYLOAD).unwrap();
        let not_image = DataUri::from_base64("application/pdf", PNG_PAYLOAD).unwrap();

        assert!(matches!(
            gateway.edit_image(&image, "  ").await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert!(matches!(
            gateway.edit_image(&not_image, "Whiten").await,
            Err(GatewayError::InvalidInput(_))
        ));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn search_keeps_only_web_sources_with_uris() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_text("Prophylaxis answer").with_grounding(
            vec![
                GroundingChunk::Web {
                    title: "ADA guidance".to_string(),
                    uri: "https://ada.org/guidance".to_string(),
                },
                GroundingChunk::Web {
                    title: "No link".to_string(),
                    uri: "  ".to_string(),
                },
                GroundingChunk::Maps {
                    title: "Clinic".to_string(),
                    uri: "https://maps.google.com/?cid=1".to_string(),
                },
                GroundingChunk::Web {
                    title: String::new(),
                    uri: "https://cdc.gov/oralhealth".to_string(),
                },
            ],
        )));
        let gateway = gateway_with(provider.clone());

        let answer = gateway.search("antibiotic prophylaxis").await.unwrap();

        assert_eq!(answer.text, "Prophylaxis answer");
        assert_eq!(
            answer.sources,
            vec![
                GroundingSource {
                    title: "ADA guidance".to_string(),
                    uri: "https://ada.org/guidance".to_string(),
                },
                GroundingSource {
                    title: "https://cdc.gov/oralhealth".to_string(),
                    uri: "https://cdc.gov/oralhealth".to_string(),
                },
            ]
        );
        assert!(answer.sources.iter().all(|s| !s.uri.is_empty()));
        assert_eq!(provider.requests()[0].grounding, Some(GroundingTool::Search));
    }

    #[tokio::test]
    async fn search_with_empty_text_uses_default_answer() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_text("")));
        let gateway = gateway_with(provider);

        let answer = gateway.search("anything").await.unwrap();
        assert_eq!(answer.text, EMPTY_SEARCH_ANSWER);
        assert!(answer.sources.is_empty());
    }

    #[tokio::test]
    async fn find_places_passes_location_and_extracts_map_sources() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_text("Two endodontists nearby").with_grounding(
            vec![GroundingChunk::Maps {
                title: "Bay Endodontics".to_string(),
                uri: "https://maps.google.com/?cid=42".to_string(),
            }],
        )));
        let gateway = gateway_with(provider.clone());
        let here = Coordinate {
            lat: 40.7128,
            lng: -74.006,
        };

        let answer = gateway.find_places("Endodontists near me", Some(here)).await.unwrap();

        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].title, "Bay Endodontics");
        assert_eq!(
            provider.requests()[0].grounding,
            Some(GroundingTool::Maps {
                location: Some(here)
            })
        );
    }

    #[tokio::test]
    async fn find_places_falls_back_to_markdown_links() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_text(
            "Try [Downtown Pharmacy](https://maps.google.com/?cid=7) or [not a link](ftp://x).",
        )));
        let gateway = gateway_with(provider);

        let answer = gateway.find_places("24h Pharmacies", None).await.unwrap();

        assert_eq!(
            answer.sources,
            vec![GroundingSource {
                title: "Downtown Pharmacy".to_string(),
                uri: "https://maps.google.com/?cid=7".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn find_places_errors_propagate() {
        let gateway = gateway_with(Arc::new(MockProvider::failing()));
        assert!(gateway.find_places("labs", None).await.is_err());
    }

    #[tokio::test]
    async fn chat_session_carries_history_and_instruction() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Ok(ProviderResponse::from_text("Triage first.")));
        provider.push_response(Ok(ProviderResponse::from_text("Then schedule.")));
        let gateway = gateway_with(provider.clone());
        let session = gateway.create_chat_session();

        assert_eq!(session.send_message("Patient in pain").await.unwrap(), "Triage first.");
        assert_eq!(session.send_message("And then?").await.unwrap(), "Then schedule.");
        assert_eq!(session.history_len().await, 4);

        let second = &provider.requests()[1];
        assert_eq!(second.model, "gemini-3-pro-preview");
        assert_eq!(second.system_instruction.as_deref(), Some(ASSISTANT_INSTRUCTION));
        assert_eq!(second.contents.len(), 3);
        assert_eq!(second.contents[1], Turn::model_text("Triage first."));
    }

    #[tokio::test]
    async fn failed_chat_turn_is_not_recorded() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Err(ProviderError::RateLimited));
        let gateway = gateway_with(provider);
        let session = gateway.create_chat_session();

        assert!(session.send_message("Hello").await.is_err());
        assert_eq!(session.history_len().await, 0);
    }

    #[test]
    fn markdown_links_require_http_uris() {
        let links = markdown_links("[A](https://a.example) [B](http://b.example) [C](mailto:c)");
        let titles: Vec<&str> = links.iter().map(|l| l.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }
}
