//! Gemini AI provider implementation.
//!
//! Calls the `generateContent` REST method of Google's Gemini API and maps
//! the wire format to and from the provider-neutral request types.

use super::{
    FinishReason, GenerateRequest, GenerativeProvider, GroundingChunk, GroundingTool, Part,
    ProviderError, ProviderResponse, TurnRole,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Gemini API base URL.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The credential travels in this header so it never appears in a request URL.
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini provider configuration.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: GEMINI_API_BASE.to_string(),
            timeout,
        }
    }
}

/// Gemini content provider.
pub struct GeminiProvider {
    config: GeminiConfig,
    client: Client,
}

impl GeminiProvider {
    pub fn new(config: GeminiConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ProviderError::NotConfigured(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { config, client })
    }

    /// Build the API URL for the given model and method.
    fn api_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.config.base_url, model, method)
    }

    fn ensure_configured(&self) -> Result<(), ProviderError> {
        if self.config.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(
                "Gemini API key not configured".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl GenerativeProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        self.ensure_configured()?;

        let body = GenerateContentRequest::from(request);
        let url = self.api_url(&request.model, "generateContent");

        tracing::debug!(
            model = %request.model,
            turns = request.contents.len(),
            grounding = ?request.grounding,
            "Sending request to Gemini API"
        );

        let response = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(status_to_error(status, error_text));
        }

        let api_response: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::MalformedResponse(format!(
                "Failed to parse response: {}",
                e.without_url()
            ))
        })?;

        api_response.into_provider_response()
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.ensure_configured()?;

        // Listing models verifies the API key works
        let url = format!("{}/models", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.config.api_key)
            .send()
            .await
            .map_err(network_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            Err(status_to_error(status, "Health check failed".to_string()))
        }
    }
}

/// Transport failures are reported without the request URL.
fn network_error(err: reqwest::Error) -> ProviderError {
    ProviderError::NetworkError(err.without_url().to_string())
}

fn status_to_error(status: StatusCode, body: String) -> ProviderError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Unauthorized(format!("Gemini API error {}: {}", status, body))
        }
        StatusCode::BAD_REQUEST => {
            ProviderError::InvalidRequest(format!("Gemini API error {}: {}", status, body))
        }
        _ => ProviderError::ApiError(format!("Gemini API error {}: {}", status, body)),
    }
}

fn parse_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        None | Some("STOP") => FinishReason::Complete,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("PROHIBITED_CONTENT") | Some("BLOCKLIST") | Some("SPII")
        | Some("IMAGE_SAFETY") => FinishReason::ContentFilter,
        Some(_) => FinishReason::Other,
    }
}

// ============================================================================
// Gemini API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<ToolConfig>,
}

impl From<&GenerateRequest> for GenerateContentRequest {
    fn from(request: &GenerateRequest) -> Self {
        let contents = request
            .contents
            .iter()
            .map(|turn| Content {
                role: Some(
                    match turn.role {
                        TurnRole::User => "user",
                        TurnRole::Model => "model",
                    }
                    .to_string(),
                ),
                parts: turn.parts.iter().map(ContentPart::from).collect(),
            })
            .collect();

        let system_instruction = request.system_instruction.as_ref().map(|text| Content {
            role: None,
            parts: vec![ContentPart::Text { text: text.clone() }],
        });

        let (tools, tool_config) = match &request.grounding {
            None => (Vec::new(), None),
            Some(GroundingTool::Search) => (vec![Tool::GoogleSearch(EmptyConfig {})], None),
            Some(GroundingTool::Maps { location }) => (
                vec![Tool::GoogleMaps(EmptyConfig {})],
                location.map(|coordinate| ToolConfig {
                    retrieval_config: RetrievalConfig {
                        lat_lng: LatLng {
                            latitude: coordinate.lat,
                            longitude: coordinate.lng,
                        },
                    },
                }),
            ),
        };

        Self {
            contents,
            system_instruction,
            tools,
            tool_config,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    // Function calls, thought signatures and other parts this service ignores
    Other(serde_json::Value),
}

impl From<&Part> for ContentPart {
    fn from(part: &Part) -> Self {
        match part {
            Part::Text(text) => ContentPart::Text { text: text.clone() },
            Part::InlineData { mime_type, data } => ContentPart::InlineData {
                inline_data: InlineData {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                },
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct EmptyConfig {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Tool {
    GoogleSearch(EmptyConfig),
    GoogleMaps(EmptyConfig),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolConfig {
    retrieval_config: RetrievalConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalConfig {
    lat_lng: LatLng,
}

#[derive(Debug, Serialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateContentResponse {
    fn into_provider_response(self) -> Result<ProviderResponse, ProviderError> {
        let usage = self.usage_metadata.unwrap_or_default();

        let Some(candidate) = self.candidates.into_iter().next() else {
            if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
                tracing::warn!(block_reason = %reason, "Gemini blocked the prompt");
                return Err(ProviderError::ContentFiltered);
            }
            return Err(ProviderError::MalformedResponse(
                "Response contained no candidates".to_string(),
            ));
        };

        let finish_reason = parse_finish_reason(candidate.finish_reason.as_deref());
        if finish_reason == FinishReason::ContentFilter {
            return Err(ProviderError::ContentFiltered);
        }

        let parts = candidate
            .content
            .map(|content| content.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(Part::Text(text)),
                ContentPart::InlineData { inline_data } => Some(Part::InlineData {
                    mime_type: inline_data.mime_type,
                    data: inline_data.data,
                }),
                ContentPart::Other(_) => None,
            })
            .collect();

        let grounding_chunks = candidate
            .grounding_metadata
            .map(|metadata| metadata.grounding_chunks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|chunk| {
                if let Some(web) = chunk.web {
                    Some(GroundingChunk::Web {
                        title: web.title,
                        uri: web.uri,
                    })
                } else {
                    chunk.maps.map(|maps| GroundingChunk::Maps {
                        title: maps.title,
                        uri: maps.uri,
                    })
                }
            })
            .collect();

        Ok(ProviderResponse {
            parts,
            grounding_chunks,
            input_tokens: usage.prompt_token_count.unwrap_or(0),
            output_tokens: usage.candidates_token_count.unwrap_or(0),
            finish_reason,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<WireGroundingChunk>,
}

#[derive(Debug, Deserialize)]
struct WireGroundingChunk {
    #[serde(default)]
    web: Option<SourceRef>,
    #[serde(default)]
    maps: Option<SourceRef>,
}

#[derive(Debug, Deserialize)]
struct SourceRef {
    #[serde(default)]
    uri: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinate;
    use crate::services::providers::Turn;
    use serde_json::json;

    fn parse(body: serde_json::Value) -> Result<ProviderResponse, ProviderError> {
        serde_json::from_value::<GenerateContentResponse>(body)
            .unwrap()
            .into_provider_response()
    }

    #[test]
    fn serializes_chat_request_with_system_instruction() {
        let request = GenerateRequest {
            model: "gemini-3-pro-preview".to_string(),
            system_instruction: Some("Be concise.".to_string()),
            contents: vec![Turn::user_text("Hi"), Turn::model_text("Hello")],
            grounding: None,
        };

        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "Hi"}]},
                    {"role": "model", "parts": [{"text": "Hello"}]}
                ],
                "systemInstruction": {"parts": [{"text": "Be concise."}]}
            })
        );
    }

    #[test]
    fn serializes_inline_image_part() {
        let request = GenerateRequest {
            model: "gemini-2.5-flash-image".to_string(),
            system_instruction: None,
            contents: vec![Turn {
                role: TurnRole::User,
                parts: vec![
                    Part::InlineData {
                        mime_type: "image/jpeg".to_string(),
                        data: "aGVsbG8=".to_string(),
                    },
                    Part::Text("Whiten the teeth".to_string()),
                ],
            }],
            grounding: None,
        };

        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();
        assert_eq!(
            body["contents"][0]["parts"][0],
            json!({"inlineData": {"mimeType": "image/jpeg", "data": "aGVsbG8="}})
        );
        assert_eq!(body["contents"][0]["parts"][1], json!({"text": "Whiten the teeth"}));
    }

    #[test]
    fn serializes_maps_tool_with_location() {
        let request = GenerateRequest::text("gemini-2.5-flash", "Endodontists near me")
            .with_grounding(GroundingTool::Maps {
                location: Some(Coordinate {
                    lat: 37.7749,
                    lng: -122.4194,
                }),
            });

        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();
        assert_eq!(body["tools"], json!([{"googleMaps": {}}]));
        assert_eq!(
            body["toolConfig"],
            json!({"retrievalConfig": {"latLng": {"latitude": 37.7749, "longitude": -122.4194}}})
        );
    }

    #[test]
    fn serializes_search_tool_without_tool_config() {
        let request = GenerateRequest::text("gemini-2.5-flash", "fluoride guidance")
            .with_grounding(GroundingTool::Search);

        let body = serde_json::to_value(GenerateContentRequest::from(&request)).unwrap();
        assert_eq!(body["tools"], json!([{"googleSearch": {}}]));
        assert!(body.get("toolConfig").is_none());
    }

    #[test]
    fn parses_text_usage_and_grounding() {
        let response = parse(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "Answer"}]},
                "finishReason": "STOP",
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://ada.org", "title": "ADA"}},
                        {"maps": {"uri": "https://maps.google.com/?cid=1", "title": "Bay Endo", "placeId": "p1"}}
                    ]
                }
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 34, "totalTokenCount": 46}
        }))
        .unwrap();

        assert_eq!(response.text().as_deref(), Some("Answer"));
        assert_eq!(response.input_tokens, 12);
        assert_eq!(response.output_tokens, 34);
        assert_eq!(
            response.grounding_chunks,
            vec![
                GroundingChunk::Web {
                    title: "ADA".to_string(),
                    uri: "https://ada.org".to_string()
                },
                GroundingChunk::Maps {
                    title: "Bay Endo".to_string(),
                    uri: "https://maps.google.com/?cid=1".to_string()
                },
            ]
        );
    }

    #[test]
    fn parses_inline_image_and_ignores_unknown_parts() {
        let response = parse(json!({
            "candidates": [{
                "content": {"parts": [
                    {"thoughtSignature": "abc"},
                    {"inlineData": {"mimeType": "image/png", "data": "aGVsbG8="}}
                ]}
            }]
        }))
        .unwrap();

        assert_eq!(response.first_inline_data(), Some(("image/png", "aGVsbG8=")));
        assert_eq!(response.text(), None);
    }

    #[test]
    fn safety_finish_reason_is_content_filtered() {
        let result = parse(json!({
            "candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]
        }));
        assert!(matches!(result, Err(ProviderError::ContentFiltered)));
    }

    #[test]
    fn blocked_prompt_is_content_filtered() {
        let result = parse(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
        assert!(matches!(result, Err(ProviderError::ContentFiltered)));
    }

    #[test]
    fn missing_candidates_is_malformed() {
        let result = parse(json!({}));
        assert!(matches!(result, Err(ProviderError::MalformedResponse(_))));
    }

    #[test]
    fn maps_http_statuses_to_error_kinds() {
        assert!(matches!(
            status_to_error(StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            status_to_error(StatusCode::FORBIDDEN, String::new()),
            ProviderError::Unauthorized(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::BAD_REQUEST, String::new()),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            status_to_error(StatusCode::INTERNAL_SERVER_ERROR, String::new()),
            ProviderError::ApiError(_)
        ));
    }

    #[tokio::test]
    async fn missing_api_key_fails_without_network() {
        let provider = GeminiProvider::new(GeminiConfig::new("", Duration::from_secs(5))).unwrap();
        let result = provider
            .generate(&GenerateRequest::text("gemini-flash-lite-latest", "hello"))
            .await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
        assert!(provider.health_check().await.is_err());
    }

    #[tokio::test]
    async fn transport_errors_do_not_expose_the_api_key() {
        let config = GeminiConfig {
            api_key: "SECRET".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_secs(2),
        };
        let provider = GeminiProvider::new(config).unwrap();

        let err = provider.health_check().await.unwrap_err();
        assert!(matches!(err, ProviderError::NetworkError(_)));
        assert!(!err.to_string().contains("SECRET"));

        let err = provider
            .generate(&GenerateRequest::text("gemini-flash-lite-latest", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NetworkError(_)));
        assert!(!err.to_string().contains("SECRET"));
        assert!(!format!("{:?}", err).contains("SECRET"));
    }

    #[test]
    fn api_url_carries_no_credential() {
        let provider =
            GeminiProvider::new(GeminiConfig::new("SECRET", Duration::from_secs(5))).unwrap();
        let url = provider.api_url("gemini-2.5-flash", "generateContent");
        assert_eq!(
            url,
            format!("{}/models/gemini-2.5-flash:generateContent", GEMINI_API_BASE)
        );
    }
}
